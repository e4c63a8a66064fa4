// Remote database operations for Supabase cloud sync
//
// All operations use the Supabase REST API (PostgREST). Every gym table is
// keyed by a text `id`, so a single table-generic client covers them all.
//
// Pull order (parents before children) is `TableName::ALL`:
// subscribers, groups, group_items, course_points, diet_items, products,
// sales, sale_items

pub mod common;
pub mod gateway;

pub use common::{ErrorKind, SupabaseClient, SyncError};
pub use gateway::{RemoteGateway, SupabaseGateway};
