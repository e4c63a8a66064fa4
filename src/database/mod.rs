pub mod local;
pub mod remote;

pub use local::{init_app_db, init_memory_db, Db};
