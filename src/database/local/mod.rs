pub mod database;
pub mod mirror;
pub mod settings;
pub mod sync_queue;

pub use database::{default_db_path, init_app_db, init_memory_db, Db};
