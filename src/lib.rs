//! Offline-first sync layer for the gym management app.
//!
//! Mutations land in a local SQLite mirror and a sync queue and never wait
//! on the network. A [`services::cloud_sync::SyncEngine`] pushes the queue
//! to Supabase and pulls the remote tables back into the mirror whenever the
//! [`services::connectivity::ConnectivityMonitor`] reports the app online.

pub mod database;
pub mod models;
pub mod services;
pub mod settings;
