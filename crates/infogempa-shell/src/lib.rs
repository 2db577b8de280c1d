//! Offline cache for the InfoGempa shell.
//!
//! Keeps a versioned generation of shell assets and the most recent remote
//! API responses so the app keeps working without a network:
//! - shell assets are cached once at install and served cache-first
//! - BMKG / weather responses are served network-first and backfilled
//! - old generations are purged when a new version activates

pub mod error;
pub mod network;
pub mod request;
pub mod route;
pub mod storage;
pub mod worker;

pub use error::ShellError;
pub use network::{Fetch, Network};
pub use request::{request_key, RequestMode, ResponseSource, ShellRequest, ShellResponse};
pub use route::{RequestClass, RoutePolicy};
pub use storage::{CacheStorage, CachedEntry, SqliteCacheStorage};
pub use worker::{ShellWorker, WorkerState};
