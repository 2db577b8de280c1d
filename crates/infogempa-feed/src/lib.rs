//! Earthquake and weather feeds for InfoGempa.
//!
//! A [`FeedCoordinator`] keeps one feed fresh: it loads on start, refreshes on
//! a fixed interval while online and immediately on reconnect, persists every
//! good result, and falls back to the persisted copy when a fetch fails.

pub mod client;
pub mod connectivity;
pub mod coordinates;
pub mod coordinator;
pub mod error;
pub mod install;
pub mod locations;
pub mod source;
pub mod storage;
pub mod types;
pub mod weather;

pub use client::{Decoded, GempaClient, WeatherClient};
pub use connectivity::Connectivity;
pub use coordinates::LatLng;
pub use coordinator::{
    FeedCoordinator, FeedState, RefreshOutcome, RetryHandle, Snapshot, SnapshotOrigin,
};
pub use error::FeedError;
pub use install::{DeferredPrompt, InstallChoice, InstallError, InstallFlow, InstallState};
pub use locations::{LocationBook, LocationRecord};
pub use source::{FeedSource, Fetched, GempaSnapshot, GempaSource, WeatherSource};
pub use storage::{keys, KeyValueStore, SqliteKeyValueStore};
pub use types::{AutoGempa, GempaItem, GempaList, Intensity};
pub use weather::Forecast;
