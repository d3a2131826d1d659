use std::path::PathBuf;

use crate::calc::cache::AverageCache;
use crate::calc::{EngineConfig, Snapshot};
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub snapshot: Snapshot,
    pub cache: AverageCache,
    pub config: EngineConfig,
}

impl AppState {
    /// Drops memoized aggregates after the snapshot or config changed.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}
