use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::DaemonConfig;
use crate::objects::LocalObjectStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: DaemonConfig,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub objects: Option<LocalObjectStore>,
}

impl AppState {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            objects: None,
        }
    }
}
