use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::watch::Subscriptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub subs: Subscriptions,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            subs: Subscriptions::new(),
        }
    }
}
