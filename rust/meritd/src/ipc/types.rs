use crate::cloud::SlotStore;
use crate::model::SchoolState;
use crate::summary::{HistorySummary, SummaryProvider};
use crate::sync::SyncGate;
use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

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
    /// Loaded together with `db`; replaced wholesale after every mutation.
    pub school: Option<SchoolState>,
    /// Id of the signed-in teacher.
    pub session: Option<String>,
    pub cloud: Option<Box<dyn SlotStore>>,
    pub sync_gate: SyncGate,
    pub summarizer: Box<dyn SummaryProvider>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            school: None,
            session: None,
            cloud: None,
            sync_gate: SyncGate::default(),
            summarizer: Box::new(HistorySummary),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
