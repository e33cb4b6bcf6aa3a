use bench_core::{SessionId, WorkbenchId};
use serde::{Deserialize, Serialize};
use session_transport::ConnectionState;

/// Session record as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub shell: String,
    #[serde(default)]
    pub cols: u16,
    #[serde(default)]
    pub rows: u16,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub workbench_id: Option<WorkbenchId>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbenchInfo {
    pub id: WorkbenchId,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workbench_id: Option<WorkbenchId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A session record joined with what the transport manager knows about it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session: Session,
    pub state: Option<ConnectionState>,
    pub busy: bool,
    pub reconnect_attempt: u32,
    pub active: bool,
}

impl SessionView {
    pub fn status(&self) -> &'static str {
        match self.state {
            None => "idle",
            Some(ConnectionState::Open) if self.busy => "busy",
            Some(ConnectionState::Open) => "open",
            Some(ConnectionState::Connecting) => "connecting",
            Some(ConnectionState::Closed) => "reconnecting",
        }
    }
}
