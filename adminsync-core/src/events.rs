//! Realtime event types.
//!
//! Every WebSocket text frame, in both directions, is a JSON object
//! `{"event": "<name>", "data": <json or null>}`. Channel membership is
//! expressed with the events `subscribe:<channel>` and
//! `unsubscribe:<channel>`.

use serde::{Deserialize, Serialize};

use crate::invalidation::{Change, ChangeKind};
use crate::types::{Job, JobStats};
use crate::Timestamp;

// ============================================================================
// EVENT NAMES
// ============================================================================

pub const JOB_UPDATE: &str = "job-update";
pub const JOB_ALERT: &str = "job-alert";
pub const JOB_STATS: &str = "job-stats";
pub const ALERT_NEW: &str = "alert:new";
pub const ALERT_UPDATE: &str = "alert:update";
pub const REQUEST_JOB_STATS: &str = "request:job-stats";

const SUBSCRIBE_PREFIX: &str = "subscribe:";
const UNSUBSCRIBE_PREFIX: &str = "unsubscribe:";

// ============================================================================
// FRAME
// ============================================================================

/// One named event on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// An event with no payload.
    pub fn named(event: impl Into<String>) -> Self {
        Self::new(event, serde_json::Value::Null)
    }

    pub fn subscribe(channel: &str) -> Self {
        Self::named(format!("{SUBSCRIBE_PREFIX}{channel}"))
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self::named(format!("{UNSUBSCRIBE_PREFIX}{channel}"))
    }

    /// Channel named by a `subscribe:` frame.
    pub fn subscribed_channel(&self) -> Option<&str> {
        self.event.strip_prefix(SUBSCRIBE_PREFIX)
    }

    /// Channel named by an `unsubscribe:` frame.
    pub fn unsubscribed_channel(&self) -> Option<&str> {
        self.event.strip_prefix(UNSUBSCRIBE_PREFIX)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobUpdateKind {
    Created,
    Updated,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub event: JobUpdateKind,
    pub job: Job,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAlertKind {
    HighFailureRate,
    QueueOverflow,
    ProcessingTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAlert {
    #[serde(rename = "type")]
    pub kind: JobAlertKind,
    pub severity: JobAlertSeverity,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    System,
    Job,
    User,
    Chat,
    Performance,
    Security,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// Operational alert pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    pub status: AlertStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub acknowledged_at: Option<Timestamp>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<Timestamp>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

impl Alert {
    pub fn is_unread(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Inbound event decoded into its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    JobUpdate(Box<JobUpdate>),
    JobAlert(JobAlert),
    JobStats(JobStats),
    AlertNew(Alert),
    AlertUpdate(Alert),
}

impl DomainEvent {
    /// Decode a frame whose name is one of the known domain events.
    ///
    /// Returns `None` for unknown names; `Some(Err(..))` when the name is
    /// known but the payload does not match.
    pub fn decode(frame: &Frame) -> Option<Result<Self, serde_json::Error>> {
        let data = frame.data.clone();
        let decoded = match frame.event.as_str() {
            JOB_UPDATE => serde_json::from_value(data).map(|u| Self::JobUpdate(Box::new(u))),
            JOB_ALERT => serde_json::from_value(data).map(Self::JobAlert),
            JOB_STATS => serde_json::from_value(data).map(Self::JobStats),
            ALERT_NEW => serde_json::from_value(data).map(Self::AlertNew),
            ALERT_UPDATE => serde_json::from_value(data).map(Self::AlertUpdate),
            _ => return None,
        };
        Some(decoded)
    }
}

/// The cache change an inbound event reports, if any.
///
/// Works on the raw payload so that a job update with an unexpected shape
/// still invalidates the job lists; the detail key is only targeted when
/// `job.id` is present.
pub fn change_for(event: &str, data: &serde_json::Value) -> Option<Change> {
    match event {
        JOB_UPDATE => {
            let job_id = data
                .pointer("/job/id")
                .and_then(serde_json::Value::as_str)
                .filter(|id| !id.is_empty());
            Some(match job_id {
                Some(id) => Change::for_subject(ChangeKind::JobUpdated, id),
                None => Change::new(ChangeKind::JobUpdated),
            })
        }
        JOB_STATS => Some(Change::new(ChangeKind::JobStatsUpdated)),
        ALERT_NEW => Some(Change::new(ChangeKind::AlertRaised)),
        ALERT_UPDATE => Some(Change::new(ChangeKind::AlertUpdated)),
        _ => None,
    }
}
