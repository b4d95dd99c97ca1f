use crate::clock::start_of_day;
use crate::platform::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single authenticated request, as reported by the request layer.
/// Never persisted as-is; folded into the batch accumulator on arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: String,
    pub device_id: Option<String>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn key(&self) -> ActivityKey {
        ActivityKey {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }

    pub fn into_last_seen(self) -> LastSeenRecord {
        LastSeenRecord {
            user_id: self.user_id,
            device_id: self.device_id,
            ip: self.ip,
            user_agent: self.user_agent,
            last_seen: self.timestamp,
        }
    }
}

/// Accumulator and Last-Seen key: one entry per (user, device).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityKey {
    pub user_id: String,
    pub device_id: Option<String>,
}

impl std::fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.device_id {
            Some(device) => write!(f, "{}/{}", self.user_id, device),
            None => write!(f, "{}", self.user_id),
        }
    }
}

/// Most recent activity for a (user, device). `last_seen` never moves backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSeenRecord {
    pub user_id: String,
    pub device_id: Option<String>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl LastSeenRecord {
    pub fn key(&self) -> ActivityKey {
        ActivityKey {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }

    pub fn user_agent_str(&self) -> &str {
        self.user_agent.as_deref().unwrap_or_default()
    }
}

/// One row per user per UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyVisit {
    pub user_id: String,
    pub platform: Platform,
    pub visit_day: DateTime<Utc>,
}

impl DailyVisit {
    /// Builds a visit for the day containing `seen_at`.
    pub fn new(user_id: impl Into<String>, platform: Platform, seen_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            platform,
            visit_day: start_of_day(seen_at),
        }
    }
}

/// Outcome of a daily-visit upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitUpsert {
    Created,
    Refreshed,
    Unchanged,
}

/// How an account came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    Native,
    Guest,
    /// Registered by an application service (bridge).
    Bridged,
}

impl UserKind {
    pub const ALL: [UserKind; 3] = [UserKind::Native, UserKind::Guest, UserKind::Bridged];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Native => "native",
            UserKind::Guest => "guest",
            UserKind::Bridged => "bridged",
        }
    }
}

/// Account registration, owned by the external user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_user_kind")]
    pub kind: UserKind,
}

fn default_user_kind() -> UserKind {
    UserKind::Native
}

impl Registration {
    pub fn native(user_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            created_at,
            kind: UserKind::Native,
        }
    }
}
