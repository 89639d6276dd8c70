//! Records exchanged with the control plane.
//!
//! The console treats these as snapshots: it never derives or caches anything
//! beyond the entity currently on screen.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub repo_url: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub subdir: Option<String>,
}

/// Body of a project creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProject {
    pub name: String,
    pub repo_url: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildStatus {
    Pending,
    Building,
    Success,
    Failed,
    Other(String),
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Other(raw) => raw,
        }
    }

    /// Still moving on the server side; worth polling.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Pending | Self::Building)
    }
}

impl From<String> for BuildStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pending" => Self::Pending,
            "building" => Self::Building,
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Other(raw),
        }
    }
}

impl From<BuildStatus> for String {
    fn from(s: BuildStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: u64,
    pub project_id: u64,
    #[serde(default)]
    pub branch: String,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub log_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBuild {
    pub project_id: u64,
    pub branch: String,
}

/// Reply to a build trigger. Older servers name the id `build_id`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildCreated {
    #[serde(alias = "build_id")]
    pub id: u64,
    pub status: BuildStatus,
}

/// Reply to a project creation; only the id is relied upon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectCreated {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentStatus {
    Online,
    Offline,
    Draining,
    Other(String),
}

impl AgentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Draining => "DRAINING",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for AgentStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "ONLINE" => Self::Online,
            "OFFLINE" => Self::Offline,
            "DRAINING" => Self::Draining,
            _ => Self::Other(raw),
        }
    }
}

impl From<AgentStatus> for String {
    fn from(s: AgentStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: u64,
    pub name: String,
    pub status: AgentStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn last_seen_label(&self, now: DateTime<Utc>) -> String {
        match self.last_seen_at {
            Some(at) => time_since(at, now),
            None => "never".to_string(),
        }
    }
}

/// Agents list filter; `All` sends no `status` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Online,
    Offline,
    Draining,
}

impl StatusFilter {
    pub fn query_value(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Online => Some("ONLINE"),
            Self::Offline => Some("OFFLINE"),
            Self::Draining => Some("DRAINING"),
        }
    }

    pub fn label(self) -> &'static str {
        self.query_value().unwrap_or("all")
    }

    pub fn next(self) -> Self {
        match self {
            Self::All => Self::Online,
            Self::Online => Self::Offline,
            Self::Offline => Self::Draining,
            Self::Draining => Self::All,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "ALL" => Some(Self::All),
            "ONLINE" => Some(Self::Online),
            "OFFLINE" => Some(Self::Offline),
            "DRAINING" => Some(Self::Draining),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub projects: Vec<Project>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AgentList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub agents: Vec<Agent>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusUpdate<'a> {
    pub status: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LabelsUpdate<'a> {
    pub labels: &'a Labels,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// Coarse "how long ago" used for agent heartbeats.
pub fn time_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    if secs < 1 {
        return "just now".to_string();
    }
    if secs < 60 {
        return format!("{secs}s ago");
    }
    if secs < 3600 {
        return format!("{}m ago", secs / 60);
    }
    if secs < 86_400 {
        return format!("{}h ago", secs / 3600);
    }
    format!("{}d ago", secs / 86_400)
}

fn null_as_default<'de, D, T>(de: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

fn blank_as_none<'de, D>(de: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(de)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    // database/sql NullTime as marshalled by the Go backend.
    Nullable {
        #[serde(rename = "Time")]
        time: String,
        #[serde(rename = "Valid")]
        valid: bool,
    },
}

fn optional_timestamp<'de, D>(de: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Option::<RawTimestamp>::deserialize(de)? {
        None => return Ok(None),
        Some(RawTimestamp::Text(s)) => s,
        Some(RawTimestamp::Nullable { valid: false, .. }) => return Ok(None),
        Some(RawTimestamp::Nullable { time, .. }) => time,
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(serde::de::Error::custom)?
        .with_timezone(&Utc);
    // Go's zero time means "never set".
    if parsed.year() <= 1 {
        return Ok(None);
    }
    Ok(Some(parsed))
}
