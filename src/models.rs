// models.rs - Cached entity types
//
// Every row the Store hands out is a fully-owned value, so callers can hold
// results independently of Store lifetime. The `Issue.data` field carries the
// remote payload verbatim; fields absent from the typed schema (labels,
// children, relations) survive round-trips through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue, the primary cached entity.
///
/// Typed columns exist for indexed filtering; everything else lives in
/// `data`. `updated_at` is monotonic per issue as observed from the remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Opaque globally-unique id
    pub id: String,
    /// Human identifier, e.g. `ENG-123`
    pub identifier: String,
    pub team_id: String,
    pub title: String,
    pub description: Option<String>,
    pub state_id: Option<String>,
    pub state_name: Option<String>,
    pub state_type: Option<String>,
    pub assignee_id: Option<String>,
    pub assignee_email: Option<String>,
    pub creator_id: Option<String>,
    pub creator_email: Option<String>,
    /// 0 = none, 1 = urgent, 2 = high, 3 = medium, 4 = low
    pub priority: i64,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub cycle_id: Option<String>,
    pub cycle_name: Option<String>,
    pub parent_id: Option<String>,
    pub due_date: Option<String>,
    pub estimate: Option<f64>,
    pub url: Option<String>,
    pub branch_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    /// Full remote payload, stored verbatim
    pub data: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    /// Short key used in issue identifiers, e.g. `ENG`
    pub key: String,
    pub name: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// A workflow state (Backlog, In Progress, Done, ...) scoped to a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub team_id: String,
    pub name: String,
    /// Remote state category: backlog, unstarted, started, completed, canceled
    pub state_type: String,
    pub color: Option<String>,
    /// Sort order within the team's workflow
    pub position: f64,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub color: Option<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub id: String,
    pub team_id: String,
    pub number: i64,
    pub name: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub display_name: Option<String>,
    pub active: bool,
    pub admin: bool,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    /// URL slug, unique across the workspace
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub state: Option<String>,
    pub progress: f64,
    pub start_date: Option<String>,
    pub target_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMilestone {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub target_date: Option<String>,
    pub sort_order: f64,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initiative {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Option<String>,
    pub target_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub issue_id: String,
    pub body: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
}

/// A document attached to an issue, a project, or an initiative.
///
/// Exactly one of the parent ids is normally set; the schema does not
/// enforce this because the remote does not either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub content: Option<String>,
    pub issue_id: Option<String>,
    pub project_id: Option<String>,
    pub initiative_id: Option<String>,
    pub creator_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub id: String,
    pub project_id: String,
    pub body: String,
    /// onTrack, atRisk, offTrack, ...
    pub health: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiativeUpdate {
    pub id: String,
    pub initiative_id: String,
    pub body: String,
    pub health: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// An external link attached to an issue (PR, support ticket, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub issue_id: String,
    pub url: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub source_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// A CDN-hosted binary referenced from an issue's text, catalogued for
/// on-demand download by the filesystem layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedFile {
    /// First 16 bytes of SHA-256 of the url, lowercase hex. Stable across runs.
    pub id: String,
    pub issue_id: String,
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    /// Remote size from a HEAD probe; 0 when the probe failed or was skipped
    pub file_size: i64,
    /// Where the filesystem layer downloaded the file, if it has
    pub cache_path: Option<String>,
    /// `description` or `comment:<comment id>`
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// Per-team sync bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSyncState {
    pub team_id: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Watermark: max issue `updated_at` observed for this team
    pub last_issue_updated_at: Option<DateTime<Utc>>,
    pub issue_count: i64,
}
