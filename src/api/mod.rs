// api/mod.rs - Remote client contract
//
// The sync worker and repository depend on this capability trait, never on
// the GraphQL transport directly. Tests supply mock implementations.

pub mod graphql;
pub mod http;

pub use http::LinearApi;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{
    Attachment, Comment, Cycle, Document, Initiative, InitiativeUpdate, Issue, Label, Project,
    ProjectMilestone, ProjectUpdate, Team, User, WorkflowState,
};
use crate::Result;

/// Cursor-pagination marker returned with each issue page.
#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// One page of a team's issues, remote-ordered by `updated_at` descending.
#[derive(Debug, Clone)]
pub struct IssuePage {
    pub issues: Vec<Issue>,
    pub page_info: PageInfo,
}

/// An initiative plus the ids of the projects it spans.
#[derive(Debug, Clone)]
pub struct InitiativeWithProjects {
    pub initiative: Initiative,
    pub project_ids: Vec<String>,
}

/// Heavy sub-resources of one issue, fetched in batches.
#[derive(Debug, Clone, Default)]
pub struct IssueDetails {
    pub comments: Vec<Comment>,
    pub documents: Vec<Document>,
    pub attachments: Vec<Attachment>,
}

/// The remote workspace API.
///
/// Implementations must surface rate-limit failures with the remote's own
/// message text so `Error::is_rate_limited` can recognize them.
#[async_trait]
pub trait LinearClient: Send + Sync {
    async fn teams(&self) -> Result<Vec<Team>>;

    /// One page of a team's issues. The remote contract is `updated_at`
    /// descending; the sync termination heuristic is only correct under
    /// that ordering.
    async fn team_issues_page(
        &self,
        team_id: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<IssuePage>;

    async fn team_states(&self, team_id: &str) -> Result<Vec<WorkflowState>>;
    async fn team_labels(&self, team_id: &str) -> Result<Vec<Label>>;
    async fn team_cycles(&self, team_id: &str) -> Result<Vec<Cycle>>;
    async fn team_projects(&self, team_id: &str) -> Result<Vec<Project>>;
    async fn team_members(&self, team_id: &str) -> Result<Vec<User>>;

    async fn users(&self) -> Result<Vec<User>>;
    async fn viewer(&self) -> Result<User>;
    async fn initiatives(&self) -> Result<Vec<InitiativeWithProjects>>;
    async fn project_milestones(&self, project_id: &str) -> Result<Vec<ProjectMilestone>>;

    /// Comments, documents, and attachments for up to
    /// [`crate::sync::DETAIL_BATCH_SIZE`] issues in one request.
    async fn issue_details_batch(&self, ids: &[String]) -> Result<HashMap<String, IssueDetails>>;
    async fn issue_details(&self, id: &str) -> Result<IssueDetails>;

    async fn project_documents(&self, project_id: &str) -> Result<Vec<Document>>;
    async fn initiative_documents(&self, initiative_id: &str) -> Result<Vec<Document>>;
    async fn project_updates(&self, project_id: &str) -> Result<Vec<ProjectUpdate>>;
    async fn initiative_updates(&self, initiative_id: &str) -> Result<Vec<InitiativeUpdate>>;

    /// `Authorization` header value for direct HTTP requests (embedded-file
    /// HEAD probes). Empty when the implementation has nothing to offer;
    /// probes are skipped in that case.
    fn auth_header(&self) -> String;
}
