// api/graphql.rs - GraphQL documents, wire DTOs, and model conversion
//
// Issue payloads are kept as raw JSON for the cache's `data` sidecar; the
// typed projection is parsed out of the same value, so any field the schema
// doesn't know still round-trips.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{
    Attachment, Comment, Cycle, Document, Initiative, InitiativeUpdate, Issue, Label, Project,
    ProjectMilestone, ProjectUpdate, Team, User, WorkflowState,
};
use crate::{Error, Result};

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQLError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageInfoNode {
    #[serde(default)]
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

// ============================================================================
// Query documents
// ============================================================================

pub const TEAMS_QUERY: &str = r#"
query Teams {
  teams {
    nodes { id key name icon createdAt updatedAt }
  }
}"#;

pub const VIEWER_QUERY: &str = r#"
query Viewer {
  viewer { id email name displayName active admin }
}"#;

pub const USERS_QUERY: &str = r#"
query Users {
  users {
    nodes { id email name displayName active admin }
  }
}"#;

pub const TEAM_ISSUES_QUERY: &str = r#"
query TeamIssues($teamId: String!, $first: Int!, $after: String) {
  team(id: $teamId) {
    issues(first: $first, after: $after, orderBy: updatedAt) {
      nodes {
        id identifier title description priority estimate url branchName dueDate
        createdAt updatedAt startedAt completedAt canceledAt archivedAt
        team { id }
        state { id name type }
        assignee { id email }
        creator { id email }
        project { id name }
        cycle { id name }
        parent { id }
        labels { nodes { id name color } }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

pub const TEAM_STATES_QUERY: &str = r#"
query TeamStates($teamId: String!) {
  team(id: $teamId) {
    states { nodes { id name type color position } }
  }
}"#;

pub const TEAM_LABELS_QUERY: &str = r#"
query TeamLabels($teamId: String!) {
  team(id: $teamId) {
    labels { nodes { id name color } }
  }
}"#;

pub const TEAM_CYCLES_QUERY: &str = r#"
query TeamCycles($teamId: String!) {
  team(id: $teamId) {
    cycles { nodes { id number name startsAt endsAt } }
  }
}"#;

pub const TEAM_PROJECTS_QUERY: &str = r#"
query TeamProjects($teamId: String!) {
  team(id: $teamId) {
    projects {
      nodes {
        id slugId name description state progress startDate targetDate
        createdAt updatedAt
      }
    }
  }
}"#;

pub const TEAM_MEMBERS_QUERY: &str = r#"
query TeamMembers($teamId: String!) {
  team(id: $teamId) {
    members { nodes { id email name displayName active admin } }
  }
}"#;

pub const INITIATIVES_QUERY: &str = r#"
query Initiatives {
  initiatives {
    nodes {
      id slugId name description targetDate createdAt updatedAt
      owner { id }
      projects { nodes { id } }
    }
  }
}"#;

pub const PROJECT_MILESTONES_QUERY: &str = r#"
query ProjectMilestones($projectId: String!) {
  project(id: $projectId) {
    projectMilestones { nodes { id name description targetDate sortOrder } }
  }
}"#;

pub const ISSUE_DETAILS_QUERY: &str = r#"
query IssueDetails($ids: [ID!]!) {
  issues(filter: { id: { in: $ids } }) {
    nodes {
      id
      comments {
        nodes { id body createdAt updatedAt editedAt user { id name email } }
      }
      attachments {
        nodes { id url title subtitle sourceType createdAt updatedAt }
      }
      documents {
        nodes { id slugId title content createdAt updatedAt creator { id } }
      }
    }
  }
}"#;

pub const PROJECT_DOCUMENTS_QUERY: &str = r#"
query ProjectDocuments($projectId: String!) {
  project(id: $projectId) {
    documents {
      nodes { id slugId title content createdAt updatedAt creator { id } }
    }
  }
}"#;

pub const INITIATIVE_DOCUMENTS_QUERY: &str = r#"
query InitiativeDocuments($initiativeId: String!) {
  initiative(id: $initiativeId) {
    documents {
      nodes { id slugId title content createdAt updatedAt creator { id } }
    }
  }
}"#;

pub const PROJECT_UPDATES_QUERY: &str = r#"
query ProjectUpdates($projectId: String!) {
  project(id: $projectId) {
    projectUpdates {
      nodes { id body health createdAt updatedAt user { id name } }
    }
  }
}"#;

pub const INITIATIVE_UPDATES_QUERY: &str = r#"
query InitiativeUpdates($initiativeId: String!) {
  initiative(id: $initiativeId) {
    initiativeUpdates {
      nodes { id body health createdAt updatedAt user { id name } }
    }
  }
}"#;

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct TeamNode {
    pub id: String,
    pub key: String,
    pub name: String,
    pub icon: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl TeamNode {
    pub fn into_model(self) -> Team {
        Team {
            id: self.id,
            key: self.key,
            name: self.name,
            icon: self.icon,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNode {
    pub id: String,
    pub email: String,
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub admin: bool,
}

impl UserNode {
    pub fn into_model(self) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
            display_name: self.display_name,
            active: self.active,
            admin: self.admin,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StateRef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub state_type: String,
}

#[derive(Debug, Deserialize)]
pub struct PersonRef {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedRef {
    pub id: String,
    pub name: Option<String>,
}

/// Typed projection of an issue node. Parsed from the same raw value that
/// lands in the cache's `data` column.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueNode {
    pub id: String,
    pub identifier: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<f64>,
    pub estimate: Option<f64>,
    pub url: Option<String>,
    pub branch_name: Option<String>,
    pub due_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub team: Option<IdRef>,
    pub state: Option<StateRef>,
    pub assignee: Option<PersonRef>,
    pub creator: Option<PersonRef>,
    pub project: Option<NamedRef>,
    pub cycle: Option<NamedRef>,
    pub parent: Option<IdRef>,
}

/// Build a cache issue from a raw issue node, keeping the payload verbatim.
pub fn issue_from_value(value: &serde_json::Value) -> Result<Issue> {
    let node: IssueNode = serde_json::from_value(value.clone())?;
    let team_id = node
        .team
        .map(|t| t.id)
        .ok_or_else(|| Error::Serialization(format!("issue {} has no team", node.id)))?;

    let (state_id, state_name, state_type) = match node.state {
        Some(s) => (Some(s.id), Some(s.name), Some(s.state_type)),
        None => (None, None, None),
    };
    let (assignee_id, assignee_email) = match node.assignee {
        Some(a) => (Some(a.id), a.email),
        None => (None, None),
    };
    let (creator_id, creator_email) = match node.creator {
        Some(c) => (Some(c.id), c.email),
        None => (None, None),
    };
    let (project_id, project_name) = match node.project {
        Some(p) => (Some(p.id), p.name),
        None => (None, None),
    };
    let (cycle_id, cycle_name) = match node.cycle {
        Some(c) => (Some(c.id), c.name),
        None => (None, None),
    };

    Ok(Issue {
        id: node.id,
        identifier: node.identifier,
        team_id,
        title: node.title,
        description: node.description,
        state_id,
        state_name,
        state_type,
        assignee_id,
        assignee_email,
        creator_id,
        creator_email,
        priority: node.priority.map(|p| p as i64).unwrap_or(0),
        project_id,
        project_name,
        cycle_id,
        cycle_name,
        parent_id: node.parent.map(|p| p.id),
        due_date: node.due_date,
        estimate: node.estimate,
        url: node.url,
        branch_name: node.branch_name,
        created_at: node.created_at,
        updated_at: node.updated_at,
        started_at: node.started_at,
        completed_at: node.completed_at,
        canceled_at: node.canceled_at,
        archived_at: node.archived_at,
        data: value.clone(),
        synced_at: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStateNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub state_type: String,
    pub color: Option<String>,
    #[serde(default)]
    pub position: f64,
}

impl WorkflowStateNode {
    pub fn into_model(self, team_id: &str) -> WorkflowState {
        WorkflowState {
            id: self.id,
            team_id: team_id.to_string(),
            name: self.name,
            state_type: self.state_type,
            color: self.color,
            position: self.position,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LabelNode {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

impl LabelNode {
    pub fn into_model(self, team_id: &str) -> Label {
        Label {
            id: self.id,
            team_id: team_id.to_string(),
            name: self.name,
            color: self.color,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleNode {
    pub id: String,
    pub number: i64,
    pub name: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl CycleNode {
    pub fn into_model(self, team_id: &str) -> Cycle {
        Cycle {
            id: self.id,
            team_id: team_id.to_string(),
            number: self.number,
            name: self.name,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectNode {
    pub id: String,
    pub slug_id: String,
    pub name: String,
    pub description: Option<String>,
    pub state: Option<String>,
    #[serde(default)]
    pub progress: f64,
    pub start_date: Option<String>,
    pub target_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectNode {
    pub fn into_model(self) -> Project {
        Project {
            id: self.id,
            slug: self.slug_id,
            name: self.name,
            description: self.description,
            state: self.state,
            progress: self.progress,
            start_date: self.start_date,
            target_date: self.target_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneNode {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub target_date: Option<String>,
    #[serde(default)]
    pub sort_order: f64,
}

impl MilestoneNode {
    pub fn into_model(self, project_id: &str) -> ProjectMilestone {
        ProjectMilestone {
            id: self.id,
            project_id: project_id.to_string(),
            name: self.name,
            description: self.description,
            target_date: self.target_date,
            sort_order: self.sort_order,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiativeNode {
    pub id: String,
    pub slug_id: String,
    pub name: String,
    pub description: Option<String>,
    pub target_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: Option<IdRef>,
    #[serde(default)]
    pub projects: Option<Connection<IdRef>>,
}

impl InitiativeNode {
    pub fn into_model(self) -> (Initiative, Vec<String>) {
        let project_ids = self
            .projects
            .map(|c| c.nodes.into_iter().map(|p| p.id).collect())
            .unwrap_or_default();
        let initiative = Initiative {
            id: self.id,
            slug: self.slug_id,
            name: self.name,
            description: self.description,
            owner_id: self.owner.map(|o| o.id),
            target_date: self.target_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at: Utc::now(),
        };
        (initiative, project_ids)
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentUserRef {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    pub id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub user: Option<CommentUserRef>,
}

impl CommentNode {
    pub fn into_model(self, issue_id: &str) -> Comment {
        let (user_id, user_name, user_email) = match self.user {
            Some(u) => (Some(u.id), u.name, u.email),
            None => (None, None, None),
        };
        Comment {
            id: self.id,
            issue_id: issue_id.to_string(),
            body: self.body,
            user_id,
            user_name,
            user_email,
            created_at: self.created_at,
            updated_at: self.updated_at,
            edited_at: self.edited_at,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
    pub id: String,
    pub slug_id: String,
    pub title: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub creator: Option<IdRef>,
}

/// The parent a document hangs off. The remote scopes documents by query,
/// not by a field on the node itself.
#[derive(Debug, Clone, Copy)]
pub enum DocumentParent<'a> {
    Issue(&'a str),
    Project(&'a str),
    Initiative(&'a str),
}

impl DocumentNode {
    pub fn into_model(self, parent: DocumentParent<'_>) -> Document {
        let (issue_id, project_id, initiative_id) = match parent {
            DocumentParent::Issue(id) => (Some(id.to_string()), None, None),
            DocumentParent::Project(id) => (None, Some(id.to_string()), None),
            DocumentParent::Initiative(id) => (None, None, Some(id.to_string())),
        };
        Document {
            id: self.id,
            slug: self.slug_id,
            title: self.title,
            content: self.content,
            issue_id,
            project_id,
            initiative_id,
            creator_id: self.creator.map(|c| c.id),
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentNode {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub source_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttachmentNode {
    pub fn into_model(self, issue_id: &str) -> Attachment {
        Attachment {
            id: self.id,
            issue_id: issue_id.to_string(),
            url: self.url,
            title: self.title,
            subtitle: self.subtitle,
            source_type: self.source_type,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNode {
    pub id: String,
    pub body: String,
    pub health: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: Option<CommentUserRef>,
}

impl UpdateNode {
    pub fn into_project_update(self, project_id: &str) -> ProjectUpdate {
        let (user_id, user_name) = match self.user {
            Some(u) => (Some(u.id), u.name),
            None => (None, None),
        };
        ProjectUpdate {
            id: self.id,
            project_id: project_id.to_string(),
            body: self.body,
            health: self.health,
            user_id,
            user_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at: Utc::now(),
        }
    }

    pub fn into_initiative_update(self, initiative_id: &str) -> InitiativeUpdate {
        let (user_id, user_name) = match self.user {
            Some(u) => (Some(u.id), u.name),
            None => (None, None),
        };
        InitiativeUpdate {
            id: self.id,
            initiative_id: initiative_id.to_string(),
            body: self.body,
            health: self.health,
            user_id,
            user_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
            synced_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_from_value_projects_and_keeps_sidecar() {
        let raw = serde_json::json!({
            "id": "issue-1",
            "identifier": "ENG-42",
            "title": "Fix the widget",
            "description": "It wobbles",
            "priority": 2.0,
            "createdAt": "2024-03-01T10:00:00.000Z",
            "updatedAt": "2024-03-01T11:00:00.000Z",
            "team": {"id": "team-1"},
            "state": {"id": "s1", "name": "In Progress", "type": "started"},
            "assignee": {"id": "u1", "email": "ada@x.io"},
            "labels": {"nodes": [{"id": "l1", "name": "bug"}]},
            "someFutureField": {"nested": true}
        });

        let issue = issue_from_value(&raw).unwrap();
        assert_eq!(issue.identifier, "ENG-42");
        assert_eq!(issue.team_id, "team-1");
        assert_eq!(issue.priority, 2);
        assert_eq!(issue.state_name.as_deref(), Some("In Progress"));
        assert_eq!(issue.assignee_email.as_deref(), Some("ada@x.io"));
        assert_eq!(issue.data["someFutureField"]["nested"], true);
        assert_eq!(issue.data["labels"]["nodes"][0]["name"], "bug");
    }

    #[test]
    fn test_issue_without_team_is_a_conversion_error() {
        let raw = serde_json::json!({
            "id": "issue-1",
            "identifier": "ENG-42",
            "title": "Orphan",
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-01T11:00:00Z"
        });
        assert!(issue_from_value(&raw).is_err());
    }

    #[test]
    fn test_envelope_with_errors() {
        let body: GraphQLResponse<serde_json::Value> = serde_json::from_str(
            r#"{"errors": [{"message": "RATELIMITED"}, {"message": "other"}]}"#,
        )
        .unwrap();
        assert!(body.data.is_none());
        let errors = body.errors.unwrap();
        assert_eq!(errors[0].message, "RATELIMITED");
    }

    #[test]
    fn test_document_parent_scoping() {
        let node: DocumentNode = serde_json::from_value(serde_json::json!({
            "id": "d1",
            "slugId": "spec-abc",
            "title": "Spec",
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        let doc = node.into_model(DocumentParent::Project("p1"));
        assert_eq!(doc.project_id.as_deref(), Some("p1"));
        assert!(doc.issue_id.is_none());
    }
}
