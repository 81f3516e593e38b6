// api/http.rs - Live GraphQL client
//
// One POST per query against the workspace GraphQL endpoint. Rate limiting
// and other server-side failures arrive as GraphQL error messages or error
// status bodies; both are surfaced verbatim in `Error::Api` so the substring
// taxonomy upstream can recognize them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::graphql::{
    self, AttachmentNode, CommentNode, Connection, CycleNode, DocumentNode, DocumentParent,
    GraphQLResponse, InitiativeNode, LabelNode, MilestoneNode, PageInfoNode, ProjectNode,
    TeamNode, UpdateNode, UserNode, WorkflowStateNode,
};
use super::{InitiativeWithProjects, IssueDetails, IssuePage, LinearClient, PageInfo};
use crate::models::{
    Attachment, Comment, Cycle, Document, InitiativeUpdate, Label, Project, ProjectMilestone,
    ProjectUpdate, Team, User, WorkflowState,
};
use crate::{Error, Result};

const DEFAULT_ENDPOINT: &str = "https://api.linear.app/graphql";

/// Authenticated GraphQL client for the live workspace API.
#[derive(Clone)]
pub struct LinearApi {
    endpoint: String,
    auth: String,
    http: reqwest::Client,
}

impl LinearApi {
    /// Create a client against the production endpoint.
    ///
    /// `auth` is used verbatim as the `Authorization` header value: a
    /// personal API key as-is, or `Bearer <token>` for OAuth tokens.
    pub fn new(auth: String) -> Result<Self> {
        Self::with_endpoint(auth, DEFAULT_ENDPOINT.to_string())
    }

    pub fn with_endpoint(auth: String, endpoint: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth,
            http,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, self.auth.as_str())
            .header(CONTENT_TYPE, "application/json")
            .json(&serde_json::json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| Error::Network(format!("GraphQL request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Api(format!(
                "request failed with status {}: {}",
                status, text
            )));
        }

        let body: GraphQLResponse<T> = serde_json::from_str(&text)
            .map_err(|e| Error::Api(format!("failed to parse response: {}", e)))?;

        if let Some(errors) = body.errors {
            if !errors.is_empty() {
                let joined = errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(Error::Api(joined));
            }
        }

        body.data
            .ok_or_else(|| Error::Api("response missing data".to_string()))
    }
}

// Per-query response shapes. The remote nests everything under the queried
// entity, so most of these are one-field wrappers.

#[derive(Deserialize)]
struct TeamsData {
    teams: Connection<TeamNode>,
}

#[derive(Deserialize)]
struct ViewerData {
    viewer: UserNode,
}

#[derive(Deserialize)]
struct UsersData {
    users: Connection<UserNode>,
}

#[derive(Deserialize)]
struct TeamData<T> {
    team: Option<T>,
}

#[derive(Deserialize)]
struct ProjectData<T> {
    project: Option<T>,
}

#[derive(Deserialize)]
struct InitiativeData<T> {
    initiative: Option<T>,
}

#[derive(Deserialize)]
struct IssuesEnvelope {
    issues: IssuesConnection,
}

#[derive(Deserialize)]
struct IssuesConnection {
    #[serde(default = "Vec::new")]
    nodes: Vec<serde_json::Value>,
    #[serde(rename = "pageInfo", default)]
    page_info: PageInfoNode,
}

#[derive(Deserialize)]
struct StatesEnvelope {
    states: Connection<WorkflowStateNode>,
}

#[derive(Deserialize)]
struct LabelsEnvelope {
    labels: Connection<LabelNode>,
}

#[derive(Deserialize)]
struct CyclesEnvelope {
    cycles: Connection<CycleNode>,
}

#[derive(Deserialize)]
struct ProjectsEnvelope {
    projects: Connection<ProjectNode>,
}

#[derive(Deserialize)]
struct MembersEnvelope {
    members: Connection<UserNode>,
}

#[derive(Deserialize)]
struct InitiativesData {
    initiatives: Connection<InitiativeNode>,
}

#[derive(Deserialize)]
struct MilestonesEnvelope {
    #[serde(rename = "projectMilestones")]
    project_milestones: Connection<MilestoneNode>,
}

#[derive(Deserialize)]
struct DetailsData {
    issues: Connection<DetailsNode>,
}

#[derive(Deserialize)]
struct DetailsNode {
    id: String,
    comments: Option<Connection<CommentNode>>,
    attachments: Option<Connection<AttachmentNode>>,
    documents: Option<Connection<DocumentNode>>,
}

#[derive(Deserialize)]
struct DocumentsEnvelope {
    documents: Connection<DocumentNode>,
}

#[derive(Deserialize)]
struct ProjectUpdatesEnvelope {
    #[serde(rename = "projectUpdates")]
    project_updates: Connection<UpdateNode>,
}

#[derive(Deserialize)]
struct InitiativeUpdatesEnvelope {
    #[serde(rename = "initiativeUpdates")]
    initiative_updates: Connection<UpdateNode>,
}

fn details_from_node(node: DetailsNode) -> (String, IssueDetails) {
    let issue_id = node.id;
    let comments: Vec<Comment> = node
        .comments
        .map(|c| c.nodes)
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.into_model(&issue_id))
        .collect();
    let attachments: Vec<Attachment> = node
        .attachments
        .map(|a| a.nodes)
        .unwrap_or_default()
        .into_iter()
        .map(|a| a.into_model(&issue_id))
        .collect();
    let documents: Vec<Document> = node
        .documents
        .map(|d| d.nodes)
        .unwrap_or_default()
        .into_iter()
        .map(|d| d.into_model(DocumentParent::Issue(&issue_id)))
        .collect();

    (
        issue_id,
        IssueDetails {
            comments,
            documents,
            attachments,
        },
    )
}

#[async_trait]
impl LinearClient for LinearApi {
    async fn teams(&self) -> Result<Vec<Team>> {
        let data: TeamsData = self
            .execute(graphql::TEAMS_QUERY, serde_json::json!({}))
            .await?;
        Ok(data.teams.nodes.into_iter().map(|t| t.into_model()).collect())
    }

    async fn team_issues_page(
        &self,
        team_id: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<IssuePage> {
        let data: TeamData<IssuesEnvelope> = self
            .execute(
                graphql::TEAM_ISSUES_QUERY,
                serde_json::json!({
                    "teamId": team_id,
                    "first": page_size,
                    "after": cursor,
                }),
            )
            .await?;
        let envelope = data
            .team
            .ok_or_else(|| Error::NotFound(format!("team {}", team_id)))?;

        let mut issues = Vec::with_capacity(envelope.issues.nodes.len());
        for node in &envelope.issues.nodes {
            match graphql::issue_from_value(node) {
                Ok(issue) => issues.push(issue),
                Err(e) => tracing::warn!("Skipping malformed issue node: {}", e),
            }
        }

        Ok(IssuePage {
            issues,
            page_info: PageInfo {
                has_next_page: envelope.issues.page_info.has_next_page,
                end_cursor: envelope.issues.page_info.end_cursor,
            },
        })
    }

    async fn team_states(&self, team_id: &str) -> Result<Vec<WorkflowState>> {
        let data: TeamData<StatesEnvelope> = self
            .execute(
                graphql::TEAM_STATES_QUERY,
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        let envelope = data
            .team
            .ok_or_else(|| Error::NotFound(format!("team {}", team_id)))?;
        Ok(envelope
            .states
            .nodes
            .into_iter()
            .map(|s| s.into_model(team_id))
            .collect())
    }

    async fn team_labels(&self, team_id: &str) -> Result<Vec<Label>> {
        let data: TeamData<LabelsEnvelope> = self
            .execute(
                graphql::TEAM_LABELS_QUERY,
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        let envelope = data
            .team
            .ok_or_else(|| Error::NotFound(format!("team {}", team_id)))?;
        Ok(envelope
            .labels
            .nodes
            .into_iter()
            .map(|l| l.into_model(team_id))
            .collect())
    }

    async fn team_cycles(&self, team_id: &str) -> Result<Vec<Cycle>> {
        let data: TeamData<CyclesEnvelope> = self
            .execute(
                graphql::TEAM_CYCLES_QUERY,
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        let envelope = data
            .team
            .ok_or_else(|| Error::NotFound(format!("team {}", team_id)))?;
        Ok(envelope
            .cycles
            .nodes
            .into_iter()
            .map(|c| c.into_model(team_id))
            .collect())
    }

    async fn team_projects(&self, team_id: &str) -> Result<Vec<Project>> {
        let data: TeamData<ProjectsEnvelope> = self
            .execute(
                graphql::TEAM_PROJECTS_QUERY,
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        let envelope = data
            .team
            .ok_or_else(|| Error::NotFound(format!("team {}", team_id)))?;
        Ok(envelope
            .projects
            .nodes
            .into_iter()
            .map(|p| p.into_model())
            .collect())
    }

    async fn team_members(&self, team_id: &str) -> Result<Vec<User>> {
        let data: TeamData<MembersEnvelope> = self
            .execute(
                graphql::TEAM_MEMBERS_QUERY,
                serde_json::json!({ "teamId": team_id }),
            )
            .await?;
        let envelope = data
            .team
            .ok_or_else(|| Error::NotFound(format!("team {}", team_id)))?;
        Ok(envelope
            .members
            .nodes
            .into_iter()
            .map(|u| u.into_model())
            .collect())
    }

    async fn users(&self) -> Result<Vec<User>> {
        let data: UsersData = self
            .execute(graphql::USERS_QUERY, serde_json::json!({}))
            .await?;
        Ok(data.users.nodes.into_iter().map(|u| u.into_model()).collect())
    }

    async fn viewer(&self) -> Result<User> {
        let data: ViewerData = self
            .execute(graphql::VIEWER_QUERY, serde_json::json!({}))
            .await?;
        Ok(data.viewer.into_model())
    }

    async fn initiatives(&self) -> Result<Vec<InitiativeWithProjects>> {
        let data: InitiativesData = self
            .execute(graphql::INITIATIVES_QUERY, serde_json::json!({}))
            .await?;
        Ok(data
            .initiatives
            .nodes
            .into_iter()
            .map(|n| {
                let (initiative, project_ids) = n.into_model();
                InitiativeWithProjects {
                    initiative,
                    project_ids,
                }
            })
            .collect())
    }

    async fn project_milestones(&self, project_id: &str) -> Result<Vec<ProjectMilestone>> {
        let data: ProjectData<MilestonesEnvelope> = self
            .execute(
                graphql::PROJECT_MILESTONES_QUERY,
                serde_json::json!({ "projectId": project_id }),
            )
            .await?;
        let envelope = data
            .project
            .ok_or_else(|| Error::NotFound(format!("project {}", project_id)))?;
        Ok(envelope
            .project_milestones
            .nodes
            .into_iter()
            .map(|m| m.into_model(project_id))
            .collect())
    }

    async fn issue_details_batch(&self, ids: &[String]) -> Result<HashMap<String, IssueDetails>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let data: DetailsData = self
            .execute(graphql::ISSUE_DETAILS_QUERY, serde_json::json!({ "ids": ids }))
            .await?;
        Ok(data.issues.nodes.into_iter().map(details_from_node).collect())
    }

    async fn issue_details(&self, id: &str) -> Result<IssueDetails> {
        let mut map = self.issue_details_batch(&[id.to_string()]).await?;
        Ok(map.remove(id).unwrap_or_default())
    }

    async fn project_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let data: ProjectData<DocumentsEnvelope> = self
            .execute(
                graphql::PROJECT_DOCUMENTS_QUERY,
                serde_json::json!({ "projectId": project_id }),
            )
            .await?;
        let envelope = data
            .project
            .ok_or_else(|| Error::NotFound(format!("project {}", project_id)))?;
        Ok(envelope
            .documents
            .nodes
            .into_iter()
            .map(|d| d.into_model(DocumentParent::Project(project_id)))
            .collect())
    }

    async fn initiative_documents(&self, initiative_id: &str) -> Result<Vec<Document>> {
        let data: InitiativeData<DocumentsEnvelope> = self
            .execute(
                graphql::INITIATIVE_DOCUMENTS_QUERY,
                serde_json::json!({ "initiativeId": initiative_id }),
            )
            .await?;
        let envelope = data
            .initiative
            .ok_or_else(|| Error::NotFound(format!("initiative {}", initiative_id)))?;
        Ok(envelope
            .documents
            .nodes
            .into_iter()
            .map(|d| d.into_model(DocumentParent::Initiative(initiative_id)))
            .collect())
    }

    async fn project_updates(&self, project_id: &str) -> Result<Vec<ProjectUpdate>> {
        let data: ProjectData<ProjectUpdatesEnvelope> = self
            .execute(
                graphql::PROJECT_UPDATES_QUERY,
                serde_json::json!({ "projectId": project_id }),
            )
            .await?;
        let envelope = data
            .project
            .ok_or_else(|| Error::NotFound(format!("project {}", project_id)))?;
        Ok(envelope
            .project_updates
            .nodes
            .into_iter()
            .map(|u| u.into_project_update(project_id))
            .collect())
    }

    async fn initiative_updates(&self, initiative_id: &str) -> Result<Vec<InitiativeUpdate>> {
        let data: InitiativeData<InitiativeUpdatesEnvelope> = self
            .execute(
                graphql::INITIATIVE_UPDATES_QUERY,
                serde_json::json!({ "initiativeId": initiative_id }),
            )
            .await?;
        let envelope = data
            .initiative
            .ok_or_else(|| Error::NotFound(format!("initiative {}", initiative_id)))?;
        Ok(envelope
            .initiative_updates
            .nodes
            .into_iter()
            .map(|u| u.into_initiative_update(initiative_id))
            .collect())
    }

    fn auth_header(&self) -> String {
        self.auth.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = LinearApi::new("lin_api_test".to_string()).unwrap();
        assert_eq!(client.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(client.auth_header(), "lin_api_test");

        let client =
            LinearApi::with_endpoint("k".to_string(), "https://example.com/graphql/".to_string())
                .unwrap();
        assert_eq!(client.endpoint, "https://example.com/graphql");
    }

    #[test]
    fn test_details_from_node_fans_out_by_issue() {
        let node: DetailsNode = serde_json::from_value(serde_json::json!({
            "id": "i1",
            "comments": {"nodes": [{
                "id": "c1",
                "body": "hello",
                "createdAt": "2024-03-01T10:00:00Z",
                "updatedAt": "2024-03-01T10:00:00Z",
                "user": {"id": "u1", "name": "Ada", "email": "ada@x.io"}
            }]},
            "attachments": {"nodes": [{
                "id": "a1",
                "url": "https://github.com/org/repo/pull/7",
                "sourceType": "github",
                "createdAt": "2024-03-01T10:00:00Z",
                "updatedAt": "2024-03-01T10:00:00Z"
            }]}
        }))
        .unwrap();

        let (issue_id, details) = details_from_node(node);
        assert_eq!(issue_id, "i1");
        assert_eq!(details.comments.len(), 1);
        assert_eq!(details.comments[0].issue_id, "i1");
        assert_eq!(details.attachments[0].source_type.as_deref(), Some("github"));
        assert!(details.documents.is_empty());
    }
}
