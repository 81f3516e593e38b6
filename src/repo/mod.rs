// repo/mod.rs - Read surface for the filesystem layer
//
// Fully-synced entities (teams, issues, metadata) are single-hop store
// queries. Heavy sub-resources (comments, documents, updates, attachments)
// are served stale-while-revalidate: the cached rows come back immediately,
// and when they are older than the staleness threshold a background refresh
// is scheduled, at most one per resource at a time. Readers never block on a
// refresh; a cold read returns empty and a later read sees the refreshed
// rows.

mod refresh;

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::api::LinearClient;
use crate::config::RepositoryConfig;
use crate::db::Store;
use crate::models::{
    Attachment, Comment, Cycle, Document, EmbeddedFile, Initiative, InitiativeUpdate, Issue, Label,
    Project, ProjectMilestone, ProjectUpdate, Team, User, WorkflowState,
};
use crate::Result;
use refresh::RefreshScheduler;

/// Result cap for full-text search.
const SEARCH_LIMIT: i64 = 50;

/// Read-only query surface over the cache, with on-demand refresh for
/// sub-resources.
///
/// Every method returns owned values, so results outlive the repository.
/// Without a remote client the repository is a pure cache view and never
/// refreshes anything.
pub struct Repository {
    store: Arc<Store>,
    client: Option<Arc<dyn LinearClient>>,
    staleness: chrono::Duration,
    current_user: RwLock<Option<User>>,
    scheduler: RefreshScheduler,
    cancel: CancellationToken,
}

impl Repository {
    pub fn new(
        store: Arc<Store>,
        client: Option<Arc<dyn LinearClient>>,
        config: RepositoryConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            store,
            client,
            staleness: chrono::Duration::from_std(config.staleness_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            current_user: RwLock::new(None),
            scheduler: RefreshScheduler::new(cancel.child_token()),
            cancel,
        }
    }

    /// Cancel all scheduled refreshes. Pending tasks unwind without writing.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    // ========================================================================
    // Current user
    // ========================================================================

    /// Seed the "me" views. Set by the host during mount initialization,
    /// typically from the client's viewer query.
    pub fn set_current_user(&self, user: Option<User>) {
        if let Ok(mut cell) = self.current_user.write() {
            *cell = user;
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.current_user.read().ok().and_then(|cell| cell.clone())
    }

    // ========================================================================
    // Teams, metadata, users
    // ========================================================================

    pub async fn teams(&self) -> Result<Vec<Team>> {
        self.store.list_teams().await
    }

    pub async fn team(&self, id: &str) -> Result<Option<Team>> {
        self.store.get_team(id).await
    }

    pub async fn team_by_key(&self, key: &str) -> Result<Option<Team>> {
        self.store.get_team_by_key(key).await
    }

    pub async fn team_members(&self, team_id: &str) -> Result<Vec<User>> {
        self.store.list_team_members(team_id).await
    }

    pub async fn workflow_states(&self, team_id: &str) -> Result<Vec<WorkflowState>> {
        self.store.list_workflow_states(team_id).await
    }

    pub async fn labels(&self, team_id: &str) -> Result<Vec<Label>> {
        self.store.list_labels(team_id).await
    }

    pub async fn cycles(&self, team_id: &str) -> Result<Vec<Cycle>> {
        self.store.list_cycles(team_id).await
    }

    pub async fn users(&self) -> Result<Vec<User>> {
        self.store.list_users().await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.store.get_user_by_email(email).await
    }

    // ========================================================================
    // Issues
    // ========================================================================

    pub async fn issue(&self, id: &str) -> Result<Option<Issue>> {
        self.store.get_issue(id).await
    }

    pub async fn issue_by_identifier(&self, identifier: &str) -> Result<Option<Issue>> {
        self.store.get_issue_by_identifier(identifier).await
    }

    pub async fn team_issues(&self, team_id: &str) -> Result<Vec<Issue>> {
        self.store.list_team_issues(team_id).await
    }

    pub async fn issue_children(&self, parent_id: &str) -> Result<Vec<Issue>> {
        self.store.list_issue_children(parent_id).await
    }

    /// Issues assigned to the current user. Empty when no current user has
    /// been set.
    pub async fn my_issues(&self) -> Result<Vec<Issue>> {
        match self.current_user() {
            Some(user) => self.store.list_issues_by_assignee(Some(&user.id)).await,
            None => Ok(Vec::new()),
        }
    }

    /// `None` means unassigned issues.
    pub async fn issues_by_assignee(&self, assignee_id: Option<&str>) -> Result<Vec<Issue>> {
        self.store.list_issues_by_assignee(assignee_id).await
    }

    pub async fn issues_by_state(&self, state_id: &str) -> Result<Vec<Issue>> {
        self.store.list_issues_by_state(state_id).await
    }

    pub async fn issues_by_project(&self, project_id: &str) -> Result<Vec<Issue>> {
        self.store.list_issues_by_project(project_id).await
    }

    pub async fn issues_by_cycle(&self, cycle_id: &str) -> Result<Vec<Issue>> {
        self.store.list_issues_by_cycle(cycle_id).await
    }

    /// Label filtering goes id → name first: labels live in the issue JSON
    /// sidecar as a name set, not in a junction table.
    pub async fn issues_by_label_id(&self, label_id: &str) -> Result<Vec<Issue>> {
        match self.store.get_label(label_id).await? {
            Some(label) => self.store.list_issues_by_label_name(&label.name).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn issues_by_label_name(&self, label_name: &str) -> Result<Vec<Issue>> {
        self.store.list_issues_by_label_name(label_name).await
    }

    /// Ranked full-text search, optionally scoped to one team.
    pub async fn search_issues(&self, query: &str, team_id: Option<&str>) -> Result<Vec<Issue>> {
        self.store.search_issues(query, team_id, SEARCH_LIMIT).await
    }

    // ========================================================================
    // Projects & initiatives
    // ========================================================================

    pub async fn projects(&self) -> Result<Vec<Project>> {
        self.store.list_projects().await
    }

    pub async fn project(&self, id: &str) -> Result<Option<Project>> {
        self.store.get_project(id).await
    }

    pub async fn project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        self.store.get_project_by_slug(slug).await
    }

    pub async fn team_projects(&self, team_id: &str) -> Result<Vec<Project>> {
        self.store.list_team_projects(team_id).await
    }

    pub async fn project_milestones(&self, project_id: &str) -> Result<Vec<ProjectMilestone>> {
        self.store.list_project_milestones(project_id).await
    }

    pub async fn initiatives(&self) -> Result<Vec<Initiative>> {
        self.store.list_initiatives().await
    }

    pub async fn initiative(&self, id: &str) -> Result<Option<Initiative>> {
        self.store.get_initiative(id).await
    }

    pub async fn initiative_by_slug(&self, slug: &str) -> Result<Option<Initiative>> {
        self.store.get_initiative_by_slug(slug).await
    }

    pub async fn initiative_projects(&self, initiative_id: &str) -> Result<Vec<Project>> {
        self.store.list_initiative_projects(initiative_id).await
    }

    // ========================================================================
    // Stale-while-revalidate sub-resources
    // ========================================================================

    /// Comments for an issue; cached rows now, refresh in the background
    /// when stale.
    pub async fn issue_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let comments = self.store.list_issue_comments(issue_id).await?;
        let synced = self.store.comments_synced_at(issue_id).await?;
        if self.is_stale(synced) {
            if let Some(client) = &self.client {
                let client = client.clone();
                let store = self.store.clone();
                let id = issue_id.to_string();
                self.scheduler
                    .schedule(format!("comments:{}", issue_id), async move {
                        let details = client.issue_details(&id).await?;
                        for comment in &details.comments {
                            store.upsert_comment(comment).await?;
                        }
                        Ok(())
                    });
            }
        }
        Ok(comments)
    }

    pub async fn issue_documents(&self, issue_id: &str) -> Result<Vec<Document>> {
        let documents = self.store.list_issue_documents(issue_id).await?;
        let synced = self.store.issue_documents_synced_at(issue_id).await?;
        if self.is_stale(synced) {
            if let Some(client) = &self.client {
                let client = client.clone();
                let store = self.store.clone();
                let id = issue_id.to_string();
                self.scheduler
                    .schedule(format!("issue-documents:{}", issue_id), async move {
                        let details = client.issue_details(&id).await?;
                        for document in &details.documents {
                            store.upsert_document(document).await?;
                        }
                        Ok(())
                    });
            }
        }
        Ok(documents)
    }

    pub async fn issue_attachments(&self, issue_id: &str) -> Result<Vec<Attachment>> {
        let attachments = self.store.list_issue_attachments(issue_id).await?;
        let synced = self.store.attachments_synced_at(issue_id).await?;
        if self.is_stale(synced) {
            if let Some(client) = &self.client {
                let client = client.clone();
                let store = self.store.clone();
                let id = issue_id.to_string();
                self.scheduler
                    .schedule(format!("attachments:{}", issue_id), async move {
                        let details = client.issue_details(&id).await?;
                        for attachment in &details.attachments {
                            store.upsert_attachment(attachment).await?;
                        }
                        Ok(())
                    });
            }
        }
        Ok(attachments)
    }

    pub async fn project_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let documents = self.store.list_project_documents(project_id).await?;
        let synced = self.store.project_documents_synced_at(project_id).await?;
        if self.is_stale(synced) {
            if let Some(client) = &self.client {
                let client = client.clone();
                let store = self.store.clone();
                let id = project_id.to_string();
                self.scheduler
                    .schedule(format!("project-documents:{}", project_id), async move {
                        for document in &client.project_documents(&id).await? {
                            store.upsert_document(document).await?;
                        }
                        Ok(())
                    });
            }
        }
        Ok(documents)
    }

    pub async fn initiative_documents(&self, initiative_id: &str) -> Result<Vec<Document>> {
        let documents = self.store.list_initiative_documents(initiative_id).await?;
        let synced = self
            .store
            .initiative_documents_synced_at(initiative_id)
            .await?;
        if self.is_stale(synced) {
            if let Some(client) = &self.client {
                let client = client.clone();
                let store = self.store.clone();
                let id = initiative_id.to_string();
                self.scheduler.schedule(
                    format!("initiative-documents:{}", initiative_id),
                    async move {
                        for document in &client.initiative_documents(&id).await? {
                            store.upsert_document(document).await?;
                        }
                        Ok(())
                    },
                );
            }
        }
        Ok(documents)
    }

    pub async fn project_updates(&self, project_id: &str) -> Result<Vec<ProjectUpdate>> {
        let updates = self.store.list_project_updates(project_id).await?;
        let synced = self.store.project_updates_synced_at(project_id).await?;
        if self.is_stale(synced) {
            if let Some(client) = &self.client {
                let client = client.clone();
                let store = self.store.clone();
                let id = project_id.to_string();
                self.scheduler
                    .schedule(format!("project-updates:{}", project_id), async move {
                        for update in &client.project_updates(&id).await? {
                            store.upsert_project_update(update).await?;
                        }
                        Ok(())
                    });
            }
        }
        Ok(updates)
    }

    pub async fn initiative_updates(&self, initiative_id: &str) -> Result<Vec<InitiativeUpdate>> {
        let updates = self.store.list_initiative_updates(initiative_id).await?;
        let synced = self
            .store
            .initiative_updates_synced_at(initiative_id)
            .await?;
        if self.is_stale(synced) {
            if let Some(client) = &self.client {
                let client = client.clone();
                let store = self.store.clone();
                let id = initiative_id.to_string();
                self.scheduler.schedule(
                    format!("initiative-updates:{}", initiative_id),
                    async move {
                        for update in &client.initiative_updates(&id).await? {
                            store.upsert_initiative_update(update).await?;
                        }
                        Ok(())
                    },
                );
            }
        }
        Ok(updates)
    }

    // ========================================================================
    // Embedded files
    // ========================================================================

    pub async fn issue_embedded_files(&self, issue_id: &str) -> Result<Vec<EmbeddedFile>> {
        self.store.list_issue_embedded_files(issue_id).await
    }

    pub async fn embedded_file(&self, id: &str) -> Result<Option<EmbeddedFile>> {
        self.store.get_embedded_file(id).await
    }

    /// Record where the filesystem layer cached a downloaded file.
    pub async fn set_embedded_file_cache_path(
        &self,
        id: &str,
        cache_path: Option<&str>,
    ) -> Result<()> {
        self.store.set_embedded_file_cache_path(id, cache_path).await
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Remove issues the remote has archived.
    ///
    /// Intentionally does nothing yet: the remote feed carries no archive
    /// tombstones, and deleting rows the filesystem layer may be serving
    /// needs a reconciliation pass that has not been designed. Returns the
    /// number of issues removed (always 0 for now).
    pub async fn cleanup_archived_issues(&self) -> Result<u64> {
        tracing::debug!("Archived-issue cleanup requested; policy undecided, skipping");
        Ok(0)
    }

    fn is_stale(&self, synced_at: Option<DateTime<Utc>>) -> bool {
        match synced_at {
            Some(ts) => Utc::now() - ts > self.staleness,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IssueDetails;
    use crate::db::issues::tests::make_issue;
    use crate::sync::engine::tests::{make_team, ts, MockClient};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn repo_fixture() -> (tempfile::TempDir, Arc<Store>, Arc<MockClient>, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("cache.db")).await.unwrap());
        store.upsert_issue(&make_issue("i1", "t1", ts(5, 0))).await.unwrap();

        let client = Arc::new(MockClient::with_teams(vec![make_team("t1", "ENG")]));
        client.details.lock().unwrap().insert(
            "i1".to_string(),
            IssueDetails {
                comments: vec![Comment {
                    id: "c1".to_string(),
                    issue_id: "i1".to_string(),
                    body: "first!".to_string(),
                    user_id: None,
                    user_name: None,
                    user_email: None,
                    created_at: ts(5, 0),
                    updated_at: ts(5, 0),
                    edited_at: None,
                    synced_at: ts(5, 0),
                }],
                documents: Vec::new(),
                attachments: Vec::new(),
            },
        );

        let repo = Repository::new(
            store.clone(),
            Some(client.clone() as Arc<dyn LinearClient>),
            RepositoryConfig::default(),
        );
        (dir, store, client, repo)
    }

    #[tokio::test]
    async fn test_cold_read_is_empty_then_populated() {
        let (_dir, _store, client, repo) = repo_fixture().await;

        let first = repo.issue_comments("i1").await.unwrap();
        assert!(first.is_empty());

        // Let the scheduled refresh run.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(client.detail_calls.load(Ordering::SeqCst), 1);

        let second = repo.issue_comments("i1").await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, "first!");

        // Fresh rows: no further refresh is scheduled.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(client.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_reads_schedule_one_refresh() {
        let (_dir, _store, client, repo) = repo_fixture().await;

        let (a, b) = tokio::join!(repo.issue_comments("i1"), repo.issue_comments("i1"));
        assert!(a.unwrap().is_empty());
        assert!(b.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(client.detail_calls.load(Ordering::SeqCst), 1);

        let third = repo.issue_comments("i1").await.unwrap();
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn test_no_client_means_pure_cache_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("cache.db")).await.unwrap());
        store.upsert_issue(&make_issue("i1", "t1", ts(5, 0))).await.unwrap();

        let repo = Repository::new(store, None, RepositoryConfig::default());
        assert!(repo.issue_comments("i1").await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(repo.issue_comments("i1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_refreshes() {
        let (_dir, _store, client, repo) = repo_fixture().await;

        repo.close();
        assert!(repo.issue_comments("i1").await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(client.detail_calls.load(Ordering::SeqCst), 0);
        assert!(repo.issue_comments("i1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_my_issues_empty_without_current_user() {
        let (_dir, store, _client, repo) = repo_fixture().await;

        assert!(repo.my_issues().await.unwrap().is_empty());

        let mut mine = make_issue("i2", "t1", ts(6, 0));
        mine.assignee_id = Some("u1".to_string());
        store.upsert_issue(&mine).await.unwrap();

        repo.set_current_user(Some(User {
            id: "u1".to_string(),
            email: "ada@x.io".to_string(),
            name: "Ada".to_string(),
            display_name: None,
            active: true,
            admin: false,
            synced_at: ts(0, 0),
        }));
        let mine = repo.my_issues().await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "i2");
        assert_eq!(repo.current_user().unwrap().email, "ada@x.io");
    }

    #[tokio::test]
    async fn test_label_id_filter_goes_through_name() {
        let (_dir, store, _client, repo) = repo_fixture().await;

        store
            .upsert_label(&Label {
                id: "l1".to_string(),
                team_id: "t1".to_string(),
                name: "bug".to_string(),
                color: None,
                synced_at: ts(0, 0),
            })
            .await
            .unwrap();

        let mut tagged = make_issue("i3", "t1", ts(7, 0));
        tagged.data = serde_json::json!({"labels": {"nodes": [{"id": "l1", "name": "bug"}]}});
        store.upsert_issue(&tagged).await.unwrap();

        let hits = repo.issues_by_label_id("l1").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "i3");

        // Unknown label id: empty, not an error.
        assert!(repo.issues_by_label_id("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_delegates_to_store() {
        let (_dir, store, _client, repo) = repo_fixture().await;

        let mut issue = make_issue("i4", "t1", ts(8, 0));
        issue.title = "Repository search plumbing".to_string();
        store.upsert_issue(&issue).await.unwrap();

        let hits = repo.search_issues("plumbing", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(repo
            .search_issues("plumbing", Some("t2"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_archived_issues_is_a_noop() {
        let (_dir, store, _client, repo) = repo_fixture().await;

        let mut archived = make_issue("i9", "t1", ts(9, 0));
        archived.archived_at = Some(ts(9, 0));
        store.upsert_issue(&archived).await.unwrap();

        assert_eq!(repo.cleanup_archived_issues().await.unwrap(), 0);
        assert!(repo.issue("i9").await.unwrap().is_some());
    }
}
