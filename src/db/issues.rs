// db/issues.rs - Issue storage: upserts, indexed lists, search

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{time, Store};
use crate::models::Issue;
use crate::Result;

fn issue_from_row(row: &SqliteRow) -> Result<Issue> {
    let data: String = row.try_get("data")?;
    Ok(Issue {
        id: row.try_get("id")?,
        identifier: row.try_get("identifier")?,
        team_id: row.try_get("team_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        state_id: row.try_get("state_id")?,
        state_name: row.try_get("state_name")?,
        state_type: row.try_get("state_type")?,
        assignee_id: row.try_get("assignee_id")?,
        assignee_email: row.try_get("assignee_email")?,
        creator_id: row.try_get("creator_id")?,
        creator_email: row.try_get("creator_email")?,
        priority: row.try_get("priority")?,
        project_id: row.try_get("project_id")?,
        project_name: row.try_get("project_name")?,
        cycle_id: row.try_get("cycle_id")?,
        cycle_name: row.try_get("cycle_name")?,
        parent_id: row.try_get("parent_id")?,
        due_date: row.try_get("due_date")?,
        estimate: row.try_get("estimate")?,
        url: row.try_get("url")?,
        branch_name: row.try_get("branch_name")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        started_at: time::parse_optional(row.try_get("started_at")?)?,
        completed_at: time::parse_optional(row.try_get("completed_at")?)?,
        canceled_at: time::parse_optional(row.try_get("canceled_at")?)?,
        archived_at: time::parse_optional(row.try_get("archived_at")?)?,
        data: serde_json::from_str(&data)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn issues_from_rows(rows: Vec<SqliteRow>) -> Result<Vec<Issue>> {
    rows.iter().map(issue_from_row).collect()
}

/// Quote each term so user input cannot produce FTS5 syntax errors.
fn fts_quote(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Store {
    /// Insert or replace an issue by id. Sets `synced_at` to wall time.
    pub async fn upsert_issue(&self, issue: &Issue) -> Result<()> {
        let data = serde_json::to_string(&issue.data)?;
        sqlx::query(
            r#"
            INSERT INTO issues (
                id, identifier, team_id, title, description,
                state_id, state_name, state_type,
                assignee_id, assignee_email, creator_id, creator_email,
                priority, project_id, project_name, cycle_id, cycle_name,
                parent_id, due_date, estimate, url, branch_name,
                created_at, updated_at, started_at, completed_at, canceled_at, archived_at,
                data, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                identifier = excluded.identifier,
                team_id = excluded.team_id,
                title = excluded.title,
                description = excluded.description,
                state_id = excluded.state_id,
                state_name = excluded.state_name,
                state_type = excluded.state_type,
                assignee_id = excluded.assignee_id,
                assignee_email = excluded.assignee_email,
                creator_id = excluded.creator_id,
                creator_email = excluded.creator_email,
                priority = excluded.priority,
                project_id = excluded.project_id,
                project_name = excluded.project_name,
                cycle_id = excluded.cycle_id,
                cycle_name = excluded.cycle_name,
                parent_id = excluded.parent_id,
                due_date = excluded.due_date,
                estimate = excluded.estimate,
                url = excluded.url,
                branch_name = excluded.branch_name,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                canceled_at = excluded.canceled_at,
                archived_at = excluded.archived_at,
                data = excluded.data,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&issue.id)
        .bind(&issue.identifier)
        .bind(&issue.team_id)
        .bind(&issue.title)
        .bind(&issue.description)
        .bind(&issue.state_id)
        .bind(&issue.state_name)
        .bind(&issue.state_type)
        .bind(&issue.assignee_id)
        .bind(&issue.assignee_email)
        .bind(&issue.creator_id)
        .bind(&issue.creator_email)
        .bind(issue.priority)
        .bind(&issue.project_id)
        .bind(&issue.project_name)
        .bind(&issue.cycle_id)
        .bind(&issue.cycle_name)
        .bind(&issue.parent_id)
        .bind(&issue.due_date)
        .bind(issue.estimate)
        .bind(&issue.url)
        .bind(&issue.branch_name)
        .bind(time::format_timestamp(issue.created_at))
        .bind(time::format_timestamp(issue.updated_at))
        .bind(time::format_optional(issue.started_at))
        .bind(time::format_optional(issue.completed_at))
        .bind(time::format_optional(issue.canceled_at))
        .bind(time::format_optional(issue.archived_at))
        .bind(data)
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let row = sqlx::query("SELECT * FROM issues WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    pub async fn get_issue_by_identifier(&self, identifier: &str) -> Result<Option<Issue>> {
        let row = sqlx::query("SELECT * FROM issues WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    /// Issues for a team, most recently updated first.
    pub async fn list_team_issues(&self, team_id: &str) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT * FROM issues WHERE team_id = ? ORDER BY updated_at DESC")
            .bind(team_id)
            .fetch_all(self.pool())
            .await?;
        issues_from_rows(rows)
    }

    /// Issues by assignee. A `None` filter matches only unassigned issues.
    pub async fn list_issues_by_assignee(&self, assignee_id: Option<&str>) -> Result<Vec<Issue>> {
        let rows = match assignee_id {
            Some(id) => {
                sqlx::query("SELECT * FROM issues WHERE assignee_id = ? ORDER BY updated_at DESC")
                    .bind(id)
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM issues WHERE assignee_id IS NULL ORDER BY updated_at DESC")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        issues_from_rows(rows)
    }

    pub async fn list_issues_by_state(&self, state_id: &str) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT * FROM issues WHERE state_id = ? ORDER BY updated_at DESC")
            .bind(state_id)
            .fetch_all(self.pool())
            .await?;
        issues_from_rows(rows)
    }

    pub async fn list_issues_by_project(&self, project_id: &str) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT * FROM issues WHERE project_id = ? ORDER BY updated_at DESC")
            .bind(project_id)
            .fetch_all(self.pool())
            .await?;
        issues_from_rows(rows)
    }

    pub async fn list_issues_by_cycle(&self, cycle_id: &str) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT * FROM issues WHERE cycle_id = ? ORDER BY updated_at DESC")
            .bind(cycle_id)
            .fetch_all(self.pool())
            .await?;
        issues_from_rows(rows)
    }

    /// Direct children of a parent issue. Queries never traverse deeper.
    pub async fn list_issue_children(&self, parent_id: &str) -> Result<Vec<Issue>> {
        let rows = sqlx::query("SELECT * FROM issues WHERE parent_id = ? ORDER BY updated_at DESC")
            .bind(parent_id)
            .fetch_all(self.pool())
            .await?;
        issues_from_rows(rows)
    }

    /// Label membership via the JSON sidecar: labels are an unordered set
    /// attribute under `$.labels.nodes`, not a junction table.
    pub async fn list_issues_by_label_name(&self, label_name: &str) -> Result<Vec<Issue>> {
        let rows = sqlx::query(
            r#"
            SELECT i.* FROM issues i
            WHERE EXISTS (
                SELECT 1 FROM json_each(i.data, '$.labels.nodes') AS labels
                WHERE json_extract(labels.value, '$.name') = ?
            )
            ORDER BY i.updated_at DESC
            "#,
        )
        .bind(label_name)
        .fetch_all(self.pool())
        .await?;
        issues_from_rows(rows)
    }

    /// Ranked full-text search over identifier, title, and description.
    pub async fn search_issues(
        &self,
        query: &str,
        team_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Issue>> {
        let match_expr = fts_quote(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = match team_id {
            Some(team) => {
                sqlx::query(
                    r#"
                    SELECT i.* FROM issues i
                    JOIN issues_fts ON issues_fts.rowid = i.rowid
                    WHERE issues_fts MATCH ? AND i.team_id = ?
                    ORDER BY rank
                    LIMIT ?
                    "#,
                )
                .bind(&match_expr)
                .bind(team)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT i.* FROM issues i
                    JOIN issues_fts ON issues_fts.rowid = i.rowid
                    WHERE issues_fts MATCH ?
                    ORDER BY rank
                    LIMIT ?
                    "#,
                )
                .bind(&match_expr)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };
        issues_from_rows(rows)
    }

    pub async fn count_team_issues(&self, team_id: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM issues WHERE team_id = ?")
            .bind(team_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count.0)
    }

    /// Max `updated_at` across a team's issues; the sync watermark source.
    pub async fn max_issue_updated_at(&self, team_id: &str) -> Result<Option<DateTime<Utc>>> {
        let max: (Option<String>,) =
            sqlx::query_as("SELECT MAX(updated_at) FROM issues WHERE team_id = ?")
                .bind(team_id)
                .fetch_one(self.pool())
                .await?;
        time::parse_optional(max.0)
    }

    /// Delete an issue and (via cascade) its comments, attachments, and
    /// embedded files.
    pub async fn delete_issue(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM issues WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn make_issue(id: &str, team_id: &str, updated_at: DateTime<Utc>) -> Issue {
        Issue {
            id: id.to_string(),
            identifier: format!("ENG-{}", id),
            team_id: team_id.to_string(),
            title: format!("Issue {}", id),
            description: None,
            state_id: None,
            state_name: None,
            state_type: None,
            assignee_id: None,
            assignee_email: None,
            creator_id: None,
            creator_email: None,
            priority: 0,
            project_id: None,
            project_name: None,
            cycle_id: None,
            cycle_name: None,
            parent_id: None,
            due_date: None,
            estimate: None,
            url: None,
            branch_name: None,
            created_at: updated_at,
            updated_at,
            started_at: None,
            completed_at: None,
            canceled_at: None,
            archived_at: None,
            data: serde_json::json!({"id": id}),
            synced_at: updated_at,
        }
    }

    async fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("cache.db")).await.unwrap();
        (dir, store)
    }

    fn ts(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, min, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get_roundtrip() {
        let (_dir, store) = open_store().await;

        let mut issue = make_issue("i1", "t1", ts(10, 0));
        issue.description = Some("needs *markdown*".to_string());
        issue.priority = 2;
        issue.estimate = Some(3.0);
        issue.data = serde_json::json!({
            "labels": {"nodes": [{"name": "bug"}]},
            "customField": 42,
        });
        store.upsert_issue(&issue).await.unwrap();

        let got = store.get_issue("i1").await.unwrap().unwrap();
        assert_eq!(got.identifier, "ENG-i1");
        assert_eq!(got.priority, 2);
        assert_eq!(got.updated_at, ts(10, 0));
        // Sidecar survives verbatim, including fields the schema doesn't know.
        assert_eq!(got.data["customField"], 42);

        assert!(store.get_issue("missing").await.unwrap().is_none());
        let by_identifier = store.get_issue_by_identifier("ENG-i1").await.unwrap();
        assert!(by_identifier.is_some());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let (_dir, store) = open_store().await;

        let mut issue = make_issue("i1", "t1", ts(10, 0));
        store.upsert_issue(&issue).await.unwrap();
        issue.title = "Renamed".to_string();
        issue.updated_at = ts(11, 0);
        store.upsert_issue(&issue).await.unwrap();

        let got = store.get_issue("i1").await.unwrap().unwrap();
        assert_eq!(got.title, "Renamed");
        assert_eq!(got.updated_at, ts(11, 0));
        assert_eq!(store.count_team_issues("t1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_ordering_and_watermark() {
        let (_dir, store) = open_store().await;

        for (id, hour) in [("a", 9), ("b", 11), ("c", 10)] {
            store
                .upsert_issue(&make_issue(id, "t1", ts(hour, 0)))
                .await
                .unwrap();
        }
        store.upsert_issue(&make_issue("z", "t2", ts(23, 0))).await.unwrap();

        let listed = store.list_team_issues("t1").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let max = store.max_issue_updated_at("t1").await.unwrap().unwrap();
        assert_eq!(max, ts(11, 0));
        assert!(store.max_issue_updated_at("empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_null_assignee_filter_matches_unassigned() {
        let (_dir, store) = open_store().await;

        let mut assigned = make_issue("a", "t1", ts(10, 0));
        assigned.assignee_id = Some("u1".to_string());
        store.upsert_issue(&assigned).await.unwrap();
        store.upsert_issue(&make_issue("b", "t1", ts(11, 0))).await.unwrap();

        let unassigned = store.list_issues_by_assignee(None).await.unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].id, "b");

        let mine = store.list_issues_by_assignee(Some("u1")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "a");
    }

    #[tokio::test]
    async fn test_label_membership_query() {
        let (_dir, store) = open_store().await;

        let mut tagged = make_issue("a", "t1", ts(10, 0));
        tagged.data = serde_json::json!({
            "labels": {"nodes": [{"id": "l1", "name": "bug"}, {"id": "l2", "name": "p0"}]}
        });
        store.upsert_issue(&tagged).await.unwrap();

        let mut other = make_issue("b", "t1", ts(11, 0));
        other.data = serde_json::json!({"labels": {"nodes": [{"id": "l3", "name": "feature"}]}});
        store.upsert_issue(&other).await.unwrap();
        store.upsert_issue(&make_issue("c", "t1", ts(12, 0))).await.unwrap();

        let bugs = store.list_issues_by_label_name("bug").await.unwrap();
        assert_eq!(bugs.len(), 1);
        assert_eq!(bugs[0].id, "a");
        assert!(store.list_issues_by_label_name("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_text_search() {
        let (_dir, store) = open_store().await;

        let mut crash = make_issue("a", "t1", ts(10, 0));
        crash.title = "Parser crashes on empty input".to_string();
        crash.description = Some("stack trace attached".to_string());
        store.upsert_issue(&crash).await.unwrap();

        let mut other = make_issue("b", "t2", ts(11, 0));
        other.title = "Update onboarding copy".to_string();
        store.upsert_issue(&other).await.unwrap();

        let hits = store.search_issues("parser crash", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        // Team-scoped search misses rows in other teams.
        assert!(store
            .search_issues("parser", Some("t2"), 10)
            .await
            .unwrap()
            .is_empty());

        // Punctuation must not break MATCH.
        store
            .search_issues("weird \"quoted\" input)", None, 10)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fts_follows_updates_and_deletes() {
        let (_dir, store) = open_store().await;

        let mut issue = make_issue("a", "t1", ts(10, 0));
        issue.title = "Original flaky widget".to_string();
        store.upsert_issue(&issue).await.unwrap();

        issue.title = "Stable gadget".to_string();
        issue.updated_at = ts(11, 0);
        store.upsert_issue(&issue).await.unwrap();

        assert!(store.search_issues("flaky", None, 10).await.unwrap().is_empty());
        assert_eq!(store.search_issues("gadget", None, 10).await.unwrap().len(), 1);

        store.delete_issue("a").await.unwrap();
        assert!(store.search_issues("gadget", None, 10).await.unwrap().is_empty());
    }
}
