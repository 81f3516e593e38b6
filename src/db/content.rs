// db/content.rs - Issue sub-resources: comments, documents, updates,
// attachments, embedded files
//
// These rows arrive either from the sync worker's detail batches or from
// repository-triggered refreshes. The MAX(synced_at) helpers drive the
// stale-while-revalidate decision.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{time, Store};
use crate::models::{Attachment, Comment, Document, EmbeddedFile, InitiativeUpdate, ProjectUpdate};
use crate::Result;

fn comment_from_row(row: &SqliteRow) -> Result<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        issue_id: row.try_get("issue_id")?,
        body: row.try_get("body")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        user_email: row.try_get("user_email")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        edited_at: time::parse_optional(row.try_get("edited_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        issue_id: row.try_get("issue_id")?,
        project_id: row.try_get("project_id")?,
        initiative_id: row.try_get("initiative_id")?,
        creator_id: row.try_get("creator_id")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn project_update_from_row(row: &SqliteRow) -> Result<ProjectUpdate> {
    Ok(ProjectUpdate {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        body: row.try_get("body")?,
        health: row.try_get("health")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn initiative_update_from_row(row: &SqliteRow) -> Result<InitiativeUpdate> {
    Ok(InitiativeUpdate {
        id: row.try_get("id")?,
        initiative_id: row.try_get("initiative_id")?,
        body: row.try_get("body")?,
        health: row.try_get("health")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn attachment_from_row(row: &SqliteRow) -> Result<Attachment> {
    Ok(Attachment {
        id: row.try_get("id")?,
        issue_id: row.try_get("issue_id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        subtitle: row.try_get("subtitle")?,
        source_type: row.try_get("source_type")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn embedded_file_from_row(row: &SqliteRow) -> Result<EmbeddedFile> {
    Ok(EmbeddedFile {
        id: row.try_get("id")?,
        issue_id: row.try_get("issue_id")?,
        url: row.try_get("url")?,
        filename: row.try_get("filename")?,
        mime_type: row.try_get("mime_type")?,
        file_size: row.try_get("file_size")?,
        cache_path: row.try_get("cache_path")?,
        source: row.try_get("source")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

async fn max_synced_at(
    store: &Store,
    table: &str,
    parent_column: &str,
    parent_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    // Table and column names come from call sites below, never from input.
    let sql = format!("SELECT MAX(synced_at) FROM {table} WHERE {parent_column} = ?");
    let max: (Option<String>,) = sqlx::query_as(&sql)
        .bind(parent_id)
        .fetch_one(store.pool())
        .await?;
    time::parse_optional(max.0)
}

impl Store {
    pub async fn upsert_comment(&self, comment: &Comment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO comments (
                id, issue_id, body, user_id, user_name, user_email,
                created_at, updated_at, edited_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                issue_id = excluded.issue_id,
                body = excluded.body,
                user_id = excluded.user_id,
                user_name = excluded.user_name,
                user_email = excluded.user_email,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                edited_at = excluded.edited_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&comment.id)
        .bind(&comment.issue_id)
        .bind(&comment.body)
        .bind(&comment.user_id)
        .bind(&comment.user_name)
        .bind(&comment.user_email)
        .bind(time::format_timestamp(comment.created_at))
        .bind(time::format_timestamp(comment.updated_at))
        .bind(time::format_optional(comment.edited_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Comments for an issue in thread order.
    pub async fn list_issue_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let rows = sqlx::query("SELECT * FROM comments WHERE issue_id = ? ORDER BY created_at")
            .bind(issue_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(comment_from_row).collect()
    }

    pub async fn comments_synced_at(&self, issue_id: &str) -> Result<Option<DateTime<Utc>>> {
        max_synced_at(self, "comments", "issue_id", issue_id).await
    }

    pub async fn upsert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (
                id, slug, title, content, issue_id, project_id, initiative_id,
                creator_id, created_at, updated_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                title = excluded.title,
                content = excluded.content,
                issue_id = excluded.issue_id,
                project_id = excluded.project_id,
                initiative_id = excluded.initiative_id,
                creator_id = excluded.creator_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.slug)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.issue_id)
        .bind(&document.project_id)
        .bind(&document.initiative_id)
        .bind(&document.creator_id)
        .bind(time::format_timestamp(document.created_at))
        .bind(time::format_timestamp(document.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_document_by_slug(&self, slug: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE slug = ?")
            .bind(slug)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn list_issue_documents(&self, issue_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE issue_id = ? ORDER BY title")
            .bind(issue_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    pub async fn list_project_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE project_id = ? ORDER BY title")
            .bind(project_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    pub async fn list_initiative_documents(&self, initiative_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE initiative_id = ? ORDER BY title")
            .bind(initiative_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    pub async fn issue_documents_synced_at(&self, issue_id: &str) -> Result<Option<DateTime<Utc>>> {
        max_synced_at(self, "documents", "issue_id", issue_id).await
    }

    pub async fn project_documents_synced_at(
        &self,
        project_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        max_synced_at(self, "documents", "project_id", project_id).await
    }

    pub async fn initiative_documents_synced_at(
        &self,
        initiative_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        max_synced_at(self, "documents", "initiative_id", initiative_id).await
    }

    pub async fn upsert_project_update(&self, update: &ProjectUpdate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_updates (
                id, project_id, body, health, user_id, user_name,
                created_at, updated_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                body = excluded.body,
                health = excluded.health,
                user_id = excluded.user_id,
                user_name = excluded.user_name,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&update.id)
        .bind(&update.project_id)
        .bind(&update.body)
        .bind(&update.health)
        .bind(&update.user_id)
        .bind(&update.user_name)
        .bind(time::format_timestamp(update.created_at))
        .bind(time::format_timestamp(update.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Updates newest first.
    pub async fn list_project_updates(&self, project_id: &str) -> Result<Vec<ProjectUpdate>> {
        let rows = sqlx::query(
            "SELECT * FROM project_updates WHERE project_id = ? ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(project_update_from_row).collect()
    }

    pub async fn project_updates_synced_at(
        &self,
        project_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        max_synced_at(self, "project_updates", "project_id", project_id).await
    }

    pub async fn upsert_initiative_update(&self, update: &InitiativeUpdate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO initiative_updates (
                id, initiative_id, body, health, user_id, user_name,
                created_at, updated_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                initiative_id = excluded.initiative_id,
                body = excluded.body,
                health = excluded.health,
                user_id = excluded.user_id,
                user_name = excluded.user_name,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&update.id)
        .bind(&update.initiative_id)
        .bind(&update.body)
        .bind(&update.health)
        .bind(&update.user_id)
        .bind(&update.user_name)
        .bind(time::format_timestamp(update.created_at))
        .bind(time::format_timestamp(update.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_initiative_updates(
        &self,
        initiative_id: &str,
    ) -> Result<Vec<InitiativeUpdate>> {
        let rows = sqlx::query(
            "SELECT * FROM initiative_updates WHERE initiative_id = ? ORDER BY created_at DESC",
        )
        .bind(initiative_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(initiative_update_from_row).collect()
    }

    pub async fn initiative_updates_synced_at(
        &self,
        initiative_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        max_synced_at(self, "initiative_updates", "initiative_id", initiative_id).await
    }

    pub async fn upsert_attachment(&self, attachment: &Attachment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attachments (
                id, issue_id, url, title, subtitle, source_type,
                created_at, updated_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                issue_id = excluded.issue_id,
                url = excluded.url,
                title = excluded.title,
                subtitle = excluded.subtitle,
                source_type = excluded.source_type,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&attachment.id)
        .bind(&attachment.issue_id)
        .bind(&attachment.url)
        .bind(&attachment.title)
        .bind(&attachment.subtitle)
        .bind(&attachment.source_type)
        .bind(time::format_timestamp(attachment.created_at))
        .bind(time::format_timestamp(attachment.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_issue_attachments(&self, issue_id: &str) -> Result<Vec<Attachment>> {
        let rows = sqlx::query("SELECT * FROM attachments WHERE issue_id = ? ORDER BY created_at")
            .bind(issue_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(attachment_from_row).collect()
    }

    pub async fn attachments_synced_at(&self, issue_id: &str) -> Result<Option<DateTime<Utc>>> {
        max_synced_at(self, "attachments", "issue_id", issue_id).await
    }

    pub async fn upsert_embedded_file(&self, file: &EmbeddedFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedded_files (
                id, issue_id, url, filename, mime_type, file_size,
                cache_path, source, created_at, updated_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                issue_id = excluded.issue_id,
                url = excluded.url,
                filename = excluded.filename,
                mime_type = excluded.mime_type,
                file_size = excluded.file_size,
                source = excluded.source,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&file.id)
        .bind(&file.issue_id)
        .bind(&file.url)
        .bind(&file.filename)
        .bind(&file.mime_type)
        .bind(file.file_size)
        .bind(&file.cache_path)
        .bind(&file.source)
        .bind(time::format_timestamp(file.created_at))
        .bind(time::format_timestamp(file.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_embedded_file(&self, id: &str) -> Result<Option<EmbeddedFile>> {
        let row = sqlx::query("SELECT * FROM embedded_files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(embedded_file_from_row).transpose()
    }

    pub async fn list_issue_embedded_files(&self, issue_id: &str) -> Result<Vec<EmbeddedFile>> {
        let rows =
            sqlx::query("SELECT * FROM embedded_files WHERE issue_id = ? ORDER BY filename")
                .bind(issue_id)
                .fetch_all(self.pool())
                .await?;
        rows.iter().map(embedded_file_from_row).collect()
    }

    /// Record where the filesystem layer downloaded a file.
    pub async fn set_embedded_file_cache_path(
        &self,
        id: &str,
        cache_path: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE embedded_files SET cache_path = ? WHERE id = ?")
            .bind(cache_path)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_issue_embedded_files(&self, issue_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM embedded_files WHERE issue_id = ?")
            .bind(issue_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::issues::tests::make_issue;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn make_comment(id: &str, issue_id: &str, hour: u32) -> Comment {
        Comment {
            id: id.to_string(),
            issue_id: issue_id.to_string(),
            body: format!("comment {}", id),
            user_id: Some("u1".to_string()),
            user_name: Some("Ada".to_string()),
            user_email: Some("ada@x.io".to_string()),
            created_at: ts(hour),
            updated_at: ts(hour),
            edited_at: None,
            synced_at: ts(hour),
        }
    }

    async fn open_store_with_issue() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("cache.db")).await.unwrap();
        store.upsert_issue(&make_issue("i1", "t1", ts(1))).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_comments_roundtrip_in_thread_order() {
        let (_dir, store) = open_store_with_issue().await;

        store.upsert_comment(&make_comment("c2", "i1", 11)).await.unwrap();
        store.upsert_comment(&make_comment("c1", "i1", 10)).await.unwrap();

        let comments = store.list_issue_comments("i1").await.unwrap();
        let ids: Vec<&str> = comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(store.list_issue_comments("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_synced_at_freshness_tracking() {
        let (_dir, store) = open_store_with_issue().await;

        assert!(store.comments_synced_at("i1").await.unwrap().is_none());

        let before = Utc::now();
        store.upsert_comment(&make_comment("c1", "i1", 10)).await.unwrap();
        let synced = store.comments_synced_at("i1").await.unwrap().unwrap();
        assert!(synced >= before - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_documents_by_parent() {
        let (_dir, store) = open_store_with_issue().await;

        let base = Document {
            id: "d1".to_string(),
            slug: "spec".to_string(),
            title: "Spec".to_string(),
            content: Some("body".to_string()),
            issue_id: Some("i1".to_string()),
            project_id: None,
            initiative_id: None,
            creator_id: None,
            created_at: ts(1),
            updated_at: ts(1),
            synced_at: ts(1),
        };
        store.upsert_document(&base).await.unwrap();
        store
            .upsert_document(&Document {
                id: "d2".to_string(),
                slug: "notes".to_string(),
                title: "Notes".to_string(),
                issue_id: None,
                project_id: Some("p1".to_string()),
                ..base.clone()
            })
            .await
            .unwrap();

        assert_eq!(store.list_issue_documents("i1").await.unwrap().len(), 1);
        assert_eq!(store.list_project_documents("p1").await.unwrap().len(), 1);
        assert!(store.list_initiative_documents("in1").await.unwrap().is_empty());
        assert!(store.get_document_by_slug("spec").await.unwrap().is_some());
        assert!(store.issue_documents_synced_at("i1").await.unwrap().is_some());
        assert!(store.project_documents_synced_at("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_updates_newest_first() {
        let (_dir, store) = open_store_with_issue().await;

        for (id, hour) in [("pu1", 9), ("pu2", 12)] {
            store
                .upsert_project_update(&ProjectUpdate {
                    id: id.to_string(),
                    project_id: "p1".to_string(),
                    body: "status".to_string(),
                    health: Some("onTrack".to_string()),
                    user_id: None,
                    user_name: None,
                    created_at: ts(hour),
                    updated_at: ts(hour),
                    synced_at: ts(hour),
                })
                .await
                .unwrap();
        }

        let updates = store.list_project_updates("p1").await.unwrap();
        assert_eq!(updates[0].id, "pu2");
        assert_eq!(updates[1].health.as_deref(), Some("onTrack"));
    }

    #[tokio::test]
    async fn test_embedded_files_roundtrip_and_cache_path() {
        let (_dir, store) = open_store_with_issue().await;

        let file = EmbeddedFile {
            id: "abc123".to_string(),
            issue_id: "i1".to_string(),
            url: "https://uploads.linear.app/w/i/bug.png".to_string(),
            filename: "bug.png".to_string(),
            mime_type: "image/png".to_string(),
            file_size: 1024,
            cache_path: None,
            source: "description".to_string(),
            created_at: ts(1),
            updated_at: ts(1),
            synced_at: ts(1),
        };
        store.upsert_embedded_file(&file).await.unwrap();

        // Re-upserting must not clobber a cache path recorded in between.
        store
            .set_embedded_file_cache_path("abc123", Some("/tmp/bug.png"))
            .await
            .unwrap();
        store.upsert_embedded_file(&file).await.unwrap();

        let got = store.get_embedded_file("abc123").await.unwrap().unwrap();
        assert_eq!(got.cache_path.as_deref(), Some("/tmp/bug.png"));
        assert_eq!(got.mime_type, "image/png");

        assert_eq!(store.list_issue_embedded_files("i1").await.unwrap().len(), 1);
        store.delete_issue_embedded_files("i1").await.unwrap();
        assert!(store.list_issue_embedded_files("i1").await.unwrap().is_empty());
    }
}
