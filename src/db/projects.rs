// db/projects.rs - Projects, milestones, initiatives, and their links

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{time, Store};
use crate::models::{Initiative, Project, ProjectMilestone};
use crate::Result;

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    Ok(Project {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        state: row.try_get("state")?,
        progress: row.try_get("progress")?,
        start_date: row.try_get("start_date")?,
        target_date: row.try_get("target_date")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn milestone_from_row(row: &SqliteRow) -> Result<ProjectMilestone> {
    Ok(ProjectMilestone {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        target_date: row.try_get("target_date")?,
        sort_order: row.try_get("sort_order")?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn initiative_from_row(row: &SqliteRow) -> Result<Initiative> {
    Ok(Initiative {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        owner_id: row.try_get("owner_id")?,
        target_date: row.try_get("target_date")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

impl Store {
    pub async fn upsert_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (
                id, slug, name, description, state, progress,
                start_date, target_date, created_at, updated_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                name = excluded.name,
                description = excluded.description,
                state = excluded.state,
                progress = excluded.progress,
                start_date = excluded.start_date,
                target_date = excluded.target_date,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&project.id)
        .bind(&project.slug)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.state)
        .bind(project.progress)
        .bind(&project.start_date)
        .bind(&project.target_date)
        .bind(time::format_timestamp(project.created_at))
        .bind(time::format_timestamp(project.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE slug = ?")
            .bind(slug)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    /// Projects linked to a team via the project↔team junction.
    pub async fn list_team_projects(&self, team_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM projects p
            JOIN project_teams pt ON pt.project_id = p.id
            WHERE pt.team_id = ?
            ORDER BY p.name
            "#,
        )
        .bind(team_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    pub async fn upsert_project_team_link(&self, project_id: &str, team_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_teams (project_id, team_id, synced_at)
            VALUES (?, ?, ?)
            ON CONFLICT(project_id, team_id) DO UPDATE SET synced_at = excluded.synced_at
            "#,
        )
        .bind(project_id)
        .bind(team_id)
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn upsert_project_milestone(&self, milestone: &ProjectMilestone) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_milestones (
                id, project_id, name, description, target_date, sort_order, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                name = excluded.name,
                description = excluded.description,
                target_date = excluded.target_date,
                sort_order = excluded.sort_order,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&milestone.id)
        .bind(&milestone.project_id)
        .bind(&milestone.name)
        .bind(&milestone.description)
        .bind(&milestone.target_date)
        .bind(milestone.sort_order)
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_project_milestones(&self, project_id: &str) -> Result<Vec<ProjectMilestone>> {
        let rows =
            sqlx::query("SELECT * FROM project_milestones WHERE project_id = ? ORDER BY sort_order")
                .bind(project_id)
                .fetch_all(self.pool())
                .await?;
        rows.iter().map(milestone_from_row).collect()
    }

    pub async fn upsert_initiative(&self, initiative: &Initiative) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO initiatives (
                id, slug, name, description, owner_id, target_date,
                created_at, updated_at, synced_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                name = excluded.name,
                description = excluded.description,
                owner_id = excluded.owner_id,
                target_date = excluded.target_date,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&initiative.id)
        .bind(&initiative.slug)
        .bind(&initiative.name)
        .bind(&initiative.description)
        .bind(&initiative.owner_id)
        .bind(&initiative.target_date)
        .bind(time::format_timestamp(initiative.created_at))
        .bind(time::format_timestamp(initiative.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_initiative(&self, id: &str) -> Result<Option<Initiative>> {
        let row = sqlx::query("SELECT * FROM initiatives WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(initiative_from_row).transpose()
    }

    pub async fn get_initiative_by_slug(&self, slug: &str) -> Result<Option<Initiative>> {
        let row = sqlx::query("SELECT * FROM initiatives WHERE slug = ?")
            .bind(slug)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(initiative_from_row).transpose()
    }

    pub async fn list_initiatives(&self) -> Result<Vec<Initiative>> {
        let rows = sqlx::query("SELECT * FROM initiatives ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(initiative_from_row).collect()
    }

    pub async fn upsert_initiative_project_link(
        &self,
        initiative_id: &str,
        project_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO initiative_projects (initiative_id, project_id, synced_at)
            VALUES (?, ?, ?)
            ON CONFLICT(initiative_id, project_id) DO UPDATE SET synced_at = excluded.synced_at
            "#,
        )
        .bind(initiative_id)
        .bind(project_id)
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Projects linked to an initiative, ordered by name.
    pub async fn list_initiative_projects(&self, initiative_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM projects p
            JOIN initiative_projects ip ON ip.project_id = p.id
            WHERE ip.initiative_id = ?
            ORDER BY p.name
            "#,
        )
        .bind(initiative_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(project_from_row).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    pub(crate) fn make_project(id: &str, name: &str) -> Project {
        Project {
            id: id.to_string(),
            slug: format!("{}-slug", id),
            name: name.to_string(),
            description: None,
            state: Some("started".to_string()),
            progress: 0.5,
            start_date: None,
            target_date: Some("2024-06-01".to_string()),
            created_at: ts(),
            updated_at: ts(),
            synced_at: ts(),
        }
    }

    async fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("cache.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_project_roundtrip() {
        let (_dir, store) = open_store().await;

        store.upsert_project(&make_project("p1", "Beta")).await.unwrap();
        store.upsert_project(&make_project("p2", "Alpha")).await.unwrap();

        let by_slug = store.get_project_by_slug("p1-slug").await.unwrap().unwrap();
        assert_eq!(by_slug.name, "Beta");

        let listed = store.list_projects().await.unwrap();
        assert_eq!(listed[0].name, "Alpha");
        assert_eq!(listed[1].name, "Beta");
    }

    #[tokio::test]
    async fn test_milestones_ordered_by_sort_order() {
        let (_dir, store) = open_store().await;

        store.upsert_project(&make_project("p1", "Alpha")).await.unwrap();
        for (id, name, sort_order) in [("m2", "Ship", 2.0), ("m1", "Design", 1.0)] {
            store
                .upsert_project_milestone(&ProjectMilestone {
                    id: id.to_string(),
                    project_id: "p1".to_string(),
                    name: name.to_string(),
                    description: None,
                    target_date: None,
                    sort_order,
                    synced_at: ts(),
                })
                .await
                .unwrap();
        }

        let milestones = store.list_project_milestones("p1").await.unwrap();
        let names: Vec<&str> = milestones.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Design", "Ship"]);
    }

    #[tokio::test]
    async fn test_team_and_initiative_links() {
        let (_dir, store) = open_store().await;

        store
            .upsert_team(&crate::models::Team {
                id: "t1".to_string(),
                key: "ENG".to_string(),
                name: "Engineering".to_string(),
                icon: None,
                created_at: ts(),
                updated_at: ts(),
                synced_at: ts(),
            })
            .await
            .unwrap();
        store.upsert_project(&make_project("p1", "Alpha")).await.unwrap();
        store.upsert_project(&make_project("p2", "Beta")).await.unwrap();

        store.upsert_project_team_link("p1", "t1").await.unwrap();
        // Upserting the same link twice is fine.
        store.upsert_project_team_link("p1", "t1").await.unwrap();

        let team_projects = store.list_team_projects("t1").await.unwrap();
        assert_eq!(team_projects.len(), 1);
        assert_eq!(team_projects[0].id, "p1");

        store
            .upsert_initiative(&Initiative {
                id: "in1".to_string(),
                slug: "q2".to_string(),
                name: "Q2 Push".to_string(),
                description: None,
                owner_id: None,
                target_date: None,
                created_at: ts(),
                updated_at: ts(),
                synced_at: ts(),
            })
            .await
            .unwrap();
        store.upsert_initiative_project_link("in1", "p1").await.unwrap();
        store.upsert_initiative_project_link("in1", "p2").await.unwrap();

        let linked = store.list_initiative_projects("in1").await.unwrap();
        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0].name, "Alpha");
    }
}
