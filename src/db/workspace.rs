// db/workspace.rs - Teams, workflow metadata, users, and sync bookkeeping

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{time, Store};
use crate::models::{Cycle, Label, Team, TeamSyncState, User, WorkflowState};
use crate::Result;

fn team_from_row(row: &SqliteRow) -> Result<Team> {
    Ok(Team {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        icon: row.try_get("icon")?,
        created_at: time::parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn state_from_row(row: &SqliteRow) -> Result<WorkflowState> {
    Ok(WorkflowState {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        name: row.try_get("name")?,
        state_type: row.try_get("state_type")?,
        color: row.try_get("color")?,
        position: row.try_get("position")?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn label_from_row(row: &SqliteRow) -> Result<Label> {
    Ok(Label {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn cycle_from_row(row: &SqliteRow) -> Result<Cycle> {
    Ok(Cycle {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        number: row.try_get("number")?,
        name: row.try_get("name")?,
        starts_at: time::parse_optional(row.try_get("starts_at")?)?,
        ends_at: time::parse_optional(row.try_get("ends_at")?)?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        active: row.try_get("active")?,
        admin: row.try_get("admin")?,
        synced_at: time::parse_timestamp(&row.try_get::<String, _>("synced_at")?)?,
    })
}

impl Store {
    pub async fn upsert_team(&self, team: &Team) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO teams (id, key, name, icon, created_at, updated_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                key = excluded.key,
                name = excluded.name,
                icon = excluded.icon,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&team.id)
        .bind(&team.key)
        .bind(&team.name)
        .bind(&team.icon)
        .bind(time::format_timestamp(team.created_at))
        .bind(time::format_timestamp(team.updated_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_team(&self, id: &str) -> Result<Option<Team>> {
        let row = sqlx::query("SELECT * FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(team_from_row).transpose()
    }

    pub async fn get_team_by_key(&self, key: &str) -> Result<Option<Team>> {
        let row = sqlx::query("SELECT * FROM teams WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(team_from_row).transpose()
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>> {
        let rows = sqlx::query("SELECT * FROM teams ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(team_from_row).collect()
    }

    /// Delete a team and (via cascade) its memberships. Issues are scoped by
    /// team id but deleted separately by cleanup.
    pub async fn delete_team(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM teams WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn upsert_workflow_state(&self, state: &WorkflowState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_states (id, team_id, name, state_type, color, position, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                name = excluded.name,
                state_type = excluded.state_type,
                color = excluded.color,
                position = excluded.position,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&state.id)
        .bind(&state.team_id)
        .bind(&state.name)
        .bind(&state.state_type)
        .bind(&state.color)
        .bind(state.position)
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Workflow states in board order.
    pub async fn list_workflow_states(&self, team_id: &str) -> Result<Vec<WorkflowState>> {
        let rows = sqlx::query("SELECT * FROM workflow_states WHERE team_id = ? ORDER BY position")
            .bind(team_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(state_from_row).collect()
    }

    pub async fn upsert_label(&self, label: &Label) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO labels (id, team_id, name, color, synced_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                name = excluded.name,
                color = excluded.color,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&label.id)
        .bind(&label.team_id)
        .bind(&label.name)
        .bind(&label.color)
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_label(&self, id: &str) -> Result<Option<Label>> {
        let row = sqlx::query("SELECT * FROM labels WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(label_from_row).transpose()
    }

    pub async fn list_labels(&self, team_id: &str) -> Result<Vec<Label>> {
        let rows = sqlx::query("SELECT * FROM labels WHERE team_id = ? ORDER BY name")
            .bind(team_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(label_from_row).collect()
    }

    pub async fn upsert_cycle(&self, cycle: &Cycle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cycles (id, team_id, number, name, starts_at, ends_at, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                number = excluded.number,
                name = excluded.name,
                starts_at = excluded.starts_at,
                ends_at = excluded.ends_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&cycle.id)
        .bind(&cycle.team_id)
        .bind(cycle.number)
        .bind(&cycle.name)
        .bind(time::format_optional(cycle.starts_at))
        .bind(time::format_optional(cycle.ends_at))
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Cycles newest first.
    pub async fn list_cycles(&self, team_id: &str) -> Result<Vec<Cycle>> {
        let rows = sqlx::query("SELECT * FROM cycles WHERE team_id = ? ORDER BY number DESC")
            .bind(team_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(cycle_from_row).collect()
    }

    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, display_name, active, admin, synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                name = excluded.name,
                display_name = excluded.display_name,
                active = excluded.active,
                admin = excluded.admin,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.display_name)
        .bind(user.active)
        .bind(user.admin)
        .bind(time::format_timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Replace a team's membership set atomically.
    pub async fn replace_team_members(&self, team_id: &str, user_ids: &[String]) -> Result<()> {
        let team_id = team_id.to_string();
        let user_ids = user_ids.to_vec();
        let synced_at = time::format_timestamp(Utc::now());

        self.with_tx(move |conn| {
            Box::pin(async move {
                sqlx::query("DELETE FROM team_members WHERE team_id = ?")
                    .bind(&team_id)
                    .execute(&mut *conn)
                    .await?;
                for user_id in &user_ids {
                    sqlx::query(
                        "INSERT INTO team_members (team_id, user_id, synced_at) VALUES (?, ?, ?)",
                    )
                    .bind(&team_id)
                    .bind(user_id)
                    .bind(&synced_at)
                    .execute(&mut *conn)
                    .await?;
                }
                Ok(())
            })
        })
        .await
    }

    /// Members of a team, joined through to user rows, ordered by name.
    pub async fn list_team_members(&self, team_id: &str) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT u.* FROM users u
            JOIN team_members tm ON tm.user_id = u.id
            WHERE tm.team_id = ?
            ORDER BY u.name
            "#,
        )
        .bind(team_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn get_team_sync_state(&self, team_id: &str) -> Result<Option<TeamSyncState>> {
        let row = sqlx::query("SELECT * FROM team_sync_state WHERE team_id = ?")
            .bind(team_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|row| {
            Ok(TeamSyncState {
                team_id: row.try_get("team_id")?,
                last_synced_at: time::parse_optional(row.try_get("last_synced_at")?)?,
                last_issue_updated_at: time::parse_optional(row.try_get("last_issue_updated_at")?)?,
                issue_count: row.try_get("issue_count")?,
            })
        })
        .transpose()
    }

    pub async fn upsert_team_sync_state(&self, state: &TeamSyncState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO team_sync_state (team_id, last_synced_at, last_issue_updated_at, issue_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(team_id) DO UPDATE SET
                last_synced_at = excluded.last_synced_at,
                last_issue_updated_at = excluded.last_issue_updated_at,
                issue_count = excluded.issue_count
            "#,
        )
        .bind(&state.team_id)
        .bind(time::format_optional(state.last_synced_at))
        .bind(time::format_optional(state.last_issue_updated_at))
        .bind(state.issue_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    pub(crate) fn make_team(id: &str, key: &str) -> Team {
        Team {
            id: id.to_string(),
            key: key.to_string(),
            name: format!("Team {}", key),
            icon: None,
            created_at: ts(0),
            updated_at: ts(0),
            synced_at: ts(0),
        }
    }

    fn make_user(id: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            email: email.to_string(),
            name: format!("User {}", id),
            display_name: None,
            active: true,
            admin: false,
            synced_at: ts(0),
        }
    }

    async fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("cache.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_team_roundtrip() {
        let (_dir, store) = open_store().await;

        store.upsert_team(&make_team("t1", "ENG")).await.unwrap();
        store.upsert_team(&make_team("t2", "OPS")).await.unwrap();

        let by_key = store.get_team_by_key("ENG").await.unwrap().unwrap();
        assert_eq!(by_key.id, "t1");

        let listed = store.list_teams().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "ENG"); // "Team ENG" < "Team OPS"
    }

    #[tokio::test]
    async fn test_workflow_states_ordered_by_position() {
        let (_dir, store) = open_store().await;

        for (id, name, position) in [("s2", "Done", 3.0), ("s1", "Todo", 1.0), ("s3", "Doing", 2.0)] {
            store
                .upsert_workflow_state(&WorkflowState {
                    id: id.to_string(),
                    team_id: "t1".to_string(),
                    name: name.to_string(),
                    state_type: "unstarted".to_string(),
                    color: None,
                    position,
                    synced_at: ts(0),
                })
                .await
                .unwrap();
        }

        let states = store.list_workflow_states("t1").await.unwrap();
        let names: Vec<&str> = states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Todo", "Doing", "Done"]);
    }

    #[tokio::test]
    async fn test_cycles_ordered_by_number_desc() {
        let (_dir, store) = open_store().await;

        for number in [1, 3, 2] {
            store
                .upsert_cycle(&Cycle {
                    id: format!("c{}", number),
                    team_id: "t1".to_string(),
                    number,
                    name: None,
                    starts_at: Some(ts(1)),
                    ends_at: None,
                    synced_at: ts(0),
                })
                .await
                .unwrap();
        }

        let cycles = store.list_cycles("t1").await.unwrap();
        let numbers: Vec<i64> = cycles.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_replace_team_members() {
        let (_dir, store) = open_store().await;

        store.upsert_team(&make_team("t1", "ENG")).await.unwrap();
        for (id, email) in [("u1", "a@x.io"), ("u2", "b@x.io"), ("u3", "c@x.io")] {
            store.upsert_user(&make_user(id, email)).await.unwrap();
        }

        store
            .replace_team_members("t1", &["u1".to_string(), "u2".to_string()])
            .await
            .unwrap();
        assert_eq!(store.list_team_members("t1").await.unwrap().len(), 2);

        // Replacement drops members no longer present.
        store.replace_team_members("t1", &["u3".to_string()]).await.unwrap();
        let members = store.list_team_members("t1").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "u3");
    }

    #[tokio::test]
    async fn test_team_sync_state_roundtrip() {
        let (_dir, store) = open_store().await;

        assert!(store.get_team_sync_state("t1").await.unwrap().is_none());

        let state = TeamSyncState {
            team_id: "t1".to_string(),
            last_synced_at: Some(ts(5)),
            last_issue_updated_at: Some(ts(4)),
            issue_count: 42,
        };
        store.upsert_team_sync_state(&state).await.unwrap();

        let got = store.get_team_sync_state("t1").await.unwrap().unwrap();
        assert_eq!(got.last_issue_updated_at, Some(ts(4)));
        assert_eq!(got.issue_count, 42);

        store
            .upsert_team_sync_state(&TeamSyncState {
                issue_count: 43,
                ..state
            })
            .await
            .unwrap();
        assert_eq!(
            store.get_team_sync_state("t1").await.unwrap().unwrap().issue_count,
            43
        );
    }
}
