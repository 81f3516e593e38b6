// sync/engine.rs - One sync cycle: workspace fan-out, team metadata, and the
// incremental issue walk
//
// The walk is "sync until unchanged": pages arrive ordered by `updated_at`
// descending, so the first page whose issues are all at or below the team's
// watermark proves everything older is already cached. Per-team and
// per-entity failures are logged and skipped; only a failed team list aborts
// the cycle.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::details::{DetailBatch, RateLimitLatch};
use super::embedded::{comment_source, EmbeddedFileScanner, SOURCE_DESCRIPTION};
use crate::api::LinearClient;
use crate::db::Store;
use crate::models::{Issue, Team, TeamSyncState};
use crate::{Error, Result};

/// Counters for one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub teams_synced: usize,
    pub issues_created: usize,
    pub issues_updated: usize,
    pub issues_unchanged: usize,
    pub errors: usize,
}

/// Runs sync cycles against the store. Owned by the worker; `sync_now` runs
/// one cycle on the caller through the same code path.
pub struct SyncEngine {
    store: Arc<Store>,
    client: Arc<dyn LinearClient>,
    page_size: u32,
    rate_limit: Arc<RateLimitLatch>,
    scanner: EmbeddedFileScanner,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        store: Arc<Store>,
        client: Arc<dyn LinearClient>,
        page_size: u32,
        rate_limit: Arc<RateLimitLatch>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let scanner = EmbeddedFileScanner::new(client.auth_header())?;
        Ok(Self {
            store,
            client,
            page_size,
            rate_limit,
            scanner,
            cancel,
        })
    }

    /// Run one full cycle: workspace entities, then every team serially.
    pub async fn run_cycle(&self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        self.sync_workspace(&mut stats).await;

        let teams = self.client.teams().await?;
        for team in &teams {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.sync_team(team, &mut stats).await {
                Ok(()) => stats.teams_synced += 1,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!("Sync failed for team {}: {}", team.key, e);
                    stats.errors += 1;
                }
            }
        }

        tracing::info!(
            "Sync cycle complete: {} teams, {} new, {} updated, {} unchanged, {} errors",
            stats.teams_synced,
            stats.issues_created,
            stats.issues_updated,
            stats.issues_unchanged,
            stats.errors
        );
        Ok(stats)
    }

    /// Workspace-level entities: users, initiatives, and initiative→project
    /// links. Failures are logged; the team pass still runs.
    async fn sync_workspace(&self, stats: &mut SyncStats) {
        match self.client.users().await {
            Ok(users) => {
                for user in &users {
                    if let Err(e) = self.store.upsert_user(user).await {
                        tracing::warn!("Failed to store user {}: {}", user.email, e);
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list users: {}", e);
                stats.errors += 1;
            }
        }

        match self.client.initiatives().await {
            Ok(initiatives) => {
                for entry in &initiatives {
                    if let Err(e) = self.store.upsert_initiative(&entry.initiative).await {
                        tracing::warn!(
                            "Failed to store initiative {}: {}",
                            entry.initiative.name,
                            e
                        );
                        stats.errors += 1;
                        continue;
                    }
                    for project_id in &entry.project_ids {
                        if let Err(e) = self
                            .store
                            .upsert_initiative_project_link(&entry.initiative.id, project_id)
                            .await
                        {
                            tracing::warn!("Failed to link initiative project: {}", e);
                            stats.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list initiatives: {}", e);
                stats.errors += 1;
            }
        }
    }

    async fn sync_team(&self, team: &Team, stats: &mut SyncStats) -> Result<()> {
        self.store.upsert_team(team).await?;
        self.sync_team_metadata(team, stats).await;
        self.sync_team_issues(team, stats).await
    }

    /// States, labels, cycles, projects (+ milestones + links), members.
    /// Each sub-resource fails independently.
    async fn sync_team_metadata(&self, team: &Team, stats: &mut SyncStats) {
        match self.client.team_states(&team.id).await {
            Ok(states) => {
                for state in &states {
                    if let Err(e) = self.store.upsert_workflow_state(state).await {
                        tracing::warn!("Failed to store state {}: {}", state.name, e);
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list states for {}: {}", team.key, e);
                stats.errors += 1;
            }
        }

        match self.client.team_labels(&team.id).await {
            Ok(labels) => {
                for label in &labels {
                    if let Err(e) = self.store.upsert_label(label).await {
                        tracing::warn!("Failed to store label {}: {}", label.name, e);
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list labels for {}: {}", team.key, e);
                stats.errors += 1;
            }
        }

        match self.client.team_cycles(&team.id).await {
            Ok(cycles) => {
                for cycle in &cycles {
                    if let Err(e) = self.store.upsert_cycle(cycle).await {
                        tracing::warn!("Failed to store cycle {}: {}", cycle.number, e);
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list cycles for {}: {}", team.key, e);
                stats.errors += 1;
            }
        }

        match self.client.team_projects(&team.id).await {
            Ok(projects) => {
                for project in &projects {
                    if let Err(e) = self.store.upsert_project(project).await {
                        tracing::warn!("Failed to store project {}: {}", project.name, e);
                        stats.errors += 1;
                        continue;
                    }
                    if let Err(e) = self
                        .store
                        .upsert_project_team_link(&project.id, &team.id)
                        .await
                    {
                        tracing::warn!("Failed to link project to team: {}", e);
                        stats.errors += 1;
                    }
                    match self.client.project_milestones(&project.id).await {
                        Ok(milestones) => {
                            for milestone in &milestones {
                                if let Err(e) =
                                    self.store.upsert_project_milestone(milestone).await
                                {
                                    tracing::warn!(
                                        "Failed to store milestone {}: {}",
                                        milestone.name,
                                        e
                                    );
                                    stats.errors += 1;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Failed to list milestones for {}: {}",
                                project.name,
                                e
                            );
                            stats.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list projects for {}: {}", team.key, e);
                stats.errors += 1;
            }
        }

        match self.client.team_members(&team.id).await {
            Ok(members) => {
                for member in &members {
                    if let Err(e) = self.store.upsert_user(member).await {
                        tracing::warn!("Failed to store member {}: {}", member.email, e);
                        stats.errors += 1;
                    }
                }
                let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
                if let Err(e) = self.store.replace_team_members(&team.id, &ids).await {
                    tracing::warn!("Failed to replace members for {}: {}", team.key, e);
                    stats.errors += 1;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list members for {}: {}", team.key, e);
                stats.errors += 1;
            }
        }
    }

    /// Walk a team's issues newest-first until a full page is unchanged,
    /// then persist the fresh watermark and count.
    async fn sync_team_issues(&self, team: &Team, stats: &mut SyncStats) -> Result<()> {
        let watermark = self
            .store
            .get_team_sync_state(&team.id)
            .await?
            .and_then(|s| s.last_issue_updated_at);

        let mut cursor: Option<String> = None;
        let mut batch = DetailBatch::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let page = self
                .client
                .team_issues_page(&team.id, cursor.as_deref(), self.page_size)
                .await?;
            if page.issues.is_empty() {
                break;
            }

            let mut unchanged_on_page = 0;
            for issue in &page.issues {
                let fresh = watermark.map_or(true, |w| issue.updated_at > w);
                if !fresh {
                    unchanged_on_page += 1;
                    stats.issues_unchanged += 1;
                    continue;
                }
                if let Err(e) = self.apply_issue(issue, &mut batch, stats).await {
                    if matches!(e, Error::Cancelled) {
                        return Err(Error::Cancelled);
                    }
                    tracing::warn!("Skipping issue {}: {}", issue.identifier, e);
                    stats.errors += 1;
                }
            }

            if unchanged_on_page == page.issues.len() {
                break;
            }
            match (page.page_info.has_next_page, page.page_info.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        self.flush_details(batch.take(), stats).await;

        // Re-read the max from our own table rather than trusting the walk:
        // an equal-timestamp tie split across a page boundary self-corrects
        // on the next cycle this way.
        let last_issue_updated_at = self.store.max_issue_updated_at(&team.id).await?;
        let issue_count = self.store.count_team_issues(&team.id).await?;
        self.store
            .upsert_team_sync_state(&TeamSyncState {
                team_id: team.id.clone(),
                last_synced_at: Some(Utc::now()),
                last_issue_updated_at,
                issue_count,
            })
            .await?;

        tracing::debug!(
            "Team {} synced: {} issues cached, watermark {:?}",
            team.key,
            issue_count,
            last_issue_updated_at
        );
        Ok(())
    }

    /// Upsert one fresh issue, harvest its description, and queue it for a
    /// detail fetch. Each upsert is its own transaction; cancellation between
    /// issues never leaves a partial batch.
    async fn apply_issue(
        &self,
        issue: &Issue,
        batch: &mut DetailBatch,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let existing = self.store.get_issue(&issue.id).await?;
        self.store.upsert_issue(issue).await?;
        if existing.is_some() {
            stats.issues_updated += 1;
        } else {
            stats.issues_created += 1;
        }

        if let Some(description) = &issue.description {
            self.scanner
                .harvest(&self.store, &issue.id, description, SOURCE_DESCRIPTION)
                .await;
        }

        if batch.push(issue.id.clone(), issue.identifier.clone()) {
            let items = batch.take();
            self.flush_details(items, stats).await;
        }
        Ok(())
    }

    /// Fetch comments/documents/attachments for one batch of issues. Skipped
    /// entirely while the rate-limit latch is closed; a rate-limit error
    /// closes it for the full back-off window.
    async fn flush_details(&self, items: Vec<(String, String)>, stats: &mut SyncStats) {
        if items.is_empty() {
            return;
        }
        if self.rate_limit.is_latched() {
            tracing::debug!(
                "Skipping detail fetch for {} issues until {:?}",
                items.len(),
                self.rate_limit.latched_until()
            );
            return;
        }

        let ids: Vec<String> = items.into_iter().map(|(id, _)| id).collect();
        let details = match self.client.issue_details_batch(&ids).await {
            Ok(details) => details,
            Err(e) if e.is_rate_limited() => {
                self.rate_limit.trip();
                tracing::warn!(
                    "Rate limited while fetching issue details, backing off until {:?}",
                    self.rate_limit.latched_until()
                );
                return;
            }
            Err(e) => {
                tracing::warn!("Detail fetch failed for {} issues: {}", ids.len(), e);
                stats.errors += 1;
                return;
            }
        };

        for (issue_id, detail) in details {
            for comment in &detail.comments {
                if let Err(e) = self.store.upsert_comment(comment).await {
                    tracing::warn!("Failed to store comment on {}: {}", issue_id, e);
                    stats.errors += 1;
                    continue;
                }
                self.scanner
                    .harvest(
                        &self.store,
                        &issue_id,
                        &comment.body,
                        &comment_source(&comment.id),
                    )
                    .await;
            }
            for document in &detail.documents {
                if let Err(e) = self.store.upsert_document(document).await {
                    tracing::warn!("Failed to store document on {}: {}", issue_id, e);
                    stats.errors += 1;
                }
            }
            for attachment in &detail.attachments {
                if let Err(e) = self.store.upsert_attachment(attachment).await {
                    tracing::warn!("Failed to store attachment on {}: {}", issue_id, e);
                    stats.errors += 1;
                }
            }
        }
    }
}
