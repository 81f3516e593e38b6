// db/schema.rs - Cache schema provisioning
//
// The schema is versioned by structure only: provisioning is idempotent
// CREATE IF NOT EXISTS, and drift (a column the code expects that an older
// database lacks) is detected by the probe below and handled by deleting the
// database file and recreating it. There are no in-place migrations.

use sqlx::SqlitePool;

use crate::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    id TEXT PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    icon TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    identifier TEXT NOT NULL UNIQUE,
    team_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    state_id TEXT,
    state_name TEXT,
    state_type TEXT,
    assignee_id TEXT,
    assignee_email TEXT,
    creator_id TEXT,
    creator_email TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    project_id TEXT,
    project_name TEXT,
    cycle_id TEXT,
    cycle_name TEXT,
    parent_id TEXT,
    due_date TEXT,
    estimate REAL,
    url TEXT,
    branch_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    canceled_at TEXT,
    archived_at TEXT,
    data TEXT NOT NULL,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_issues_team ON issues(team_id);
CREATE INDEX IF NOT EXISTS idx_issues_team_updated ON issues(team_id, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee_id);
CREATE INDEX IF NOT EXISTS idx_issues_state ON issues(state_id);
CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
CREATE INDEX IF NOT EXISTS idx_issues_cycle ON issues(cycle_id);
CREATE INDEX IF NOT EXISTS idx_issues_parent ON issues(parent_id);

CREATE TABLE IF NOT EXISTS workflow_states (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    name TEXT NOT NULL,
    state_type TEXT NOT NULL,
    color TEXT,
    position REAL NOT NULL DEFAULT 0,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_states_team ON workflow_states(team_id);

CREATE TABLE IF NOT EXISTS labels (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    name TEXT NOT NULL,
    color TEXT,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_labels_team ON labels(team_id);

CREATE TABLE IF NOT EXISTS cycles (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    number INTEGER NOT NULL,
    name TEXT,
    starts_at TEXT,
    ends_at TEXT,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cycles_team ON cycles(team_id);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    display_name TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    admin INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    state TEXT,
    progress REAL NOT NULL DEFAULT 0,
    start_date TEXT,
    target_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_milestones (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    target_date TEXT,
    sort_order REAL NOT NULL DEFAULT 0,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_milestones_project ON project_milestones(project_id);

CREATE TABLE IF NOT EXISTS initiatives (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    owner_id TEXT,
    target_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    body TEXT NOT NULL,
    user_id TEXT,
    user_name TEXT,
    user_email TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    edited_at TEXT,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    content TEXT,
    issue_id TEXT,
    project_id TEXT,
    initiative_id TEXT,
    creator_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_issue ON documents(issue_id);
CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id);
CREATE INDEX IF NOT EXISTS idx_documents_initiative ON documents(initiative_id);

CREATE TABLE IF NOT EXISTS project_updates (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    body TEXT NOT NULL,
    health TEXT,
    user_id TEXT,
    user_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_project_updates_project ON project_updates(project_id);

CREATE TABLE IF NOT EXISTS initiative_updates (
    id TEXT PRIMARY KEY,
    initiative_id TEXT NOT NULL,
    body TEXT NOT NULL,
    health TEXT,
    user_id TEXT,
    user_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_initiative_updates_initiative ON initiative_updates(initiative_id);

CREATE TABLE IF NOT EXISTS attachments (
    id TEXT PRIMARY KEY,
    issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    title TEXT,
    subtitle TEXT,
    source_type TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attachments_issue ON attachments(issue_id);

CREATE TABLE IF NOT EXISTS embedded_files (
    id TEXT PRIMARY KEY,
    issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,
    cache_path TEXT,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embedded_files_issue ON embedded_files(issue_id);

CREATE TABLE IF NOT EXISTS team_members (
    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (team_id, user_id)
);

CREATE TABLE IF NOT EXISTS project_teams (
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (project_id, team_id)
);

-- No foreign keys here: initiative links arrive during workspace sync,
-- before the per-team pass has cached the projects they point at.
CREATE TABLE IF NOT EXISTS initiative_projects (
    initiative_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    synced_at TEXT NOT NULL,
    PRIMARY KEY (initiative_id, project_id)
);

CREATE TABLE IF NOT EXISTS team_sync_state (
    team_id TEXT PRIMARY KEY,
    last_synced_at TEXT,
    last_issue_updated_at TEXT,
    issue_count INTEGER NOT NULL DEFAULT 0
);

CREATE VIRTUAL TABLE IF NOT EXISTS issues_fts USING fts5(
    identifier,
    title,
    description,
    content=issues,
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS issues_fts_insert AFTER INSERT ON issues BEGIN
    INSERT INTO issues_fts(rowid, identifier, title, description)
    VALUES (new.rowid, new.identifier, new.title, new.description);
END;

CREATE TRIGGER IF NOT EXISTS issues_fts_delete AFTER DELETE ON issues BEGIN
    INSERT INTO issues_fts(issues_fts, rowid, identifier, title, description)
    VALUES ('delete', old.rowid, old.identifier, old.title, old.description);
END;

CREATE TRIGGER IF NOT EXISTS issues_fts_update AFTER UPDATE ON issues BEGIN
    INSERT INTO issues_fts(issues_fts, rowid, identifier, title, description)
    VALUES ('delete', old.rowid, old.identifier, old.title, old.description);
    INSERT INTO issues_fts(rowid, identifier, title, description)
    VALUES (new.rowid, new.identifier, new.title, new.description);
END;
"#;

/// One cheap SELECT per table naming every column the code reads. An older
/// database missing any of them fails here with "no such column", which the
/// open path treats as schema drift.
const PROBES: &[&str] = &[
    "SELECT id, key, name, icon, created_at, updated_at, synced_at FROM teams LIMIT 1",
    "SELECT id, identifier, team_id, title, description, state_id, state_name, state_type, \
     assignee_id, assignee_email, creator_id, creator_email, priority, project_id, project_name, \
     cycle_id, cycle_name, parent_id, due_date, estimate, url, branch_name, created_at, \
     updated_at, started_at, completed_at, canceled_at, archived_at, data, synced_at \
     FROM issues LIMIT 1",
    "SELECT id, team_id, name, state_type, color, position, synced_at FROM workflow_states LIMIT 1",
    "SELECT id, team_id, name, color, synced_at FROM labels LIMIT 1",
    "SELECT id, team_id, number, name, starts_at, ends_at, synced_at FROM cycles LIMIT 1",
    "SELECT id, email, name, display_name, active, admin, synced_at FROM users LIMIT 1",
    "SELECT id, slug, name, description, state, progress, start_date, target_date, created_at, \
     updated_at, synced_at FROM projects LIMIT 1",
    "SELECT id, project_id, name, description, target_date, sort_order, synced_at \
     FROM project_milestones LIMIT 1",
    "SELECT id, slug, name, description, owner_id, target_date, created_at, updated_at, synced_at \
     FROM initiatives LIMIT 1",
    "SELECT id, issue_id, body, user_id, user_name, user_email, created_at, updated_at, edited_at, \
     synced_at FROM comments LIMIT 1",
    "SELECT id, slug, title, content, issue_id, project_id, initiative_id, creator_id, created_at, \
     updated_at, synced_at FROM documents LIMIT 1",
    "SELECT id, project_id, body, health, user_id, user_name, created_at, updated_at, synced_at \
     FROM project_updates LIMIT 1",
    "SELECT id, initiative_id, body, health, user_id, user_name, created_at, updated_at, synced_at \
     FROM initiative_updates LIMIT 1",
    "SELECT id, issue_id, url, title, subtitle, source_type, created_at, updated_at, synced_at \
     FROM attachments LIMIT 1",
    "SELECT id, issue_id, url, filename, mime_type, file_size, cache_path, source, created_at, \
     updated_at, synced_at FROM embedded_files LIMIT 1",
    "SELECT team_id, user_id, synced_at FROM team_members LIMIT 1",
    "SELECT project_id, team_id, synced_at FROM project_teams LIMIT 1",
    "SELECT initiative_id, project_id, synced_at FROM initiative_projects LIMIT 1",
    "SELECT team_id, last_synced_at, last_issue_updated_at, issue_count FROM team_sync_state LIMIT 1",
];

/// Provision the schema. Idempotent.
pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Verify the on-disk schema matches what the code expects.
pub async fn probe(pool: &SqlitePool) -> Result<()> {
    for probe in PROBES {
        sqlx::query(probe).fetch_optional(pool).await?;
    }
    Ok(())
}
