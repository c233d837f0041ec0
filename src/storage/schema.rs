//! Database schema definitions and migration logic.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// The complete SQL schema for the workitems database.
///
/// Ids are hyphenated UUID text. Timestamps are RFC3339 text with
/// microsecond precision and a `Z` suffix, so they compare correctly as
/// strings.
pub const SCHEMA_SQL: &str = r"
    -- Projects
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        identifier TEXT NOT NULL UNIQUE,
        default_assignee_id TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS project_members (
        project_id TEXT NOT NULL,
        member_id TEXT NOT NULL,
        role INTEGER NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (project_id, member_id),
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
        CHECK (role IN (5, 10, 15, 20))
    );
    CREATE INDEX IF NOT EXISTS idx_project_members_member ON project_members(member_id);

    -- Project catalog
    CREATE TABLE IF NOT EXISTS states (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        name TEXT NOT NULL,
        group_name TEXT NOT NULL,
        sequence INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
        CHECK (group_name IN ('backlog', 'unstarted', 'started', 'completed', 'cancelled'))
    );
    CREATE INDEX IF NOT EXISTS idx_states_project ON states(project_id, sequence);

    CREATE TABLE IF NOT EXISTS labels (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        name TEXT NOT NULL,
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_labels_project ON labels(project_id, name);

    CREATE TABLE IF NOT EXISTS modules (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        name TEXT NOT NULL,
        archived_at TEXT,
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_modules_project ON modules(project_id);

    CREATE TABLE IF NOT EXISTS cycles (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        name TEXT NOT NULL,
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_cycles_project ON cycles(project_id);

    -- Issues
    CREATE TABLE IF NOT EXISTS issues (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        sequence_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description_html TEXT,
        state_id TEXT,
        priority TEXT NOT NULL DEFAULT 'none',
        sort_order REAL NOT NULL DEFAULT 65535,
        start_date TEXT,
        target_date TEXT,
        completed_at TEXT,
        parent_id TEXT,
        cycle_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        created_by TEXT,
        updated_by TEXT,
        archived_at TEXT,
        deleted_at TEXT,
        is_draft INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
        CHECK (length(name) >= 1 AND length(name) <= 255),
        CHECK (priority IN ('urgent', 'high', 'medium', 'low', 'none'))
    );

    CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id, deleted_at);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_issues_sequence ON issues(project_id, sequence_id);
    CREATE INDEX IF NOT EXISTS idx_issues_state ON issues(state_id);
    CREATE INDEX IF NOT EXISTS idx_issues_parent ON issues(parent_id);
    CREATE INDEX IF NOT EXISTS idx_issues_cycle ON issues(cycle_id);
    CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at);
    CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at, id);

    -- Issue associations
    CREATE TABLE IF NOT EXISTS issue_labels (
        issue_id TEXT NOT NULL,
        label_id TEXT NOT NULL,
        PRIMARY KEY (issue_id, label_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
        FOREIGN KEY (label_id) REFERENCES labels(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_issue_labels_label ON issue_labels(label_id);

    CREATE TABLE IF NOT EXISTS issue_assignees (
        issue_id TEXT NOT NULL,
        assignee_id TEXT NOT NULL,
        PRIMARY KEY (issue_id, assignee_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_issue_assignees_assignee ON issue_assignees(assignee_id);

    CREATE TABLE IF NOT EXISTS issue_modules (
        issue_id TEXT NOT NULL,
        module_id TEXT NOT NULL,
        PRIMARY KEY (issue_id, module_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
        FOREIGN KEY (module_id) REFERENCES modules(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_issue_modules_module ON issue_modules(module_id);

    CREATE TABLE IF NOT EXISTS issue_subscribers (
        issue_id TEXT NOT NULL,
        subscriber_id TEXT NOT NULL,
        PRIMARY KEY (issue_id, subscriber_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS issue_links (
        id TEXT PRIMARY KEY,
        issue_id TEXT NOT NULL,
        url TEXT NOT NULL,
        title TEXT,
        created_by TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_issue_links_issue ON issue_links(issue_id);

    CREATE TABLE IF NOT EXISTS issue_attachments (
        id TEXT PRIMARY KEY,
        issue_id TEXT NOT NULL,
        asset TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        created_by TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_issue_attachments_issue ON issue_attachments(issue_id);

    CREATE TABLE IF NOT EXISTS issue_reactions (
        id TEXT PRIMARY KEY,
        issue_id TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        reaction TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (issue_id, actor_id, reaction),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    -- Only assignees who are active members of the issue's project count.
    CREATE VIEW IF NOT EXISTS active_issue_assignees AS
        SELECT ia.issue_id, ia.assignee_id
        FROM issue_assignees ia
        JOIN issues i ON i.id = ia.issue_id
        JOIN project_members pm
            ON pm.project_id = i.project_id
           AND pm.member_id = ia.assignee_id
           AND pm.is_active = 1;

    CREATE VIEW IF NOT EXISTS live_issue_modules AS
        SELECT im.issue_id, im.module_id
        FROM issue_modules im
        JOIN modules m ON m.id = im.module_id
        WHERE m.archived_at IS NULL;

    -- Per-user display preferences
    CREATE TABLE IF NOT EXISTS user_properties (
        user_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        filters TEXT NOT NULL DEFAULT '{}',
        display_filters TEXT NOT NULL,
        display_properties TEXT NOT NULL,
        PRIMARY KEY (user_id, project_id),
        FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
    );

    -- Side effects
    CREATE TABLE IF NOT EXISTS issue_activities (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL,
        issue_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        requested_data TEXT,
        current_instance TEXT,
        epoch INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_issue_activities_issue ON issue_activities(issue_id);

    CREATE TABLE IF NOT EXISTS recent_visits (
        user_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        entity TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        visited_at TEXT NOT NULL,
        PRIMARY KEY (user_id, entity, entity_id)
    );

    -- Metadata
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Apply the schema to the database.
///
/// This uses `execute_batch` to run the entire DDL script.
/// It is idempotent because all statements use `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    run_migrations(conn)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Bring databases created by older versions up to date.
fn run_migrations(conn: &Connection) -> Result<()> {
    // v2: issues gained is_draft; version 1 databases lack the column.
    let has_is_draft: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('issues') WHERE name='is_draft'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !has_is_draft {
        conn.execute(
            "ALTER TABLE issues ADD COLUMN is_draft INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "issues",
            "issue_labels",
            "user_properties",
            "active_issue_assignees",
            "live_issue_modules",
        ] {
            assert!(tables.contains(&expected.to_string()), "{expected}");
        }

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        // In-memory DBs use MEMORY journaling, regardless of what we set
        assert!(journal_mode.to_uppercase() == "WAL" || journal_mode.to_uppercase() == "MEMORY");

        let foreign_keys: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION.to_string());
    }
}
