//! Activity log and recently-visited storage.
//!
//! These tables are written by the background effect dispatcher through its
//! own connection, after the mutation that produced them has committed.
//! Nothing here participates in an issue transaction.

use rusqlite::{Connection, params};
use uuid::Uuid;

use super::sqlite::{opt_text, timestamp_col, uuid_col};
use crate::error::Result;
use crate::model::{ActivityEvent, Visit, VisitEntity};
use crate::util::time::format_timestamp;

/// Append one activity event.
///
/// # Errors
///
/// Returns an error if the insert fails or a payload cannot be serialized.
pub fn insert_activity(conn: &Connection, event: &ActivityEvent) -> Result<i64> {
    let requested = event
        .requested_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let current = event
        .current_instance
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        r"
        INSERT INTO issue_activities
            (kind, issue_id, project_id, actor_id, requested_data, current_instance, epoch)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            event.kind.as_str(),
            event.issue_id.to_string(),
            event.project_id.to_string(),
            event.actor_id.to_string(),
            requested,
            current,
            event.epoch,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Activities for an issue, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored row is malformed.
pub fn list_activities(conn: &Connection, issue_id: Uuid) -> Result<Vec<ActivityEvent>> {
    let mut stmt = conn.prepare(
        r"
        SELECT kind, issue_id, project_id, actor_id, requested_data, current_instance, epoch
        FROM issue_activities
        WHERE issue_id = ?1
        ORDER BY epoch ASC, id ASC
        ",
    )?;
    let rows = stmt
        .query_map([issue_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                uuid_col(row, 1)?,
                uuid_col(row, 2)?,
                uuid_col(row, 3)?,
                opt_text(row, 4)?,
                opt_text(row, 5)?,
                row.get::<_, i64>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(kind, issue_id, project_id, actor_id, requested, current, epoch)| -> Result<ActivityEvent> {
                Ok(ActivityEvent {
                    kind: kind.parse()?,
                    issue_id,
                    project_id,
                    actor_id,
                    requested_data: requested.as_deref().map(serde_json::from_str).transpose()?,
                    current_instance: current.as_deref().map(serde_json::from_str).transpose()?,
                    epoch,
                })
            },
        )
        .collect()
}

/// Record a visit, replacing the previous visit to the same entity.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn upsert_visit(conn: &Connection, visit: &Visit) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO recent_visits (user_id, project_id, entity, entity_id, visited_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(user_id, entity, entity_id) DO UPDATE SET
            project_id = excluded.project_id,
            visited_at = excluded.visited_at
        ",
        params![
            visit.user_id.to_string(),
            visit.project_id.to_string(),
            visit.entity.as_str(),
            visit.entity_id.to_string(),
            format_timestamp(&visit.visited_at),
        ],
    )?;
    Ok(())
}

/// A user's visits, most recent first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored row is malformed.
pub fn recent_visits(conn: &Connection, user_id: Uuid, limit: usize) -> Result<Vec<Visit>> {
    let mut stmt = conn.prepare(
        r"
        SELECT user_id, project_id, entity, entity_id, visited_at
        FROM recent_visits
        WHERE user_id = ?1
        ORDER BY visited_at DESC
        LIMIT ?2
        ",
    )?;
    let visits = stmt
        .query_map(params![user_id.to_string(), limit], |row| {
            let entity = match row.get::<_, String>(2)?.as_str() {
                "project" => VisitEntity::Project,
                _ => VisitEntity::Issue,
            };
            Ok(Visit {
                user_id: uuid_col(row, 0)?,
                project_id: uuid_col(row, 1)?,
                entity,
                entity_id: uuid_col(row, 3)?,
                visited_at: timestamp_col(row, 4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(visits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActivityKind;
    use crate::storage::schema::apply_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn activities_keep_their_payloads() {
        let conn = conn();
        let issue_id = Uuid::now_v7();
        let event = ActivityEvent {
            kind: ActivityKind::Updated,
            issue_id,
            project_id: Uuid::now_v7(),
            actor_id: Uuid::now_v7(),
            requested_data: Some(serde_json::json!({"priority": "high"})),
            current_instance: None,
            epoch: 1_700_000_000,
        };
        insert_activity(&conn, &event).unwrap();
        let stored = list_activities(&conn, issue_id).unwrap();
        assert_eq!(stored, vec![event]);
    }

    #[test]
    fn revisiting_replaces_the_visit() {
        let conn = conn();
        let user = Uuid::now_v7();
        let project = Uuid::now_v7();
        let mut visit = Visit {
            user_id: user,
            project_id: project,
            entity: VisitEntity::Project,
            entity_id: project,
            visited_at: crate::util::time::now(),
        };
        upsert_visit(&conn, &visit).unwrap();
        visit.visited_at += chrono::Duration::seconds(5);
        upsert_visit(&conn, &visit).unwrap();

        let visits = recent_visits(&conn, user, 10).unwrap();
        assert_eq!(visits, vec![visit]);
    }
}
