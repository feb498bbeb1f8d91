use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use crate::errors::ConductorError;
use crate::models::{DiffCapture, Session, SessionOutcome, SessionStatus};
use crate::protocol::ProtocolEvent;
use super::connection::new_id;
use super::Database;

const SESSION_COLUMNS: &str = "id, workspace_id, prompt, skill, agent, model, status, cost_usd, input_tokens, \
     output_tokens, num_turns, duration_ms, agent_session_id, started_at, finished_at";

fn opt_u64(value: Option<i64>) -> Option<u64> {
    value.map(|v| v.max(0) as u64)
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let status: String = row.get(6)?;
    Ok(Session {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        prompt: row.get(2)?,
        skill: row.get(3)?,
        agent: row.get(4)?,
        model: row.get(5)?,
        status: status
            .parse::<SessionStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        cost_usd: row.get(7)?,
        input_tokens: opt_u64(row.get(8)?),
        output_tokens: opt_u64(row.get(9)?),
        num_turns: row.get::<_, Option<i64>>(10)?.map(|v| v.clamp(0, u32::MAX as i64) as u32),
        duration_ms: opt_u64(row.get(11)?),
        agent_session_id: row.get(12)?,
        started_at: row.get(13)?,
        finished_at: row.get(14)?,
    })
}

impl Database {
    /// Open a `running` session and return its id.
    pub fn create_session(
        &self,
        workspace_id: &str,
        prompt: &str,
        skill: Option<&str>,
        agent: Option<&str>,
        model: Option<&str>,
    ) -> Result<String, ConductorError> {
        let id = new_id();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (id, workspace_id, prompt, skill, agent, model, status, started_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running', ?7)",
            rusqlite::params![id, workspace_id, prompt, skill, agent, model, Utc::now().to_rfc3339()],
        ).map_err(|e| ConductorError::Database(format!("Failed to create session: {}", e)))?;
        Ok(id)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>, ConductorError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
            rusqlite::params![id],
            row_to_session,
        )
        .optional()
        .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, ConductorError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY started_at DESC LIMIT ?1",
            SESSION_COLUMNS
        )).map_err(|e| ConductorError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_session)
            .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| ConductorError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }

    /// Close a session. Metrics that are `None` keep their stored value.
    pub fn finish_session(&self, id: &str, outcome: &SessionOutcome) -> Result<(), ConductorError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET status = ?2,
                model = COALESCE(?3, model),
                cost_usd = COALESCE(?4, cost_usd),
                input_tokens = COALESCE(?5, input_tokens),
                output_tokens = COALESCE(?6, output_tokens),
                num_turns = COALESCE(?7, num_turns),
                duration_ms = COALESCE(?8, duration_ms),
                agent_session_id = COALESCE(?9, agent_session_id),
                finished_at = ?10
             WHERE id = ?1",
            rusqlite::params![
                id,
                outcome.status.as_str(),
                outcome.model,
                outcome.cost_usd,
                outcome.input_tokens.map(|v| v as i64),
                outcome.output_tokens.map(|v| v as i64),
                outcome.num_turns.map(i64::from),
                outcome.duration_ms.map(|v| v as i64),
                outcome.agent_session_id,
                Utc::now().to_rfc3339(),
            ],
        ).map_err(|e| ConductorError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    /// Append events in one transaction. Sequence numbers continue after the
    /// highest stored for the session.
    pub fn insert_session_events_batch(&self, session_id: &str, events: &[ProtocolEvent]) -> Result<usize, ConductorError> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let start: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM session_events WHERE session_id = ?1",
            rusqlite::params![session_id],
            |row| row.get(0),
        )?;
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO session_events (session_id, seq, event_type, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (offset, event) in events.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    session_id,
                    start + offset as i64,
                    event.kind.as_str(),
                    event.to_json()?,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    pub fn get_session_events(&self, session_id: &str) -> Result<Vec<ProtocolEvent>, ConductorError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM session_events WHERE session_id = ?1 ORDER BY seq",
        ).map_err(|e| ConductorError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![session_id], |row| row.get::<_, String>(0))
            .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))?;

        let mut events = Vec::new();
        for row in rows {
            let data = row.map_err(|e| ConductorError::Database(format!("Row error: {}", e)))?;
            events.push(serde_json::from_str(&data)?);
        }
        Ok(events)
    }

    pub fn upsert_session_diff(&self, session_id: &str, diff: &DiffCapture) -> Result<(), ConductorError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO session_diffs (session_id, diff_stat, diff_content, files_changed, insertions, deletions, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id) DO UPDATE SET
                diff_stat = excluded.diff_stat,
                diff_content = excluded.diff_content,
                files_changed = excluded.files_changed,
                insertions = excluded.insertions,
                deletions = excluded.deletions,
                captured_at = excluded.captured_at",
            rusqlite::params![
                session_id,
                diff.diff_stat,
                diff.diff_content,
                diff.files_changed,
                diff.insertions,
                diff.deletions,
                Utc::now().to_rfc3339(),
            ],
        ).map_err(|e| ConductorError::Database(format!("Failed to store diff: {}", e)))?;
        Ok(())
    }

    pub fn get_session_diff(&self, session_id: &str) -> Result<Option<DiffCapture>, ConductorError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT diff_stat, diff_content, files_changed, insertions, deletions FROM session_diffs WHERE session_id = ?1",
            rusqlite::params![session_id],
            |row| {
                Ok(DiffCapture {
                    diff_stat: row.get(0)?,
                    diff_content: row.get(1)?,
                    files_changed: row.get(2)?,
                    insertions: row.get(3)?,
                    deletions: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventKind;

    fn setup() -> (Database, String) {
        let db = Database::in_memory().unwrap();
        let ws = db.upsert_workspace("app", "/srv/app", "/cfg").unwrap();
        let sid = db.create_session(&ws.id, "do things", Some("review"), None, Some("opus")).unwrap();
        (db, sid)
    }

    #[test]
    fn test_create_and_finish_session() {
        let (db, sid) = setup();
        let session = db.get_session(&sid).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.skill.as_deref(), Some("review"));

        let outcome = SessionOutcome {
            cost_usd: Some(0.42),
            input_tokens: Some(1000),
            num_turns: Some(3),
            agent_session_id: Some("cli-9".into()),
            ..SessionOutcome::status_only(SessionStatus::Completed)
        };
        db.finish_session(&sid, &outcome).unwrap();

        let session = db.get_session(&sid).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.cost_usd, Some(0.42));
        assert_eq!(session.input_tokens, Some(1000));
        assert_eq!(session.num_turns, Some(3));
        assert_eq!(session.model.as_deref(), Some("opus"));
        assert_eq!(session.agent_session_id.as_deref(), Some("cli-9"));
        assert!(session.finished_at.is_some());
    }

    #[test]
    fn test_event_batches_keep_order() {
        let (db, sid) = setup();
        let first = vec![
            ProtocolEvent::new(EventKind::RunStarted, &sid),
            ProtocolEvent::new(EventKind::TextMessageStart, &sid),
        ];
        let second = vec![ProtocolEvent::new(EventKind::RunFinished, &sid)];
        assert_eq!(db.insert_session_events_batch(&sid, &first).unwrap(), 2);
        assert_eq!(db.insert_session_events_batch(&sid, &second).unwrap(), 1);
        assert_eq!(db.insert_session_events_batch(&sid, &[]).unwrap(), 0);

        let kinds: Vec<EventKind> = db.get_session_events(&sid).unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::RunStarted, EventKind::TextMessageStart, EventKind::RunFinished]);
    }

    #[test]
    fn test_diff_upsert_replaces() {
        let (db, sid) = setup();
        assert!(db.get_session_diff(&sid).unwrap().is_none());

        let mut diff = DiffCapture {
            diff_stat: Some("1 file changed".into()),
            files_changed: 1,
            ..Default::default()
        };
        db.upsert_session_diff(&sid, &diff).unwrap();
        diff.files_changed = 4;
        db.upsert_session_diff(&sid, &diff).unwrap();
        assert_eq!(db.get_session_diff(&sid).unwrap().unwrap().files_changed, 4);
    }
}
