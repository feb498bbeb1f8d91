use chrono::Utc;
use rusqlite::types::Type;
use crate::errors::ConductorError;
use crate::models::{MonitorTask, TaskStatus};
use super::Database;

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<MonitorTask> {
    let status: String = row.get(8)?;
    Ok(MonitorTask {
        id: row.get(0)?,
        session_id: row.get(1)?,
        tool_call_id: row.get(2)?,
        parent_id: row.get(3)?,
        tool_name: row.get(4)?,
        description: row.get(5)?,
        subagent_type: row.get(6)?,
        subagent_model: row.get(7)?,
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
        input_summary: row.get(9)?,
        output_summary: row.get(10)?,
        depth: row.get::<_, i64>(11)?.max(0) as usize,
        duration_ms: row.get::<_, Option<i64>>(12)?.map(|v| v.max(0) as u64),
        started_at: row.get(13)?,
        finished_at: row.get(14)?,
    })
}

impl Database {
    pub fn insert_monitor_task(&self, task: &MonitorTask) -> Result<(), ConductorError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO monitor_tasks (id, session_id, tool_call_id, parent_id, tool_name, description, subagent_type,
                subagent_model, status, input_summary, output_summary, depth, duration_ms, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                task.id,
                task.session_id,
                task.tool_call_id,
                task.parent_id,
                task.tool_name,
                task.description,
                task.subagent_type,
                task.subagent_model,
                task.status.as_str(),
                task.input_summary,
                task.output_summary,
                task.depth as i64,
                task.duration_ms.map(|v| v as i64),
                task.started_at,
                task.finished_at,
            ],
        ).map_err(|e| ConductorError::Database(format!("Failed to create monitor task: {}", e)))?;
        Ok(())
    }

    pub fn update_monitor_task(
        &self,
        id: &str,
        status: TaskStatus,
        output_summary: Option<&str>,
        duration_ms: Option<u64>,
    ) -> Result<(), ConductorError> {
        let conn = self.lock()?;
        let finished_at = match status {
            TaskStatus::Running => None,
            _ => Some(Utc::now().to_rfc3339()),
        };
        conn.execute(
            "UPDATE monitor_tasks SET status = ?2,
                output_summary = COALESCE(?3, output_summary),
                duration_ms = COALESCE(?4, duration_ms),
                finished_at = COALESCE(?5, finished_at)
             WHERE id = ?1",
            rusqlite::params![id, status.as_str(), output_summary, duration_ms.map(|v| v as i64), finished_at],
        ).map_err(|e| ConductorError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    pub fn get_monitor_tasks(&self, session_id: &str) -> Result<Vec<MonitorTask>, ConductorError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, tool_call_id, parent_id, tool_name, description, subagent_type, subagent_model,
                status, input_summary, output_summary, depth, duration_ms, started_at, finished_at
             FROM monitor_tasks WHERE session_id = ?1 ORDER BY started_at, rowid",
        ).map_err(|e| ConductorError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![session_id], row_to_task)
            .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| ConductorError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }
}
