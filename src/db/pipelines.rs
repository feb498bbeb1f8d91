use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use crate::errors::ConductorError;
use crate::models::{NewStep, Pipeline, PipelineStatus, PipelineStep, PlannedStep, StepStatus};
use super::connection::new_id;
use super::Database;

const PIPELINE_COLUMNS: &str =
    "id, workspace_id, name, spec, status, total_cost_usd, total_duration_ms, created_at, started_at, completed_at";

const STEP_COLUMNS: &str = "id, pipeline_id, position, name, description, agent, skill, model, prompt_template, \
     depends_on, status, session_id, output_summary, error, started_at, completed_at";

fn conversion_error(column: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn row_to_pipeline(row: &rusqlite::Row) -> rusqlite::Result<Pipeline> {
    let status: String = row.get(4)?;
    Ok(Pipeline {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        spec: row.get(3)?,
        status: status.parse::<PipelineStatus>().map_err(|e| conversion_error(4, e))?,
        total_cost_usd: row.get(5)?,
        total_duration_ms: row.get::<_, i64>(6)?.max(0) as u64,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

fn row_to_step(row: &rusqlite::Row) -> rusqlite::Result<PipelineStep> {
    let depends_on: String = row.get(9)?;
    let status: String = row.get(10)?;
    Ok(PipelineStep {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        position: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        agent: row.get(5)?,
        skill: row.get(6)?,
        model: row.get(7)?,
        prompt_template: row.get(8)?,
        depends_on: serde_json::from_str(&depends_on).map_err(|e| conversion_error(9, e))?,
        status: status.parse::<StepStatus>().map_err(|e| conversion_error(10, e))?,
        session_id: row.get(11)?,
        output_summary: row.get(12)?,
        error: row.get(13)?,
        started_at: row.get(14)?,
        completed_at: row.get(15)?,
    })
}

impl Database {
    /// Insert a pipeline and its steps in one transaction. Step positions
    /// follow slice order.
    pub fn create_pipeline(
        &self,
        workspace_id: &str,
        name: &str,
        spec: Option<&str>,
        status: PipelineStatus,
        steps: &[NewStep],
    ) -> Result<String, ConductorError> {
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO pipelines (id, workspace_id, name, spec, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id, workspace_id, name, spec, status.as_str(), now],
        ).map_err(|e| ConductorError::Database(format!("Failed to create pipeline: {}", e)))?;

        for (position, step) in steps.iter().enumerate() {
            let step_id = step.id.clone().unwrap_or_else(new_id);
            tx.execute(
                "INSERT INTO pipeline_steps (id, pipeline_id, position, name, description, agent, skill, model, prompt_template, depends_on, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending')",
                rusqlite::params![
                    step_id,
                    id,
                    position as i64,
                    step.name,
                    step.description,
                    step.agent,
                    step.skill,
                    step.model,
                    step.prompt_template,
                    serde_json::to_string(&step.depends_on)?,
                ],
            ).map_err(|e| ConductorError::Database(format!("Failed to create step '{}': {}", step.name, e)))?;
        }

        tx.commit()?;
        Ok(id)
    }

    /// Persist a planned pipeline as `ready`. Index dependencies become step
    /// ids; only references to earlier steps are kept.
    pub fn create_pipeline_from_plan(
        &self,
        workspace_id: &str,
        name: &str,
        spec: Option<&str>,
        planned: &[PlannedStep],
    ) -> Result<String, ConductorError> {
        let ids: Vec<String> = planned.iter().map(|_| new_id()).collect();
        let steps: Vec<NewStep> = planned
            .iter()
            .enumerate()
            .map(|(i, p)| NewStep {
                id: Some(ids[i].clone()),
                name: p.name.clone(),
                description: p.description.clone(),
                agent: p.agent.clone(),
                skill: p.skill.clone(),
                model: p.model.clone(),
                prompt_template: p.prompt_template.clone(),
                depends_on: p
                    .depends_on
                    .iter()
                    .filter(|&&dep| dep < i)
                    .map(|&dep| ids[dep].clone())
                    .collect(),
            })
            .collect();
        self.create_pipeline(workspace_id, name, spec, PipelineStatus::Ready, &steps)
    }

    pub fn get_pipeline(&self, id: &str) -> Result<Option<Pipeline>, ConductorError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM pipelines WHERE id = ?1", PIPELINE_COLUMNS),
            rusqlite::params![id],
            row_to_pipeline,
        )
        .optional()
        .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))
    }

    pub fn list_pipelines(&self, limit: usize) -> Result<Vec<Pipeline>, ConductorError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pipelines ORDER BY created_at DESC LIMIT ?1",
            PIPELINE_COLUMNS
        )).map_err(|e| ConductorError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_pipeline)
            .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| ConductorError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }

    pub fn update_pipeline_status(&self, id: &str, status: PipelineStatus) -> Result<(), ConductorError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let affected = match status {
            PipelineStatus::Running => conn.execute(
                "UPDATE pipelines SET status = ?2, started_at = COALESCE(started_at, ?3), completed_at = NULL WHERE id = ?1",
                rusqlite::params![id, status.as_str(), now],
            ),
            PipelineStatus::Completed | PipelineStatus::Failed => conn.execute(
                "UPDATE pipelines SET status = ?2, completed_at = ?3 WHERE id = ?1",
                rusqlite::params![id, status.as_str(), now],
            ),
            _ => conn.execute(
                "UPDATE pipelines SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status.as_str()],
            ),
        }.map_err(|e| ConductorError::Database(format!("Update failed: {}", e)))?;

        if affected == 0 {
            return Err(ConductorError::NotFound(format!("pipeline {}", id)));
        }
        Ok(())
    }

    /// Record the terminal status together with the run's aggregates.
    pub fn finish_pipeline(
        &self,
        id: &str,
        status: PipelineStatus,
        total_cost_usd: f64,
        total_duration_ms: u64,
    ) -> Result<(), ConductorError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pipelines SET status = ?2, total_cost_usd = ?3, total_duration_ms = ?4, completed_at = ?5 WHERE id = ?1",
            rusqlite::params![id, status.as_str(), total_cost_usd, total_duration_ms as i64, Utc::now().to_rfc3339()],
        ).map_err(|e| ConductorError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    pub fn get_pipeline_steps(&self, pipeline_id: &str) -> Result<Vec<PipelineStep>, ConductorError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pipeline_steps WHERE pipeline_id = ?1 ORDER BY position",
            STEP_COLUMNS
        )).map_err(|e| ConductorError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![pipeline_id], row_to_step)
            .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| ConductorError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }

    pub fn get_step(&self, id: &str) -> Result<Option<PipelineStep>, ConductorError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM pipeline_steps WHERE id = ?1", STEP_COLUMNS),
            rusqlite::params![id],
            row_to_step,
        )
        .optional()
        .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))
    }

    /// Move a step to `status`. Optional fields only overwrite when given.
    pub fn update_step_status(
        &self,
        id: &str,
        status: StepStatus,
        session_id: Option<&str>,
        output_summary: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), ConductorError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let (started_at, completed_at) = match status {
            StepStatus::Running => (Some(now.as_str()), None),
            s if s.is_terminal() => (None, Some(now.as_str())),
            _ => (None, None),
        };
        conn.execute(
            "UPDATE pipeline_steps SET status = ?2,
                session_id = COALESCE(?3, session_id),
                output_summary = COALESCE(?4, output_summary),
                error = COALESCE(?5, error),
                started_at = COALESCE(?6, started_at),
                completed_at = COALESCE(?7, completed_at)
             WHERE id = ?1",
            rusqlite::params![id, status.as_str(), session_id, output_summary, error, started_at, completed_at],
        ).map_err(|e| ConductorError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }
    /// Return every step of a pipeline to `pending`, clearing what the last
    /// run recorded. Returns the number of steps touched.
    pub fn reset_pipeline_steps(&self, pipeline_id: &str) -> Result<usize, ConductorError> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE pipeline_steps SET status = 'pending', session_id = NULL, output_summary = NULL,
                error = NULL, started_at = NULL, completed_at = NULL
             WHERE pipeline_id = ?1 AND status != 'pending'",
            rusqlite::params![pipeline_id],
        ).map_err(|e| ConductorError::Database(format!("Update failed: {}", e)))?;
        Ok(affected)
    }
}
