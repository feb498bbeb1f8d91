use chrono::Utc;
use rusqlite::OptionalExtension;
use crate::errors::ConductorError;
use crate::models::Workspace;
use super::connection::new_id;
use super::Database;

const WORKSPACE_COLUMNS: &str = "id, name, path, config_dir, created_at";

fn row_to_workspace(row: &rusqlite::Row) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        config_dir: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Database {
    /// Register a workspace by path, or update the config dir of the
    /// existing one. Returns the stored row.
    pub fn upsert_workspace(&self, name: &str, path: &str, config_dir: &str) -> Result<Workspace, ConductorError> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO workspaces (id, name, path, config_dir, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET name = excluded.name, config_dir = excluded.config_dir",
                rusqlite::params![new_id(), name, path, config_dir, Utc::now().to_rfc3339()],
            ).map_err(|e| ConductorError::Database(format!("Failed to upsert workspace: {}", e)))?;
        }
        self.get_workspace_by_path(path)?
            .ok_or_else(|| ConductorError::Database(format!("Workspace vanished after upsert: {}", path)))
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>, ConductorError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM workspaces WHERE id = ?1", WORKSPACE_COLUMNS),
            rusqlite::params![id],
            row_to_workspace,
        )
        .optional()
        .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))
    }

    pub fn get_workspace_by_path(&self, path: &str) -> Result<Option<Workspace>, ConductorError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM workspaces WHERE path = ?1", WORKSPACE_COLUMNS),
            rusqlite::params![path],
            row_to_workspace,
        )
        .optional()
        .map_err(|e| ConductorError::Database(format!("Query error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_is_keyed_by_path() {
        let db = Database::in_memory().unwrap();
        let first = db.upsert_workspace("app", "/srv/app", "/cfg/a").unwrap();
        let second = db.upsert_workspace("app", "/srv/app", "/cfg/b").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.config_dir, "/cfg/b");
        assert_eq!(db.get_workspace(&first.id).unwrap().unwrap().path, "/srv/app");
    }

    #[test]
    fn test_missing_workspace() {
        let db = Database::in_memory().unwrap();
        assert!(db.get_workspace("nope").unwrap().is_none());
    }
}
