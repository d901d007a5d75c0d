use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use cascade_types::{
    Agent, AgentStatus, ConfigurationStore, Deployment, DeploymentStatus, Execution,
    ExecutionSink, ExecutionStatus, ExecutionStep, ExecutionStepLog, FlowVersion, LogLevel,
    StartType, Timestamp,
};

use crate::{Result, StoreError};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Thin repository over SQLite for Cascade configuration and execution data.
///
/// Thread-safe via internal `Mutex<Connection>`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        tracing::debug!("Opened cascade store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&mut self) -> Result<()> {
        let conn = self.conn.get_mut().unwrap();
        embedded::migrations::runner()
            .run(conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Lock the connection for use. Panics if poisoned.
    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ── Configuration ───────────────────────────────────────────────

    pub fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        self.conn().execute(
            "INSERT INTO agents (id, name, status) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, status = excluded.status",
            params![agent.id, agent.name, agent.status.as_str()],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<Agent> {
        let (name, status): (String, String) = self
            .conn()
            .query_row(
                "SELECT name, status FROM agents WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("agent {id}")))?;

        Ok(Agent {
            id: id.to_string(),
            name,
            status: parse_enum::<AgentStatus>(&status)?,
            deployments: Vec::new(),
        })
    }

    pub fn upsert_flow_version(&self, flow_version: &FlowVersion) -> Result<()> {
        self.conn().execute(
            "INSERT INTO flow_versions (id, flow_id, name, version, start_type, start_expression)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO UPDATE SET
                 flow_id = excluded.flow_id,
                 name = excluded.name,
                 version = excluded.version,
                 start_type = excluded.start_type,
                 start_expression = excluded.start_expression",
            params![
                flow_version.id,
                flow_version.flow_id,
                flow_version.name,
                flow_version.version,
                flow_version.start_type.as_str(),
                flow_version.start_expression,
            ],
        )?;
        Ok(())
    }

    pub fn load_flow_version(&self, id: &str) -> Result<Option<FlowVersion>> {
        let row: Option<(String, String, String, String, Option<String>)> = self
            .conn()
            .query_row(
                "SELECT flow_id, name, version, start_type, start_expression
                 FROM flow_versions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((flow_id, name, version, start_type, start_expression)) => Ok(Some(FlowVersion {
                id: id.to_string(),
                flow_id,
                name,
                version,
                start_type: parse_enum::<StartType>(&start_type)?,
                start_expression,
            })),
            None => Ok(None),
        }
    }

    /// Upsert a deployment along with its embedded flow version.
    pub fn upsert_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.upsert_flow_version(&deployment.flow_version)?;
        self.conn().execute(
            "INSERT INTO deployments (id, agent_id, flow_version_id, status, message, log_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO UPDATE SET
                 agent_id = excluded.agent_id,
                 flow_version_id = excluded.flow_version_id,
                 status = excluded.status,
                 message = excluded.message,
                 log_level = excluded.log_level",
            params![
                deployment.id,
                deployment.agent_id,
                deployment.flow_version.id,
                deployment.status.as_str(),
                deployment.message,
                deployment.log_level.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> Result<Deployment> {
        let row: (String, String, String, String, String) = self
            .conn()
            .query_row(
                "SELECT agent_id, flow_version_id, status, message, log_level
                 FROM deployments WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("deployment {id}")))?;

        let (agent_id, flow_version_id, status, message, log_level) = row;
        let flow_version = self
            .load_flow_version(&flow_version_id)?
            .ok_or_else(|| StoreError::NotFound(format!("flow version {flow_version_id}")))?;

        Ok(Deployment {
            id: id.to_string(),
            agent_id,
            flow_version,
            status: parse_enum::<DeploymentStatus>(&status)?,
            message,
            log_level: parse_enum::<LogLevel>(&log_level)?,
        })
    }

    pub fn remove_deployment(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM deployments WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ── Execution records ───────────────────────────────────────────

    pub fn upsert_execution(&self, execution: &Execution) -> Result<()> {
        self.conn().execute(
            "INSERT INTO executions
                 (id, agent_id, flow_id, agent_name, flow_name, status,
                  start_time, end_time, last_update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (id) DO UPDATE SET
                 status = excluded.status,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 last_update_time = excluded.last_update_time",
            params![
                execution.id,
                execution.agent_id,
                execution.flow_id,
                execution.agent_name,
                execution.flow_name,
                execution.status.as_str(),
                ts_to_sql(execution.start_time),
                ts_to_sql(execution.end_time),
                ts_to_sql(execution.last_update_time),
            ],
        )?;
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> Result<Execution> {
        type Row = (
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
        );
        let row: Row = self
            .conn()
            .query_row(
                "SELECT agent_id, flow_id, agent_name, flow_name, status,
                        start_time, end_time, last_update_time
                 FROM executions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;

        let (agent_id, flow_id, agent_name, flow_name, status, start, end, updated) = row;
        Ok(Execution {
            id: id.to_string(),
            agent_id,
            flow_id,
            agent_name,
            flow_name,
            status: parse_enum::<ExecutionStatus>(&status)?,
            start_time: ts_from_sql(start)?,
            end_time: ts_from_sql(end)?,
            last_update_time: ts_from_sql(updated)?,
        })
    }

    pub fn upsert_step(&self, step: &ExecutionStep) -> Result<()> {
        self.conn().execute(
            "INSERT INTO execution_steps
                 (id, execution_id, flow_step_id, component_name, status,
                  start_time, end_time, entities_processed, messages_received, messages_produced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (id) DO UPDATE SET
                 status = excluded.status,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time,
                 entities_processed = excluded.entities_processed,
                 messages_received = excluded.messages_received,
                 messages_produced = excluded.messages_produced",
            params![
                step.id,
                step.execution_id,
                step.flow_step_id,
                step.component_name,
                step.status.as_str(),
                ts_to_sql(step.start_time),
                ts_to_sql(step.end_time),
                step.entities_processed as i64,
                step.messages_received as i64,
                step.messages_produced as i64,
            ],
        )?;
        Ok(())
    }

    /// All steps recorded for an execution, ordered by flow step id.
    pub fn list_steps(&self, execution_id: &str) -> Result<Vec<ExecutionStep>> {
        type Row = (
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            i64,
            i64,
            i64,
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, flow_step_id, component_name, status,
                    start_time, end_time, entities_processed, messages_received, messages_produced
             FROM execution_steps WHERE execution_id = ?1 ORDER BY flow_step_id",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        })?;

        let mut steps = Vec::new();
        for row in rows {
            let (id, flow_step_id, component_name, status, start, end, entities, received, produced): Row =
                row?;
            steps.push(ExecutionStep {
                id,
                execution_id: execution_id.to_string(),
                flow_step_id,
                component_name,
                status: parse_enum::<ExecutionStatus>(&status)?,
                start_time: ts_from_sql(start)?,
                end_time: ts_from_sql(end)?,
                entities_processed: entities as u64,
                messages_received: received as u64,
                messages_produced: produced as u64,
            });
        }
        Ok(steps)
    }

    pub fn insert_step_log(&self, log: &ExecutionStepLog) -> Result<()> {
        self.conn().execute(
            "INSERT INTO execution_step_logs (id, execution_step_id, level, message, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO NOTHING",
            params![
                log.id,
                log.execution_step_id,
                log.level.as_str(),
                log.message,
                log.create_time.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All log lines recorded for a step, in insertion order.
    pub fn list_step_logs(&self, execution_step_id: &str) -> Result<Vec<ExecutionStepLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, level, message, create_time
             FROM execution_step_logs WHERE execution_step_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![execution_step_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut logs = Vec::new();
        for row in rows {
            let (id, level, message, create_time) = row?;
            logs.push(ExecutionStepLog {
                id,
                execution_step_id: execution_step_id.to_string(),
                level: parse_enum::<LogLevel>(&level)?,
                message,
                create_time: parse_ts(&create_time)?,
            });
        }
        Ok(logs)
    }
}

impl ConfigurationStore for SqliteStore {
    fn save_agent(&self, agent: &Agent) -> cascade_types::Result<()> {
        self.upsert_agent(agent).map_err(Into::into)
    }

    fn save_deployment(&self, deployment: &Deployment) -> cascade_types::Result<()> {
        self.upsert_deployment(deployment).map_err(Into::into)
    }

    fn delete_deployment(&self, deployment: &Deployment) -> cascade_types::Result<()> {
        self.remove_deployment(&deployment.id)
            .map(|_| ())
            .map_err(Into::into)
    }

    fn refresh(&self, flow_version: &FlowVersion) -> cascade_types::Result<FlowVersion> {
        let stored = self
            .load_flow_version(&flow_version.id)
            .map_err(cascade_types::Error::from)?;
        Ok(stored.unwrap_or_else(|| flow_version.clone()))
    }
}

impl ExecutionSink for SqliteStore {
    fn save_execution(&self, execution: &Execution) -> cascade_types::Result<()> {
        self.upsert_execution(execution).map_err(Into::into)
    }

    fn save_step(&self, step: &ExecutionStep) -> cascade_types::Result<()> {
        self.upsert_step(step).map_err(Into::into)
    }

    fn save_step_log(&self, log: &ExecutionStepLog) -> cascade_types::Result<()> {
        self.insert_step_log(log).map_err(Into::into)
    }
}

fn ts_to_sql(ts: Option<Timestamp>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn ts_from_sql(value: Option<String>) -> Result<Option<Timestamp>> {
    value.map(|s| parse_ts(&s)).transpose()
}

fn parse_ts(value: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("timestamp '{value}': {e}")))
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(StoreError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::now;

    fn sample_deployment() -> Deployment {
        let flow_version = FlowVersion::new("flow-1", "orders-etl", "2.1", StartType::ScheduledCron)
            .with_start_expression("0 0 * * * *");
        Deployment::new("agent-1", flow_version).with_log_level(LogLevel::Warn)
    }

    #[test]
    fn test_agent_upsert_updates_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut agent = Agent::new("edge-agent");
        store.upsert_agent(&agent).unwrap();

        agent.status = AgentStatus::Running;
        store.upsert_agent(&agent).unwrap();

        let loaded = store.get_agent(&agent.id).unwrap();
        assert_eq!(loaded.name, "edge-agent");
        assert_eq!(loaded.status, AgentStatus::Running);
    }

    #[test]
    fn test_deployment_round_trip_carries_flow_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        let deployment = sample_deployment();
        store.upsert_deployment(&deployment).unwrap();

        let loaded = store.get_deployment(&deployment.id).unwrap();
        assert_eq!(loaded.agent_id, "agent-1");
        assert_eq!(loaded.flow_version.name, "orders-etl");
        assert_eq!(loaded.flow_version.start_type, StartType::ScheduledCron);
        assert_eq!(
            loaded.flow_version.start_expression.as_deref(),
            Some("0 0 * * * *")
        );
        assert_eq!(loaded.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_deployment_delete_removes_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let deployment = sample_deployment();
        store.upsert_deployment(&deployment).unwrap();

        assert!(store.remove_deployment(&deployment.id).unwrap());
        assert!(!store.remove_deployment(&deployment.id).unwrap());
        assert!(matches!(
            store.get_deployment(&deployment.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_refresh_prefers_stored_configuration() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut flow_version = FlowVersion::new("flow-1", "orders-etl", "2.1", StartType::Manual);
        store.upsert_flow_version(&flow_version).unwrap();

        // A stale in-memory copy should be replaced by what is stored.
        flow_version.name = "stale-name".to_string();
        let refreshed = ConfigurationStore::refresh(&store, &flow_version).unwrap();
        assert_eq!(refreshed.name, "orders-etl");

        // An unknown version passes through unchanged.
        let unknown = FlowVersion::new("flow-2", "unsaved", "0.1", StartType::Manual);
        let refreshed = ConfigurationStore::refresh(&store, &unknown).unwrap();
        assert_eq!(refreshed.name, "unsaved");
    }

    #[test]
    fn test_execution_upsert_updates_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut execution = Execution::begin("run-1", "agent-1", "flow-1", "edge", "orders-etl");
        store.upsert_execution(&execution).unwrap();

        execution.status = ExecutionStatus::Done;
        execution.end_time = Some(now());
        store.upsert_execution(&execution).unwrap();

        let loaded = store.get_execution("run-1").unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Done);
        assert!(loaded.end_time.is_some());
        assert_eq!(loaded.flow_name, "orders-etl");
    }

    #[test]
    fn test_steps_and_logs_attach_to_execution() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut step = ExecutionStep::new("run-1", "step-1", "text-reader");
        step.entities_processed = 42;
        store.upsert_step(&step).unwrap();

        step.status = ExecutionStatus::Done;
        store.upsert_step(&step).unwrap();

        let steps = store.list_steps("run-1").unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, ExecutionStatus::Done);
        assert_eq!(steps[0].entities_processed, 42);

        store
            .insert_step_log(&ExecutionStepLog::new(&step.id, LogLevel::Info, "read 42 rows"))
            .unwrap();
        store
            .insert_step_log(&ExecutionStepLog::new(&step.id, LogLevel::Warn, "1 malformed row"))
            .unwrap();

        let logs = store.list_step_logs(&step.id).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "read 42 rows");
        assert_eq!(logs[1].level, LogLevel::Warn);
    }

    #[test]
    fn test_open_creates_database_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cascade.db");
        let store = SqliteStore::open(&path).unwrap();
        store.upsert_agent(&Agent::new("edge-agent")).unwrap();
        assert!(path.exists());
    }
}
