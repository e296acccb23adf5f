use chrono::{DateTime, Utc};
use cycle_core::{
    error::{Result, TaskError},
    models::{Artifact, ArtifactRef, AuditEntry, CycleOutcome, Requirement, Task, TaskFilter,
        TaskNote},
    roles::AgentRole,
    states::TaskState,
};
use sqlx::{sqlite::SqliteRow, Row};

/// Column list shared by every task query so row mapping stays in one place.
pub const TASK_COLUMNS: &str =
    "id, title, description, state, priority, owner, tags, dependencies, notes, created_at, updated_at";

/// Convert TaskState enum to its storage string
pub fn state_to_string(state: TaskState) -> &'static str {
    state.as_str()
}

/// Convert a storage string back to a TaskState
pub fn string_to_state(s: &str) -> Result<TaskState> {
    TaskState::parse(s).map_err(|_| TaskError::Database(format!("invalid task state in database: {s}")))
}

/// Parse a JSON text column into a typed vector, tolerating NULL.
fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Vec<T> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Convert a SQLite row to a Task model
pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let state_str: String = row.get("state");
    let state = string_to_state(&state_str)?;

    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Task {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        state,
        priority: row.get("priority"),
        owner: row.get("owner"),
        tags: json_column(row, "tags"),
        dependencies: json_column(row, "dependencies"),
        notes: json_column::<TaskNote>(row, "notes"),
        created_at,
        updated_at,
    })
}

/// Convert a SQLite row to a Requirement model
pub fn row_to_requirement(row: &SqliteRow) -> Result<Requirement> {
    let kind_str: String = row.get("kind");
    let kind = kind_str
        .parse()
        .map_err(|_| TaskError::Database(format!("invalid requirement kind in database: {kind_str}")))?;

    Ok(Requirement {
        id: row.get("id"),
        key: row.get("key"),
        title: row.get("title"),
        text: row.get("text"),
        kind,
    })
}

/// Convert a SQLite row to an Artifact model
pub fn row_to_artifact(row: &SqliteRow) -> Result<Artifact> {
    let meta: Option<serde_json::Value> = row
        .try_get::<Option<String>, _>("meta")
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok());

    Ok(Artifact {
        task_id: row.get("task_id"),
        name: row.get("name"),
        version: row.get("version"),
        content: row.get("content"),
        meta,
        created_at: row.get("created_at"),
    })
}

/// Convert a SQLite row to an ArtifactRef
pub fn row_to_artifact_ref(row: &SqliteRow) -> Result<ArtifactRef> {
    Ok(ArtifactRef {
        name: row.get("name"),
        version: row.get("version"),
        created_at: row.get("created_at"),
    })
}

/// Convert a SQLite row to an AuditEntry model
pub fn row_to_audit_entry(row: &SqliteRow) -> Result<AuditEntry> {
    let prev_state_str: String = row.get("prev_state");
    let next_state_str: String = row.get("next_state");
    let result_str: String = row.get("result");

    let result: CycleOutcome = result_str
        .parse()
        .map_err(|_| TaskError::Database(format!("invalid cycle outcome in database: {result_str}")))?;

    Ok(AuditEntry {
        id: row.get("id"),
        cycle_id: row.get("cycle_id"),
        task_id: row.get("task_id"),
        prev_state: string_to_state(&prev_state_str)?,
        next_state: string_to_state(&next_state_str)?,
        actor: row.get("actor"),
        selection_reason: row.get("selection_reason"),
        inputs_summary: row.get("inputs_summary"),
        outputs_summary: row.get("outputs_summary"),
        commands: json_column(row, "commands"),
        result,
        note: row.get("note"),
        follow_ups: json_column(row, "follow_ups"),
        created_at: row.get("created_at"),
    })
}

/// Convert a SQLite row to an AgentRole
pub fn row_to_agent_role(row: &SqliteRow) -> Result<AgentRole> {
    Ok(AgentRole {
        name: row.get("name"),
        handles_states: json_column(row, "handles_states"),
        may_transition_to: json_column(row, "may_transition_to"),
        can_read_plan: row.get::<i64, _>("can_read_plan") != 0,
        can_execute_commands: row.get::<i64, _>("can_execute_commands") != 0,
        can_write_artifacts: row.get::<i64, _>("can_write_artifacts") != 0,
        prompt_template: row.get("prompt_template"),
    })
}

/// Serialize a structured field for a JSON text column.
pub fn to_json_column<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| TaskError::Serialization(e.to_string()))
}

/// Convert a SQLx error to a TaskError
pub fn sqlx_error_to_task_error(err: sqlx::Error) -> TaskError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            if message.contains("UNIQUE constraint failed") {
                TaskError::Database(format!("uniqueness violation: {message}"))
            } else if message.contains("FOREIGN KEY constraint failed") {
                TaskError::Database(format!("foreign key violation: {message}"))
            } else {
                TaskError::Database(format!("database constraint error: {message}"))
            }
        }
        sqlx::Error::RowNotFound => {
            // Handled at the application level where expected
            TaskError::Database("unexpected RowNotFound error".to_string())
        }
        sqlx::Error::PoolTimedOut => TaskError::Database("connection pool timeout".to_string()),
        sqlx::Error::Io(io_err) => TaskError::Database(format!("database I/O error: {io_err}")),
        _ => TaskError::Database(format!("database operation failed: {err}")),
    }
}

/// Whether a SQLx error is a unique-constraint violation, used to translate
/// lock-row insertion races into `TaskBusy`.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

/// Build the filtered task listing query with proper type binding.
pub fn build_filter_query(filter: &TaskFilter) -> sqlx::QueryBuilder<'static, sqlx::Sqlite> {
    let mut query_builder: sqlx::QueryBuilder<sqlx::Sqlite> =
        sqlx::QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));

    let mut has_conditions = false;

    if let Some(state) = filter.state {
        query_builder.push(" WHERE state = ");
        query_builder.push_bind(state_to_string(state));
        has_conditions = true;
    }

    if let Some(ref owner) = filter.owner {
        if has_conditions {
            query_builder.push(" AND ");
        } else {
            query_builder.push(" WHERE ");
            has_conditions = true;
        }
        query_builder.push("owner = ");
        query_builder.push_bind(owner.clone());
    }

    if let Some(min_priority) = filter.min_priority {
        if has_conditions {
            query_builder.push(" AND ");
        } else {
            query_builder.push(" WHERE ");
        }
        query_builder.push("priority >= ");
        query_builder.push_bind(min_priority);
    }

    query_builder.push(" ORDER BY priority DESC, updated_at ASC");

    if let Some(limit) = filter.limit {
        query_builder.push(" LIMIT ");
        query_builder.push_bind(limit);
    }

    if let Some(offset) = filter.offset {
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset);
    }

    query_builder
}
