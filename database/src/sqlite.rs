use crate::common::{
    build_filter_query, is_unique_violation, row_to_agent_role, row_to_artifact,
    row_to_artifact_ref, row_to_audit_entry, row_to_requirement, row_to_task,
    sqlx_error_to_task_error, state_to_string, string_to_state, to_json_column, TASK_COLUMNS,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cycle_core::{
    error::{Result, TaskError},
    models::{
        Artifact, ArtifactRef, AuditEntry, AuditReport, NewAuditEntry, NewRequirement, NewTask,
        Requirement, RequirementKind, Task, TaskFilter, TaskNote,
    },
    roles::AgentRole,
    states::{required_handover, TaskState},
    store::{AgentStore, ArtifactStore, AuditStore, LockStore, RequirementStore, TaskStore},
    transition::{check_dependencies, check_handover, check_successor, TransitionBlocker,
        TransitionInspection},
    validation::RecordValidator,
};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

/// SQLite implementation of the store traits.
///
/// Provides task, requirement, artifact, audit, agent and lock persistence
/// with connection pooling and embedded migrations. The transition path runs
/// load, validation and write inside a single transaction so a concurrent
/// mutation can never interleave with the checks.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given database URL.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (file path or `:memory:`)
    ///
    /// # Examples
    /// ```rust,no_run
    /// use database::SqliteStore;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// // In-memory database for testing
    /// let store = SqliteStore::new(":memory:").await?;
    ///
    /// // File-based database
    /// let store = SqliteStore::new("sqlite:///tmp/relay.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_url = if database_url.starts_with(":memory:") || database_url.starts_with("sqlite://")
        {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        // Create the database file if it doesn't exist
        if !db_url.contains(":memory:") && !Sqlite::database_exists(&db_url).await.unwrap_or(false)
        {
            match Sqlite::create_database(&db_url).await {
                Ok(_) => tracing::info!("database created successfully"),
                Err(error) => {
                    tracing::error!("error creating database: {}", error);
                    return Err(TaskError::Database(format!(
                        "failed to create database: {error}"
                    )));
                }
            }
        }

        let pool = if db_url.contains(":memory:") {
            // A pooled in-memory database would hand each connection its own
            // empty database, so the pool is pinned to a single connection.
            let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
                .filename(":memory:")
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true);

            sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(connect_options)
                .await
                .map_err(sqlx_error_to_task_error)?
        } else {
            let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
                .filename(db_url.replace("sqlite://", ""))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true);

            SqlitePool::connect_with(connect_options)
                .await
                .map_err(sqlx_error_to_task_error)?
        };

        Ok(Self { pool })
    }

    /// Create a migrated in-memory store, the fixture used across the test
    /// suites.
    pub async fn in_memory() -> Result<Self> {
        let store = Self::new(":memory:").await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations. Call once after creating the store.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| TaskError::Database(format!("migration failed: {e}")))?;

        tracing::info!("database migrations completed successfully");
        Ok(())
    }

    /// Access the underlying pool, primarily for tests that need direct SQL.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The next `updated_at` value: wall clock, nudged forward when the
    /// clock has not advanced past the previous value (the invariant is
    /// strict increase, not wall-clock accuracy).
    fn next_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
        let now = Utc::now();
        if now > previous {
            now
        } else {
            previous + Duration::milliseconds(1)
        }
    }

    async fn task_exists(&self, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;
        Ok(exists)
    }

    /// Resolve dependency states for the work-state gate, preserving the
    /// task's declared order.
    async fn resolve_dependencies(
        conn: &mut sqlx::SqliteConnection,
        dependencies: &[String],
    ) -> Result<Vec<(String, Option<TaskState>)>> {
        let mut resolved = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let state: Option<String> = sqlx::query_scalar("SELECT state FROM tasks WHERE id = ?")
                .bind(dependency)
                .fetch_optional(&mut *conn)
                .await
                .map_err(sqlx_error_to_task_error)?;

            let state = match state {
                Some(raw) => Some(string_to_state(&raw)?),
                None => None,
            };
            resolved.push((dependency.clone(), state));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        RecordValidator::validate_new_task(&task)?;

        // Every declared dependency must resolve at creation time
        for dependency in &task.dependencies {
            if !self.task_exists(dependency).await? {
                return Err(TaskError::DependencyUnresolved {
                    task: task.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO tasks (id, title, description, state, priority, owner, tags, dependencies, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(state_to_string(TaskState::ReadyForPlan))
        .bind(task.priority)
        .bind(&task.owner)
        .bind(to_json_column(&task.tags)?)
        .bind(to_json_column(&task.dependencies)?)
        .bind("[]")
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                TaskError::Validation(format!("task '{}' already exists", task.id))
            } else {
                sqlx_error_to_task_error(e)
            }
        })?;

        row_to_task(&row)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let result = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

        match result {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut query_builder = build_filter_query(&filter);
        let query = query_builder.build();

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn all_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_task).collect()
    }

    async fn append_note(&self, id: &str, note: &str) -> Result<Task> {
        if note.trim().is_empty() {
            return Err(TaskError::empty_field("note"));
        }

        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;

        let task = match row {
            Some(row) => row_to_task(&row)?,
            None => return Err(TaskError::not_found_task(id)),
        };

        let updated_at = Self::next_updated_at(task.updated_at);
        let mut notes = task.notes;
        notes.push(TaskNote {
            text: note.to_string(),
            created_at: updated_at,
        });

        let row = sqlx::query(&format!(
            "UPDATE tasks SET notes = ?, updated_at = ? WHERE id = ? RETURNING {TASK_COLUMNS}"
        ))
        .bind(to_json_column(&notes)?)
        .bind(updated_at)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let updated = row_to_task(&row)?;
        tx.commit().await.map_err(sqlx_error_to_task_error)?;

        Ok(updated)
    }

    async fn validate_and_transition(
        &self,
        id: &str,
        new_state: TaskState,
        note: Option<&str>,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;

        let task = match row {
            Some(row) => row_to_task(&row)?,
            None => return Err(TaskError::not_found_task(id)),
        };

        check_successor(task.state, new_state)
            .map_err(|blocker| blocker.into_error(&task, new_state))?;

        if new_state.is_work_state() {
            let resolved = Self::resolve_dependencies(&mut *tx, &task.dependencies).await?;
            check_dependencies(new_state, &resolved)
                .map_err(|blocker| blocker.into_error(&task, new_state))?;
        }

        if let Some(artifact) = required_handover(task.state, new_state) {
            let latest: Option<(i64, String)> = sqlx::query_as(
                "SELECT version, content FROM artifacts WHERE task_id = ? AND name = ? ORDER BY version DESC LIMIT 1",
            )
            .bind(id)
            .bind(artifact)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;

            check_handover(
                task.state,
                new_state,
                latest.as_ref().map(|(version, content)| (*version, content.as_str())),
            )
            .map_err(|blocker| blocker.into_error(&task, new_state))?;
        }

        let updated_at = Self::next_updated_at(task.updated_at);
        let mut notes = task.notes.clone();
        if let Some(note) = note {
            if !note.trim().is_empty() {
                notes.push(TaskNote {
                    text: note.to_string(),
                    created_at: updated_at,
                });
            }
        }

        let row = sqlx::query(&format!(
            "UPDATE tasks SET state = ?, notes = ?, updated_at = ? WHERE id = ? RETURNING {TASK_COLUMNS}"
        ))
        .bind(state_to_string(new_state))
        .bind(to_json_column(&notes)?)
        .bind(updated_at)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let updated = row_to_task(&row)?;
        tx.commit().await.map_err(sqlx_error_to_task_error)?;

        tracing::info!(
            task_id = %id,
            from = %task.state,
            to = %new_state,
            "task transitioned"
        );

        Ok(updated)
    }

    async fn inspect_transition(
        &self,
        id: &str,
        new_state: TaskState,
    ) -> Result<TransitionInspection> {
        let task = self
            .get_task(id)
            .await?
            .ok_or_else(|| TaskError::not_found_task(id))?;

        // The successor check gates everything else: against an illegal
        // target the dependency and handover classification is meaningless.
        if let Err(blocker) = check_successor(task.state, new_state) {
            return Ok(TransitionInspection::blocked(&task, new_state, vec![blocker]));
        }

        let mut blockers: Vec<TransitionBlocker> = Vec::new();

        if new_state.is_work_state() {
            // Scoped so the connection returns to the pool before the
            // handover query below
            let resolved = {
                let mut conn = self.pool.acquire().await.map_err(sqlx_error_to_task_error)?;
                Self::resolve_dependencies(&mut conn, &task.dependencies).await?
            };
            if let Err(blocker) = check_dependencies(new_state, &resolved) {
                blockers.push(blocker);
            }
        }

        if let Some(artifact) = required_handover(task.state, new_state) {
            let latest: Option<(i64, String)> = sqlx::query_as(
                "SELECT version, content FROM artifacts WHERE task_id = ? AND name = ? ORDER BY version DESC LIMIT 1",
            )
            .bind(id)
            .bind(artifact)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

            if let Err(blocker) = check_handover(
                task.state,
                new_state,
                latest.as_ref().map(|(version, content)| (*version, content.as_str())),
            ) {
                blockers.push(blocker);
            }
        }

        if blockers.is_empty() {
            Ok(TransitionInspection::ok(&task, new_state))
        } else {
            Ok(TransitionInspection::blocked(&task, new_state, blockers))
        }
    }

    async fn force_state(&self, id: &str, state: TaskState, note: &str) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;

        let task = match row {
            Some(row) => row_to_task(&row)?,
            None => return Err(TaskError::not_found_task(id)),
        };

        let updated_at = Self::next_updated_at(task.updated_at);
        let mut notes = task.notes;
        if !note.trim().is_empty() {
            notes.push(TaskNote {
                text: note.to_string(),
                created_at: updated_at,
            });
        }

        let row = sqlx::query(&format!(
            "UPDATE tasks SET state = ?, notes = ?, updated_at = ? WHERE id = ? RETURNING {TASK_COLUMNS}"
        ))
        .bind(state_to_string(state))
        .bind(to_json_column(&notes)?)
        .bind(updated_at)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let updated = row_to_task(&row)?;
        tx.commit().await.map_err(sqlx_error_to_task_error)?;

        tracing::warn!(task_id = %id, from = %task.state, to = %state, "task state forced");

        Ok(updated)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

        Ok(())
    }
}

#[async_trait]
impl RequirementStore for SqliteStore {
    async fn create_requirement(&self, requirement: NewRequirement) -> Result<Requirement> {
        RecordValidator::validate_new_requirement(&requirement)?;

        // Opaque id derived from the stable key
        let id = format!("req-{}", requirement.key.to_ascii_lowercase());

        let row = sqlx::query(
            "INSERT INTO requirements (id, key, title, text, kind) VALUES (?, ?, ?, ?, ?)
             RETURNING id, key, title, text, kind",
        )
        .bind(&id)
        .bind(&requirement.key)
        .bind(&requirement.title)
        .bind(&requirement.text)
        .bind(requirement.kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                TaskError::Validation(format!(
                    "requirement '{}' already exists",
                    requirement.key
                ))
            } else {
                sqlx_error_to_task_error(e)
            }
        })?;

        row_to_requirement(&row)
    }

    async fn link_requirement(&self, task_id: &str, requirement_key: &str) -> Result<()> {
        if !self.task_exists(task_id).await? {
            return Err(TaskError::not_found_task(task_id));
        }

        let requirement_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM requirements WHERE key = ?")
                .bind(requirement_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(sqlx_error_to_task_error)?;

        let requirement_id =
            requirement_id.ok_or_else(|| TaskError::not_found_requirement(requirement_key))?;

        sqlx::query(
            "INSERT OR IGNORE INTO task_requirements (task_id, requirement_id) VALUES (?, ?)",
        )
        .bind(task_id)
        .bind(requirement_id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        Ok(())
    }

    async fn list_requirements(&self, kind: Option<RequirementKind>) -> Result<Vec<Requirement>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query("SELECT id, key, title, text, kind FROM requirements WHERE kind = ? ORDER BY key")
                    .bind(kind.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT id, key, title, text, kind FROM requirements ORDER BY key")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_requirement).collect()
    }

    async fn requirements_for_task(&self, task_id: &str) -> Result<Vec<Requirement>> {
        let rows = sqlx::query(
            "SELECT r.id, r.key, r.title, r.text, r.kind
             FROM requirements r
             JOIN task_requirements tr ON tr.requirement_id = r.id
             WHERE tr.task_id = ?
             ORDER BY r.key",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_requirement).collect()
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn upsert_artifact(
        &self,
        task_id: &str,
        name: &str,
        content: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<Artifact> {
        RecordValidator::validate_artifact_name(name)?;

        // The version scan and the insert must be one transaction, otherwise
        // two concurrent upserts could compute the same next version.
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        let task_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?)")
                .bind(task_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(sqlx_error_to_task_error)?;
        if !task_exists {
            return Err(TaskError::not_found_task(task_id));
        }

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM artifacts WHERE task_id = ? AND name = ?",
        )
        .bind(task_id)
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let meta_json = match &meta {
            Some(value) => Some(to_json_column(value)?),
            None => None,
        };

        let row = sqlx::query(
            "INSERT INTO artifacts (task_id, name, version, content, meta, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING task_id, name, version, content, meta, created_at",
        )
        .bind(task_id)
        .bind(name)
        .bind(current + 1)
        .bind(content)
        .bind(meta_json)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(sqlx_error_to_task_error)?;

        let artifact = row_to_artifact(&row)?;
        tx.commit().await.map_err(sqlx_error_to_task_error)?;

        tracing::debug!(
            task_id = %task_id,
            artifact = %name,
            version = artifact.version,
            "artifact version created"
        );

        Ok(artifact)
    }

    async fn get_artifact(
        &self,
        task_id: &str,
        name: &str,
        version: Option<i64>,
    ) -> Result<Option<Artifact>> {
        let row = match version {
            Some(version) => {
                sqlx::query(
                    "SELECT task_id, name, version, content, meta, created_at
                     FROM artifacts WHERE task_id = ? AND name = ? AND version = ?",
                )
                .bind(task_id)
                .bind(name)
                .bind(version)
                .fetch_optional(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT task_id, name, version, content, meta, created_at
                     FROM artifacts WHERE task_id = ? AND name = ?
                     ORDER BY version DESC LIMIT 1",
                )
                .bind(task_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(sqlx_error_to_task_error)?;

        match row {
            Some(row) => Ok(Some(row_to_artifact(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_artifacts(&self, task_id: &str) -> Result<Vec<ArtifactRef>> {
        let rows = sqlx::query(
            "SELECT name, version, created_at FROM artifacts
             WHERE task_id = ? ORDER BY name ASC, version DESC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_artifact_ref).collect()
    }

    async fn latest_artifacts(&self, task_id: &str) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(
            "SELECT a.task_id, a.name, a.version, a.content, a.meta, a.created_at
             FROM artifacts a
             JOIN (SELECT name, MAX(version) AS version FROM artifacts WHERE task_id = ? GROUP BY name) latest
               ON a.name = latest.name AND a.version = latest.version
             WHERE a.task_id = ?
             ORDER BY a.name",
        )
        .bind(task_id)
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_artifact).collect()
    }

    async fn artifacts_created_since(
        &self,
        task_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ArtifactRef>> {
        let rows = sqlx::query(
            "SELECT name, version, created_at FROM artifacts
             WHERE task_id = ? AND created_at >= ?
             ORDER BY created_at ASC, name ASC",
        )
        .bind(task_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_artifact_ref).collect()
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let row = sqlx::query(
            "INSERT INTO audit_logs (cycle_id, task_id, prev_state, next_state, actor, selection_reason, inputs_summary, outputs_summary, commands, result, note, follow_ups, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, cycle_id, task_id, prev_state, next_state, actor, selection_reason, inputs_summary, outputs_summary, commands, result, note, follow_ups, created_at",
        )
        .bind(&entry.cycle_id)
        .bind(&entry.task_id)
        .bind(state_to_string(entry.prev_state))
        .bind(state_to_string(entry.next_state))
        .bind(&entry.actor)
        .bind(&entry.selection_reason)
        .bind(&entry.inputs_summary)
        .bind(&entry.outputs_summary)
        .bind(to_json_column(&entry.commands)?)
        .bind(entry.result.as_str())
        .bind(&entry.note)
        .bind(to_json_column(&entry.follow_ups)?)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        row_to_audit_entry(&row)
    }

    async fn audit_history(&self, task_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, cycle_id, task_id, prev_state, next_state, actor, selection_reason, inputs_summary, outputs_summary, commands, result, note, follow_ups, created_at
             FROM audit_logs WHERE task_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_audit_entry).collect()
    }

    async fn recent_audits(&self, n: u32) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, cycle_id, task_id, prev_state, next_state, actor, selection_reason, inputs_summary, outputs_summary, commands, result, note, follow_ups, created_at
             FROM audit_logs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_audit_entry).collect()
    }

    async fn audit_report(&self) -> Result<AuditReport> {
        let (total_result, state_results, cycles_result) = tokio::join!(
            sqlx::query("SELECT COUNT(*) AS total FROM tasks").fetch_one(&self.pool),
            sqlx::query("SELECT state, COUNT(*) AS count FROM tasks GROUP BY state")
                .fetch_all(&self.pool),
            sqlx::query("SELECT COUNT(*) AS total FROM audit_logs").fetch_one(&self.pool),
        );

        let total_result = total_result.map_err(sqlx_error_to_task_error)?;
        let state_results = state_results.map_err(sqlx_error_to_task_error)?;
        let cycles_result = cycles_result.map_err(sqlx_error_to_task_error)?;

        let total_tasks: i64 = total_result.get("total");
        let total_cycles: i64 = cycles_result.get("total");

        let mut tasks_by_state = HashMap::new();
        for row in state_results {
            let state_str: String = row.get("state");
            let state = string_to_state(&state_str)?;
            let count: i64 = row.get("count");
            tasks_by_state.insert(state, count as u64);
        }

        let done = tasks_by_state
            .get(&TaskState::Done)
            .copied()
            .unwrap_or_default();
        let completion_rate = if total_tasks > 0 {
            done as f64 / total_tasks as f64
        } else {
            0.0
        };

        Ok(AuditReport {
            total_tasks: total_tasks as u64,
            tasks_by_state,
            total_cycles: total_cycles as u64,
            completion_rate,
        })
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn sync_agents(&self, roles: &[AgentRole]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_task_error)?;

        sqlx::query("DELETE FROM agents")
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;

        for (position, role) in roles.iter().enumerate() {
            sqlx::query(
                "INSERT INTO agents (name, handles_states, may_transition_to, can_read_plan, can_execute_commands, can_write_artifacts, prompt_template, position)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&role.name)
            .bind(to_json_column(&role.handles_states)?)
            .bind(to_json_column(&role.may_transition_to)?)
            .bind(role.can_read_plan as i64)
            .bind(role.can_execute_commands as i64)
            .bind(role.can_write_artifacts as i64)
            .bind(&role.prompt_template)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_task_error)?;
        }

        tx.commit().await.map_err(sqlx_error_to_task_error)?;
        Ok(())
    }

    async fn list_agents(&self) -> Result<Vec<AgentRole>> {
        let rows = sqlx::query(
            "SELECT name, handles_states, may_transition_to, can_read_plan, can_execute_commands, can_write_artifacts, prompt_template
             FROM agents ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_task_error)?;

        rows.iter().map(row_to_agent_role).collect()
    }
}

#[async_trait]
impl LockStore for SqliteStore {
    async fn acquire_task_lock(&self, task_id: &str, cycle_id: &str) -> Result<()> {
        if !self.task_exists(task_id).await? {
            return Err(TaskError::not_found_task(task_id));
        }

        sqlx::query("INSERT INTO task_locks (task_id, cycle_id, acquired_at) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(cycle_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    TaskError::TaskBusy(task_id.to_string())
                } else {
                    sqlx_error_to_task_error(e)
                }
            })?;

        Ok(())
    }

    async fn release_task_lock(&self, task_id: &str, cycle_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM task_locks WHERE task_id = ? AND cycle_id = ?")
            .bind(task_id)
            .bind(cycle_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_task_error)?;

        Ok(())
    }
}
