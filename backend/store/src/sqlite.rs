/// SQLite-backed implementation of the store traits.
///
/// One `rusqlite` connection behind a `tokio::sync::Mutex` serves all
/// four table families. Timestamps are stored as INTEGER unix
/// milliseconds so range comparisons in SQL are exact; recurrence specs
/// and payloads are JSON text columns.
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use talentforge_core::{
    Lease, LogAction, LogStore, PipelineItem, PipelineItemStatus, PipelineSettings,
    PipelineStore, RecurrenceSpec, Result, ScheduledTask, SchedulerLogEntry, SyncSettings,
    SyncStore, TalentError, TaskPayload, TaskStatus, TaskStore,
};

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id               TEXT PRIMARY KEY,
    task_type        TEXT NOT NULL,
    status           TEXT NOT NULL,
    scheduled_for    INTEGER NOT NULL,
    recurrence       TEXT NOT NULL,
    config           TEXT NOT NULL,
    entity_type      TEXT,
    entity_id        TEXT,
    next_run         INTEGER,
    last_run         INTEGER,
    attempt_count    INTEGER NOT NULL DEFAULT 0,
    lease_token      TEXT,
    lease_expires_at INTEGER,
    result           TEXT,
    error            TEXT,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status_next_run ON scheduled_tasks(status, next_run);
CREATE INDEX IF NOT EXISTS idx_tasks_entity ON scheduled_tasks(entity_type, entity_id);

CREATE TABLE IF NOT EXISTS scheduler_logs (
    id         TEXT PRIMARY KEY,
    task_id    TEXT NOT NULL,
    task_type  TEXT NOT NULL,
    action     TEXT NOT NULL,
    status     TEXT NOT NULL,
    details    TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_task_id ON scheduler_logs(task_id);
CREATE INDEX IF NOT EXISTS idx_logs_created ON scheduler_logs(created_at);

CREATE TABLE IF NOT EXISTS pipeline_items (
    id                TEXT PRIMARY KEY,
    pipeline_type     TEXT NOT NULL,
    platform          TEXT,
    entity_type       TEXT NOT NULL,
    entity_id         TEXT NOT NULL,
    status            TEXT NOT NULL,
    priority          INTEGER NOT NULL,
    scheduled_for     INTEGER,
    scheduled_task_id TEXT,
    content_template  TEXT,
    content_params    TEXT NOT NULL,
    posted_at         INTEGER,
    result            TEXT,
    error             TEXT,
    created_at        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_items_pipeline ON pipeline_items(pipeline_type, platform, status);

CREATE TABLE IF NOT EXISTS pipeline_settings (
    pipeline_type        TEXT NOT NULL,
    platform             TEXT NOT NULL DEFAULT '',
    enabled              INTEGER NOT NULL,
    daily_limit          INTEGER NOT NULL,
    min_interval_minutes INTEGER NOT NULL,
    posting_hours        TEXT,
    posting_days         TEXT,
    PRIMARY KEY (pipeline_type, platform)
);

CREATE TABLE IF NOT EXISTS sync_settings (
    id          TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    enabled     INTEGER NOT NULL,
    recurrence  TEXT NOT NULL,
    last_sync   INTEGER,
    next_sync   INTEGER,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    UNIQUE (entity_type, entity_id)
);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref())
            .context("Failed to open TalentForge scheduler database")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize scheduler schema")?;
        info!("SqliteStore opened at {:?}", path.as_ref());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Row counts per status for tasks and pipeline items.
    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn.lock().await;
        let mut counts = StatusCounts::default();

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM scheduled_tasks GROUP BY status")
            .map_err(storage_err)?;
        let task_rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();
        for (status, n) in task_rows {
            counts.tasks.insert(status, n as u64);
        }

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM pipeline_items GROUP BY status")
            .map_err(storage_err)?;
        let item_rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();
        for (status, n) in item_rows {
            counts.pipeline_items.insert(status, n as u64);
        }

        counts.sync_settings_enabled = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_settings WHERE enabled = 1",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map_err(storage_err)? as u64;

        Ok(counts)
    }
}

/// Summary counts reported by the daemon `status` command.
#[derive(Debug, Default, serde::Serialize)]
pub struct StatusCounts {
    pub tasks: std::collections::BTreeMap<String, u64>,
    pub pipeline_items: std::collections::BTreeMap<String, u64>,
    pub sync_settings_enabled: u64,
}

fn storage_err(e: impl std::fmt::Display) -> TalentError {
    TalentError::Storage(e.to_string())
}

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn opt_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(millis)
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| rusqlite::Error::InvalidParameterName(format!("bad timestamp {ms}")))
}

fn from_opt_millis(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))
}

/// NULL platform is keyed as the empty string in the settings PK and
/// compared through COALESCE on item queries.
fn platform_key(platform: Option<&str>) -> &str {
    platform.unwrap_or("")
}

const TASK_COLS: &str = "id, task_type, status, scheduled_for, recurrence, config, \
    entity_type, entity_id, next_run, last_run, attempt_count, lease_token, \
    lease_expires_at, result, error, created_at, updated_at";

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<ScheduledTask> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(2)?;
    let recurrence_json: String = row.get(4)?;
    let config_json: String = row.get(5)?;
    let lease_token: Option<String> = row.get(11)?;
    let lease_expires_at: Option<i64> = row.get(12)?;

    let lease = match (lease_token, lease_expires_at) {
        (Some(token), Some(expires)) => Some(Lease {
            token: parse_uuid(&token)?,
            expires_at: from_millis(expires)?,
        }),
        _ => None,
    };

    let status = TaskStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::InvalidParameterName(format!("bad task status {status_str}"))
    })?;
    let recurrence: RecurrenceSpec = parse_json(&recurrence_json)?;
    let config: TaskPayload = parse_json(&config_json)?;

    Ok(ScheduledTask {
        id: parse_uuid(&id_str)?,
        task_type: row.get(1)?,
        status,
        scheduled_for: from_millis(row.get(3)?)?,
        recurrence,
        config,
        entity_type: row.get(6)?,
        entity_id: row.get(7)?,
        next_run: from_opt_millis(row.get(8)?)?,
        last_run: from_opt_millis(row.get(9)?)?,
        attempt_count: row.get::<_, i64>(10)? as u32,
        lease,
        result: row.get(13)?,
        error: row.get(14)?,
        created_at: from_millis(row.get(15)?)?,
        updated_at: from_millis(row.get(16)?)?,
    })
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert_task(&self, task: &ScheduledTask) -> Result<()> {
        let conn = self.conn.lock().await;
        let recurrence = serde_json::to_string(&task.recurrence).map_err(storage_err)?;
        let config = serde_json::to_string(&task.config).map_err(storage_err)?;
        conn.execute(
            "INSERT INTO scheduled_tasks (id, task_type, status, scheduled_for, recurrence, \
             config, entity_type, entity_id, next_run, last_run, attempt_count, lease_token, \
             lease_expires_at, result, error, created_at, updated_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                task.id.to_string(),
                task.task_type,
                task.status.as_str(),
                millis(task.scheduled_for),
                recurrence,
                config,
                task.entity_type,
                task.entity_id,
                opt_millis(task.next_run),
                opt_millis(task.last_run),
                task.attempt_count as i64,
                task.lease.as_ref().map(|l| l.token.to_string()),
                task.lease.as_ref().map(|l| millis(l.expires_at)),
                task.result,
                task.error,
                millis(task.created_at),
                millis(task.updated_at),
            ],
        )
        .map_err(storage_err)?;
        debug!(task_id = %task.id, task_type = %task.task_type, "inserted task");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLS} FROM scheduled_tasks WHERE id = ?1"
            ))
            .map_err(storage_err)?;
        let task = stmt
            .query_map(params![id.to_string()], row_to_task)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .next();
        Ok(task)
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        let conn = self.conn.lock().await;
        let recurrence = serde_json::to_string(&task.recurrence).map_err(storage_err)?;
        let config = serde_json::to_string(&task.config).map_err(storage_err)?;
        let changed = conn
            .execute(
                "UPDATE scheduled_tasks SET task_type=?2, status=?3, scheduled_for=?4, \
                 recurrence=?5, config=?6, entity_type=?7, entity_id=?8, next_run=?9, \
                 last_run=?10, attempt_count=?11, lease_token=?12, lease_expires_at=?13, \
                 result=?14, error=?15, updated_at=?16 WHERE id=?1",
                params![
                    task.id.to_string(),
                    task.task_type,
                    task.status.as_str(),
                    millis(task.scheduled_for),
                    recurrence,
                    config,
                    task.entity_type,
                    task.entity_id,
                    opt_millis(task.next_run),
                    opt_millis(task.last_run),
                    task.attempt_count as i64,
                    task.lease.as_ref().map(|l| l.token.to_string()),
                    task.lease.as_ref().map(|l| millis(l.expires_at)),
                    task.result,
                    task.error,
                    millis(task.updated_at),
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(TalentError::task_not_found(task.id));
        }
        Ok(())
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "DELETE FROM scheduled_tasks WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    async fn find_task_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ScheduledTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLS} FROM scheduled_tasks \
                 WHERE entity_type = ?1 AND entity_id = ?2 \
                 AND status IN ('pending','running') \
                 ORDER BY created_at ASC LIMIT 1"
            ))
            .map_err(storage_err)?;
        let task = stmt
            .query_map(params![entity_type, entity_id], row_to_task)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .next();
        Ok(task)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_duration: Duration,
    ) -> Result<Vec<ScheduledTask>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(storage_err)?;
        let candidates: Vec<ScheduledTask> = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {TASK_COLS} FROM scheduled_tasks \
                     WHERE status = 'pending' AND next_run IS NOT NULL AND next_run <= ?1 \
                     ORDER BY next_run ASC, id ASC LIMIT ?2"
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![millis(now), limit as i64], row_to_task)
                .map_err(storage_err)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        // Conditional update keeps the claim at-most-once: only rows
        // still pending transition, everything else is skipped.
        let mut claimed = Vec::new();
        for mut task in candidates {
            let lease = Lease {
                token: Uuid::new_v4(),
                expires_at: now + lease_duration,
            };
            let changed = tx
                .execute(
                    "UPDATE scheduled_tasks SET status='running', lease_token=?1, \
                     lease_expires_at=?2, last_run=?3, updated_at=?3 \
                     WHERE id=?4 AND status='pending'",
                    params![
                        lease.token.to_string(),
                        millis(lease.expires_at),
                        millis(now),
                        task.id.to_string(),
                    ],
                )
                .map_err(storage_err)?;
            if changed == 1 {
                task.status = TaskStatus::Running;
                task.last_run = Some(now);
                task.updated_at = now;
                task.lease = Some(lease);
                claimed.push(task);
            }
        }
        tx.commit().map_err(storage_err)?;
        Ok(claimed)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(storage_err)?;
        let candidates: Vec<ScheduledTask> = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {TASK_COLS} FROM scheduled_tasks \
                     WHERE status = 'running' AND lease_expires_at IS NOT NULL \
                     AND lease_expires_at <= ?1"
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![millis(now)], row_to_task)
                .map_err(storage_err)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut reclaimed = Vec::new();
        for mut task in candidates {
            let changed = tx
                .execute(
                    "UPDATE scheduled_tasks SET status='pending', lease_token=NULL, \
                     lease_expires_at=NULL, updated_at=?1 \
                     WHERE id=?2 AND status='running'",
                    params![millis(now), task.id.to_string()],
                )
                .map_err(storage_err)?;
            if changed == 1 {
                task.status = TaskStatus::Pending;
                task.lease = None;
                task.updated_at = now;
                reclaimed.push(task);
            }
        }
        tx.commit().map_err(storage_err)?;
        Ok(reclaimed)
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn append(&self, entry: &SchedulerLogEntry) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO scheduler_logs (id, task_id, task_type, action, status, details, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                entry.id.to_string(),
                entry.task_id.to_string(),
                entry.task_type,
                entry.action.as_str(),
                entry.status.as_str(),
                entry.details,
                millis(entry.created_at),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn recent_for_task(
        &self,
        task_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SchedulerLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, task_type, action, status, details, created_at \
                 FROM scheduler_logs WHERE task_id = ?1 \
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(storage_err)?;
        let entries = stmt
            .query_map(params![task_id.to_string(), limit as i64], |row| {
                let action_str: String = row.get(3)?;
                let status_str: String = row.get(4)?;
                let action = LogAction::parse(&action_str).ok_or_else(|| {
                    rusqlite::Error::InvalidParameterName(format!("bad log action {action_str}"))
                })?;
                let status = TaskStatus::parse(&status_str).ok_or_else(|| {
                    rusqlite::Error::InvalidParameterName(format!("bad log status {status_str}"))
                })?;
                Ok(SchedulerLogEntry {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    task_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    task_type: row.get(2)?,
                    action,
                    status,
                    details: row.get(5)?,
                    created_at: from_millis(row.get(6)?)?,
                })
            })
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n = conn
            .execute(
                "DELETE FROM scheduler_logs WHERE created_at < ?1",
                params![millis(cutoff)],
            )
            .map_err(storage_err)?;
        Ok(n)
    }
}

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<PipelineItem> {
    let status_str: String = row.get(5)?;
    let status = PipelineItemStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::InvalidParameterName(format!("bad item status {status_str}"))
    })?;
    let task_id: Option<String> = row.get(8)?;
    let params_json: String = row.get(10)?;
    Ok(PipelineItem {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        pipeline_type: row.get(1)?,
        platform: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        status,
        priority: row.get(6)?,
        scheduled_for: from_opt_millis(row.get(7)?)?,
        scheduled_task_id: task_id.as_deref().map(parse_uuid).transpose()?,
        content_template: row.get(9)?,
        content_params: parse_json(&params_json)?,
        posted_at: from_opt_millis(row.get(11)?)?,
        result: row.get(12)?,
        error: row.get(13)?,
        created_at: from_millis(row.get(14)?)?,
    })
}

const ITEM_COLS: &str = "id, pipeline_type, platform, entity_type, entity_id, status, \
    priority, scheduled_for, scheduled_task_id, content_template, content_params, \
    posted_at, result, error, created_at";

fn row_to_settings(row: &rusqlite::Row) -> rusqlite::Result<PipelineSettings> {
    let platform: String = row.get(1)?;
    let hours_json: Option<String> = row.get(5)?;
    let days_json: Option<String> = row.get(6)?;
    Ok(PipelineSettings {
        pipeline_type: row.get(0)?,
        platform: if platform.is_empty() {
            None
        } else {
            Some(platform)
        },
        enabled: row.get::<_, i64>(2)? != 0,
        daily_limit: row.get::<_, i64>(3)? as u32,
        min_interval_minutes: row.get::<_, i64>(4)? as u32,
        posting_hours: hours_json.as_deref().map(parse_json).transpose()?,
        posting_days: days_json.as_deref().map(parse_json).transpose()?,
    })
}

const SETTINGS_COLS: &str = "pipeline_type, platform, enabled, daily_limit, \
    min_interval_minutes, posting_hours, posting_days";

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn insert_item(&self, item: &PipelineItem) -> Result<()> {
        let conn = self.conn.lock().await;
        let content_params = serde_json::to_string(&item.content_params).map_err(storage_err)?;
        conn.execute(
            "INSERT INTO pipeline_items (id, pipeline_type, platform, entity_type, entity_id, \
             status, priority, scheduled_for, scheduled_task_id, content_template, \
             content_params, posted_at, result, error, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                item.id.to_string(),
                item.pipeline_type,
                item.platform,
                item.entity_type,
                item.entity_id,
                item.status.as_str(),
                item.priority,
                opt_millis(item.scheduled_for),
                item.scheduled_task_id.map(|id| id.to_string()),
                item.content_template,
                content_params,
                opt_millis(item.posted_at),
                item.result,
                item.error,
                millis(item.created_at),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<PipelineItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ITEM_COLS} FROM pipeline_items WHERE id = ?1"
            ))
            .map_err(storage_err)?;
        let item = stmt
            .query_map(params![id.to_string()], row_to_item)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .next();
        Ok(item)
    }

    async fn update_item(&self, item: &PipelineItem) -> Result<()> {
        let conn = self.conn.lock().await;
        let content_params = serde_json::to_string(&item.content_params).map_err(storage_err)?;
        let changed = conn
            .execute(
                "UPDATE pipeline_items SET status=?2, priority=?3, scheduled_for=?4, \
                 scheduled_task_id=?5, content_template=?6, content_params=?7, posted_at=?8, \
                 result=?9, error=?10 WHERE id=?1",
                params![
                    item.id.to_string(),
                    item.status.as_str(),
                    item.priority,
                    opt_millis(item.scheduled_for),
                    item.scheduled_task_id.map(|id| id.to_string()),
                    item.content_template,
                    content_params,
                    opt_millis(item.posted_at),
                    item.result,
                    item.error,
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(TalentError::NotFound {
                kind: "pipeline item",
                id: item.id.to_string(),
            });
        }
        Ok(())
    }

    async fn pending_items(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PipelineItem>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ITEM_COLS} FROM pipeline_items \
                 WHERE pipeline_type = ?1 AND COALESCE(platform, '') = ?2 \
                 AND status = 'pending' \
                 ORDER BY priority DESC, created_at ASC LIMIT ?3"
            ))
            .map_err(storage_err)?;
        let items = stmt
            .query_map(
                params![pipeline_type, platform_key(platform), limit as i64],
                row_to_item,
            )
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    async fn posted_count_since(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pipeline_items \
                 WHERE pipeline_type = ?1 AND COALESCE(platform, '') = ?2 \
                 AND status = 'posted' AND posted_at IS NOT NULL AND posted_at >= ?3",
                params![pipeline_type, platform_key(platform), millis(since)],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count as u32)
    }

    async fn get_settings(
        &self,
        pipeline_type: &str,
        platform: Option<&str>,
    ) -> Result<Option<PipelineSettings>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SETTINGS_COLS} FROM pipeline_settings \
                 WHERE pipeline_type = ?1 AND platform = ?2"
            ))
            .map_err(storage_err)?;
        let settings = stmt
            .query_map(params![pipeline_type, platform_key(platform)], row_to_settings)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .next();
        Ok(settings)
    }

    async fn list_settings(&self) -> Result<Vec<PipelineSettings>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SETTINGS_COLS} FROM pipeline_settings \
                 ORDER BY pipeline_type ASC, platform ASC"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], row_to_settings)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    async fn upsert_settings(&self, settings: &PipelineSettings) -> Result<()> {
        let conn = self.conn.lock().await;
        let hours = settings
            .posting_hours
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage_err)?;
        let days = settings
            .posting_days
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage_err)?;
        conn.execute(
            "INSERT INTO pipeline_settings (pipeline_type, platform, enabled, daily_limit, \
             min_interval_minutes, posting_hours, posting_days) \
             VALUES (?1,?2,?3,?4,?5,?6,?7) \
             ON CONFLICT (pipeline_type, platform) DO UPDATE SET \
             enabled = excluded.enabled, daily_limit = excluded.daily_limit, \
             min_interval_minutes = excluded.min_interval_minutes, \
             posting_hours = excluded.posting_hours, posting_days = excluded.posting_days",
            params![
                settings.pipeline_type,
                platform_key(settings.platform.as_deref()),
                settings.enabled as i64,
                settings.daily_limit as i64,
                settings.min_interval_minutes as i64,
                hours,
                days,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }
}

fn row_to_sync(row: &rusqlite::Row) -> rusqlite::Result<SyncSettings> {
    let recurrence_json: String = row.get(4)?;
    Ok(SyncSettings {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        recurrence: parse_json(&recurrence_json)?,
        last_sync: from_opt_millis(row.get(5)?)?,
        next_sync: from_opt_millis(row.get(6)?)?,
        created_at: from_millis(row.get(7)?)?,
        updated_at: from_millis(row.get(8)?)?,
    })
}

const SYNC_COLS: &str =
    "id, entity_type, entity_id, enabled, recurrence, last_sync, next_sync, created_at, updated_at";

#[async_trait]
impl SyncStore for SqliteStore {
    async fn upsert_sync_settings(&self, settings: &SyncSettings) -> Result<()> {
        let conn = self.conn.lock().await;
        let recurrence = serde_json::to_string(&settings.recurrence).map_err(storage_err)?;
        conn.execute(
            "INSERT INTO sync_settings (id, entity_type, entity_id, enabled, recurrence, \
             last_sync, next_sync, created_at, updated_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9) \
             ON CONFLICT (id) DO UPDATE SET \
             enabled = excluded.enabled, recurrence = excluded.recurrence, \
             last_sync = excluded.last_sync, next_sync = excluded.next_sync, \
             updated_at = excluded.updated_at",
            params![
                settings.id.to_string(),
                settings.entity_type,
                settings.entity_id,
                settings.enabled as i64,
                recurrence,
                opt_millis(settings.last_sync),
                opt_millis(settings.next_sync),
                millis(settings.created_at),
                millis(settings.updated_at),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_sync_settings(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<SyncSettings>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SYNC_COLS} FROM sync_settings \
                 WHERE entity_type = ?1 AND entity_id = ?2"
            ))
            .map_err(storage_err)?;
        let settings = stmt
            .query_map(params![entity_type, entity_id], row_to_sync)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .next();
        Ok(settings)
    }

    async fn delete_sync_settings(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "DELETE FROM sync_settings WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    async fn list_enabled_sync_settings(&self) -> Result<Vec<SyncSettings>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SYNC_COLS} FROM sync_settings WHERE enabled = 1 \
                 ORDER BY created_at ASC"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], row_to_sync)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
