use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;

use crate::models::job::{JobRecord, JobState};

/// Key prefix marking every record owned by this orchestration layer.
const KEY_PREFIX: &str = "annotate";
/// Ready list the worker pops from.
const READY_KEY: &str = "annotate:jobs:ready";
/// How long a terminal record stays readable for pollers before Redis
/// drops it.
const TERMINAL_TTL_SECS: i64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Thin adapter over the distributed queue.
///
/// The queue exclusively owns each [`JobRecord`] for its lifetime; callers
/// mutate records only through `save` (worker-side progress/status writes)
/// and `delete`.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Store a new record, register it under its state, and make it
    /// visible to workers.
    async fn enqueue(&self, record: &JobRecord) -> Result<(), QueueError>;

    /// Look up a record by id. `None` for unknown ids or ids not owned by
    /// this layer.
    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Ids currently registered under `state`.
    async fn list_ids(&self, state: JobState) -> Result<Vec<String>, QueueError>;

    /// Persist a worker-side mutation (status, error, timestamps).
    async fn save(&self, record: &JobRecord) -> Result<(), QueueError>;

    /// Write only the progress value of a live job. The rest of the record,
    /// `status` in particular, is never touched, so a concurrent
    /// administrative status change cannot be lost to this write. No-op for
    /// deleted jobs.
    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), QueueError>;

    /// Remove a record entirely.
    async fn delete(&self, id: &str) -> Result<(), QueueError>;

    /// Pop the next dispatchable id, if any.
    async fn pop_ready(&self) -> Result<Option<String>, QueueError>;

    /// Return an id to the ready list (dependency not satisfied yet).
    async fn push_ready(&self, id: &str) -> Result<(), QueueError>;

    /// Queue connectivity probe for health checks.
    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed queue: one JSON value per job, one set per state registry,
/// one ready list for worker dispatch.
pub struct RedisWorkQueue {
    client: redis::Client,
}

fn job_key(id: &str) -> String {
    format!("{KEY_PREFIX}:job:{id}")
}

fn registry_key(state: JobState) -> String {
    format!("{KEY_PREFIX}:jobs:{state}")
}

// Progress lives under its own key so reporter writes and status writes
// never overlap.
fn progress_key(id: &str) -> String {
    format!("{KEY_PREFIX}:job:{id}:progress")
}

impl RedisWorkQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, record: &JobRecord) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(job_key(&record.id), payload).await?;
        conn.set::<_, _, ()>(progress_key(&record.id), record.progress)
            .await?;
        conn.sadd::<_, _, ()>(registry_key(record.status), &record.id)
            .await?;
        // Scheduled jobs are held back by the queue itself; everything else
        // becomes visible to workers immediately.
        if record.status != JobState::Scheduled {
            conn.lpush::<_, _, ()>(READY_KEY, &record.id).await?;
        }
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn.get(job_key(id)).await?;
        match payload {
            Some(json) => {
                let mut record: JobRecord = serde_json::from_str(&json)?;
                if let Some(progress) = conn.get::<_, Option<u8>>(progress_key(id)).await? {
                    record.progress = progress;
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn list_ids(&self, state: JobState) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers(registry_key(state)).await?)
    }

    async fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        // Move the id between state registries when the status changed.
        let previous: Option<String> = conn.get(job_key(&record.id)).await?;
        if let Some(json) = previous {
            let old: JobRecord = serde_json::from_str(&json)?;
            if old.status != record.status {
                conn.srem::<_, _, ()>(registry_key(old.status), &record.id)
                    .await?;
                conn.sadd::<_, _, ()>(registry_key(record.status), &record.id)
                    .await?;
            }
        }
        let payload = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(job_key(&record.id), payload).await?;
        // Terminal records stay readable for a bounded window, then Redis
        // reclaims them.
        if record.status.is_terminal() {
            conn.expire::<_, ()>(job_key(&record.id), TERMINAL_TTL_SECS)
                .await?;
            conn.expire::<_, ()>(progress_key(&record.id), TERMINAL_TTL_SECS)
                .await?;
        }
        Ok(())
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        // XX: only while the key still exists. A job deleted mid-run stays
        // deleted.
        redis::cmd("SET")
            .arg(progress_key(id))
            .arg(progress)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn.get(job_key(id)).await?;
        match payload {
            Some(json) => {
                let record: JobRecord = serde_json::from_str(&json)?;
                conn.srem::<_, _, ()>(registry_key(record.status), id).await?;
            }
            // Record already expired; the registry entry may still be
            // around, so sweep every set.
            None => {
                for state in JobState::ALL {
                    conn.srem::<_, _, ()>(registry_key(state), id).await?;
                }
            }
        }
        conn.del::<_, ()>(job_key(id)).await?;
        conn.del::<_, ()>(progress_key(id)).await?;
        conn.lrem::<_, _, ()>(READY_KEY, 0, id).await?;
        Ok(())
    }

    async fn pop_ready(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn().await?;
        Ok(conn.rpop(READY_KEY, None).await?)
    }

    async fn push_ready(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.lpush::<_, _, ()>(READY_KEY, id).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Fetch-or-create the download prerequisite for `parent_id`.
///
/// The dependency id is deterministic, so concurrent submissions sharing a
/// prerequisite resolve to the same record and the download runs once.
pub async fn configure_dependent_job(
    queue: &dyn WorkQueue,
    parent_id: &str,
    target_resource_id: i64,
    filename: &str,
    args: serde_json::Value,
) -> Result<JobRecord, QueueError> {
    let dep_id = JobRecord::dependency_id_for(parent_id, filename);
    if let Some(existing) = queue.fetch(&dep_id).await? {
        return Ok(existing);
    }
    let record = JobRecord::with_id(
        dep_id,
        crate::models::job::JobKind::Download,
        target_resource_id,
        args,
    );
    queue.enqueue(&record).await?;
    Ok(record)
}

/// Worker dispatch: pop one id and claim it for execution.
///
/// Jobs whose dependency has not finished are pushed back; a failed or
/// vanished dependency fails the dependent job here (the raw error is
/// surfaced later by the cleanup handler, which falls back to the
/// dependency's error text).
pub async fn next_ready_job(queue: &dyn WorkQueue) -> Result<Option<JobRecord>, QueueError> {
    let Some(id) = queue.pop_ready().await? else {
        return Ok(None);
    };
    // Deleted between push and pop: nothing to run.
    let Some(mut record) = queue.fetch(&id).await? else {
        return Ok(None);
    };
    if !matches!(record.status, JobState::Queued | JobState::Deferred) {
        return Ok(None);
    }

    if let Some(dep_id) = record.dependency_id.clone() {
        match queue.fetch(&dep_id).await? {
            Some(dep) if dep.status == JobState::Finished => {}
            Some(dep) if dep.status == JobState::Failed => {
                record.status = JobState::Failed;
                record.ended_at = Some(Utc::now());
                queue.save(&record).await?;
                return Ok(None);
            }
            Some(_) => {
                record.status = JobState::Deferred;
                queue.save(&record).await?;
                queue.push_ready(&id).await?;
                return Ok(None);
            }
            None => {
                record.status = JobState::Failed;
                record.error = Some(format!("dependency job {dep_id} no longer exists"));
                record.ended_at = Some(Utc::now());
                queue.save(&record).await?;
                return Ok(None);
            }
        }
    }

    record.status = JobState::Started;
    record.started_at = Some(Utc::now());
    queue.save(&record).await?;
    Ok(Some(record))
}
