//! Durable one-shot timer service. A single dispatcher owns the min-heap
//! of armed jobs; workers execute fired jobs under a bounded semaphore.
//! Every armed job is persisted, so `on_boot` can replay what a restart
//! would otherwise lose.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Semaphore};

use clinic_core::clock::Clock;
use clinic_core::error::ClinicError;
use clinic_core::repo::Repository;
use clinic_core::types::{JobStatus, SchedulerJob};

use crate::jobs::{next_fire, JobKind, PERIODIC_KEY};

/// Executes a fired job. Implementations re-check their preconditions:
/// cancellation is best-effort, so a handler may observe a world where
/// its job no longer applies.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &SchedulerJob) -> anyhow::Result<()>;
}

struct HeapEntry {
    job: SchedulerJob,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job.id == other.job.id && self.job.fire_at == other.job.fire_at
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.job.fire_at, self.job.id).cmp(&(other.job.fire_at, other.job.id))
    }
}

enum Command {
    Arm(SchedulerJob),
    Cancel { kind: String, job_key: String },
}

/// Cheap handle for arming and cancelling jobs from request handlers and
/// workers. All state lives in the store and the dispatcher.
#[derive(Clone)]
pub struct Scheduler {
    repo: Repository,
    clock: Arc<dyn Clock>,
    tx: mpsc::UnboundedSender<Command>,
}

impl Scheduler {
    /// Schedules a one-shot job. `(kind, key)` is the identity: re-arming
    /// the same pair replaces the previous schedule. A fire time in the
    /// past dispatches on the next tick.
    pub async fn arm_at(
        &self,
        kind: JobKind,
        job_key: &str,
        fire_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Result<(), ClinicError> {
        let job = self
            .repo
            .upsert_job(kind.as_str(), job_key, fire_at, payload, self.clock.now_utc())
            .await?;
        let _ = self.tx.send(Command::Arm(job));
        Ok(())
    }

    pub async fn cancel(&self, kind: JobKind, job_key: &str) -> Result<bool, ClinicError> {
        let cancelled = self.repo.cancel_job(kind.as_str(), job_key).await?;
        if cancelled {
            let _ = self.tx.send(Command::Cancel {
                kind: kind.as_str().to_string(),
                job_key: job_key.to_string(),
            });
        }
        Ok(cancelled)
    }

    /// Arms the three periodic kinds at their next occurrence. Run at
    /// boot; replacing an already-armed occurrence is harmless.
    pub async fn ensure_periodic_jobs(&self) -> Result<(), ClinicError> {
        let now = self.clock.now_utc();
        let tz = self.clock.tz();
        for kind in [
            JobKind::MonthEndLearn,
            JobKind::MonthlyRecalc,
            JobKind::HourlyMaintenance,
        ] {
            let Some(fire_at) = next_fire(kind, now, tz) else {
                continue;
            };
            self.arm_at(kind, PERIODIC_KEY, fire_at, serde_json::json!({})).await?;
            tracing::info!("Periodic job {} armed for {}", kind.as_str(), fire_at);
        }
        Ok(())
    }
}

pub struct Dispatcher {
    repo: Repository,
    clock: Arc<dyn Clock>,
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    cancelled: HashSet<(String, String)>,
    workers: Arc<Semaphore>,
    boot_grace: Duration,
}

/// Builds the scheduler handle and its dispatcher. The dispatcher must be
/// driven with [`Dispatcher::run`] on a background task; the handler is
/// supplied there so services built around the handle can feed it.
pub fn build(
    repo: Repository,
    clock: Arc<dyn Clock>,
    worker_slots: usize,
    boot_grace_minutes: i64,
) -> (Scheduler, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler {
        repo: repo.clone(),
        clock: clock.clone(),
        tx: tx.clone(),
    };
    let dispatcher = Dispatcher {
        repo,
        clock,
        rx,
        tx,
        heap: BinaryHeap::new(),
        cancelled: HashSet::new(),
        workers: Arc::new(Semaphore::new(worker_slots.max(1))),
        boot_grace: Duration::minutes(boot_grace_minutes),
    };
    (scheduler, dispatcher)
}

impl Dispatcher {
    /// Replay policy after a restart: pending jobs overdue past the grace
    /// window are skipped, the rest are loaded into the heap (due ones
    /// dispatch on the first tick).
    pub async fn on_boot(&mut self) -> Result<(), ClinicError> {
        let cutoff = self.clock.now_utc() - self.boot_grace;
        let skipped = self.repo.skip_stale_jobs(cutoff).await?;
        if skipped > 0 {
            tracing::warn!("Skipped {} jobs overdue past the boot grace window", skipped);
        }
        let pending = self.repo.pending_jobs().await?;
        tracing::info!("Rehydrating {} pending scheduler jobs", pending.len());
        for job in pending {
            self.heap.push(Reverse(HeapEntry { job }));
        }
        Ok(())
    }

    pub async fn run(mut self, handler: Arc<dyn JobHandler>) {
        loop {
            let backoff = self.dispatch_due(&handler).await;
            let wait = if backoff {
                std::time::Duration::from_secs(1)
            } else {
                match self.heap.peek() {
                    Some(Reverse(entry)) => (entry.job.fire_at - self.clock.now_utc())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO),
                    None => std::time::Duration::from_secs(60),
                }
            };
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(Command::Arm(job)) => {
                        self.cancelled.remove(&(job.kind.clone(), job.job_key.clone()));
                        self.heap.push(Reverse(HeapEntry { job }));
                    }
                    Some(Command::Cancel { kind, job_key }) => {
                        self.cancelled.insert((kind, job_key));
                    }
                    None => break,
                },
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Pops every due entry and hands it to a worker slot. Returns true
    /// when a claim failed transiently and the loop should back off.
    async fn dispatch_due(&mut self, handler: &Arc<dyn JobHandler>) -> bool {
        loop {
            let due = match self.heap.peek() {
                Some(Reverse(entry)) => entry.job.fire_at <= self.clock.now_utc(),
                None => false,
            };
            if !due {
                return false;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                return false;
            };
            let identity = (entry.job.kind.clone(), entry.job.job_key.clone());
            if self.cancelled.remove(&identity) {
                continue;
            }
            match self.repo.claim_job(entry.job.id, entry.job.fire_at).await {
                Ok(true) => self.spawn_worker(entry.job, handler.clone()).await,
                Ok(false) => {
                    // replaced by a re-arm or cancelled underneath us
                    tracing::debug!(
                        "Stale heap entry for {}:{} dropped",
                        identity.0,
                        identity.1
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to claim job {}: {}", entry.job.id, e);
                    self.heap.push(Reverse(entry));
                    return true;
                }
            }
        }
    }

    async fn spawn_worker(&self, job: SchedulerJob, handler: Arc<dyn JobHandler>) {
        let Ok(permit) = self.workers.clone().acquire_owned().await else {
            return;
        };
        let repo = self.repo.clone();
        let clock = self.clock.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let status = match handler.execute(&job).await {
                Ok(()) => JobStatus::Done,
                Err(e) => {
                    tracing::error!("Job {} ({}:{}) failed: {}", job.id, job.kind, job.job_key, e);
                    JobStatus::Failed
                }
            };
            if let Err(e) = repo.finish_job(job.id, status).await {
                tracing::error!("Failed to persist outcome of job {}: {}", job.id, e);
            }

            // A periodic kind re-arms its next occurrence even after a
            // failure; one bad run never stops the cadence.
            if let Some(kind) = JobKind::parse(&job.kind) {
                if kind.is_periodic() {
                    if let Some(fire_at) = next_fire(kind, clock.now_utc(), clock.tz()) {
                        match repo
                            .upsert_job(
                                kind.as_str(),
                                PERIODIC_KEY,
                                fire_at,
                                job.payload.clone(),
                                clock.now_utc(),
                            )
                            .await
                        {
                            Ok(next) => {
                                let _ = tx.send(Command::Arm(next));
                            }
                            Err(e) => {
                                tracing::error!("Failed to re-arm {}: {}", kind.as_str(), e)
                            }
                        }
                    }
                }
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(id: i64, fire_at: DateTime<Utc>) -> SchedulerJob {
        SchedulerJob {
            id,
            kind: "reminder_fire".to_string(),
            job_key: id.to_string(),
            fire_at,
            payload: serde_json::json!({}),
            status: "pending".to_string(),
            attempts: 0,
            created_at: fire_at,
        }
    }

    #[test]
    fn heap_pops_in_fire_order() {
        let base = Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(HeapEntry { job: job(3, base + Duration::hours(2)) }));
        heap.push(Reverse(HeapEntry { job: job(1, base) }));
        heap.push(Reverse(HeapEntry { job: job(2, base + Duration::hours(1)) }));

        let order: Vec<i64> = std::iter::from_fn(|| heap.pop().map(|Reverse(e)| e.job.id)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn equal_fire_times_order_by_id() {
        let base = Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(HeapEntry { job: job(9, base) }));
        heap.push(Reverse(HeapEntry { job: job(4, base) }));
        assert_eq!(heap.pop().map(|Reverse(e)| e.job.id), Some(4));
    }
}
