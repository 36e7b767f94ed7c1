//! Single-consumer queue for write sequences that must not interleave.
//!
//! Jobs are plain data. The worker runs one job at a time in FIFO order and
//! each job's steps in order, stopping at the first step that fails. Callers
//! only enqueue and never wait for the outcome.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::cache::PickupCache;
use crate::error::PickupError;
use crate::models::{PickupRecord, PickupStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteStep {
    /// Copy the record into `pastpickups`.
    Archive { record: PickupRecord },
    /// Delete the live row created at `initial_time`.
    Remove {
        phone_number: String,
        initial_time: NaiveDateTime,
    },
    /// Archive the record and delete its live row together, only while the
    /// row still carries the version the record was read at.
    ArchiveAtVersion { record: PickupRecord },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteJob {
    pub phone_number: String,
    pub steps: Vec<WriteStep>,
}

impl WriteJob {
    /// Archive `record` with `archived_status`, then delete its live row.
    pub fn archive_then_remove(record: &PickupRecord, archived_status: PickupStatus) -> Self {
        let mut archived = record.clone();
        archived.status = archived_status;
        Self {
            phone_number: record.phone_number.clone(),
            steps: vec![
                WriteStep::Archive { record: archived },
                WriteStep::Remove {
                    phone_number: record.phone_number.clone(),
                    initial_time: record.initial_time,
                },
            ],
        }
    }

    /// Retires `record` as inactive unless another write reached its row
    /// after it was read.
    pub fn archive_at_version(record: &PickupRecord) -> Self {
        let mut archived = record.clone();
        archived.status = PickupStatus::Inactive;
        Self {
            phone_number: record.phone_number.clone(),
            steps: vec![WriteStep::ArchiveAtVersion { record: archived }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Stopped at the step with this index. The key has been resynced.
    Aborted(usize),
}

/// Producer side. Cheap to clone.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteJob>,
    cache: Arc<PickupCache>,
}

pub struct WriteQueueWorker {
    rx: mpsc::UnboundedReceiver<WriteJob>,
    cache: Arc<PickupCache>,
}

pub fn channel(cache: Arc<PickupCache>) -> (WriteQueue, WriteQueueWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        WriteQueue {
            tx,
            cache: cache.clone(),
        },
        WriteQueueWorker { rx, cache },
    )
}

impl WriteQueue {
    pub fn enqueue(&self, job: WriteJob) -> Result<(), PickupError> {
        self.tx.send(job).map_err(|_| PickupError::QueueClosed)
    }

    /// Drops `record` from the live cache and queues its archive and removal.
    pub fn archive_and_remove(
        &self,
        record: &PickupRecord,
        archived_status: PickupStatus,
    ) -> Result<(), PickupError> {
        self.enqueue(WriteJob::archive_then_remove(record, archived_status))?;
        self.cache
            .store()
            .remove_if_initial(&record.phone_number, record.initial_time);
        Ok(())
    }
}

impl WriteQueueWorker {
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), PickupError> {
        info!("Write queue worker started");
        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => {
                        self.execute(job).await;
                    }
                    None => break,
                },
                _ = shutdown.recv() => {
                    self.rx.close();
                    let drained = self.run_pending().await;
                    info!("Write queue drained {} jobs before shutdown", drained);
                    break;
                }
            }
        }
        info!("Write queue worker stopped");
        Ok(())
    }

    /// Runs every job already enqueued, without waiting for new ones.
    pub async fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            self.execute(job).await;
            count += 1;
        }
        count
    }

    pub async fn execute(&self, job: WriteJob) -> JobOutcome {
        if let Err(err) = self.cache.ensure_available().await {
            error!("Dropping write job for {}: {}", job.phone_number, err);
            return JobOutcome::Aborted(0);
        }

        for (index, step) in job.steps.iter().enumerate() {
            if let Err(err) = self.run_step(step).await {
                warn!(
                    "Write job for {} stopped at step {}: {}",
                    job.phone_number, index, err
                );
                if let Err(err) = self.cache.resync(&job.phone_number).await {
                    warn!("Resync after aborted job for {} failed: {}", job.phone_number, err);
                }
                return JobOutcome::Aborted(index);
            }
        }
        JobOutcome::Completed
    }

    async fn run_step(&self, step: &WriteStep) -> Result<(), PickupError> {
        match step {
            WriteStep::Archive { record } => {
                let rows = self.cache.backend().archive(record).await?;
                if rows == 0 {
                    return Err(PickupError::ArchiveRejected(record.phone_number.clone()));
                }
                info!("Archived pickup {} as {:?}", record.phone_number, record.status);
                Ok(())
            }
            WriteStep::Remove {
                phone_number,
                initial_time,
            } => {
                let rows = self
                    .cache
                    .backend()
                    .remove_live(phone_number, *initial_time)
                    .await?;
                if rows == 0 {
                    return Err(PickupError::RecordNotFound(phone_number.clone()));
                }
                self.cache
                    .store()
                    .remove_if_initial(phone_number, *initial_time);
                info!("Removed live pickup {}", phone_number);
                Ok(())
            }
            WriteStep::ArchiveAtVersion { record } => {
                let rows = self.cache.backend().archive_live_at_version(record).await?;
                if rows == 0 {
                    return Err(PickupError::StaleVersionConflict {
                        phone_number: record.phone_number.clone(),
                        expected_version: record.version,
                    });
                }
                self.cache
                    .store()
                    .remove_if_initial(&record.phone_number, record.initial_time);
                info!(
                    "Archived and removed pickup {} at version {}",
                    record.phone_number, record.version
                );
                Ok(())
            }
        }
    }
}
