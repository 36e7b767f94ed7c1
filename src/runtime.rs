use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::PickupCache;
use crate::config::AppConfig;
use crate::db::{DbPool, PgBackend};
use crate::error::PickupError;
use crate::listener::{ChangeListener, ListenerSettings};
use crate::processor::PickupProcessor;
use crate::queue;
use crate::sweeper::InactivitySweeper;

type TaskHandle = JoinHandle<Result<(), PickupError>>;

/// Background tasks of one instance plus the processor the HTTP layer calls.
pub struct Runtime {
    processor: Arc<PickupProcessor>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, TaskHandle)>,
}

/// Loads the live table, then spawns the write queue consumer, the change
/// listener and the inactivity sweeper.
pub async fn start(config: &AppConfig, pool: DbPool, origin: String) -> anyhow::Result<Runtime> {
    let cache = Arc::new(PickupCache::new(Arc::new(PgBackend::new(pool.clone()))));
    let loaded = cache.resync_all().await?;
    info!("Loaded {} live pickups into memory", loaded);

    let (queue, worker) = queue::channel(cache.clone());
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let mut tasks: Vec<(&'static str, TaskHandle)> = Vec::new();

    tasks.push(("write_queue", tokio::spawn(worker.run(shutdown_tx.subscribe()))));

    let listener = ChangeListener::new(
        pool,
        cache.clone(),
        origin,
        ListenerSettings::from_config(config),
    );
    tasks.push(("listener", tokio::spawn(listener.run(shutdown_tx.subscribe()))));

    let sweeper = InactivitySweeper::new(
        cache.clone(),
        queue.clone(),
        config.sweep_interval(),
        config.inactivity_threshold(),
    );
    tasks.push(("sweeper", tokio::spawn(sweeper.run(shutdown_tx.subscribe()))));

    let processor = Arc::new(PickupProcessor::new(cache, queue, config.completion_grace()));

    Ok(Runtime {
        processor,
        shutdown_tx,
        tasks,
    })
}

impl Runtime {
    pub fn processor(&self) -> Arc<PickupProcessor> {
        self.processor.clone()
    }

    /// Signals every task and waits for them. The write queue finishes the
    /// jobs already enqueued before it exits.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(());
        for (task, handle) in self.tasks {
            handle_join(task, handle.await)?;
        }
        info!("All background tasks stopped");
        Ok(())
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), PickupError>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    match result {
        Ok(inner) => Ok(inner?),
        Err(err) => Err(anyhow::anyhow!("{task} task join failure: {err}")),
    }
}
