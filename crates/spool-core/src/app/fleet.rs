//! FleetManager - ワーカー群の管理
//!
//! Starts N worker runtimes in this process and stops them together. Liveness
//! queries go to the registry, so they also see workers owned by other
//! processes sharing the same store.

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::app::{App, WorkerHandle, WorkerRuntime};
use crate::domain::{Result, WorkerId, WorkerRecord};

pub struct FleetManager {
    app: App,
    running: Mutex<Vec<WorkerHandle>>,
}

impl FleetManager {
    pub fn new(app: App) -> Self {
        Self {
            app,
            running: Mutex::new(Vec::new()),
        }
    }

    /// Start `count` workers, `launch_stagger` apart.
    ///
    /// On error the workers already started keep running and stay tracked.
    pub async fn start_workers(&self, count: usize) -> Result<Vec<WorkerId>> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            if i > 0 {
                tokio::time::sleep(self.app.settings.launch_stagger).await;
            }
            let id = self.app.ids.generate_worker_id();
            let handle = WorkerRuntime::new(self.app.clone(), id.clone())
                .start()
                .await?;
            self.running.lock().await.push(handle);
            ids.push(id);
        }
        info!(count, "workers started");
        Ok(ids)
    }

    /// Stop every worker this fleet started and wait for all of them
    /// concurrently. Returns how many were stopped.
    pub async fn stop_all_workers(&self) -> usize {
        let handles: Vec<WorkerHandle> = std::mem::take(&mut *self.running.lock().await);
        let total = handles.len();

        let mut stops = JoinSet::new();
        for handle in handles {
            stops.spawn(async move {
                let id = handle.id().clone();
                (id, handle.stop().await)
            });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => error!(worker_id = %id, error = %e, "worker stop failed"),
                Err(e) => error!(error = %e, "worker stop task panicked"),
            }
        }

        info!(count = total, "all workers stopped");
        total
    }

    /// Workers (from any process) that are `active` or `stopping` and have
    /// heartbeated within the liveness window.
    pub async fn list_active_workers(&self) -> Result<Vec<WorkerRecord>> {
        let since = self.app.clock.now() - self.app.settings.liveness_delta();
        self.app.workers.list_live(since).await
    }

    /// Every registered worker, including stopped ones.
    pub async fn list_all_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.app.workers.list_workers().await
    }

    /// Number of runtimes owned by this fleet.
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppBuilder, WorkerSettings};
    use crate::domain::WorkerStatus;
    use crate::impls::InMemoryStore;
    use crate::ports::WorkerRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    fn app(store: &Arc<InMemoryStore>) -> App {
        AppBuilder::new()
            .with_store(store.clone())
            .with_settings(
                WorkerSettings::default()
                    .with_poll_interval(Duration::from_millis(20))
                    .with_heartbeat_interval(Duration::from_millis(5))
                    .with_launch_stagger(Duration::from_millis(1)),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn start_list_stop() {
        let store = Arc::new(InMemoryStore::new());
        let fleet = app(&store).fleet();

        let ids = fleet.start_workers(3).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(fleet.running_count().await, 3);
        assert_eq!(fleet.list_active_workers().await.unwrap().len(), 3);

        assert_eq!(fleet.stop_all_workers().await, 3);
        assert_eq!(fleet.running_count().await, 0);
        assert!(fleet.list_active_workers().await.unwrap().is_empty());

        for id in &ids {
            let w = store.get_worker(id).await.unwrap().unwrap();
            assert_eq!(w.status, WorkerStatus::Stopped);
        }
        assert_eq!(fleet.list_all_workers().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stop_with_nothing_running_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        assert_eq!(app(&store).fleet().stop_all_workers().await, 0);
    }
}
