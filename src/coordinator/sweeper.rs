use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::periodic_task::PeriodicTask;

use super::Coordinator;

/// Periodically drives abandoned vote intents to completion.
///
/// Lives in managed state; started once the server has lifted off and stopped
/// on shutdown.
pub struct Sweeper {
    coordinator: Arc<Coordinator>,
    period: Duration,
    task: Mutex<Option<PeriodicTask>>,
}

impl Sweeper {
    pub fn new(coordinator: Arc<Coordinator>, period: Duration) -> Self {
        Self {
            coordinator,
            period,
            task: Mutex::new(None),
        }
    }

    /// Start sweeping. A zero period disables the sweeper.
    pub fn start(&self) {
        if self.period.is_zero() {
            warn!("Reconciliation sweeper disabled");
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }
        let coordinator = self.coordinator.clone();
        *task = Some(PeriodicTask::new(self.period, move || {
            let coordinator = coordinator.clone();
            async move {
                if let Err(e) = coordinator.sweep().await {
                    error!("Reconciliation sweep failed: {e}");
                }
            }
        }));
        info!("Reconciliation sweeper running every {:?}", self.period);
    }

    /// Run a sweep as soon as possible, without waiting for the period.
    pub fn trigger_now(&self) {
        if let Some(task) = &*self.task.lock().unwrap_or_else(|e| e.into_inner()) {
            task.trigger_now();
        }
    }

    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.cancel().await;
            info!("Reconciliation sweeper stopped");
        }
    }
}
