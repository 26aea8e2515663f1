use std::future::Future;
use std::sync::Arc;

use rocket::tokio::{
    self,
    sync::Notify,
    task::JoinHandle,
    time::{self, Duration},
};

/// A task that runs repeatedly with a fixed pause between runs.
/// It can be triggered early or cancelled.
pub struct PeriodicTask {
    handle: JoinHandle<()>,
    signal: Arc<Notify>,
}

impl PeriodicTask {
    /// Run `task` every `period`, starting one period from now.
    pub fn new<F, Fut>(period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let signal = Arc::new(Notify::new());
        let task_signal = signal.clone();
        let handle = tokio::spawn(async move {
            loop {
                // Timing out is the normal case; a notification just wakes us early.
                let _ = time::timeout(period, task_signal.notified()).await;
                task().await;
            }
        });
        Self { handle, signal }
    }

    /// Run the task now instead of waiting for the rest of the period.
    pub fn trigger_now(&self) {
        self.signal.notify_one();
    }

    /// Stop the task. A run in progress is cut short.
    pub async fn cancel(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
