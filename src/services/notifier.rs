use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Lifecycle events emitted by the orchestrator. Delivery is best-effort:
/// a notification must never affect execution state.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Started,
    StepCompleted { step_id: String, completed_steps: i32 },
    Paused,
    Resumed,
    Succeeded,
    Failed { error: String },
    Cancelled,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, execution_id: &str, event: &ExecutionEvent);
}

/// Default notifier: structured log lines.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, execution_id: &str, event: &ExecutionEvent) {
        tracing::info!(execution_id, event = ?event, "execution event");
    }
}

#[derive(Debug, Clone)]
struct Notification {
    execution_id: String,
    event: ExecutionEvent,
}

/// Bounded fan-out queue for notifications. When the queue is full the
/// oldest pending notification is discarded; notifications are loss-tolerant
/// and must not apply backpressure to step progression.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: Arc<Mutex<VecDeque<Notification>>>,
    wakeup: Arc<Notify>,
    capacity: usize,
}

impl NotificationDispatcher {
    pub fn new(capacity: usize, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        let dispatcher = Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            wakeup: Arc::new(Notify::new()),
            capacity: capacity.max(1),
        };

        let queue = dispatcher.queue.clone();
        let wakeup = dispatcher.wakeup.clone();
        tokio::spawn(async move {
            loop {
                let next = queue.lock().expect("notification queue lock").pop_front();
                match next {
                    Some(notification) => {
                        for notifier in &notifiers {
                            notifier
                                .notify(&notification.execution_id, &notification.event)
                                .await;
                        }
                    }
                    None => wakeup.notified().await,
                }
            }
        });

        dispatcher
    }

    pub fn dispatch(&self, execution_id: &str, event: ExecutionEvent) {
        {
            let mut queue = self.queue.lock().expect("notification queue lock");
            if queue.len() >= self.capacity {
                let dropped = queue.pop_front();
                tracing::warn!(
                    dropped = ?dropped.map(|n| n.execution_id),
                    "Notification queue full, discarding oldest"
                );
            }
            queue.push_back(Notification {
                execution_id: execution_id.to_string(),
                event,
            });
        }
        self.wakeup.notify_one();
    }
}
