pub mod notifier;
pub mod orchestrator;

pub use notifier::{LogNotifier, NotificationDispatcher};
pub use orchestrator::UpgradeOrchestrator;
