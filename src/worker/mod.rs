//! Worker pool consuming the work channel.
//!
//! Every work item goes through a double-checked protocol: satisfied
//! without a lock, lock, satisfied again, callback, unlock.

mod rule_worker;


use std::sync::Arc;

pub use rule_worker::*;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::processor::WorkItem;

/// Shared receiving end of the work channel.
pub type WorkReceiver = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Spawns `count` workers sharing one receiver. Each exits once the channel
/// is closed and drained.
pub fn spawn_workers(
    count: usize,
    receiver: mpsc::Receiver<WorkItem>,
    worker: RuleWorker,
) -> Vec<JoinHandle<()>> {
    let receiver: WorkReceiver = Arc::new(Mutex::new(receiver));
    (0..count.max(1))
        .map(|id| {
            let worker = worker.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move { worker.run(id, receiver).await })
        })
        .collect()
}
