use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Aggregator;
use crate::transaction::TransactionRecord;

/// Non-blocking producer side of the statistics queue.
///
/// Cheap to clone; every interceptor holds one inside its
/// [`Reporter`](crate::Reporter).
#[derive(Clone, Debug)]
pub struct StatsFeed {
    sender: mpsc::Sender<TransactionRecord>,
}

impl StatsFeed {
    /// Enqueues a record for the worker. Never waits: a full queue drops the
    /// record, a closed queue reports the loss.
    pub fn submit(&self, record: TransactionRecord) -> bool {
        match self.sender.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("statistics queue full, transaction dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("statistics queue closed");
                false
            }
        }
    }
}

/// Handle to the task folding queued records into an [`Aggregator`].
///
/// Dropping the handle shuts the worker down the same way
/// [`shutdown`](Self::shutdown) does, without waiting for it.
#[derive(Debug)]
pub struct StatsWorker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<u64>,
}

impl StatsWorker {
    /// Stops accepting records, drains what is already queued and returns
    /// the total number of records processed.
    pub async fn shutdown(self) -> u64 {
        let _ = self.stop.send(());
        match self.handle.await {
            Ok(processed) => processed,
            Err(err) => {
                error!(error = %err, "statistics worker failed");
                0
            }
        }
    }
}

/// Starts the statistics worker on the current Tokio runtime.
pub fn spawn(aggregator: Arc<Aggregator>, capacity: usize) -> (StatsFeed, StatsWorker) {
    let (sender, mut receiver) = mpsc::channel::<TransactionRecord>(capacity.max(1));
    let (stop, mut stopped) = oneshot::channel::<()>();

    info!(capacity, "statistics worker started");

    let handle = tokio::spawn(async move {
        let mut processed = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => {
                    receiver.close();
                    while let Some(record) = receiver.recv().await {
                        aggregator.add(record.start, record.end, record);
                        processed += 1;
                    }
                    break;
                }
                next = receiver.recv() => match next {
                    Some(record) => {
                        aggregator.add(record.start, record.end, record);
                        processed += 1;
                    }
                    None => break,
                },
            }
        }
        debug!(processed, "statistics worker stopped");
        processed
    });

    (StatsFeed { sender }, StatsWorker { stop, handle })
}
