use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use super::action::KarmaAction;
use super::manager::KarmaManager;
use super::{KarmaError, KarmaResult};

/// Counts of what a worker did before its queue closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub saved: usize,
    pub failed: usize,
}

/// Handle for queueing actions onto a running [`ActionWorker`].
#[derive(Debug, Clone)]
pub struct ActionSender {
    tx: UnboundedSender<KarmaAction>,
}

impl ActionSender {
    /// Queues `action` without waiting for it to be saved.
    pub fn record(&self, action: KarmaAction) -> KarmaResult<()> {
        self.tx.send(action).map_err(|_| KarmaError::WorkerClosed)
    }
}

/// Background task that saves queued actions in arrival order.
///
/// A failed save is logged and dropped; there is no retry. The worker exits once every
/// [`ActionSender`] is gone and the queue has drained.
pub struct ActionWorker {
    manager: KarmaManager,
    rx: UnboundedReceiver<KarmaAction>,
    report: WorkerReport,
}

impl ActionWorker {
    pub fn spawn(manager: KarmaManager) -> (ActionSender, JoinHandle<WorkerReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            manager,
            rx,
            report: WorkerReport::default(),
        };

        (ActionSender { tx }, tokio::spawn(worker.run()))
    }

    #[instrument(name = "karma_worker", skip(self))]
    async fn run(mut self) -> WorkerReport {
        info!("karma action worker started");

        while let Some(action) = self.rx.recv().await {
            match action.save(&self.manager).await {
                Ok(()) => self.report.saved += 1,
                Err(e) => {
                    self.report.failed += 1;
                    error!(
                        error = %e,
                        user_id = %action.user(),
                        kind = %action.kind(),
                        "failed to save karma action"
                    );
                }
            }
        }

        info!(
            saved = self.report.saved,
            failed = self.report.failed,
            "karma action worker stopped"
        );
        self.report
    }
}
