//! Wake-up channel between mutation paths and the reconcile controller.
//!
//! Capacity is one: any number of fires before the controller wakes collapse
//! into a single pass, which drains everything pending anyway.
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Clone)]
pub struct ReconcileTrigger {
    tx: mpsc::Sender<()>,
}

#[derive(Debug)]
pub struct ReconcileSignal {
    rx: mpsc::Receiver<()>,
}

impl ReconcileTrigger {
    pub fn channel() -> (ReconcileTrigger, ReconcileSignal) {
        let (tx, rx) = mpsc::channel(1);
        (ReconcileTrigger { tx }, ReconcileSignal { rx })
    }

    /// Never blocks; a full channel already guarantees a pending pass.
    pub fn fire(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                tracing::warn!("reconcile controller is not running; change will apply on restart");
            }
        }
    }
}

impl ReconcileSignal {
    /// `None` once every trigger has been dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<()> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_fires_coalesce() {
        let (trigger, mut signal) = ReconcileTrigger::channel();
        trigger.fire();
        trigger.fire();
        trigger.clone().fire();
        assert_eq!(signal.recv().await, Some(()));
        assert!(signal.try_recv().is_none());
    }

    #[tokio::test]
    async fn fire_after_receiver_drop_does_not_panic() {
        let (trigger, signal) = ReconcileTrigger::channel();
        drop(signal);
        trigger.fire();
    }
}
