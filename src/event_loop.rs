/// event_loop.rs – Work items handed to the main loop and the sender used by
/// the input thread, menu reader, broker transport and timers to post them.
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::BrokerEvent;
use crate::keys::Key;

/// Dashboard timers. Each carries the dashboard generation it was armed for,
/// so a timer from a previous session is dropped instead of rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardTimer {
    PnlPoll,
    ReconcilePoll,
    PriceRefresh,
    FetchMissingTicks,
}

#[derive(Debug)]
pub enum LoopTask {
    Render,
    Key(Key),
    Menu(String),
    Broker(BrokerEvent),
    Connected,
    Disconnected(String),
    Timer {
        generation: u64,
        timer: DashboardTimer,
    },
    ReturnToMenu,
    ReconcileAfterClose,
    Shutdown(&'static str),
}

/// Thread-safe "run on loop" hand-off. Tasks are processed strictly in
/// submission order, interleaved with the loop's other work.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<LoopTask>,
}

impl LoopHandle {
    pub fn new(tx: mpsc::UnboundedSender<LoopTask>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoopTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Returns false once the loop has gone away.
    pub fn send(&self, task: LoopTask) -> bool {
        match self.tx.send(task) {
            Ok(()) => true,
            Err(e) => {
                debug!("loop closed, dropping {:?}", e.0);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_arrive_in_submission_order() {
        let (handle, mut rx) = LoopHandle::channel();
        let other = handle.clone();
        assert!(handle.send(LoopTask::Render));
        assert!(other.send(LoopTask::Key(Key::Char('j'))));
        assert!(handle.send(LoopTask::ReturnToMenu));
        assert!(matches!(rx.try_recv(), Ok(LoopTask::Render)));
        assert!(matches!(rx.try_recv(), Ok(LoopTask::Key(Key::Char('j')))));
        assert!(matches!(rx.try_recv(), Ok(LoopTask::ReturnToMenu)));
    }

    #[test]
    fn send_after_close_reports_failure() {
        let (handle, rx) = LoopHandle::channel();
        drop(rx);
        assert!(!handle.send(LoopTask::Render));
    }
}
