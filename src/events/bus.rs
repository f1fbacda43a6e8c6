//! # Event bus: bounded pub/sub for runtime events.
//!
//! The bus decouples state changes from their observers. Publishing
//! never blocks a supervision loop: the channel is bounded and, when a
//! consumer falls behind, the **oldest** undelivered events are shed in
//! favor of the newest — for a supervisor the recent transitions are
//! the ones an operator needs to see.
//!
//! Consumption goes through a [`BusTap`], which folds that shedding
//! policy into iteration: a lagging tap records and logs how many
//! events it lost, then keeps delivering from the oldest event still
//! buffered, in publish order. Per process, publish order equals
//! state-transition order, so a tap that never lags sees exact
//! transition sequences.

use tokio::sync::broadcast;
use tracing::warn;

use super::event::Event;

/// Default depth, sized for the burstiest moment the daemon has: a hot
/// reload cycling dozens of instances through their full transition
/// sequences while health verdicts keep arriving. Shedding should only
/// ever happen when an observer stalls outright.
const DAEMON_BUS_DEPTH: usize = 1000;

/// Bounded broadcast of [`Event`]s.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `depth` undelivered events per tap.
    pub fn new(depth: usize) -> Self {
        // Depth zero would turn every publish into an immediate shed;
        // one buffered event is the useful minimum.
        let (tx, _) = broadcast::channel(depth.max(1));
        Self { tx }
    }

    /// Publishes an event; never waits on consumers.
    ///
    /// A daemon running without observers is a legal state: with no
    /// live taps the event is shed on the spot.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Opens a new consuming end observing all events published from
    /// this point on.
    pub fn tap(&self) -> BusTap {
        BusTap {
            rx: self.tx.subscribe(),
            lost: 0,
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DAEMON_BUS_DEPTH)
    }
}

/// One consumer's view of the bus, with loss accounting.
pub struct BusTap {
    rx: broadcast::Receiver<Event>,
    lost: u64,
}

impl BusTap {
    /// Waits for the next event in publish order.
    ///
    /// When this tap has fallen behind, the overrun is logged and
    /// counted, and delivery resumes at the oldest event still
    /// buffered. Returns `None` once the bus is gone and the backlog
    /// is exhausted.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => self.account_loss(n),
            }
        }
    }

    /// Takes an already-buffered event without waiting; `None` when the
    /// backlog is empty. Used to flush the pipeline during shutdown.
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.account_loss(n),
                Err(_) => return None,
            }
        }
    }

    /// Events this tap never saw because it lagged.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    fn account_loss(&mut self, n: u64) {
        self.lost += n;
        warn!(
            lost = n,
            total_lost = self.lost,
            "event consumer lagged, oldest events shed"
        );
    }
}
