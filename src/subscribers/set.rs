//! # Subscriber fan-out with shed accounting.
//!
//! [`SubscriberSet`] hands each [`Event`] to every subscriber through a
//! bounded per-subscriber queue drained by a dedicated worker task, so
//! one slow or broken observer can never stall the daemon or its peers.
//!
//! ## Delivery contract
//! - `emit` returns immediately; per-subscriber order is queue order.
//! - A subscriber whose queue is full has that event **shed**, counted,
//!   and surfaced at a bounded warning rate (a stalled observer must
//!   not turn the daemon log into a firehose).
//! - A panicking handler is caught and logged with the event kind it
//!   choked on; delivery continues with the next event.
//! - Shutdown closes the queues, lets each worker finish its backlog,
//!   and logs a per-subscriber delivery summary (handled / shed).

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::events::Event;

use super::Subscribe;

/// After the first shed event, repeat the warning only once per this
/// many further sheds for the same subscriber.
const SHED_WARN_EVERY: u64 = 256;

/// Delivery endpoint for one subscriber: its queue, its worker, and the
/// count of events it never got to see.
struct Outlet {
    name: &'static str,
    queue: mpsc::Sender<Arc<Event>>,
    shed: AtomicU64,
    worker: JoinHandle<u64>,
}

/// Fan-out over all registered subscribers.
pub struct SubscriberSet {
    outlets: Vec<Outlet>,
}

impl SubscriberSet {
    /// Wires one outlet per subscriber and starts its worker.
    #[must_use]
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            outlets: subscribers.into_iter().map(Self::connect).collect(),
        }
    }

    fn connect(subscriber: Arc<dyn Subscribe>) -> Outlet {
        let name = subscriber.name();
        let depth = subscriber.queue_capacity().max(1);
        let (queue, mut feed) = mpsc::channel::<Arc<Event>>(depth);

        let worker = tokio::spawn(async move {
            let mut handled: u64 = 0;
            while let Some(event) = feed.recv().await {
                let kind = event.kind;
                let call = AssertUnwindSafe(subscriber.on_event(event.as_ref())).catch_unwind();
                if call.await.is_err() {
                    warn!(
                        subscriber = subscriber.name(),
                        ?kind,
                        "handler panicked, continuing with the next event"
                    );
                }
                handled += 1;
            }
            handled
        });

        Outlet {
            name,
            queue,
            shed: AtomicU64::new(0),
            worker,
        }
    }

    /// Hands one event to every subscriber without waiting on any of
    /// them. A full (or dead) queue sheds the event for that subscriber
    /// only.
    pub fn emit(&self, event: Arc<Event>) {
        for outlet in &self.outlets {
            if outlet.queue.try_send(Arc::clone(&event)).is_ok() {
                continue;
            }
            let total = outlet.shed.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % SHED_WARN_EVERY == 0 {
                warn!(
                    subscriber = outlet.name,
                    shed = total,
                    "subscriber cannot keep up, shedding events"
                );
            }
        }
    }

    /// Closes every queue, waits for the workers to drain their
    /// backlogs, and reports what each subscriber actually received.
    pub async fn shutdown(self) {
        for outlet in self.outlets {
            drop(outlet.queue);
            let handled = outlet.worker.await.unwrap_or_default();
            let shed = outlet.shed.into_inner();
            if shed > 0 {
                warn!(
                    subscriber = outlet.name,
                    handled, shed, "subscriber drained with shed events"
                );
            } else {
                info!(subscriber = outlet.name, handled, "subscriber drained");
            }
        }
    }
}
