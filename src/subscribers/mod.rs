//! Event subscribers: the extension point for observing the daemon.
//!
//! - [`Subscribe`] — contract for event handlers
//! - [`SubscriberSet`] — non-blocking fan-out with per-subscriber queues
//! - [`LogSubscriber`] — built-in subscriber that mirrors events into the
//!   `tracing` log stream

mod log;
mod set;
mod subscribe;

pub use log::LogSubscriber;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
