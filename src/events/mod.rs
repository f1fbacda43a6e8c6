//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the supervisor, the
//! per-process supervision loops, and the health probe loops.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] — event classification and payload metadata
//! - [`Bus`], [`BusTap`] — bounded pub/sub with shed-oldest overflow and
//!   per-consumer loss accounting
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (shutdown/reload events), `Process`
//!   (state transitions, under its state lock), probe loops
//!   (healthcheck pass/fail).
//! - **Consumer**: the single delivery task spawned by the supervisor,
//!   which fans events out to the [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! Events carry names, never handles: the bus knows nothing about
//! processes, and processes know nothing about subscribers.

mod bus;
mod event;

pub use bus::{Bus, BusTap};
pub use event::{Event, EventKind};
