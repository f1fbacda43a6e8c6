//! Policies for supervising process restarts:
//!  - [`BackoffPolicy`] for delays between failed start attempts.
//!
//! Restart *decisions* (autorestart, startretries, startsecs) live on
//! [`ProgramConfig`](crate::config::ProgramConfig); this module only
//! computes how long to wait once a retry has been decided.

mod backoff;

pub use backoff::BackoffPolicy;
