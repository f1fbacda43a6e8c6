//! # Logging subscriber.
//!
//! [`LogSubscriber`] mirrors runtime events into the `tracing` stream so
//! operators can follow process lifecycles from the daemon log.
//!
//! ## Output shape
//! ```text
//! INFO  web:00 STARTING
//! INFO  web:00 RUNNING pid=4242
//! WARN  web:00 BACKOFF delay=500ms msg="spawn failed: No such file"
//! WARN  web:00 healthcheck failed (2 consecutive): connect refused
//! ERROR web:00 FATAL msg="start retries exhausted"
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Built-in subscriber that writes every event to the daemon log.
pub struct LogSubscriber;

impl LogSubscriber {
    fn describe(ev: &Event) -> String {
        let mut out = String::new();
        if let Some(name) = &ev.process {
            out.push_str(name);
        }
        if let Some(pid) = ev.pid {
            out.push_str(&format!(" pid={pid}"));
        }
        if let Some(delay) = ev.delay {
            out.push_str(&format!(" delay={delay:?}"));
        }
        if let Some(msg) = &ev.message {
            out.push_str(&format!(" msg={msg:?}"));
        }
        out
    }
}

#[async_trait]
impl Subscribe for LogSubscriber {
    async fn on_event(&self, ev: &Event) {
        let detail = Self::describe(ev);
        match ev.kind {
            EventKind::ProcessStarting => info!("STARTING{}", fmt_tail(&detail)),
            EventKind::ProcessRunning => info!("RUNNING{}", fmt_tail(&detail)),
            EventKind::ProcessExited => info!("EXITED{}", fmt_tail(&detail)),
            EventKind::ProcessStopped => info!("STOPPED{}", fmt_tail(&detail)),
            EventKind::ProcessStopping => info!("STOPPING{}", fmt_tail(&detail)),
            EventKind::ProcessBackoff => warn!("BACKOFF{}", fmt_tail(&detail)),
            EventKind::ProcessUnhealthy => warn!("UNHEALTHY{}", fmt_tail(&detail)),
            EventKind::ProcessFatal => error!("FATAL{}", fmt_tail(&detail)),
            EventKind::HealthcheckPassed => {
                info!(process = ev.process.as_deref(), "healthcheck passed");
            }
            EventKind::HealthcheckFailed => {
                warn!(
                    process = ev.process.as_deref(),
                    failures = ev.failures,
                    "healthcheck failed: {}",
                    ev.message.as_deref().unwrap_or("(no detail)")
                );
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all processes stopped within grace"),
            EventKind::GraceExceeded => warn!("grace exceeded{}", fmt_tail(&detail)),
            EventKind::ConfigReloaded => info!("config reloaded{}", fmt_tail(&detail)),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

fn fmt_tail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" {}", detail.trim_start())
    }
}
