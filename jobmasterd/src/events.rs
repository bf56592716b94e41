//! Producer side of the master's event bus.
//!
//! The client service only ever enqueues. Its contract ends at a
//! successful post; it never waits for, or learns about, the effect of
//! an event. Consumers (the job/task/attempt state machines) live
//! outside this crate.

use jobmaster_common::events::AppEvent;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

#[derive(Clone)]
pub struct EventBus {
    tx: UnboundedSender<AppEvent>,
}

impl EventBus {
    /// Create a bus and hand back the consumer end.
    pub fn new() -> (Self, UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget post. A closed consumer is logged and dropped;
    /// the command was still accepted for processing as far as the
    /// caller is concerned.
    pub fn post(&self, event: AppEvent) {
        if let Err(err) = self.tx.send(event) {
            warn!(kind = err.0.kind(), "event bus closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmaster_common::ids::{ApplicationId, JobId};

    #[test]
    fn posted_events_arrive_in_order() {
        let (bus, mut rx) = EventBus::new();
        let job = JobId::new(ApplicationId::new(1, 1), 1);

        bus.post(AppEvent::JobDiagnosticsUpdate {
            job,
            diagnostic: "kill requested".to_string(),
        });
        bus.post(AppEvent::JobKill { job });

        assert!(matches!(
            rx.try_recv().unwrap(),
            AppEvent::JobDiagnosticsUpdate { .. }
        ));
        assert!(matches!(rx.try_recv().unwrap(), AppEvent::JobKill { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn post_with_closed_consumer_does_not_panic() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        bus.post(AppEvent::JobKill {
            job: JobId::new(ApplicationId::new(1, 1), 1),
        });
    }
}
