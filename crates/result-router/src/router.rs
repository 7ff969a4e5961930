//! Result router

use crate::message::{parse_message, ControlKind, Inbound};
use crate::{DetectionResult, ObserverError, RouterError};
use serde::Serialize;
use tracing::{debug, warn};

/// Correlates inbound results with outstanding submissions
pub trait FrameLedger {
    /// Settle `frame_id`. Returns `false` if the id was never submitted by the
    /// current session (or has already been settled).
    fn resolve(&mut self, frame_id: u64) -> bool;
}

/// Passive consumer of every valid result (statistics views and the like)
pub trait ResultObserver: Send {
    fn name(&self) -> &str;

    fn observe(&mut self, result: &DetectionResult) -> Result<(), ObserverError>;
}

/// Outcome of routing one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Control frame, nothing to do
    Control(ControlKind),
    /// Accident result, to be handed to the deduplicator
    Accident(DetectionResult),
    /// Normal result
    Normal(DetectionResult),
    /// Result for a frame id the current session does not know
    Stale(u64),
    /// Message that could not be routed
    Rejected(RouterError),
}

/// Routing counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub results: u64,
    pub accidents: u64,
    pub control: u64,
    pub stale: u64,
    pub rejected: u64,
}

/// Classifies inbound messages and fans results out to observers
#[derive(Default)]
pub struct ResultRouter {
    observers: Vec<Box<dyn ResultObserver>>,
    stats: RouterStats,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a passive observer
    pub fn add_observer(&mut self, observer: Box<dyn ResultObserver>) {
        self.observers.push(observer);
    }

    /// Routing counters so far
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Route one inbound message. Never fails; problems come back as
    /// [`Routed::Rejected`] or [`Routed::Stale`].
    pub fn route(&mut self, text: &str, ledger: &mut dyn FrameLedger) -> Routed {
        let result = match parse_message(text) {
            Ok(Inbound::Control(kind)) => {
                self.stats.control += 1;
                debug!("Control message: {:?}", kind);
                return Routed::Control(kind);
            }
            Ok(Inbound::Result(result)) => result,
            Err(e) => {
                self.stats.rejected += 1;
                warn!("Discarding inbound message: {}", e);
                return Routed::Rejected(e);
            }
        };

        if !ledger.resolve(result.frame_id()) {
            self.stats.stale += 1;
            warn!("Dropping result for unknown frame {}", result.frame_id());
            return Routed::Stale(result.frame_id());
        }

        self.stats.results += 1;
        self.notify_observers(&result);

        if result.accident_detected() {
            self.stats.accidents += 1;
            Routed::Accident(result)
        } else {
            Routed::Normal(result)
        }
    }

    fn notify_observers(&mut self, result: &DetectionResult) {
        for observer in self.observers.iter_mut() {
            if let Err(e) = observer.observe(result) {
                warn!("Observer {} failed: {}", observer.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Outstanding(HashSet<u64>);

    impl FrameLedger for Outstanding {
        fn resolve(&mut self, frame_id: u64) -> bool {
            self.0.remove(&frame_id)
        }
    }

    struct Failing;

    impl ResultObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn observe(&mut self, _result: &DetectionResult) -> Result<(), ObserverError> {
            Err(ObserverError("view unavailable".to_string()))
        }
    }

    fn result_json(frame_id: u64, accident: bool) -> String {
        serde_json::json!({
            "accidentDetected": accident,
            "confidence": 0.9,
            "frameId": frame_id,
            "predictedClass": if accident { "accident" } else { "normal" },
            "processingTimeSeconds": 0.2
        })
        .to_string()
    }

    #[test]
    fn test_routes_accident_and_normal() {
        let mut router = ResultRouter::new();
        let mut ledger = Outstanding([1, 2].into_iter().collect());

        assert!(matches!(router.route(&result_json(1, true), &mut ledger), Routed::Accident(_)));
        assert!(matches!(router.route(&result_json(2, false), &mut ledger), Routed::Normal(_)));
        assert_eq!(router.stats().results, 2);
        assert_eq!(router.stats().accidents, 1);
    }

    #[test]
    fn test_stale_frame_is_dropped() {
        let mut router = ResultRouter::new();
        let mut ledger = Outstanding([1].into_iter().collect());

        assert_eq!(router.route(&result_json(99, true), &mut ledger), Routed::Stale(99));
        assert_eq!(router.stats().accidents, 0);
        assert_eq!(router.stats().stale, 1);
    }

    #[test]
    fn test_duplicate_result_is_stale() {
        let mut router = ResultRouter::new();
        let mut ledger = Outstanding([5].into_iter().collect());

        assert!(matches!(router.route(&result_json(5, true), &mut ledger), Routed::Accident(_)));
        assert_eq!(router.route(&result_json(5, true), &mut ledger), Routed::Stale(5));
    }

    #[test]
    fn test_control_and_malformed_do_not_touch_ledger() {
        let mut router = ResultRouter::new();
        let mut ledger = Outstanding::default();

        assert_eq!(
            router.route(r#"{"type":"ping"}"#, &mut ledger),
            Routed::Control(ControlKind::Ping)
        );
        assert!(matches!(router.route("{oops", &mut ledger), Routed::Rejected(_)));
        assert_eq!(router.stats().control, 1);
        assert_eq!(router.stats().rejected, 1);
    }

    #[test]
    fn test_observer_failure_does_not_block_accident() {
        let mut router = ResultRouter::new();
        router.add_observer(Box::new(Failing));
        let tally = crate::SharedTally::default();
        router.add_observer(Box::new(tally.clone()));
        let mut ledger = Outstanding([3].into_iter().collect());

        assert!(matches!(router.route(&result_json(3, true), &mut ledger), Routed::Accident(_)));
        assert_eq!(tally.snapshot().total, 1);
    }
}
