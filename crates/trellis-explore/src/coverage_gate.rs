use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use trellis_ir::{CoverageUpdate, TracePosition};

/// Outcome of waiting on the coverage feed for one interaction.
#[derive(Debug)]
pub enum GateOutcome {
    Ready(CoverageUpdate),
    /// The feed never reported readiness in time; the engine proceeds with
    /// an empty update (degraded mode).
    TimedOut(CoverageUpdate),
}

impl GateOutcome {
    pub fn into_update(self) -> CoverageUpdate {
        match self {
            GateOutcome::Ready(u) | GateOutcome::TimedOut(u) => u,
        }
    }
}

/// Bounded wait on the external coverage-instrumentation feed.
///
/// The wait always terminates: a feed that dies or falls behind degrades
/// the batch to "no coverage observed" instead of stalling it.
pub struct CoverageGate {
    rx: Receiver<CoverageUpdate>,
}

impl CoverageGate {
    /// Create a gate and the sender half handed to the coverage feed.
    pub fn new(capacity: usize) -> (Sender<CoverageUpdate>, Self) {
        let (tx, rx) = bounded(capacity);
        (tx, Self { rx })
    }

    /// Wait until the feed marks itself ready for `position`, up to
    /// `timeout`. Updates for earlier interactions are drained and dropped.
    pub fn wait_ready(&self, position: TracePosition, timeout: Duration) -> GateOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(update) => {
                    if update.ready && update.position == Some(position) {
                        return GateOutcome::Ready(update);
                    }
                    // Stale or partial update; keep draining.
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::warn!(
            trace = position.trace_id,
            index = position.index,
            "coverage feed not ready in time; proceeding without coverage"
        );
        GateOutcome::TimedOut(CoverageUpdate::absent(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pos(index: usize) -> TracePosition {
        TracePosition { trace_id: 1, index }
    }

    #[test]
    fn ready_update_passes_through() {
        let (tx, gate) = CoverageGate::new(4);
        let update = CoverageUpdate {
            position: Some(pos(0)),
            methods: HashSet::from([42]),
            ready: true,
            ..CoverageUpdate::default()
        };
        tx.send(update).unwrap();
        match gate.wait_ready(pos(0), Duration::from_millis(100)) {
            GateOutcome::Ready(u) => assert!(u.methods.contains(&42)),
            GateOutcome::TimedOut(_) => panic!("expected ready"),
        }
    }

    #[test]
    fn stale_updates_are_drained() {
        let (tx, gate) = CoverageGate::new(4);
        tx.send(CoverageUpdate {
            position: Some(pos(0)),
            ready: true,
            ..CoverageUpdate::default()
        })
        .unwrap();
        tx.send(CoverageUpdate {
            position: Some(pos(1)),
            ready: true,
            ..CoverageUpdate::default()
        })
        .unwrap();
        assert!(matches!(
            gate.wait_ready(pos(1), Duration::from_millis(100)),
            GateOutcome::Ready(_)
        ));
    }

    #[test]
    fn missing_feed_times_out_with_empty_update() {
        let (_tx, gate) = CoverageGate::new(1);
        match gate.wait_ready(pos(3), Duration::from_millis(10)) {
            GateOutcome::TimedOut(u) => {
                assert!(u.is_empty());
                assert!(!u.ready);
            }
            GateOutcome::Ready(_) => panic!("expected timeout"),
        }
    }

    #[test]
    fn disconnected_feed_degrades() {
        let (tx, gate) = CoverageGate::new(1);
        drop(tx);
        assert!(matches!(
            gate.wait_ready(pos(0), Duration::from_millis(50)),
            GateOutcome::TimedOut(_)
        ));
    }
}
