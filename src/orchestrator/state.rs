//! Per-run state shared between the orchestrator and its phase runner.

use chrono::{DateTime, Utc};
use merge_common::{RunSnapshot, RunStatus};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::events::{EventBus, RunEvent};

/// Delivery state for one run's events.
#[derive(Default)]
struct Gate {
    /// `true` once a terminal status has been claimed.
    sealed: bool,
    /// Some thread is currently handing queued events to observers.
    draining: bool,
    pending: VecDeque<RunEvent>,
}

/// Mutable record of one run plus the gate that orders its events.
///
/// Events are queued under the gate and delivered with no lock held, one at
/// a time in queue order. An event raised while another is being delivered
/// (including from inside an observer) is queued behind it. Once the run is
/// sealed only its terminal event is accepted, so nothing for the run can be
/// observed after that event.
pub(crate) struct RunCell {
    run: Mutex<RunSnapshot>,
    gate: Mutex<Gate>,
}

impl RunCell {
    pub(crate) fn new(run: RunSnapshot) -> Self {
        Self {
            run: Mutex::new(run),
            gate: Mutex::new(Gate::default()),
        }
    }

    fn run(&self) -> MutexGuard<'_, RunSnapshot> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn snapshot(&self) -> RunSnapshot {
        self.run().clone()
    }

    pub(crate) fn id(&self) -> String {
        self.run().id.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.run().is_active()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RunSnapshot) -> R) -> R {
        f(&mut self.run())
    }

    /// Deliver a run-scoped event unless the run has already been sealed.
    ///
    /// Returns `false` when the event was dropped. The check is atomic with
    /// [`RunCell::terminate`].
    pub(crate) fn publish(&self, events: &EventBus, event: &RunEvent) -> bool {
        self.enqueue(events, event.clone(), false)
    }

    /// Deliver the terminal event. Only the caller that won `terminate` may
    /// use this.
    pub(crate) fn publish_terminal(&self, events: &EventBus, event: RunEvent) {
        self.enqueue(events, event, true);
    }

    fn enqueue(&self, events: &EventBus, event: RunEvent, terminal: bool) -> bool {
        let mut gate = self.gate();
        if gate.sealed && !terminal {
            tracing::debug!(
                event = event.kind(),
                run_id = event.run_id(),
                "dropping event for terminated run"
            );
            return false;
        }
        gate.pending.push_back(event);
        if gate.draining {
            return true;
        }
        gate.draining = true;
        drop(gate);

        self.drain(events);
        true
    }

    fn drain(&self, events: &EventBus) {
        loop {
            let event = {
                let mut gate = self.gate();
                match gate.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        gate.draining = false;
                        return;
                    }
                }
            };
            events.publish(&event);
        }
    }

    /// Claim the terminal transition. Only the first caller wins; it gets the
    /// finished snapshot and is responsible for the terminal event.
    pub(crate) fn terminate(
        &self,
        status: RunStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Option<RunSnapshot> {
        let mut gate = self.gate();
        if gate.sealed {
            return None;
        }
        gate.sealed = true;

        let mut run = self.run();
        if error.is_some() {
            run.error = error;
        }
        run.finish(status, at);
        Some(run.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use merge_common::Direction;
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter(std::sync::atomic::AtomicUsize);

    impl crate::events::RunObserver for Counter {
        fn on_event(&self, _event: &RunEvent) -> Result<()> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn cell() -> RunCell {
        RunCell::new(RunSnapshot::start(Direction::MasterToRelease, 2, Utc::now()))
    }

    fn event(cell: &RunCell) -> RunEvent {
        RunEvent::PhaseStarted {
            run_id: cell.id(),
            phase: 1,
            repositories: vec!["a".into()],
            parallel: false,
        }
    }

    #[test]
    fn test_terminate_only_once() {
        let cell = cell();
        let first = cell.terminate(RunStatus::Cancelled, None, Utc::now());
        let second = cell.terminate(RunStatus::Completed, None, Utc::now());

        assert_eq!(first.map(|r| r.status), Some(RunStatus::Cancelled));
        assert!(second.is_none());
        assert_eq!(cell.snapshot().status, RunStatus::Cancelled);
        assert!(!cell.is_running());
    }

    #[test]
    fn test_terminate_records_error() {
        let cell = cell();
        let run = cell
            .terminate(RunStatus::Failed, Some("boom".into()), Utc::now())
            .unwrap();
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert!(run.duration_seconds.is_some());
    }

    #[test]
    fn test_publish_suppressed_after_seal() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter::default());
        bus.subscribe(counter.clone());
        let cell = cell();

        assert!(cell.publish(&bus, &event(&cell)));
        cell.terminate(RunStatus::Cancelled, None, Utc::now());
        assert!(!cell.publish(&bus, &event(&cell)));

        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct Kinds(Mutex<Vec<&'static str>>);

    impl crate::events::RunObserver for Kinds {
        fn on_event(&self, event: &RunEvent) -> Result<()> {
            self.0.lock().unwrap().push(event.kind());
            Ok(())
        }
    }

    /// Seals the run from inside a delivery, the way an abort policy would.
    struct SealOnPhaseStart {
        cell: Arc<RunCell>,
        bus: std::sync::OnceLock<std::sync::Weak<EventBus>>,
    }

    impl crate::events::RunObserver for SealOnPhaseStart {
        fn on_event(&self, event: &RunEvent) -> Result<()> {
            if let RunEvent::PhaseStarted { run_id, .. } = event
                && let Some(bus) = self.bus.get().and_then(|weak| weak.upgrade())
                && let Some(run) = self.cell.terminate(RunStatus::Cancelled, None, Utc::now())
            {
                // Raised mid-delivery; must queue rather than block.
                assert!(!self.cell.publish(&bus, event));
                self.cell.publish_terminal(
                    &bus,
                    RunEvent::RunCancelled {
                        run_id: run_id.clone(),
                        direction: run.direction,
                        duration_seconds: 0,
                    },
                );
            }
            Ok(())
        }
    }

    #[test]
    fn test_observer_may_seal_during_delivery() {
        let cell = Arc::new(cell());
        let bus = Arc::new(EventBus::new());
        let sealer = Arc::new(SealOnPhaseStart {
            cell: Arc::clone(&cell),
            bus: std::sync::OnceLock::new(),
        });
        let _ = sealer.bus.set(Arc::downgrade(&bus));
        let kinds = Arc::new(Kinds::default());
        bus.subscribe(sealer);
        bus.subscribe(kinds.clone());

        assert!(cell.publish(&bus, &event(&cell)));

        // The event in flight reaches every observer before the terminal one.
        assert_eq!(
            *kinds.0.lock().unwrap(),
            vec!["phase_started", "run_cancelled"]
        );
        assert!(!cell.is_running());
        assert!(!cell.publish(&bus, &event(&cell)));
        assert_eq!(kinds.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_terminal_event_follows_earlier_events() {
        let bus = EventBus::new();
        let kinds = Arc::new(Kinds::default());
        bus.subscribe(kinds.clone());
        let cell = cell();

        cell.publish(&bus, &event(&cell));
        let run = cell
            .terminate(RunStatus::Completed, None, Utc::now())
            .unwrap();
        cell.publish_terminal(
            &bus,
            RunEvent::RunCompleted {
                run_id: run.id.clone(),
                direction: run.direction,
                outcomes: Vec::new(),
                duration_seconds: 0,
            },
        );

        assert_eq!(
            *kinds.0.lock().unwrap(),
            vec!["phase_started", "run_completed"]
        );
    }

    #[test]
    fn test_update_mutates_record() {
        let cell = cell();
        cell.update(|run| run.current_phase = 2);
        assert_eq!(cell.snapshot().current_phase, 2);
    }
}
