//! Cooperative pause/terminate signalling between a scheduler and the engine.
//!
//! The engine polls [`Scheduler::check_pause`] once per scan point, before any
//! hardware work for that point. When it returns true the engine saves its
//! checkpoint, leaves the loop and calls [`Scheduler::pause`], which blocks
//! until the run is resumed or terminated.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

/// How a pause ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// Continue from the saved checkpoint
    Resumed,
    /// Stop the current sub-sequence
    Terminated,
}

/// Source of pause and terminate requests.
#[async_trait]
pub trait Scheduler: Send {
    /// Non-blocking: whether the engine should yield at this point
    fn check_pause(&mut self) -> bool;

    /// Block until the run may resume or must terminate
    async fn pause(&mut self) -> PauseOutcome;
}

/// Scheduler that never pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

#[async_trait]
impl Scheduler for Unattended {
    fn check_pause(&mut self) -> bool {
        false
    }

    async fn pause(&mut self) -> PauseOutcome {
        PauseOutcome::Resumed
    }
}

// =============================================================================
// ControlledScheduler - driven from another task
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Run,
    Pause,
    Terminate,
}

/// Handle used by an operator (CLI, signal handler, another task) to pause,
/// resume or terminate a running scan.
#[derive(Debug, Clone)]
pub struct PauseController {
    tx: Arc<watch::Sender<ControlSignal>>,
}

impl PauseController {
    /// Create a controller and the scheduler it drives
    pub fn new() -> (Self, ControlledScheduler) {
        let (tx, rx) = watch::channel(ControlSignal::Run);
        (Self { tx: Arc::new(tx) }, ControlledScheduler { rx })
    }

    /// Ask the engine to yield at its next scan point
    pub fn request_pause(&self) {
        self.tx.send_replace(ControlSignal::Pause);
    }

    /// Let a paused engine continue
    pub fn resume(&self) {
        self.tx.send_replace(ControlSignal::Run);
    }

    /// Terminate the current sub-sequence
    pub fn terminate(&self) {
        self.tx.send_replace(ControlSignal::Terminate);
    }
}

/// Scheduler fed by a [`PauseController`].
#[derive(Debug)]
pub struct ControlledScheduler {
    rx: watch::Receiver<ControlSignal>,
}

#[async_trait]
impl Scheduler for ControlledScheduler {
    fn check_pause(&mut self) -> bool {
        let signal = *self.rx.borrow();
        match signal {
            ControlSignal::Run => false,
            ControlSignal::Pause => true,
            // a terminate already served by `pause` stays consumed until re-sent
            ControlSignal::Terminate => self.rx.has_changed().unwrap_or(false),
        }
    }

    async fn pause(&mut self) -> PauseOutcome {
        loop {
            let signal = *self.rx.borrow_and_update();
            match signal {
                ControlSignal::Run => return PauseOutcome::Resumed,
                ControlSignal::Terminate => return PauseOutcome::Terminated,
                ControlSignal::Pause => {}
            }
            if self.rx.changed().await.is_err() {
                // controller dropped while paused
                return PauseOutcome::Terminated;
            }
        }
    }
}

// =============================================================================
// ScriptedScheduler - deterministic pauses for tests and simulation
// =============================================================================

/// Scheduler that pauses at fixed poll numbers and answers with queued outcomes.
///
/// Poll numbers count every [`Scheduler::check_pause`] call from zero, across
/// sub-sequences. Once the queue is empty every pause resumes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedScheduler {
    polls: usize,
    pause_at: BTreeSet<usize>,
    outcomes: VecDeque<PauseOutcome>,
    pauses: usize,
}

impl ScriptedScheduler {
    /// Scheduler that never pauses until configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause at poll number `poll`
    pub fn pause_at(mut self, poll: usize) -> Self {
        self.pause_at.insert(poll);
        self
    }

    /// Queue the outcome of the next pause
    pub fn then(mut self, outcome: PauseOutcome) -> Self {
        self.outcomes.push_back(outcome);
        self
    }

    /// Number of polls so far
    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Number of pauses served so far
    pub fn pauses(&self) -> usize {
        self.pauses
    }
}

#[async_trait]
impl Scheduler for ScriptedScheduler {
    fn check_pause(&mut self) -> bool {
        let poll = self.polls;
        self.polls += 1;
        self.pause_at.contains(&poll)
    }

    async fn pause(&mut self) -> PauseOutcome {
        self.pauses += 1;
        self.outcomes.pop_front().unwrap_or(PauseOutcome::Resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_scripted_pauses() {
        let mut scheduler = ScriptedScheduler::new()
            .pause_at(1)
            .then(PauseOutcome::Terminated);
        assert!(!scheduler.check_pause());
        assert!(scheduler.check_pause());
        assert_eq!(scheduler.pause().await, PauseOutcome::Terminated);
        assert!(!scheduler.check_pause());
        assert_eq!(scheduler.pause().await, PauseOutcome::Resumed);
        assert_eq!(scheduler.pauses(), 2);
    }

    #[tokio::test]
    async fn test_controller_pause_then_resume() {
        let (controller, mut scheduler) = PauseController::new();
        assert!(!scheduler.check_pause());

        controller.request_pause();
        assert!(scheduler.check_pause());

        let waiter = tokio::spawn(async move { scheduler.pause().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.resume();

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PauseOutcome::Resumed);
    }

    #[tokio::test]
    async fn test_terminate_while_running() {
        let (controller, mut scheduler) = PauseController::new();
        controller.terminate();
        assert!(scheduler.check_pause());
        assert_eq!(scheduler.pause().await, PauseOutcome::Terminated);
        // applies to one sub-sequence only
        assert!(!scheduler.check_pause());
    }

    #[tokio::test]
    async fn test_dropped_controller_terminates() {
        let (controller, mut scheduler) = PauseController::new();
        controller.request_pause();
        drop(controller);
        assert_eq!(scheduler.pause().await, PauseOutcome::Terminated);
    }
}
