//! C8: StepOrchestrator — drives one simulator-step cycle and owns
//! ordering/backpressure across C1-C7, per §4.8.
//!
//! Grounded on `taos.im.neurons.validator`'s per-step call ordering
//! (`forward → update_scores → save_state → report`) and on the anti-pattern
//! called out in §9: the source gates the next step on a `save_state`
//! boolean flag racing against detached workers. This rendition always
//! signals worker completion through a `tokio::sync::oneshot` per step
//! (§9, §10.2), never a boolean spin-wait.

use tokio::sync::oneshot;
use tracing::debug;

use crate::model::Instruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    Received,
    FannedOut,
    Validated,
    Delayed,
    Responded,
}

/// One `oneshot::Sender` per post-response worker (§4.8), fired on
/// completion rather than polled via a boolean flag.
pub struct WorkerHandles {
    pub scoring: oneshot::Sender<()>,
    pub history: oneshot::Sender<()>,
    pub saving: oneshot::Sender<()>,
    pub reporting: oneshot::Sender<()>,
}

/// The orchestrator's non-blocking view onto the four prior-step workers.
/// `all_resolved` is checked with `try_recv`, never an `.await`.
pub struct WorkerGuards {
    scoring: Option<oneshot::Receiver<()>>,
    history: Option<oneshot::Receiver<()>>,
    saving: Option<oneshot::Receiver<()>>,
    reporting: Option<oneshot::Receiver<()>>,
}

/// Build a fresh handle/guard pair for the four post-response workers
/// launched once a step reaches `RESPONDED`.
pub fn spawn_worker_guards() -> (WorkerHandles, WorkerGuards) {
    let (scoring_tx, scoring_rx) = oneshot::channel();
    let (history_tx, history_rx) = oneshot::channel();
    let (saving_tx, saving_rx) = oneshot::channel();
    let (reporting_tx, reporting_rx) = oneshot::channel();

    (
        WorkerHandles {
            scoring: scoring_tx,
            history: history_tx,
            saving: saving_tx,
            reporting: reporting_tx,
        },
        WorkerGuards {
            scoring: Some(scoring_rx),
            history: Some(history_rx),
            saving: Some(saving_rx),
            reporting: Some(reporting_rx),
        },
    )
}

fn resolved(slot: &mut Option<oneshot::Receiver<()>>) -> bool {
    let Some(rx) = slot else { return true };
    match rx.try_recv() {
        Ok(()) => {
            *slot = None;
            true
        }
        Err(oneshot::error::TryRecvError::Closed) => {
            // Sender dropped without firing (e.g. its worker panicked):
            // best-effort workers never stall the step cycle beyond their
            // own guard (§4.8, §7).
            *slot = None;
            true
        }
        Err(oneshot::error::TryRecvError::Empty) => false,
    }
}

impl WorkerGuards {
    /// Non-blocking check: have SCORING, HISTORY, SAVING, and REPORTING all
    /// resolved from the prior step? Uses `try_recv`, never `.await`.
    pub fn all_resolved(&mut self) -> bool {
        let scoring = resolved(&mut self.scoring);
        let history = resolved(&mut self.history);
        let saving = resolved(&mut self.saving);
        let reporting = resolved(&mut self.reporting);
        scoring && history && saving && reporting
    }
}

/// Drives the `IDLE → RECEIVED → FANNED_OUT → VALIDATED → DELAYED →
/// RESPONDED → IDLE` cycle for one validator instance. Post-response work
/// (SCORING/HISTORY/SAVING/REPORTING) runs off this state machine, gating
/// only the *next* `RECEIVED` transition.
pub struct StepOrchestrator {
    phase: StepPhase,
    prior_guards: Option<WorkerGuards>,
}

impl Default for StepOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl StepOrchestrator {
    pub fn new() -> Self {
        Self {
            phase: StepPhase::Idle,
            prior_guards: None,
        }
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Attempt the `IDLE`/post-step → `RECEIVED` transition. Returns `false`
    /// without mutating state while any prior-step worker is still running.
    pub fn try_begin_received(&mut self) -> bool {
        if let Some(guards) = &mut self.prior_guards {
            if !guards.all_resolved() {
                debug!("RECEIVED blocked on prior-step workers");
                return false;
            }
            self.prior_guards = None;
        }
        self.phase = StepPhase::Received;
        true
    }

    pub fn advance(&mut self, phase: StepPhase) {
        self.phase = phase;
    }

    /// Called once a step reaches `RESPONDED`: hands off to the four
    /// post-response workers and returns to `IDLE` for the next step, gated
    /// by `guards` on the *following* `try_begin_received`.
    pub fn finish_step(&mut self, guards: WorkerGuards) {
        self.prior_guards = Some(guards);
        self.phase = StepPhase::Idle;
    }
}

/// Prepend deregistration-reset instructions ahead of the validated,
/// delay-assigned batch (§4.8 invariant).
pub fn build_merged_batch(
    deregistration_resets: Vec<Instruction>,
    mut validated: Vec<Instruction>,
) -> Vec<Instruction> {
    let mut batch = deregistration_resets;
    batch.append(&mut validated);
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstructionKind;

    fn reset(agent_ids: Vec<u32>) -> Instruction {
        Instruction {
            agent_id: 0,
            delay: 0,
            kind: InstructionKind::ResetAgent { agent_ids },
        }
    }

    #[test]
    fn received_is_blocked_until_prior_workers_resolve() {
        let mut orchestrator = StepOrchestrator::new();
        assert!(orchestrator.try_begin_received());
        orchestrator.advance(StepPhase::Responded);

        let (handles, guards) = spawn_worker_guards();
        orchestrator.finish_step(guards);
        assert_eq!(orchestrator.phase(), StepPhase::Idle);

        assert!(!orchestrator.try_begin_received());

        handles.scoring.send(()).unwrap();
        handles.history.send(()).unwrap();
        handles.saving.send(()).unwrap();
        handles.reporting.send(()).unwrap();

        assert!(orchestrator.try_begin_received());
        assert_eq!(orchestrator.phase(), StepPhase::Received);
    }

    #[test]
    fn dropped_worker_handle_does_not_stall_forever() {
        let mut orchestrator = StepOrchestrator::new();
        let (handles, guards) = spawn_worker_guards();
        orchestrator.finish_step(guards);

        handles.scoring.send(()).unwrap();
        handles.history.send(()).unwrap();
        handles.saving.send(()).unwrap();
        drop(handles.reporting); // worker crashed before firing

        assert!(orchestrator.try_begin_received());
    }

    #[test]
    fn deregistration_resets_are_prepended() {
        let resets = vec![reset(vec![3])];
        let rest = vec![reset(vec![4])];
        let batch = build_merged_batch(resets, rest);
        assert_eq!(
            batch[0].kind,
            InstructionKind::ResetAgent { agent_ids: vec![3] }
        );
    }
}
