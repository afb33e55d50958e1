//! Lazily evaluated delayed actions (start, rematch, return to lobby).
//!
//! A pending action carries an absolute deadline and is applied by the first
//! mutation that observes `now >= execute_at`. There is no background timer.

use thiserror::Error;
use tracing::{info, warn};

use crate::state::{
    room::{ActorIdentity, CancelReason, PendingAction, PendingActionKind, RoomDraft, RoomEventKind},
    scoring::generate_rounds,
    state_machine::{PhaseEvent, apply_transition},
};

/// Bounds applied to client-supplied delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    /// Lower bound.
    pub min_ms: i64,
    /// Upper bound.
    pub max_ms: i64,
    /// Used when the client does not send a delay.
    pub default_ms: i64,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            min_ms: 2_000,
            max_ms: 10_000,
            default_ms: 3_000,
        }
    }
}

impl DelayPolicy {
    /// Clamp a requested delay into `[min_ms, max_ms]`.
    pub fn clamp(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.default_ms)
            .clamp(self.min_ms, self.max_ms)
    }
}

/// Reasons a new action cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Another action is already waiting.
    #[error("another action is already pending")]
    ActionPending,
    /// The room's status does not allow the action.
    #[error("{0} is not allowed right now")]
    InvalidState(&'static str),
}

/// Record a pending action. Fails if one exists or the status forbids it.
pub fn schedule(
    draft: &mut RoomDraft,
    kind: PendingActionKind,
    initiator: ActorIdentity,
    delay_ms: i64,
    label: Option<String>,
) -> Result<PendingAction, ScheduleError> {
    if draft.room().pending_action.is_some() {
        return Err(ScheduleError::ActionPending);
    }
    if !kind.precondition_holds(draft.room().status) {
        return Err(ScheduleError::InvalidState(kind.as_str()));
    }

    let action = PendingAction {
        kind,
        execute_at: draft.now + delay_ms,
        delay_ms,
        initiator,
        label: label.unwrap_or_else(|| kind.default_label().to_owned()),
    };
    info!(
        room_id = %draft.room().id,
        action = kind.as_str(),
        execute_at = action.execute_at,
        "pending action scheduled"
    );
    draft.room_mut().pending_action = Some(action.clone());
    Ok(action)
}

/// Drop the pending action, logging why. Returns the dropped action, if any.
pub fn cancel(draft: &mut RoomDraft, reason: CancelReason) -> Option<PendingAction> {
    let action = draft.room_mut().pending_action.take()?;
    info!(
        room_id = %draft.room().id,
        action = action.kind.as_str(),
        reason = reason.as_str(),
        "pending action cancelled"
    );
    draft.log(RoomEventKind::ActionCancelled {
        action: action.kind,
        reason,
    });
    Some(action)
}

/// Outcome of evaluating the pending action against the current time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No action, or its deadline has not passed.
    Idle,
    /// The action ran.
    Applied(PendingActionKind),
    /// The action was dropped without effect.
    Discarded(PendingActionKind, CancelReason),
}

/// Apply the pending action once its deadline has passed.
///
/// The precondition is re-checked at execution time; an action whose status no
/// longer matches, or whose deck has no questions, is discarded.
pub fn run_due(draft: &mut RoomDraft) -> Dispatch {
    let due = draft
        .room()
        .pending_action
        .as_ref()
        .is_some_and(|action| draft.now >= action.execute_at);
    if !due {
        return Dispatch::Idle;
    }
    let Some(action) = draft.room_mut().pending_action.take() else {
        return Dispatch::Idle;
    };
    let kind = action.kind;

    if !kind.precondition_holds(draft.room().status) {
        return discard(draft, kind, CancelReason::InvalidState);
    }

    match kind {
        PendingActionKind::Start | PendingActionKind::Rematch => {
            let pool = draft.question_pool.take().unwrap_or_default();
            if pool.is_empty() {
                return discard(draft, kind, CancelReason::NoQuestions);
            }

            draft.aggregate.clear_match();
            let requested = draft.room().rules.rounds;
            let rounds = generate_rounds(&pool, requested, &mut rand::rng());
            draft.room_mut().total_rounds = rounds.len() as u32;
            draft.aggregate.rounds = rounds;
            if let Err(err) = apply_transition(draft, PhaseEvent::BeginMatch) {
                warn!(room_id = %draft.room().id, error = %err, "pending action could not begin match");
                return discard(draft, kind, CancelReason::InvalidState);
            }
        }
        PendingActionKind::ToLobby => {
            if let Err(err) = apply_transition(draft, PhaseEvent::ReturnToLobby) {
                warn!(room_id = %draft.room().id, error = %err, "pending action could not return to lobby");
                return discard(draft, kind, CancelReason::InvalidState);
            }
            draft.aggregate.clear_match();
            for participant in draft.aggregate.participants.values_mut() {
                participant.is_ready = false;
            }
        }
    }

    info!(
        room_id = %draft.room().id,
        action = kind.as_str(),
        status = %draft.room().status,
        "pending action applied"
    );
    Dispatch::Applied(kind)
}

fn discard(draft: &mut RoomDraft, kind: PendingActionKind, reason: CancelReason) -> Dispatch {
    warn!(
        room_id = %draft.room().id,
        action = kind.as_str(),
        reason = reason.as_str(),
        "pending action discarded"
    );
    draft.log(RoomEventKind::ActionCancelled {
        action: kind,
        reason,
    });
    Dispatch::Discarded(kind, reason)
}
