//! Liveness and host failover, recomputed from heartbeat timestamps on every
//! mutation. Nothing here is scheduled: the caller's request is the trigger.

use tracing::{info, warn};

use crate::state::{
    room::{ActorIdentity, CancelReason, RoomDraft, RoomEventKind, RoomStatus},
    scheduler,
    state_machine::{PhaseEvent, apply_transition},
};

/// Timeouts that decide when a participant counts as gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// A participant is connected iff its last heartbeat is at most this old.
    pub connected_timeout_ms: i64,
    /// A participant silent for longer than this is soft-removed.
    pub offline_grace_ms: i64,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            connected_timeout_ms: 30_000,
            offline_grace_ms: 120_000,
        }
    }
}

/// First step of every mutation: refresh liveness, settle membership, then run
/// an overdue pending action.
pub fn reconcile(draft: &mut RoomDraft, policy: &LivenessPolicy) {
    refresh_liveness(draft, policy);
    settle_membership(draft);
    scheduler::run_due(draft);
}

/// Stamp disconnections and soft-remove participants past the grace window.
///
/// The grace window counts from the last heartbeat, so a host silent for longer
/// than `offline_grace_ms` is removed by the first call that notices.
pub fn refresh_liveness(draft: &mut RoomDraft, policy: &LivenessPolicy) {
    let now = draft.now;
    let room_id = draft.room().id;

    for participant in draft.aggregate.participants.values_mut() {
        if !participant.is_active() {
            continue;
        }

        if participant.is_connected(now, policy.connected_timeout_ms) {
            participant.disconnected_at = None;
            continue;
        }

        if participant.disconnected_at.is_none() {
            participant.disconnected_at = Some(now);
            participant.is_ready = false;
        }

        if now - participant.last_seen_at > policy.offline_grace_ms {
            participant.removed_at = Some(now);
            participant.is_host = false;
            participant.is_ready = false;
            info!(
                room_id = %room_id,
                participant_id = %participant.id,
                "participant removed after offline grace period"
            );
        }
    }
}

/// Keep the host invariant after membership changes: reset an emptied room to
/// the lobby, elect a new host when the recorded one is gone, and align the
/// `is_host` flags with the room's host.
pub fn settle_membership(draft: &mut RoomDraft) {
    if draft.aggregate.active_count() == 0 {
        reset_empty_room(draft);
    } else if !host_is_active(draft) {
        elect_host(draft);
    }

    let host = draft.room().host.clone();
    for participant in draft.aggregate.participants.values_mut() {
        participant.is_host =
            participant.is_active() && host.as_ref() == Some(&participant.identity);
    }
}

fn host_is_active(draft: &RoomDraft) -> bool {
    let Some(host) = draft.room().host.as_ref() else {
        return false;
    };
    draft
        .aggregate
        .active_participants()
        .any(|participant| &participant.identity == host)
}

fn reset_empty_room(draft: &mut RoomDraft) {
    let room = draft.room();
    let untouched = room.status == RoomStatus::Lobby
        && room.pending_action.is_none()
        && room.phase_ends_at.is_none();
    if untouched {
        return;
    }

    let previous = room.status;
    scheduler::cancel(draft, CancelReason::RoomEmpty);
    if let Err(err) = apply_transition(draft, PhaseEvent::Abandon) {
        warn!(room_id = %draft.room().id, error = %err, "empty room could not be abandoned");
    }
    draft.aggregate.clear_match();
    info!(
        room_id = %draft.room().id,
        previous = %previous,
        "room emptied; reset to lobby"
    );
}

/// Prefer the earliest-joined participant with a durable user id, else the
/// earliest-joined participant.
fn elect_host(draft: &mut RoomDraft) {
    let candidate = draft
        .aggregate
        .active_participants()
        .filter(|participant| participant.identity.is_durable())
        .min_by_key(|participant| participant.joined_at)
        .or_else(|| {
            draft
                .aggregate
                .active_participants()
                .min_by_key(|participant| participant.joined_at)
        })
        .map(|participant| participant.identity.clone());

    let Some(next) = candidate else {
        return;
    };

    let previous: Option<ActorIdentity> = draft.room_mut().host.replace(next.clone());
    info!(
        room_id = %draft.room().id,
        previous = ?previous.as_ref().map(ToString::to_string),
        next = %next,
        "host transferred"
    );
    draft.log(RoomEventKind::HostTransferred { previous, next });
    scheduler::cancel(draft, CancelReason::HostLeft);
}
