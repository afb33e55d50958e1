//! Round generation, time-weighted scoring and standings.

use std::cmp::Reverse;

use rand::{Rng, seq::SliceRandom};

use crate::state::room::{Participant, Room, Round};

/// Points awarded for any correct answer.
pub const BASE_POINTS: i64 = 100;
/// Upper bound of the speed bonus.
pub const MAX_BONUS: i64 = 50;

/// Shuffle the deck pool and lay out `min(requested, pool size)` rounds.
pub fn generate_rounds<R>(pool: &[String], requested: u32, rng: &mut R) -> Vec<Round>
where
    R: Rng + ?Sized,
{
    let mut ids = pool.to_vec();
    ids.shuffle(rng);
    ids.truncate(requested as usize);

    ids.into_iter()
        .enumerate()
        .map(|(index, question_id)| Round {
            index: index as u32,
            question_id,
            started_at: 0,
            closed_at: None,
            reveal_at: None,
        })
        .collect()
}

/// Time between the round opening and the answer's receipt.
///
/// Rounds that were never stamped fall back to `phase_ends_at - answer window`.
pub fn elapsed_ms(room: &Room, round: &Round, received_at: i64) -> i64 {
    let started_at = if round.started_at > 0 {
        round.started_at
    } else {
        room.phase_ends_at
            .map(|ends_at| ends_at - room.rules.answer_window_ms())
            .unwrap_or(received_at)
    };
    (received_at - started_at).max(0)
}

/// `0` when wrong; otherwise the base plus a bonus decaying linearly over the
/// answer window, rounded up and floored at zero.
pub fn score_delta(is_correct: bool, elapsed_ms: i64, answer_seconds: u32) -> i64 {
    if !is_correct {
        return 0;
    }
    let window_ms = i64::from(answer_seconds) * 1_000;
    if window_ms == 0 {
        return BASE_POINTS;
    }

    let remaining_ms = window_ms - elapsed_ms.max(0);
    if remaining_ms <= 0 {
        return BASE_POINTS;
    }
    let numerator = remaining_ms * MAX_BONUS;
    let bonus = (numerator + window_ms - 1) / window_ms;
    BASE_POINTS + bonus.min(MAX_BONUS)
}

/// A participant with its position in the standings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Standing<'a> {
    /// 1-based rank; equal scores share a rank.
    pub rank: u32,
    /// The ranked participant.
    pub participant: &'a Participant,
}

/// Order by `(total score desc, average response asc)` and assign ranks.
///
/// Ranks group by score only: response time orders a tie but does not split it,
/// so `300, 300, 250` ranks as `1, 1, 3`.
pub fn rank_participants<'a, I>(participants: I) -> Vec<Standing<'a>>
where
    I: IntoIterator<Item = &'a Participant>,
{
    let mut ordered: Vec<&Participant> = participants.into_iter().collect();
    ordered.sort_by_key(|p| (Reverse(p.total_score), p.avg_response_ms, p.joined_at));

    let mut standings: Vec<Standing<'a>> = Vec::with_capacity(ordered.len());
    for (position, participant) in ordered.into_iter().enumerate() {
        let rank = match standings.last() {
            Some(previous) if previous.participant.total_score == participant.total_score => {
                previous.rank
            }
            _ => position as u32 + 1,
        };
        standings.push(Standing { rank, participant });
    }
    standings
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::state::room::fixtures::*;

    #[test]
    fn scoring_scenarios() {
        assert_eq!(score_delta(true, 2_000, 10), 140);
        assert_eq!(score_delta(true, 10_000, 10), 100);
        assert_eq!(score_delta(true, 14_000, 10), 100);
        assert_eq!(score_delta(false, 1_000, 10), 0);
        assert_eq!(score_delta(true, 0, 10), 150);
    }

    #[test]
    fn bonus_rounds_up() {
        // 9.99 s left of 10 s: 49.95 -> 50
        assert_eq!(score_delta(true, 10, 10), 150);
        // 0.001 s left: 0.005 -> 1
        assert_eq!(score_delta(true, 9_999, 10), 101);
    }

    #[test]
    fn ties_share_rank() {
        let mut a = Participant::new(guest("a"), "a".into(), T0);
        let mut b = Participant::new(guest("b"), "b".into(), T0 + 1);
        let mut c = Participant::new(guest("c"), "c".into(), T0 + 2);
        a.total_score = 300;
        a.avg_response_ms = 4_000;
        b.total_score = 300;
        b.avg_response_ms = 2_000;
        c.total_score = 250;

        let standings = rank_participants([&c, &a, &b]);
        let ranks: Vec<u32> = standings.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
        // Faster average orders first inside the tie.
        assert_eq!(standings[0].participant.nickname, "b");
        assert_eq!(standings[2].participant.nickname, "c");
    }

    #[test]
    fn rounds_are_capped_by_pool_size() {
        let pool: Vec<String> = (0..4).map(|i| format!("q{i}")).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let rounds = generate_rounds(&pool, 10, &mut rng);
        assert_eq!(rounds.len(), 4);
        let mut ids: Vec<&str> = rounds.iter().map(|r| r.question_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["q0", "q1", "q2", "q3"]);
        assert!(rounds.iter().enumerate().all(|(i, r)| r.index == i as u32));
        assert!(rounds.iter().all(|r| r.started_at == 0));

        assert_eq!(generate_rounds(&pool, 2, &mut rng).len(), 2);
    }

    #[test]
    fn elapsed_falls_back_to_phase_deadline() {
        let mut room = aggregate(guest("h"), &[]).room;
        room.phase_ends_at = Some(T0 + 10_000);
        let round = &rounds(1)[0];
        assert_eq!(elapsed_ms(&room, round, T0 + 3_000), 3_000);

        let started = Round {
            started_at: T0 + 1_000,
            ..round.clone()
        };
        assert_eq!(elapsed_ms(&room, &started, T0 + 3_000), 2_000);
    }
}
