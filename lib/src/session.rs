//! Match session: the client's belief about the current match.
//!
//! `MatchSession` is a plain data aggregate plus one pure transition
//! function, `apply()`. Every input either moves the session along an edge
//! of the match-phase state machine (`Outcome::Applied`) or is dropped
//! without touching any field (`Outcome::Dropped`). Server-driven inputs are
//! validated against the current match id first, so leftovers from an
//! earlier match or replays after a reconnect cannot corrupt a newer
//! session.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Opponent;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Mutually exclusive match phases. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPhase {
    #[default]
    NoActiveMatch,
    MatchFound,
    RoundStarting,
    RoundSelectingPokemon,
    RoundInProgress,
    BetweenRounds,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoActiveMatch => write!(f, "NO_ACTIVE_MATCH"),
            Self::MatchFound => write!(f, "MATCH_FOUND"),
            Self::RoundStarting => write!(f, "ROUND_STARTING"),
            Self::RoundSelectingPokemon => write!(f, "ROUND_SELECTING_POKEMON"),
            Self::RoundInProgress => write!(f, "ROUND_IN_PROGRESS"),
            Self::BetweenRounds => write!(f, "BETWEEN_ROUNDS"),
        }
    }
}

/// The local player's answer to a match-found prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Accept,
    Reject,
}

// ---------------------------------------------------------------------------
// Round countdown
// ---------------------------------------------------------------------------

/// Countdown data between a round-starting event and the round proper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStarting {
    pub round_number: u32,
    pub delay_seconds: u32,
    #[serde(default)]
    pub message: Option<String>,
    /// Server clock when the event was produced, ms since the Unix epoch.
    #[serde(default)]
    pub server_timestamp: Option<i64>,
}

impl RoundStarting {
    /// Local-clock deadline (ms since the Unix epoch) at which the countdown
    /// ends.
    ///
    /// With both a server timestamp and a clock offset the deadline is
    /// aligned to the server; otherwise it counts from `received_at_ms`.
    /// Saturates instead of overflowing on extreme server values.
    pub fn local_deadline_ms(&self, server_time_offset: Option<i64>, received_at_ms: i64) -> i64 {
        let delay_ms = i64::from(self.delay_seconds) * 1000;
        match (self.server_timestamp, server_time_offset) {
            (Some(server_ts), Some(offset)) => {
                server_ts.saturating_sub(offset).saturating_add(delay_ms)
            }
            _ => received_at_ms.saturating_add(delay_ms),
        }
    }

    /// Time left on the countdown at `now_ms`, zero once it has run out.
    pub fn remaining(
        &self,
        server_time_offset: Option<i64>,
        received_at_ms: i64,
        now_ms: i64,
    ) -> Duration {
        let deadline = self.local_deadline_ms(server_time_offset, received_at_ms);
        Duration::from_millis(u64::try_from(deadline.saturating_sub(now_ms)).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// Everything that can drive the session: server events (already parsed)
/// and explicit local actions.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchInput {
    /// Local: the user asked to join the queue.
    JoinQueue,
    /// Local: a leave-queue request got no server confirmation in time.
    LeaveQueueTimedOut,
    /// Local: the user accepted the match-found prompt.
    Accept,
    /// Local: the user rejected the match-found prompt.
    Reject,
    /// Local: full reset (logout, leaving the matchmaking flow).
    Reset,
    MatchFound {
        match_id: String,
        opponent: Opponent,
    },
    MatchmakingFailed {
        match_id: Option<String>,
    },
    /// Without a match id this is the server cancelling the queue entry.
    MatchCancelled {
        match_id: Option<String>,
    },
    MatchEnded {
        match_id: String,
    },
    RoundStarting {
        match_id: String,
        round: RoundStarting,
        /// Local clock when the event arrived, ms since the Unix epoch.
        received_at_ms: i64,
    },
    RoundSelectingPokemon {
        match_id: String,
    },
    /// Local: the round-starting countdown ran out before the server moved
    /// the round on.
    RoundTimerElapsed {
        match_id: String,
        round_number: u32,
    },
    RoundInProgress {
        match_id: String,
    },
    RoundEnded {
        match_id: String,
    },
}

/// Why an input left the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The input targets a match but no match is active.
    Stale,
    /// The input targets a different match, or lacks the id of the active one.
    Foreign,
    /// The input repeats what the session already reflects.
    Duplicate,
    /// No edge leaves the current phase on this input.
    NoTransition,
    /// The input is structurally unusable (empty id, round zero).
    Invalid,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => write!(f, "stale"),
            Self::Foreign => write!(f, "foreign match"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::NoTransition => write!(f, "no transition"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Dropped(DropReason),
}

impl Outcome {
    pub fn is_applied(self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One matchmaking-to-completion lifecycle. `Default` is the initial empty
/// shape every reset returns to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSession {
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub phase: MatchPhase,
    #[serde(default)]
    pub opponent: Option<Opponent>,
    #[serde(default)]
    pub queue_membership: bool,
    #[serde(default)]
    pub round_starting: Option<RoundStarting>,
    #[serde(default)]
    pub acceptance_status: Option<AcceptanceStatus>,
    /// Server clock minus local clock, ms. `None` until the first round-start
    /// payload with a server timestamp arrives.
    #[serde(default)]
    pub server_time_offset: Option<i64>,
    /// Last round number accepted by a round-starting transition.
    #[serde(default)]
    pub current_round: u32,
    /// Whether the match-found prompt is pending.
    #[serde(default)]
    pub prompt_open: bool,
}

impl MatchSession {
    /// Queued and waiting for a match.
    pub fn is_queued(&self) -> bool {
        self.phase == MatchPhase::NoActiveMatch && self.queue_membership && self.match_id.is_none()
    }

    /// Server clock offset, or zero when not yet synced.
    pub fn server_time_offset_ms(&self) -> i64 {
        self.server_time_offset.unwrap_or(0)
    }

    /// Apply one input. Dropped inputs never modify the session.
    pub fn apply(&mut self, input: MatchInput) -> Outcome {
        match self.transition(input) {
            Ok(()) => Outcome::Applied,
            Err(reason) => Outcome::Dropped(reason),
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Check an event's match id against the active match.
    fn guard(&self, match_id: &str) -> Result<(), DropReason> {
        match &self.match_id {
            None => Err(DropReason::Stale),
            Some(current) if current == match_id => Ok(()),
            Some(_) => Err(DropReason::Foreign),
        }
    }

    fn transition(&mut self, input: MatchInput) -> Result<(), DropReason> {
        use MatchPhase::*;

        match input {
            MatchInput::JoinQueue => {
                if self.phase != NoActiveMatch || self.match_id.is_some() {
                    return Err(DropReason::NoTransition);
                }
                if self.queue_membership {
                    return Err(DropReason::Duplicate);
                }
                self.queue_membership = true;
            }

            MatchInput::LeaveQueueTimedOut => {
                if !self.is_queued() {
                    return Err(DropReason::NoTransition);
                }
                self.reset();
            }

            MatchInput::Accept => {
                if self.phase != MatchFound {
                    return Err(DropReason::NoTransition);
                }
                if self.acceptance_status == Some(AcceptanceStatus::Accept) {
                    return Err(DropReason::Duplicate);
                }
                self.acceptance_status = Some(AcceptanceStatus::Accept);
            }

            MatchInput::Reject => {
                if self.phase != MatchFound {
                    return Err(DropReason::NoTransition);
                }
                self.reset();
            }

            MatchInput::Reset => {
                if *self == Self::default() {
                    return Err(DropReason::Duplicate);
                }
                self.reset();
            }

            MatchInput::MatchFound { match_id, opponent } => {
                if match_id.is_empty() {
                    return Err(DropReason::Invalid);
                }
                if let Some(current) = &self.match_id {
                    return Err(if *current == match_id {
                        DropReason::Duplicate
                    } else {
                        DropReason::Foreign
                    });
                }
                if !self.is_queued() {
                    return Err(DropReason::NoTransition);
                }
                self.match_id = Some(match_id);
                self.opponent = Some(opponent);
                self.queue_membership = false;
                self.acceptance_status = None;
                self.phase = MatchFound;
                self.prompt_open = true;
            }

            MatchInput::MatchmakingFailed { match_id } => {
                match match_id {
                    Some(id) => {
                        self.guard(&id)?;
                        if self.phase != MatchFound {
                            return Err(DropReason::NoTransition);
                        }
                    }
                    None if self.is_queued() || self.phase == MatchFound => {}
                    None if self.match_id.is_some() => return Err(DropReason::Foreign),
                    None => return Err(DropReason::Stale),
                }
                self.reset();
            }

            MatchInput::MatchCancelled { match_id } => {
                match match_id {
                    Some(id) => self.guard(&id)?,
                    None if self.is_queued() => {}
                    None if self.match_id.is_some() => return Err(DropReason::Foreign),
                    None => return Err(DropReason::Stale),
                }
                self.reset();
            }

            MatchInput::MatchEnded { match_id } => {
                self.guard(&match_id)?;
                self.reset();
            }

            MatchInput::RoundStarting {
                match_id,
                round,
                received_at_ms,
            } => {
                self.guard(&match_id)?;
                if round.round_number == 0 {
                    return Err(DropReason::Invalid);
                }
                // Server clock minus local clock; a timestamp that cannot
                // produce one is not a usable payload.
                let offset = match round.server_timestamp {
                    Some(ts) => Some(ts.checked_sub(received_at_ms).ok_or(DropReason::Invalid)?),
                    None => None,
                };
                match self.phase {
                    RoundStarting if round.round_number == self.current_round => {
                        return Err(DropReason::Duplicate);
                    }
                    MatchFound | BetweenRounds if round.round_number > self.current_round => {}
                    MatchFound | BetweenRounds => return Err(DropReason::Stale),
                    _ => return Err(DropReason::NoTransition),
                }
                if self.server_time_offset.is_none() {
                    self.server_time_offset = offset;
                }
                self.current_round = round.round_number;
                self.round_starting = Some(round);
                self.prompt_open = false;
                self.phase = RoundStarting;
            }

            MatchInput::RoundSelectingPokemon { match_id } => {
                self.guard(&match_id)?;
                match self.phase {
                    RoundStarting => {}
                    RoundSelectingPokemon => return Err(DropReason::Duplicate),
                    _ => return Err(DropReason::NoTransition),
                }
                self.round_starting = None;
                self.phase = RoundSelectingPokemon;
            }

            MatchInput::RoundTimerElapsed {
                match_id,
                round_number,
            } => {
                self.guard(&match_id)?;
                if self.phase != RoundStarting || self.current_round != round_number {
                    return Err(DropReason::NoTransition);
                }
                self.round_starting = None;
                self.phase = RoundSelectingPokemon;
            }

            MatchInput::RoundInProgress { match_id } => {
                self.guard(&match_id)?;
                match self.phase {
                    RoundSelectingPokemon => {}
                    RoundInProgress => return Err(DropReason::Duplicate),
                    _ => return Err(DropReason::NoTransition),
                }
                self.phase = RoundInProgress;
            }

            MatchInput::RoundEnded { match_id } => {
                self.guard(&match_id)?;
                match self.phase {
                    RoundInProgress => {}
                    BetweenRounds => return Err(DropReason::Duplicate),
                    _ => return Err(DropReason::NoTransition),
                }
                self.phase = BetweenRounds;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann() -> Opponent {
        Opponent {
            id: 7,
            name: "Ann".into(),
            avatar: None,
        }
    }

    fn round(number: u32, delay: u32) -> RoundStarting {
        RoundStarting {
            round_number: number,
            delay_seconds: delay,
            message: None,
            server_timestamp: None,
        }
    }

    fn round_starting(match_id: &str, number: u32) -> MatchInput {
        MatchInput::RoundStarting {
            match_id: match_id.into(),
            round: round(number, 3),
            received_at_ms: 1_000,
        }
    }

    fn found(match_id: &str) -> MatchInput {
        MatchInput::MatchFound {
            match_id: match_id.into(),
            opponent: ann(),
        }
    }

    fn id(s: &str) -> String {
        s.to_string()
    }

    /// Queue, find "m1", and accept.
    fn accepted_session() -> MatchSession {
        let mut s = MatchSession::default();
        assert!(s.apply(MatchInput::JoinQueue).is_applied());
        assert!(s.apply(found("m1")).is_applied());
        assert!(s.apply(MatchInput::Accept).is_applied());
        s
    }

    /// Drive a session into every phase, for "from any state" checks.
    fn sessions_in_every_phase() -> Vec<MatchSession> {
        let mut out = Vec::new();
        let mut s = MatchSession::default();
        s.apply(MatchInput::JoinQueue);
        s.apply(found("m1"));
        out.push(s.clone());
        s.apply(round_starting("m1", 1));
        out.push(s.clone());
        s.apply(MatchInput::RoundSelectingPokemon { match_id: id("m1") });
        out.push(s.clone());
        s.apply(MatchInput::RoundInProgress { match_id: id("m1") });
        out.push(s.clone());
        s.apply(MatchInput::RoundEnded { match_id: id("m1") });
        out.push(s.clone());
        out
    }

    #[test]
    fn full_round_trip_scenario() {
        let mut s = MatchSession::default();
        assert_eq!(s.phase, MatchPhase::NoActiveMatch);
        assert!(!s.queue_membership);

        assert_eq!(s.apply(MatchInput::JoinQueue), Outcome::Applied);
        assert!(s.queue_membership);

        assert_eq!(s.apply(found("m1")), Outcome::Applied);
        assert_eq!(s.phase, MatchPhase::MatchFound);
        assert_eq!(s.match_id.as_deref(), Some("m1"));
        assert_eq!(s.opponent.as_ref().map(|o| o.name.as_str()), Some("Ann"));
        assert!(!s.queue_membership);
        assert!(s.prompt_open);

        assert_eq!(s.apply(MatchInput::Accept), Outcome::Applied);
        assert_eq!(s.acceptance_status, Some(AcceptanceStatus::Accept));
        assert_eq!(s.phase, MatchPhase::MatchFound);

        assert_eq!(s.apply(round_starting("m1", 1)), Outcome::Applied);
        assert_eq!(s.phase, MatchPhase::RoundStarting);
        assert_eq!(s.round_starting.as_ref().map(|r| r.round_number), Some(1));
        assert!(!s.prompt_open);

        let out = s.apply(MatchInput::RoundSelectingPokemon { match_id: id("m1") });
        assert_eq!(out, Outcome::Applied);
        assert_eq!(s.phase, MatchPhase::RoundSelectingPokemon);
        assert_eq!(s.round_starting, None);

        let out = s.apply(MatchInput::RoundInProgress { match_id: id("m1") });
        assert_eq!(out, Outcome::Applied);
        assert_eq!(s.phase, MatchPhase::RoundInProgress);

        let out = s.apply(MatchInput::RoundEnded { match_id: id("m1") });
        assert_eq!(out, Outcome::Applied);
        assert_eq!(s.phase, MatchPhase::BetweenRounds);

        assert_eq!(s.apply(round_starting("m1", 2)), Outcome::Applied);
        assert_eq!(s.phase, MatchPhase::RoundStarting);
        assert_eq!(s.round_starting.as_ref().map(|r| r.round_number), Some(2));
        assert_eq!(s.current_round, 2);
    }

    #[test]
    fn foreign_match_id_never_changes_the_session() {
        let foreign = id("other");
        let inputs = vec![
            found("other"),
            MatchInput::MatchCancelled {
                match_id: Some(foreign.clone()),
            },
            MatchInput::MatchmakingFailed {
                match_id: Some(foreign.clone()),
            },
            MatchInput::MatchEnded {
                match_id: foreign.clone(),
            },
            round_starting("other", 5),
            MatchInput::RoundSelectingPokemon {
                match_id: foreign.clone(),
            },
            MatchInput::RoundTimerElapsed {
                match_id: foreign.clone(),
                round_number: 1,
            },
            MatchInput::RoundInProgress {
                match_id: foreign.clone(),
            },
            MatchInput::RoundEnded {
                match_id: foreign.clone(),
            },
        ];
        for session in sessions_in_every_phase() {
            for input in &inputs {
                let mut s = session.clone();
                let out = s.apply(input.clone());
                assert_eq!(out, Outcome::Dropped(DropReason::Foreign), "{input:?}");
                assert_eq!(s, session, "{input:?} changed a {} session", session.phase);
            }
        }
    }

    #[test]
    fn repeated_round_starting_is_idempotent() {
        let mut s = accepted_session();
        assert!(s.apply(round_starting("m1", 1)).is_applied());
        let once = s.clone();

        let out = s.apply(round_starting("m1", 1));
        assert_eq!(out, Outcome::Dropped(DropReason::Duplicate));
        assert_eq!(s, once);
        assert_eq!(s.current_round, 1);
    }

    #[test]
    fn replayed_earlier_round_is_stale_between_rounds() {
        let mut s = accepted_session();
        s.apply(round_starting("m1", 1));
        s.apply(MatchInput::RoundSelectingPokemon { match_id: id("m1") });
        s.apply(MatchInput::RoundInProgress { match_id: id("m1") });
        s.apply(MatchInput::RoundEnded { match_id: id("m1") });
        let before = s.clone();

        assert_eq!(
            s.apply(round_starting("m1", 1)),
            Outcome::Dropped(DropReason::Stale)
        );
        assert_eq!(s, before);
    }

    #[test]
    fn cancellation_resets_from_every_phase() {
        for session in sessions_in_every_phase() {
            let mut s = session.clone();
            let out = s.apply(MatchInput::MatchCancelled {
                match_id: Some(id("m1")),
            });
            assert_eq!(out, Outcome::Applied, "from {}", session.phase);
            assert_eq!(s, MatchSession::default());
        }
    }

    #[test]
    fn matchmaking_failed_resets_match_found_and_queue() {
        let mut s = MatchSession::default();
        s.apply(MatchInput::JoinQueue);
        s.apply(found("m1"));
        let out = s.apply(MatchInput::MatchmakingFailed {
            match_id: Some(id("m1")),
        });
        assert_eq!(out, Outcome::Applied);
        assert_eq!(s, MatchSession::default());

        let mut s = MatchSession::default();
        s.apply(MatchInput::JoinQueue);
        let out = s.apply(MatchInput::MatchmakingFailed { match_id: None });
        assert_eq!(out, Outcome::Applied);
        assert_eq!(s, MatchSession::default());
    }

    #[test]
    fn match_ended_resets() {
        let mut s = accepted_session();
        s.apply(round_starting("m1", 1));
        assert!(s
            .apply(MatchInput::MatchEnded { match_id: id("m1") })
            .is_applied());
        assert_eq!(s, MatchSession::default());
    }

    #[test]
    fn stale_round_after_reset_is_dropped() {
        let mut s = accepted_session();
        s.apply(MatchInput::MatchCancelled {
            match_id: Some(id("m1")),
        });
        assert_eq!(s, MatchSession::default());

        let out = s.apply(round_starting("m1", 3));
        assert_eq!(out, Outcome::Dropped(DropReason::Stale));
        assert_eq!(s.phase, MatchPhase::NoActiveMatch);
        assert_eq!(s, MatchSession::default());
    }

    #[test]
    fn match_found_requires_queue_membership() {
        let mut s = MatchSession::default();
        assert_eq!(
            s.apply(found("m1")),
            Outcome::Dropped(DropReason::NoTransition)
        );
        assert_eq!(s, MatchSession::default());
    }

    #[test]
    fn match_id_is_assigned_once_per_session() {
        let mut s = MatchSession::default();
        s.apply(MatchInput::JoinQueue);
        s.apply(found("m1"));
        assert_eq!(s.apply(found("m1")), Outcome::Dropped(DropReason::Duplicate));
        assert_eq!(s.apply(found("m2")), Outcome::Dropped(DropReason::Foreign));
        assert_eq!(s.match_id.as_deref(), Some("m1"));
    }

    #[test]
    fn reject_resets_and_accept_twice_is_duplicate() {
        let mut s = accepted_session();
        assert_eq!(
            s.apply(MatchInput::Accept),
            Outcome::Dropped(DropReason::Duplicate)
        );
        assert!(s.apply(MatchInput::Reject).is_applied());
        assert_eq!(s, MatchSession::default());
    }

    #[test]
    fn queue_cancel_without_match_id_only_applies_while_queued() {
        let mut s = MatchSession::default();
        assert_eq!(
            s.apply(MatchInput::MatchCancelled { match_id: None }),
            Outcome::Dropped(DropReason::Stale)
        );

        s.apply(MatchInput::JoinQueue);
        assert!(s
            .apply(MatchInput::MatchCancelled { match_id: None })
            .is_applied());
        assert!(!s.queue_membership);

        let mut s = accepted_session();
        let before = s.clone();
        assert_eq!(
            s.apply(MatchInput::MatchCancelled { match_id: None }),
            Outcome::Dropped(DropReason::Foreign)
        );
        assert_eq!(s, before);
    }

    #[test]
    fn leave_queue_timeout_only_clears_an_unmatched_queue() {
        let mut s = MatchSession::default();
        s.apply(MatchInput::JoinQueue);
        assert!(s.apply(MatchInput::LeaveQueueTimedOut).is_applied());
        assert_eq!(s, MatchSession::default());

        let mut s = accepted_session();
        let before = s.clone();
        assert_eq!(
            s.apply(MatchInput::LeaveQueueTimedOut),
            Outcome::Dropped(DropReason::NoTransition)
        );
        assert_eq!(s, before);
    }

    #[test]
    fn round_timer_moves_to_selection_only_for_its_round() {
        let mut s = accepted_session();
        s.apply(round_starting("m1", 1));

        let late = MatchInput::RoundTimerElapsed {
            match_id: id("m1"),
            round_number: 0,
        };
        assert_eq!(s.apply(late), Outcome::Dropped(DropReason::NoTransition));

        let due = MatchInput::RoundTimerElapsed {
            match_id: id("m1"),
            round_number: 1,
        };
        assert!(s.apply(due.clone()).is_applied());
        assert_eq!(s.phase, MatchPhase::RoundSelectingPokemon);
        assert_eq!(s.round_starting, None);

        // The server's own selecting event arriving after the timer is a no-op.
        let out = s.apply(MatchInput::RoundSelectingPokemon { match_id: id("m1") });
        assert_eq!(out, Outcome::Dropped(DropReason::Duplicate));
    }

    #[test]
    fn out_of_order_round_events_are_dropped() {
        let mut s = accepted_session();
        let before = s.clone();
        for input in [
            MatchInput::RoundInProgress { match_id: id("m1") },
            MatchInput::RoundEnded { match_id: id("m1") },
            MatchInput::RoundSelectingPokemon { match_id: id("m1") },
        ] {
            assert_eq!(s.apply(input), Outcome::Dropped(DropReason::NoTransition));
            assert_eq!(s, before);
        }
    }

    #[test]
    fn server_offset_is_computed_once_per_session() {
        let mut s = accepted_session();
        let first = MatchInput::RoundStarting {
            match_id: id("m1"),
            round: RoundStarting {
                server_timestamp: Some(10_500),
                ..round(1, 3)
            },
            received_at_ms: 10_000,
        };
        s.apply(first);
        assert_eq!(s.server_time_offset, Some(500));

        s.apply(MatchInput::RoundSelectingPokemon { match_id: id("m1") });
        s.apply(MatchInput::RoundInProgress { match_id: id("m1") });
        s.apply(MatchInput::RoundEnded { match_id: id("m1") });
        let second = MatchInput::RoundStarting {
            match_id: id("m1"),
            round: RoundStarting {
                server_timestamp: Some(50_000),
                ..round(2, 3)
            },
            received_at_ms: 40_000,
        };
        s.apply(second);
        assert_eq!(s.server_time_offset, Some(500));
        assert_eq!(s.server_time_offset_ms(), 500);
    }

    #[test]
    fn countdown_deadline_aligns_to_server_clock() {
        let r = RoundStarting {
            server_timestamp: Some(20_000),
            ..round(2, 3)
        };
        // Server runs 500ms ahead: the deadline is 19_500 + 3_000 locally.
        assert_eq!(r.local_deadline_ms(Some(500), 19_900), 22_500);
        // Without an offset, count from receipt.
        assert_eq!(r.local_deadline_ms(None, 19_900), 22_900);

        assert_eq!(
            r.remaining(Some(500), 19_900, 21_500),
            Duration::from_millis(1_000)
        );
        assert_eq!(r.remaining(Some(500), 19_900, 30_000), Duration::ZERO);
    }

    #[test]
    fn unrepresentable_server_timestamp_is_invalid() {
        let mut s = accepted_session();
        let before = s.clone();
        let input = MatchInput::RoundStarting {
            match_id: id("m1"),
            round: RoundStarting {
                server_timestamp: Some(i64::MIN),
                ..round(1, 3)
            },
            received_at_ms: 1_700_000_000_000,
        };
        assert_eq!(s.apply(input), Outcome::Dropped(DropReason::Invalid));
        assert_eq!(s, before);

        // The same round with a sane timestamp still applies.
        assert!(s.apply(round_starting("m1", 1)).is_applied());
    }

    #[test]
    fn countdown_math_saturates_on_extreme_values() {
        let r = RoundStarting {
            server_timestamp: Some(i64::MAX),
            ..round(1, u32::MAX)
        };
        assert_eq!(r.local_deadline_ms(Some(i64::MIN), 0), i64::MAX);
        assert_eq!(r.local_deadline_ms(None, i64::MAX), i64::MAX);
        assert_eq!(r.remaining(Some(1), 0, i64::MIN), Duration::from_millis(i64::MAX as u64));

        let late = RoundStarting {
            server_timestamp: Some(i64::MIN),
            ..round(1, 3)
        };
        assert_eq!(late.remaining(Some(i64::MAX), 0, 0), Duration::ZERO);
    }

    #[test]
    fn round_zero_is_invalid() {
        let mut s = accepted_session();
        let before = s.clone();
        assert_eq!(
            s.apply(round_starting("m1", 0)),
            Outcome::Dropped(DropReason::Invalid)
        );
        assert_eq!(s, before);
    }
}
