//! Scripted opponent for the mock battle server.
//!
//! Pure per-connection logic: each inbound command produces the frames the
//! server should push back and when. The server owns sockets and timers;
//! nothing here does I/O.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};

use matchsync::{Frame, MatchPhase, MatchSummary, Opponent, events};

/// Pacing of the scripted match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTiming {
    /// Queue wait before the bot is found.
    pub match_found_after: Duration,
    /// Countdown announced in `ROUND_STARTING`.
    pub round_delay_secs: u32,
    /// Gap between the remaining round events.
    pub step: Duration,
}

impl Default for MockTiming {
    fn default() -> Self {
        Self {
            match_found_after: Duration::from_secs(2),
            round_delay_secs: 3,
            step: Duration::from_secs(4),
        }
    }
}

/// A frame to push `after` the command that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub after: Duration,
    pub frame: Frame,
}

#[derive(Debug, Default)]
pub struct Reply {
    pub frames: Vec<Scheduled>,
    /// Abort frames still pending from earlier replies.
    pub cancel_pending: bool,
}

impl Reply {
    fn now(frame: Frame) -> Self {
        Self {
            frames: vec![Scheduled {
                after: Duration::ZERO,
                frame,
            }],
            cancel_pending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Idle,
    /// Match created; waiting for the bot to be announced and answered.
    /// `announced` once `MATCH_FOUND` has gone out to the client.
    Waiting { match_id: String, announced: bool },
    Playing { match_id: String },
}

/// One client's view of the scripted opponent.
pub struct MockMatch {
    stage: Stage,
    /// Bumped whenever pending frames are cancelled.
    generation: u64,
    rounds: u32,
    timing: MockTiming,
    bot: Opponent,
}

fn payload_match_id(frame: &Frame) -> Option<&str> {
    frame.data.get("matchId").and_then(Value::as_str)
}

impl MockMatch {
    pub fn new(rounds: u32, timing: MockTiming) -> Self {
        Self {
            stage: Stage::Idle,
            generation: 0,
            rounds: rounds.max(1),
            timing,
            bot: Opponent {
                id: 9000,
                name: "Professor Bot".into(),
                avatar: None,
            },
        }
    }

    pub fn match_id(&self) -> Option<&str> {
        match &self.stage {
            Stage::Idle => None,
            Stage::Waiting { match_id, .. } | Stage::Playing { match_id } => Some(match_id),
        }
    }

    /// Queued or holding an unanswered match.
    pub fn is_waiting(&self) -> bool {
        matches!(self.stage, Stage::Waiting { .. })
    }

    /// Frames scheduled under an older generation must not be sent.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record that `frame` is being sent to the client.
    pub fn announce(&mut self, frame: &Frame) {
        if frame.event != events::MATCH_FOUND {
            return;
        }
        if let Stage::Waiting {
            match_id,
            announced,
        } = &mut self.stage
        {
            if payload_match_id(frame) == Some(match_id.as_str()) {
                *announced = true;
            }
        }
    }

    /// React to one client command. `new_match_id` is only called when a
    /// match is created.
    pub fn handle(&mut self, frame: &Frame, new_match_id: impl FnOnce() -> String) -> Reply {
        let reply = self.reply(frame, new_match_id);
        if reply.cancel_pending {
            self.generation += 1;
        }
        reply
    }

    fn reply(&mut self, frame: &Frame, new_match_id: impl FnOnce() -> String) -> Reply {
        match frame.event.as_str() {
            events::JOIN_QUEUE => self.join_queue(new_match_id()),
            // Once the client has seen the match, only a cancel naming it
            // resets the client.
            events::LEAVE_QUEUE => match &self.stage {
                Stage::Waiting {
                    match_id,
                    announced,
                } => {
                    let data = if *announced {
                        json!({ "matchId": match_id })
                    } else {
                        json!({})
                    };
                    self.stage = Stage::Idle;
                    Reply {
                        cancel_pending: true,
                        ..Reply::now(Frame::new(events::MATCH_CANCELLED, data))
                    }
                }
                _ => Reply::default(),
            },
            events::ACCEPT_MATCH => match &self.stage {
                Stage::Waiting { match_id, .. } if payload_match_id(frame) == Some(match_id) => {
                    let match_id = match_id.clone();
                    self.stage = Stage::Playing {
                        match_id: match_id.clone(),
                    };
                    Reply {
                        frames: self.timeline(&match_id),
                        cancel_pending: false,
                    }
                }
                _ => Reply::default(),
            },
            events::REJECT_MATCH => match &self.stage {
                Stage::Waiting { match_id, .. } if payload_match_id(frame) == Some(match_id) => {
                    let data = json!({ "matchId": match_id });
                    self.stage = Stage::Idle;
                    Reply {
                        cancel_pending: true,
                        ..Reply::now(Frame::new(events::MATCH_CANCELLED, data))
                    }
                }
                _ => Reply::default(),
            },
            _ => Reply::default(),
        }
    }

    /// Joining while playing abandons the old match; the client only does
    /// that once it considers the match over.
    fn join_queue(&mut self, match_id: String) -> Reply {
        if self.is_waiting() {
            return Reply::default();
        }
        let abandon = matches!(self.stage, Stage::Playing { .. });
        let found = Frame::new(
            events::MATCH_FOUND,
            json!({ "matchId": match_id, "opponent": self.bot }),
        );
        self.stage = Stage::Waiting {
            match_id,
            announced: false,
        };
        Reply {
            frames: vec![Scheduled {
                after: self.timing.match_found_after,
                frame: found,
            }],
            cancel_pending: abandon,
        }
    }

    /// Accepted-match timeline: status update, every round, match end.
    fn timeline(&self, match_id: &str) -> Vec<Scheduled> {
        let step = self.timing.step;
        let countdown = Duration::from_secs(u64::from(self.timing.round_delay_secs));
        let mut at = Duration::ZERO;
        let mut frames = vec![Scheduled {
            after: at,
            frame: Frame::new(
                events::MATCH_STATUS_UPDATE,
                json!({ "matchId": match_id, "status": "ACCEPTED" }),
            ),
        }];
        let mut push = |at: Duration, event: &str, data: Value| {
            frames.push(Scheduled {
                after: at,
                frame: Frame::new(event, data),
            });
        };

        for round in 1..=self.rounds {
            at += step;
            push(
                at,
                events::ROUND_STARTING,
                json!({
                    "matchId": match_id,
                    "roundNumber": round,
                    "delaySeconds": self.timing.round_delay_secs,
                    "message": format!("Round {round}"),
                }),
            );
            at += countdown;
            let round_data = json!({ "matchId": match_id, "roundNumber": round });
            push(at, events::ROUND_SELECTING_POKEMON, round_data.clone());
            at += step;
            push(at, events::ROUND_IN_PROGRESS, round_data.clone());
            at += step;
            push(at, events::ROUND_ENDED, round_data);
        }
        at += step;
        push(at, events::MATCH_ENDED, json!({ "matchId": match_id }));
        frames
    }
}

/// Greeting pushed after `join-user-room`.
pub fn welcome(notification_id: String, user: &str) -> Frame {
    Frame::new(
        events::NOTIFICATION,
        json!({
            "notificationId": notification_id,
            "type": "WELCOME",
            "title": "Welcome back",
            "body": format!("{user}, a practice opponent is waiting in the queue."),
        }),
    )
}

/// Fold a sent frame into the server's match overview.
pub fn track(matches: &mut HashMap<String, MatchSummary>, frame: &Frame) {
    let Some(match_id) = payload_match_id(frame) else {
        return;
    };
    let round = frame
        .data
        .get("roundNumber")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());

    let phase = match frame.event.as_str() {
        events::MATCH_FOUND => {
            let opponent = frame
                .data
                .pointer("/opponent/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            matches.insert(
                match_id.to_string(),
                MatchSummary {
                    match_id: match_id.to_string(),
                    opponent,
                    phase: MatchPhase::MatchFound,
                    round: 0,
                },
            );
            return;
        }
        events::MATCH_CANCELLED | events::MATCH_ENDED => {
            matches.remove(match_id);
            return;
        }
        events::ROUND_STARTING => MatchPhase::RoundStarting,
        events::ROUND_SELECTING_POKEMON => MatchPhase::RoundSelectingPokemon,
        events::ROUND_IN_PROGRESS => MatchPhase::RoundInProgress,
        events::ROUND_ENDED => MatchPhase::BetweenRounds,
        _ => return,
    };
    if let Some(summary) = matches.get_mut(match_id) {
        summary.phase = phase;
        if let Some(round) = round {
            summary.round = round;
        }
    }
}
