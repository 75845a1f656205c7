//! Match event reconciler.
//!
//! Listens to the `matching` namespace for one mount, turns server events
//! into session inputs, and performs the room-join handshake. Every input
//! goes through the session guards, so duplicated, replayed, or foreign
//! events are dropped there; this layer only parses, logs, and emits.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;

use matchsync::{
    ClientCommand, Frame, MatchCancelledPayload, MatchEndedPayload, MatchFoundPayload, MatchInput,
    MatchPhase, MatchSession, MatchStatus, MatchStatusUpdatePayload, MatchingSection,
    MatchmakingFailedPayload, Namespace, Outcome, RoundPayload, RoundStarting, events,
};

use super::Subscription;
use crate::channel::{Channel, ChannelRegistry};
use crate::state::MatchStoreWriter;

/// Longest countdown a round timer waits for, whatever the server asks.
const MAX_ROUND_COUNTDOWN: Duration = Duration::from_secs(300);

/// How often a waiting round timer checks whether it is still needed.
const TIMER_POLL: Duration = Duration::from_millis(100);

/// Whether the countdown for `round_number` of `match_id` is still running.
fn countdown_pending(session: &MatchSession, match_id: &str, round_number: u32) -> bool {
    session.phase == MatchPhase::RoundStarting
        && session.current_round == round_number
        && session.match_id.as_deref() == Some(match_id)
}

/// Time until the countdown ends, capped at `MAX_ROUND_COUNTDOWN`.
fn countdown_wait(
    round: &RoundStarting,
    offset: Option<i64>,
    received_at_ms: i64,
    now_ms: i64,
) -> Duration {
    round
        .remaining(offset, received_at_ms, now_ms)
        .min(MAX_ROUND_COUNTDOWN)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a payload, logging and discarding it when malformed.
fn parse<T: DeserializeOwned>(frame: &Frame) -> Option<T> {
    match frame.parse() {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!("matching: malformed {} payload: {e}", frame.event);
            None
        }
    }
}

fn log_outcome(event: &str, outcome: Outcome) {
    if let Outcome::Dropped(reason) = outcome {
        tracing::debug!("matching: dropped {event} ({reason})");
    }
}

/// State shared by one mount's handlers.
struct Handlers {
    writer: MatchStoreWriter,
    channel: Weak<Channel>,
    auto_accept: bool,
}

type HandleFn = fn(&Handlers, &Frame);

const SERVER_EVENTS: [(&str, HandleFn); 9] = [
    (events::MATCH_FOUND, Handlers::on_match_found),
    (events::MATCH_STATUS_UPDATE, Handlers::on_status_update),
    (events::MATCHMAKING_FAILED, Handlers::on_matchmaking_failed),
    (events::MATCH_CANCELLED, Handlers::on_match_cancelled),
    (events::MATCH_ENDED, Handlers::on_match_ended),
    (events::ROUND_STARTING, Handlers::on_round_starting),
    (events::ROUND_SELECTING_POKEMON, Handlers::on_round_selecting),
    (events::ROUND_IN_PROGRESS, Handlers::on_round_in_progress),
    (events::ROUND_ENDED, Handlers::on_round_ended),
];

impl Handlers {
    /// Room-join handshake for the current match, if there is one.
    fn join_rooms(&self, channel: &Channel) {
        let Some(match_id) = self.writer.current_match_id() else {
            tracing::debug!("matching: no current match, skipping room join");
            return;
        };
        tracing::debug!("matching: joining rooms for {match_id}");
        channel.send_command(ClientCommand::JoinMatchingRoom {
            match_id: match_id.clone(),
        });
        channel.send_command(ClientCommand::JoinUserMatchRoom { match_id });
    }

    fn accept(&self) -> Outcome {
        let match_id = self.writer.current_match_id();
        let outcome = self.writer.apply(MatchInput::Accept);
        if let (Outcome::Applied, Some(match_id)) = (outcome, match_id) {
            if let Some(channel) = self.channel.upgrade() {
                channel.send_command(ClientCommand::AcceptMatch { match_id });
            }
        }
        outcome
    }

    fn on_match_found(&self, frame: &Frame) {
        let Some(p) = parse::<MatchFoundPayload>(frame) else {
            return;
        };
        let summary = format!("match {} found against {}", p.match_id, p.opponent.name);
        let outcome = self.writer.apply(MatchInput::MatchFound {
            match_id: p.match_id,
            opponent: p.opponent,
        });
        log_outcome(&frame.event, outcome);
        if !outcome.is_applied() {
            return;
        }
        tracing::info!("matching: {summary}");
        if let Some(channel) = self.channel.upgrade() {
            self.join_rooms(&channel);
        }
        if self.auto_accept {
            tracing::info!("matching: auto-accepting");
            self.accept();
        }
    }

    fn on_status_update(&self, frame: &Frame) {
        let Some(p) = parse::<MatchStatusUpdatePayload>(frame) else {
            return;
        };
        let input = match p.status {
            MatchStatus::Cancelled | MatchStatus::Rejected => MatchInput::MatchCancelled {
                match_id: Some(p.match_id),
            },
            MatchStatus::Completed => MatchInput::MatchEnded {
                match_id: p.match_id,
            },
            status => {
                tracing::debug!("matching: match {} is {status}", p.match_id);
                return;
            }
        };
        log_outcome(&frame.event, self.writer.apply(input));
    }

    fn on_matchmaking_failed(&self, frame: &Frame) {
        let Some(p) = parse::<MatchmakingFailedPayload>(frame) else {
            return;
        };
        if !p.reason.is_empty() {
            tracing::info!("matching: matchmaking failed: {}", p.reason);
        }
        let outcome = self.writer.apply(MatchInput::MatchmakingFailed {
            match_id: p.match_id,
        });
        log_outcome(&frame.event, outcome);
    }

    fn on_match_cancelled(&self, frame: &Frame) {
        let Some(p) = parse::<MatchCancelledPayload>(frame) else {
            return;
        };
        let outcome = self.writer.apply(MatchInput::MatchCancelled {
            match_id: p.match_id,
        });
        log_outcome(&frame.event, outcome);
    }

    fn on_match_ended(&self, frame: &Frame) {
        let Some(p) = parse::<MatchEndedPayload>(frame) else {
            return;
        };
        let outcome = self.writer.apply(MatchInput::MatchEnded {
            match_id: p.match_id,
        });
        log_outcome(&frame.event, outcome);
    }

    fn on_round_starting(&self, frame: &Frame) {
        let Some(p) = parse::<RoundPayload>(frame) else {
            return;
        };
        let received_at_ms = now_ms();
        let round = RoundStarting {
            round_number: p.round_number,
            delay_seconds: p.delay_seconds,
            message: p.message,
            server_timestamp: p.server_timestamp,
        };
        let outcome = self.writer.apply(MatchInput::RoundStarting {
            match_id: p.match_id.clone(),
            round: round.clone(),
            received_at_ms,
        });
        log_outcome(&frame.event, outcome);
        if outcome.is_applied() {
            let offset = self.writer.snapshot().server_time_offset;
            self.schedule_round_timer(p.match_id, &round, offset, received_at_ms);
        }
    }

    /// Move to selection when the countdown runs out, in case the server's
    /// own selecting event is late or lost. The timer stops early once the
    /// match or round moves on (server event, reset, logout).
    fn schedule_round_timer(
        &self,
        match_id: String,
        round: &RoundStarting,
        offset: Option<i64>,
        received_at_ms: i64,
    ) {
        let wait = countdown_wait(round, offset, received_at_ms, now_ms());
        let round_number = round.round_number;
        let writer = self.writer.clone();
        tracing::debug!("matching: round {round_number} starts in {wait:?}");

        let spawned = std::thread::Builder::new()
            .name(format!("round-timer:{round_number}"))
            .spawn(move || {
                let deadline = Instant::now() + wait;
                loop {
                    if !countdown_pending(&writer.snapshot(), &match_id, round_number) {
                        tracing::debug!("matching: round {round_number} timer no longer needed");
                        return;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    std::thread::sleep((deadline - now).min(TIMER_POLL));
                }
                let outcome = writer.apply(MatchInput::RoundTimerElapsed {
                    match_id,
                    round_number,
                });
                log_outcome("round timer", outcome);
            });
        if let Err(e) = spawned {
            tracing::warn!("matching: failed to spawn round timer: {e}");
        }
    }

    fn on_round_selecting(&self, frame: &Frame) {
        let Some(p) = parse::<RoundPayload>(frame) else {
            return;
        };
        let outcome = self.writer.apply(MatchInput::RoundSelectingPokemon {
            match_id: p.match_id,
        });
        log_outcome(&frame.event, outcome);
    }

    fn on_round_in_progress(&self, frame: &Frame) {
        let Some(p) = parse::<RoundPayload>(frame) else {
            return;
        };
        let outcome = self.writer.apply(MatchInput::RoundInProgress {
            match_id: p.match_id,
        });
        log_outcome(&frame.event, outcome);
    }

    fn on_round_ended(&self, frame: &Frame) {
        let Some(p) = parse::<RoundPayload>(frame) else {
            return;
        };
        let outcome = self.writer.apply(MatchInput::RoundEnded {
            match_id: p.match_id,
        });
        log_outcome(&frame.event, outcome);
    }
}

// ---------------------------------------------------------------------------
// MatchReconciler
// ---------------------------------------------------------------------------

/// One mounted consumer of the matching namespace. Dropping it unmounts.
pub struct MatchReconciler {
    handlers: Arc<Handlers>,
    subscription: Subscription,
    leave_queue_timeout: Duration,
}

impl MatchReconciler {
    /// Acquire the matching channel with `credential` and start reconciling
    /// its events into the store behind `writer`.
    pub fn mount(
        registry: &ChannelRegistry,
        credential: &str,
        writer: MatchStoreWriter,
        settings: &MatchingSection,
    ) -> Self {
        let channel = registry.acquire(Namespace::Matching, credential);
        let handlers = Arc::new(Handlers {
            writer,
            channel: Arc::downgrade(&channel),
            auto_accept: settings.auto_accept,
        });

        let mut subscription = Subscription::new(channel);
        for (event, handle) in SERVER_EVENTS {
            let handlers = Arc::clone(&handlers);
            subscription.on(event, move |frame| handle(&handlers, frame));
        }
        {
            let handlers = Arc::clone(&handlers);
            subscription.join_on_connect(move |channel| handlers.join_rooms(channel));
        }

        tracing::debug!("matching: mounted");
        Self {
            handlers,
            subscription,
            leave_queue_timeout: Duration::from_secs(settings.leave_queue_timeout_secs),
        }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        self.subscription.channel()
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_active()
    }

    /// Enter the matchmaking queue.
    pub fn join_queue(&self) -> Outcome {
        let outcome = self.handlers.writer.apply(MatchInput::JoinQueue);
        log_outcome("join-queue", outcome);
        if outcome.is_applied() {
            self.channel().send_command(ClientCommand::JoinQueue);
        }
        outcome
    }

    /// Ask the server to take us out of the queue. Queue membership stays
    /// until the server confirms or the leave-queue timeout elapses.
    /// Returns `false` if not queued.
    pub fn leave_queue(&self) -> bool {
        if !self.handlers.writer.snapshot().is_queued() {
            tracing::debug!("matching: leave-queue while not queued");
            return false;
        }
        self.channel().send_command(ClientCommand::LeaveQueue);

        let epoch = self.handlers.writer.queue_epoch();
        let writer = self.handlers.writer.clone();
        let timeout = self.leave_queue_timeout;
        let spawned = std::thread::Builder::new()
            .name("leave-queue-timer".into())
            .spawn(move || {
                std::thread::sleep(timeout);
                if let Some(Outcome::Applied) =
                    writer.apply_in_queue_epoch(epoch, MatchInput::LeaveQueueTimedOut)
                {
                    tracing::info!("matching: leave-queue not confirmed, left queue locally");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("matching: failed to spawn leave-queue timer: {e}");
        }
        true
    }

    /// Accept the pending match.
    pub fn accept(&self) -> Outcome {
        let outcome = self.handlers.accept();
        log_outcome("accept", outcome);
        outcome
    }

    /// Reject the pending match. The session resets immediately.
    pub fn reject(&self) -> Outcome {
        let match_id = self.handlers.writer.current_match_id();
        let outcome = self.handlers.writer.apply(MatchInput::Reject);
        log_outcome("reject", outcome);
        if let (Outcome::Applied, Some(match_id)) = (outcome, match_id) {
            self.channel()
                .send_command(ClientCommand::RejectMatch { match_id });
        }
        outcome
    }

    /// Pass a domain action (pokemon choice, answer, ...) through unchanged.
    pub fn send_action(&self, event: &str, data: Value) {
        self.channel().emit(event, data);
    }

    /// Remove this mount's handlers. The channel stays open for others.
    pub fn unmount(mut self) {
        self.subscription.cancel();
        tracing::debug!("matching: unmounted");
    }
}
