//! Line commands and rendering for the `play` console.

use std::fmt;

use matchsync::{AcceptanceStatus, MatchPhase, MatchSession, Toast};

pub const HELP: &str = "commands: queue | leave | accept | reject | dismiss <id> | status | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Queue,
    Leave,
    Accept,
    Reject,
    Dismiss(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::Unknown(word) => write!(f, "unknown command '{word}'"),
            Self::MissingArgument(what) => write!(f, "missing argument: {what}"),
        }
    }
}

impl std::error::Error for ParseError {}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err(ParseError::Empty);
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "queue" | "q" => Self::Queue,
            "leave" | "l" => Self::Leave,
            "accept" | "a" => Self::Accept,
            "reject" | "r" => Self::Reject,
            "dismiss" | "d" => match words.next() {
                Some(id) => Self::Dismiss(id.to_string()),
                None => return Err(ParseError::MissingArgument("notification id")),
            },
            "status" | "s" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// One-line summary of a session snapshot.
pub fn describe(session: &MatchSession) -> String {
    let opponent = session
        .opponent
        .as_ref()
        .map(|o| o.name.as_str())
        .unwrap_or("?");
    match session.phase {
        MatchPhase::NoActiveMatch if session.queue_membership => "in queue...".to_string(),
        MatchPhase::NoActiveMatch => "idle".to_string(),
        MatchPhase::MatchFound => match session.acceptance_status {
            Some(AcceptanceStatus::Accept) => format!("accepted match vs {opponent}, waiting"),
            Some(AcceptanceStatus::Reject) => format!("rejected match vs {opponent}"),
            None => format!("match found vs {opponent}: accept or reject?"),
        },
        MatchPhase::RoundStarting => match &session.round_starting {
            Some(round) => {
                let message = round.message.as_deref().unwrap_or("get ready");
                format!(
                    "round {} starts in {}s ({message})",
                    round.round_number, round.delay_seconds
                )
            }
            None => format!("round {} starting", session.current_round),
        },
        MatchPhase::RoundSelectingPokemon => {
            format!("round {}: choose your pokemon", session.current_round)
        }
        MatchPhase::RoundInProgress => format!("round {} vs {opponent}", session.current_round),
        MatchPhase::BetweenRounds => format!("round {} over", session.current_round),
    }
}

pub fn describe_toast(toast: &Toast) -> String {
    let n = &toast.notification;
    if n.body.is_empty() {
        format!("[{}] {} (id {})", n.kind, n.title, n.notification_id)
    } else {
        format!("[{}] {}: {} (id {})", n.kind, n.title, n.body, n.notification_id)
    }
}
