//! User-facing chat copy. Reason codes never reach the chat surface; only these strings do.

use crate::{MatchOutcome, NoMatchReason};

pub const BLANK_MESSAGE_REPLY: &str = "Please type a question so I can help you 😊";

pub const UNINTELLIGIBLE_REPLY: &str =
    "I couldn't understand the question clearly. Please rephrase your query with a few more words.";

pub const NO_SCOPED_CANDIDATES_REPLY: &str = "I couldn't find any information for this query. Please contact your department office for more details.";

pub const LOW_CONFIDENCE_REPLY: &str = "I couldn't find an exact answer for that. Please check with your department office or try asking in a different way.";

/// Infrastructure failure (storage unreachable and similar); never a matcher outcome.
pub const SERVER_ERROR_REPLY: &str = "Something went wrong on the server. Please try again later.";

#[must_use]
pub fn reason_reply(reason: NoMatchReason) -> &'static str {
    match reason {
        NoMatchReason::EmptyQuery => UNINTELLIGIBLE_REPLY,
        NoMatchReason::NoScopedCandidates => NO_SCOPED_CANDIDATES_REPLY,
        NoMatchReason::LowConfidence => LOW_CONFIDENCE_REPLY,
    }
}

/// Reply text for one chat turn. A blank message gets a gentler prompt than an unintelligible one.
#[must_use]
pub fn reply_for(message: &str, outcome: &MatchOutcome) -> String {
    match outcome {
        MatchOutcome::Matched { answer, .. } => answer.clone(),
        MatchOutcome::NotMatched { reason: NoMatchReason::EmptyQuery }
            if message.trim().is_empty() =>
        {
            BLANK_MESSAGE_REPLY.to_string()
        }
        MatchOutcome::NotMatched { reason } => reason_reply(*reason).to_string(),
    }
}
