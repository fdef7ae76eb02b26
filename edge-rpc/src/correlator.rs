//! Matching inbound responses to the pending requests that produced them.
use std::time::Duration;

use crate::clock::Clock;
use crate::handler::Outcome;
use crate::registry::{MessageRegistry, PendingRequest};
use crate::types::{Id, JsonValue};

/// What became of one inbound response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Correlation {
    /// A pending request matched; its callback ran and the entry was released.
    Completed {
        id: Id,
        outcome: Outcome,
        /// How long the callback took
        elapsed: Duration,
        /// Whether `elapsed` exceeded the configured warning threshold
        slow: bool,
    },
    /// Nothing matched.  `id` is `None` when the response didn't carry a usable id at all.
    ///
    /// This is not an error: late responses to cancelled requests and duplicate responses are
    /// expected on a long-lived connection.
    Unmatched { id: Option<Id> },
}

impl Correlation {
    pub fn is_match(&self) -> bool {
        matches!(self, Correlation::Completed { .. })
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Correlation::Completed { outcome, .. } => Some(*outcome),
            Correlation::Unmatched { .. } => None,
        }
    }
}

/// Find the request a response belongs to, run its callback, and release it.
pub(crate) fn handle_response<C>(
    registry: &mut MessageRegistry<C>,
    clock: &dyn Clock,
    warn_threshold: Duration,
    response: &JsonValue,
) -> Correlation {
    let Some(id) = Id::of_message(response) else {
        tracing::error!("Can't find id in response; it cannot be matched to any request");
        return Correlation::Unmatched { id: None };
    };

    let Some(entry) = registry.remove(&id) else {
        tracing::warn!(request_id = %id,
            "Did not find any matching request for the response.  \
                Perhaps this request was previously cancelled.");
        return Correlation::Unmatched { id: Some(id) };
    };

    let PendingRequest {
        id,
        payload,
        handler,
        mut context,
    } = entry;
    let outcome = Outcome::of_response(response);

    let begin = clock.now();
    handler.complete(outcome, response, context.get_mut());
    let elapsed = clock.now().saturating_sub(begin);

    tracing::debug!(request_id = %id, ?outcome, ?elapsed, "Response callback completed");
    let slow = elapsed > warn_threshold;
    if slow {
        tracing::warn!(request_id = %id,
            threshold = ?warn_threshold,
            ?elapsed,
            "Response callback processing took more than {} ms to run, actual call took {} ms",
            warn_threshold.as_millis(),
            elapsed.as_millis());
    }

    // Release the request now that its callback is done, before reporting back
    drop(payload);
    drop(context);

    Correlation::Completed {
        id,
        outcome,
        elapsed,
        slow,
    }
}
