//! Completion callbacks attached to each outgoing request.
//!
//! Every request carries exactly one [`ResponseHandler`], a pair of callbacks of which exactly one
//! runs when the response arrives.  Both are `FnOnce` and the pair is consumed by the single
//! call site, [`ResponseHandler::complete`], so "never both, never twice" holds by construction.
use std::fmt;

use crate::types::JsonValue;

/// Callback invoked with the response payload and the request's context.
pub type ResponseCallback<C> = Box<dyn FnOnce(&JsonValue, &mut C) + Send + 'static>;

/// How a correlated response concluded, decided purely by the payload shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The response carried a `result` field
    Success,
    /// The response had no `result` field; details are presumably under `error`
    Failure,
}

impl Outcome {
    /// Classify a response.  Presence of `result` is all that counts, whatever its value.
    pub fn of_response(response: &JsonValue) -> Self {
        if response.get("result").is_some() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// The success/failure callback pair of one pending request.
pub struct ResponseHandler<C> {
    on_success: ResponseCallback<C>,
    on_failure: ResponseCallback<C>,
}

impl<C> ResponseHandler<C> {
    pub fn new(
        on_success: impl FnOnce(&JsonValue, &mut C) + Send + 'static,
        on_failure: impl FnOnce(&JsonValue, &mut C) + Send + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    /// A handler that does nothing either way.
    pub fn ignore() -> Self {
        Self::new(|_, _| {}, |_, _| {})
    }

    /// Run the callback matching `outcome`, consuming the pair.
    pub fn complete(self, outcome: Outcome, response: &JsonValue, context: &mut C) {
        let callback = match outcome {
            Outcome::Success => self.on_success,
            Outcome::Failure => self.on_failure,
        };
        callback(response, context);
    }
}

impl<C> fmt::Debug for ResponseHandler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_depends_only_on_result_presence() {
        assert_eq!(Outcome::of_response(&json!({"id": "1", "result": {}})), Outcome::Success);
        assert_eq!(Outcome::of_response(&json!({"id": "1", "result": null})), Outcome::Success);
        assert_eq!(
            Outcome::of_response(&json!({"id": "1", "error": {"code": -30000, "message": "x"}})),
            Outcome::Failure
        );
        assert_eq!(Outcome::of_response(&json!({"id": "1"})), Outcome::Failure);
    }

    #[test]
    fn test_only_matching_callback_runs() {
        let handler = ResponseHandler::new(
            |_, calls: &mut Vec<&'static str>| calls.push("success"),
            |_, calls: &mut Vec<&'static str>| calls.push("failure"),
        );
        let mut calls = Vec::new();
        handler.complete(Outcome::Failure, &json!({"id": "1", "error": {}}), &mut calls);
        assert_eq!(calls, vec!["failure"]);

        let handler = ResponseHandler::new(
            |response: &JsonValue, calls: &mut Vec<&'static str>| {
                assert_eq!(response["result"], json!(5));
                calls.push("success")
            },
            |_, calls: &mut Vec<&'static str>| calls.push("failure"),
        );
        let mut calls = Vec::new();
        handler.complete(Outcome::Success, &json!({"id": "1", "result": 5}), &mut calls);
        assert_eq!(calls, vec!["success"]);
    }
}
