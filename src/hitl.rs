//! Human-in-the-loop coordination.
//!
//! The coordinator sits between external delivery systems (chat UIs,
//! ticketing, email) and the runner: it owns the stable tool-call id
//! scheme, validates incoming [`HumanResponse`]s against the options the
//! paused tool call declared, and drives [`GraphRunner::resume`]. The
//! runner knows nothing about it — resume is a plain external call, so
//! there is no cycle between the two.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::graph::Graph;
use crate::message::HitlKind;
use crate::runtimes::runner::{GraphRunner, RunOutcome, RunnerError};

/// Stable HITL tool-call identifier.
///
/// A pure function of its inputs: retries of the same invocation reuse the
/// index and therefore the id; loop re-entry allocates a fresh index.
#[must_use]
pub fn tool_call_id(run_id: &str, node_id: &str, invocation_index: u64) -> String {
    format!("hitl_{run_id}_{node_id}_{invocation_index}")
}

/// A human's answer to a HITL tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HumanResponse {
    pub tool_call_id: String,
    /// Canonical option picked, for `Selection` calls.
    #[serde(default)]
    pub canonical: Option<String>,
    /// Free-form answer, for `FreeText` calls.
    #[serde(default)]
    pub text: Option<String>,
    /// Verdict, for `Confirmation` calls.
    #[serde(default)]
    pub approved: Option<bool>,
    /// Merged into the run context on resume so downstream nodes see it.
    #[serde(default)]
    pub metadata: FxHashMap<String, Value>,
}

impl HumanResponse {
    #[must_use]
    pub fn selection(tool_call_id: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            canonical: Some(canonical.into()),
            text: None,
            approved: None,
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn confirmation(tool_call_id: impl Into<String>, approved: bool) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            canonical: None,
            text: None,
            approved: Some(approved),
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn free_text(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            canonical: None,
            text: Some(text.into()),
            approved: None,
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The answer as a JSON payload, used as the synthesized node result.
    #[must_use]
    pub fn payload(&self) -> Value {
        json!({
            "tool_call_id": self.tool_call_id,
            "canonical": self.canonical,
            "text": self.text,
            "approved": self.approved,
        })
    }
}

/// How strictly incoming responses are checked against the declared call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseValidation {
    /// Selections must name one of the declared options (default).
    #[default]
    Strict,
    /// Accept any response shape.
    Lenient,
}

/// Coordinator failures.
#[derive(Debug, Error, Diagnostic)]
pub enum HitlError {
    #[error("checkpoint {checkpoint_id} has no pending tool call {tool_call_id}")]
    #[diagnostic(
        code(spiceflow::hitl::unknown_tool_call),
        help("The response may target an older invocation; fetch the latest checkpoint for the run.")
    )]
    UnknownToolCall {
        checkpoint_id: String,
        tool_call_id: String,
    },

    #[error("selection `{canonical}` is not one of the declared options {options:?}")]
    #[diagnostic(
        code(spiceflow::hitl::invalid_selection),
        help("Send one of the declared canonical options, or configure lenient validation.")
    )]
    InvalidSelection {
        canonical: String,
        options: Vec<String>,
    },

    #[error("selection response is missing a canonical option")]
    #[diagnostic(code(spiceflow::hitl::missing_selection))]
    MissingSelection,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runner(#[from] RunnerError),
}

/// Port for external systems to deliver human responses.
pub struct HitlCoordinator {
    runner: Arc<GraphRunner>,
    store: Arc<dyn CheckpointStore>,
    validation: ResponseValidation,
}

impl HitlCoordinator {
    #[must_use]
    pub fn new(runner: Arc<GraphRunner>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            runner,
            store,
            validation: ResponseValidation::default(),
        }
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ResponseValidation) -> Self {
        self.validation = validation;
        self
    }

    /// Validate a response against the parked tool call, then resume.
    pub async fn deliver(
        &self,
        graph: &Graph,
        checkpoint_id: &str,
        response: HumanResponse,
    ) -> Result<RunOutcome, HitlError> {
        let checkpoint = self.store.load(checkpoint_id).await?;
        let call = checkpoint
            .message
            .tool_calls
            .iter()
            .find(|c| c.id == response.tool_call_id)
            .ok_or_else(|| HitlError::UnknownToolCall {
                checkpoint_id: checkpoint_id.to_string(),
                tool_call_id: response.tool_call_id.clone(),
            })?;

        if self.validation == ResponseValidation::Strict && call.kind == Some(HitlKind::Selection) {
            let options: Vec<String> = call
                .arguments
                .get("options")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            match &response.canonical {
                Some(canonical) if options.iter().any(|o| o == canonical) => {}
                Some(canonical) => {
                    return Err(HitlError::InvalidSelection {
                        canonical: canonical.clone(),
                        options,
                    });
                }
                None => return Err(HitlError::MissingSelection),
            }
        }

        Ok(self.runner.resume(graph, checkpoint_id, response).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_id_is_a_pure_function() {
        assert_eq!(tool_call_id("r1", "H", 0), "hitl_r1_H_0");
        assert_eq!(tool_call_id("r1", "H", 0), tool_call_id("r1", "H", 0));
        assert_ne!(tool_call_id("r1", "H", 0), tool_call_id("r1", "H", 1));
    }

    #[test]
    fn response_payload_carries_the_answer() {
        let response = HumanResponse::selection("hitl_r_H_0", "approve");
        let payload = response.payload();
        assert_eq!(payload["canonical"], json!("approve"));
        assert_eq!(payload["approved"], json!(null));
    }
}
