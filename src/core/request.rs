use std::time::Duration;

use crate::api::ChatRequest;
use crate::core::error::CompletionError;
use crate::core::message::Conversation;
use crate::core::scenario::{clamp_max_tokens, clamp_temperature, ConfigIssue, ScenarioConfig};

/// A conversation snapshot bound to one scenario's parameters. Built per call
/// and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    payload: ChatRequest,
    scenario: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    adjustments: Vec<ConfigIssue>,
}

impl CompletionRequest {
    pub fn payload(&self) -> &ChatRequest {
        &self.payload
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn is_stream(&self) -> bool {
        self.payload.stream
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Values that were out of range and clamped while building.
    pub fn adjustments(&self) -> &[ConfigIssue] {
        &self.adjustments
    }
}

/// Combine a conversation with a scenario's parameters.
///
/// The conversation must contain at least one turn. Temperature and
/// max_tokens are clamped rather than rejected; each adjustment is logged
/// and kept in [`CompletionRequest::adjustments`]. No I/O happens here.
pub fn build(
    conversation: &Conversation,
    scenario: &ScenarioConfig,
) -> Result<CompletionRequest, CompletionError> {
    if conversation.is_empty() {
        return Err(CompletionError::EmptyConversation);
    }

    let (temperature, temperature_issue) = clamp_temperature(scenario.temperature);
    let (max_tokens, max_tokens_issue) = clamp_max_tokens(scenario.max_tokens);
    let adjustments: Vec<ConfigIssue> = [temperature_issue, max_tokens_issue]
        .into_iter()
        .flatten()
        .collect();
    for issue in &adjustments {
        issue.log(&scenario.name);
    }

    let payload = ChatRequest {
        model: scenario.model.clone(),
        messages: conversation.turns().iter().map(|turn| turn.to_api()).collect(),
        temperature,
        max_tokens,
        stream: scenario.stream,
    };

    Ok(CompletionRequest {
        payload,
        scenario: scenario.name.clone(),
        timeout: scenario.timeout,
        max_retries: scenario.max_retries,
        retry_delay: scenario.retry_delay,
        adjustments,
    })
}
