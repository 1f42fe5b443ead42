//! Transport/retry engine: the two calls consumers use to reach the model.
//!
//! [`CompletionClient::send_batch`] returns the whole reply at once.
//! [`CompletionClient::send_stream`] returns a [`FragmentStream`] that does
//! nothing until it is polled and then yields fragments as they are decoded.
//! Both drive the same [`RetryMachine`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{extract_error_summary, format_api_error, ChatCompletionResponse};
use crate::core::error::CompletionError;
use crate::core::request::CompletionRequest;
use crate::core::stream_decoder::{DecodeResult, Fragment, StreamDecoder};
use crate::core::transport::{
    ByteStream, RetryDecision, RetryMachine, RetryPolicy, Transport,
};

pub type CompletionOutcome<T> = Result<T, CompletionError>;

/// Either the complete reply or a lazy sequence of fragments, depending on
/// the request's stream flag.
#[derive(Debug)]
pub enum CompletionResult {
    Batch(String),
    Stream(FragmentStream),
}

impl CompletionResult {
    /// Wait for the full text regardless of mode.
    pub async fn into_text(self) -> CompletionOutcome<String> {
        match self {
            CompletionResult::Batch(text) => Ok(text),
            CompletionResult::Stream(stream) => stream.collect_text().await,
        }
    }
}

#[derive(Clone)]
pub struct CompletionClient {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionClient").finish_non_exhaustive()
    }
}

impl CompletionClient {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Dispatch according to the request's stream flag.
    pub async fn complete(&self, request: CompletionRequest) -> CompletionOutcome<CompletionResult> {
        if request.is_stream() {
            self.send_stream(request).map(CompletionResult::Stream)
        } else {
            self.send_batch(&request).await.map(CompletionResult::Batch)
        }
    }

    pub async fn send_batch(&self, request: &CompletionRequest) -> CompletionOutcome<String> {
        self.send_batch_cancellable(request, CancellationToken::new())
            .await
    }

    /// Batch call that gives up with [`CompletionError::Cancelled`] as soon
    /// as `cancel` fires, including during backoff.
    pub async fn send_batch_cancellable(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> CompletionOutcome<String> {
        if request.is_stream() {
            return Err(CompletionError::ModeMismatch {
                expected: "stream",
                called: "batch",
            });
        }

        let mut machine = RetryMachine::new(RetryPolicy::for_request(request));
        loop {
            if cancel.is_cancelled() {
                machine.abandon();
                return Err(CompletionError::Cancelled);
            }

            let now = Instant::now();
            let attempt = machine.begin(now);
            let budget = machine.remaining(now);
            debug!(attempt, scenario = request.scenario(), "Sending batch request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    machine.abandon();
                    return Err(CompletionError::Cancelled);
                }
                result = timeout(budget, self.attempt_batch(request)) => {
                    result.unwrap_or_else(|_| Err(timed_out(machine.policy().timeout)))
                }
            };

            let err = match outcome {
                Ok(text) => {
                    machine.on_success();
                    return Ok(text);
                }
                Err(err) => err,
            };
            match machine.on_failure(&err, Instant::now()) {
                RetryDecision::GiveUp => return Err(err),
                RetryDecision::Retry { delay } => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            machine.abandon();
                            return Err(CompletionError::Cancelled);
                        }
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Open a stream. Nothing is sent until the returned stream is polled.
    pub fn send_stream(&self, request: CompletionRequest) -> CompletionOutcome<FragmentStream> {
        if !request.is_stream() {
            return Err(CompletionError::ModeMismatch {
                expected: "batch",
                called: "stream",
            });
        }
        Ok(FragmentStream::new(Arc::clone(&self.transport), request))
    }

    async fn attempt_batch(&self, request: &CompletionRequest) -> CompletionOutcome<String> {
        let mut body = self.transport.dispatch(request).await?;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        parse_batch_body(&bytes)
    }
}

fn parse_batch_body(bytes: &[u8]) -> CompletionOutcome<String> {
    let text = String::from_utf8_lossy(bytes);
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|err| {
        if err.is_eof() {
            CompletionError::Network("response body ended early".to_string())
        } else {
            CompletionError::InvalidResponse(format!(
                "response is not JSON: {}",
                format_api_error(&text)
            ))
        }
    })?;
    if let Some(summary) = value.get("error").and_then(|_| extract_error_summary(&value)) {
        return Err(CompletionError::InvalidResponse(format!("API error: {summary}")));
    }
    let response: ChatCompletionResponse = serde_json::from_value(value).map_err(|err| {
        CompletionError::InvalidResponse(format!("unexpected response shape: {err}"))
    })?;
    if let Some(usage) = response.usage {
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Batch response received"
        );
    }
    response
        .first_content()
        .map(str::to_string)
        .ok_or_else(|| CompletionError::InvalidResponse("response has no message content".into()))
}

fn timed_out(limit: Duration) -> CompletionError {
    CompletionError::Network(format!("request timed out after {}s", limit.as_secs()))
}

enum Phase {
    Connecting,
    Streaming(ByteStream),
    Finished,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Connecting => "connecting",
            Phase::Streaming(_) => "streaming",
            Phase::Finished => "finished",
        }
    }
}

enum Step {
    Connected(ByteStream),
    Chunk(bytes::Bytes),
    Eof,
    Failed(CompletionError),
    Cancelled,
}

/// Lazy, cancellable sequence of fragments for one streaming request.
///
/// Yields text fragments, then one fragment with `is_final == true`, then
/// `None`. A failure is yielded once as `Some(Err(_))` and the sequence
/// ends. Once a fragment has been delivered nothing is retried; later
/// failures arrive as [`CompletionError::StreamInterrupted`].
pub struct FragmentStream {
    transport: Arc<dyn Transport>,
    request: CompletionRequest,
    machine: RetryMachine,
    cancel: CancellationToken,
    phase: Phase,
    decoder: StreamDecoder,
    pending: VecDeque<DecodeResult>,
    delivered: usize,
    text: String,
}

impl fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentStream")
            .field("scenario", &self.request.scenario())
            .field("phase", &self.phase.name())
            .field("state", &self.machine.state())
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl FragmentStream {
    fn new(transport: Arc<dyn Transport>, request: CompletionRequest) -> Self {
        let machine = RetryMachine::new(RetryPolicy::for_request(&request));
        Self {
            transport,
            request,
            machine,
            cancel: CancellationToken::new(),
            phase: Phase::Connecting,
            decoder: StreamDecoder::new(),
            pending: VecDeque::new(),
            delivered: 0,
            text: String::new(),
        }
    }

    /// Token that cancels this stream from elsewhere, e.g. a signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop now: drops the response body and any pending backoff.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Text fragments handed to the caller so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Concatenation of every delivered fragment.
    pub fn full_text(&self) -> &str {
        &self.text
    }

    pub fn request(&self) -> &CompletionRequest {
        &self.request
    }

    pub async fn next(&mut self) -> Option<CompletionOutcome<Fragment>> {
        loop {
            if self.cancel.is_cancelled() {
                self.close();
                return None;
            }

            if let Some(result) = self.pending.pop_front() {
                match result {
                    Ok(fragment) => return Some(Ok(self.deliver(fragment))),
                    Err(err) => match self.on_error(err).await {
                        Some(err) => return Some(Err(err)),
                        None => continue,
                    },
                }
            }

            let step = match self.phase {
                Phase::Finished => return None,
                Phase::Connecting => self.connect().await,
                Phase::Streaming(_) => self.read().await,
            };

            match step {
                Step::Connected(body) => self.phase = Phase::Streaming(body),
                Step::Chunk(bytes) => {
                    let results = self.decoder.feed(&bytes);
                    self.pending.extend(results);
                }
                Step::Eof => {
                    self.phase = Phase::Finished;
                    let results = self.decoder.finish();
                    self.pending.extend(results);
                    if !self.decoder.is_finished() {
                        self.pending.push_back(Err(CompletionError::Network(
                            "stream ended before the completion marker".to_string(),
                        )));
                    }
                }
                Step::Failed(err) => {
                    if let Some(err) = self.on_error(err).await {
                        return Some(Err(err));
                    }
                }
                Step::Cancelled => {
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Drain the stream into one string. Stops at the terminal fragment.
    pub async fn collect_text(mut self) -> CompletionOutcome<String> {
        while let Some(item) = self.next().await {
            if item?.is_final {
                return Ok(self.text);
            }
        }
        if self.cancel.is_cancelled() {
            Err(CompletionError::Cancelled)
        } else {
            Ok(self.text)
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = CompletionOutcome<Fragment>> + Send + 'static {
        futures_util::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }

    fn deliver(&mut self, fragment: Fragment) -> Fragment {
        // The retry sequence ends with the first thing the caller sees.
        if self.delivered == 0 {
            self.machine.on_success();
        }
        if fragment.is_final {
            debug!(
                fragments = self.delivered,
                chars = self.text.chars().count(),
                "Stream completed"
            );
            self.phase = Phase::Finished;
            self.pending.clear();
        } else {
            self.delivered += 1;
            self.text.push_str(&fragment.text);
        }
        fragment
    }

    /// Returns the error to surface, or `None` when a retry has been
    /// scheduled (or the stream was cancelled while waiting for it).
    async fn on_error(&mut self, err: CompletionError) -> Option<CompletionError> {
        self.pending.clear();
        self.phase = Phase::Finished;

        if self.delivered > 0 {
            self.machine.abandon();
            debug!(delivered = self.delivered, error = %err, "Stream interrupted");
            return Some(CompletionError::interrupted(self.delivered, err));
        }

        match self.machine.on_failure(&err, Instant::now()) {
            RetryDecision::GiveUp => Some(err),
            RetryDecision::Retry { delay } => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => self.close(),
                    _ = sleep(delay) => {
                        self.decoder = StreamDecoder::new();
                        self.phase = Phase::Connecting;
                    }
                }
                None
            }
        }
    }

    async fn connect(&mut self) -> Step {
        let now = Instant::now();
        let attempt = self.machine.begin(now);
        let budget = self.machine.remaining(now);
        let limit = self.machine.policy().timeout;
        debug!(attempt, scenario = self.request.scenario(), "Opening completion stream");

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Cancelled,
            result = timeout(budget, self.transport.dispatch(&self.request)) => match result {
                Ok(Ok(body)) => Step::Connected(body),
                Ok(Err(err)) => Step::Failed(err),
                Err(_) => Step::Failed(timed_out(limit)),
            },
        }
    }

    async fn read(&mut self) -> Step {
        // The deadline only guards the wait for the first fragment.
        let budget = (self.delivered == 0).then(|| self.machine.remaining(Instant::now()));
        let limit = self.machine.policy().timeout;
        let Phase::Streaming(body) = &mut self.phase else {
            return Step::Eof;
        };
        let next_chunk = async {
            match budget {
                Some(budget) => timeout(budget, body.next()).await.ok(),
                None => Some(body.next().await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Cancelled,
            chunk = next_chunk => match chunk {
                Some(Some(Ok(bytes))) => Step::Chunk(bytes),
                Some(Some(Err(err))) => Step::Failed(err),
                Some(None) => Step::Eof,
                None => Step::Failed(timed_out(limit)),
            },
        }
    }

    fn close(&mut self) {
        if !matches!(self.phase, Phase::Finished) {
            debug!(delivered = self.delivered, "Stream closed");
        }
        self.phase = Phase::Finished;
        self.pending.clear();
        self.machine.abandon();
    }
}
