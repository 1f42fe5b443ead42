//! Transport seam between the retry engine and the network.
//!
//! A [`Transport`] performs one attempt: it sends the request and hands back
//! the response body as a stream of byte chunks, or a classified
//! [`CompletionError`]. Retrying, decoding and cancellation live above it in
//! [`crate::core::client`].

pub mod http;
pub mod retry;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::core::error::CompletionError;
use crate::core::request::CompletionRequest;

pub use http::HttpTransport;
pub use retry::{RetryDecision, RetryMachine, RetryPolicy, RetryState};

/// Response body of a successful dispatch. Dropping it closes the
/// underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, CompletionError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, request: &CompletionRequest) -> Result<ByteStream, CompletionError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::api::ChatRequest;
    use futures_util::{stream, StreamExt};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// One scripted reply to a dispatch.
    pub(crate) enum Reply {
        Fail(CompletionError),
        /// Body chunks; when `hang` is set the body never ends after them.
        Body {
            chunks: Vec<Result<Bytes, CompletionError>>,
            hang: bool,
        },
    }

    impl Reply {
        pub(crate) fn body<S: AsRef<str>>(chunks: &[S]) -> Self {
            Reply::Body {
                chunks: chunks
                    .iter()
                    .map(|chunk| Ok(Bytes::from(chunk.as_ref().to_string())))
                    .collect(),
                hang: false,
            }
        }

        pub(crate) fn hanging<S: AsRef<str>>(chunks: &[S]) -> Self {
            match Reply::body(chunks) {
                Reply::Body { chunks, .. } => Reply::Body { chunks, hang: true },
                fail => fail,
            }
        }

        /// A connection that never produces a byte.
        pub(crate) fn stalled() -> Self {
            Reply::Body {
                chunks: Vec::new(),
                hang: true,
            }
        }
    }

    pub(crate) fn sse_delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": text } }] })
        )
    }

    /// A complete event-stream body ending with the completion marker.
    pub(crate) fn sse_body(parts: &[&str]) -> String {
        let mut body: String = parts.iter().map(|part| sse_delta(part)).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    pub(crate) fn batch_body(text: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
        })
        .to_string()
    }

    /// In-memory transport that replays a script and records what it saw.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Reply>>,
        fallback: Option<CompletionError>,
        dispatches: AtomicUsize,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Self::default()
            }
        }

        pub(crate) fn always_failing(err: CompletionError) -> Self {
            Self {
                fallback: Some(err),
                ..Self::default()
            }
        }

        pub(crate) fn dispatches(&self) -> usize {
            self.dispatches.load(Ordering::SeqCst)
        }

        pub(crate) fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn dispatch(
            &self,
            request: &CompletionRequest,
        ) -> Result<ByteStream, CompletionError> {
            self.dispatches.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.payload().clone());
            let reply = self.script.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::Body { chunks, hang }) => {
                    let body = stream::iter(chunks);
                    if hang {
                        Ok(Box::pin(body.chain(stream::pending())))
                    } else {
                        Ok(Box::pin(body))
                    }
                }
                None => Err(self.fallback.clone().unwrap_or_else(|| {
                    CompletionError::InvalidResponse("script exhausted".to_string())
                })),
            }
        }
    }
}
