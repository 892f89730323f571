//! Stream Pipeline: same routing as the dispatcher, but opens a streaming
//! POST and frames the body as newline-delimited JSON.
//!
//! Accumulates a byte buffer across chunks and splits on `\n`, the same
//! technique an SSE reader uses for `\n\n`-delimited events, adapted here to
//! `\n`-delimited JSON envelopes and implemented with `async-stream` rather
//! than a hand-written `Stream`/`poll_next` impl.

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::HubError;
use crate::registry::ToolRegistry;
use crate::rpc::{ResponseShape, RpcRequest};
use crate::upstream::UpstreamManager;

/// One unit emitted by a streaming call.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A line that parsed with a `result` field.
    Success(Value),
    /// Terminal: either the upstream reported a JSON-RPC `error`, the
    /// unary setup failed (unknown tool, server unavailable, non-200), or a
    /// transport error occurred mid-stream. No further chunks follow.
    Failure(HubError),
    /// A line that parsed as JSON but carried neither `result` nor `error`,
    /// or that failed to parse at all; forwarded unchanged.
    Raw(String),
}

enum LineOutcome {
    Chunk(StreamChunk),
    Terminal(StreamChunk),
}

fn process_line(line: &str) -> LineOutcome {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => match ResponseShape::classify(value) {
            ResponseShape::Error { message } => {
                LineOutcome::Terminal(StreamChunk::Failure(HubError::UpstreamError(message)))
            }
            ResponseShape::Result { value, .. } => LineOutcome::Chunk(StreamChunk::Success(value)),
            ResponseShape::Bare(_) => LineOutcome::Chunk(StreamChunk::Raw(line.to_string())),
        },
        Err(_) => LineOutcome::Chunk(StreamChunk::Raw(line.to_string())),
    }
}

/// Streams a call to `qualified_name`. Dropping the returned stream before
/// it completes drops the underlying HTTP response body, closing the
/// upstream connection promptly.
pub fn call_streaming(
    registry: ToolRegistry,
    upstreams: UpstreamManager,
    qualified_name: String,
    arguments: Value,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    stream! {
        let Some(entry) = registry.lookup(&qualified_name).await else {
            yield StreamChunk::Failure(HubError::UnknownTool(qualified_name.clone()));
            return;
        };

        let Some(handle) = upstreams.dispatch_handle(&entry.owner).await else {
            yield StreamChunk::Failure(HubError::ServerUnavailable(entry.owner.clone()));
            return;
        };

        let req = RpcRequest::new(
            handle.request_id,
            "tools/call",
            serde_json::json!({ "name": entry.local_name, "arguments": arguments }),
        );

        let resp = match handle.client.post(&handle.endpoint).json(&req).send().await {
            Ok(resp) => resp,
            Err(e) => {
                yield StreamChunk::Failure(HubError::TransportError(e.to_string()));
                return;
            }
        };

        if !resp.status().is_success() {
            yield StreamChunk::Failure(HubError::TransportError(format!(
                "non-200 response: {}",
                resp.status()
            )));
            return;
        }

        let mut byte_stream = resp.bytes_stream();
        let mut buffer = String::new();

        loop {
            match byte_stream.next().await {
                Some(Ok(bytes)) => {
                    match std::str::from_utf8(&bytes) {
                        Ok(s) => buffer.push_str(s),
                        Err(_) => {
                            yield StreamChunk::Failure(HubError::FramingError(
                                "chunk was not valid UTF-8".to_string(),
                            ));
                            return;
                        }
                    }

                    let mut terminated = false;
                    while let Some(idx) = buffer.find('\n') {
                        let line = buffer[..idx].to_string();
                        buffer.drain(..=idx);
                        if line.trim().is_empty() {
                            continue;
                        }
                        match process_line(&line) {
                            LineOutcome::Chunk(chunk) => yield chunk,
                            LineOutcome::Terminal(chunk) => {
                                yield chunk;
                                terminated = true;
                                break;
                            }
                        }
                    }
                    if terminated {
                        return;
                    }
                }
                Some(Err(e)) => {
                    yield StreamChunk::Failure(HubError::TransportError(e.to_string()));
                    return;
                }
                None => break,
            }
        }

        let remainder = buffer.trim();
        if !remainder.is_empty() {
            match process_line(remainder) {
                LineOutcome::Chunk(chunk) | LineOutcome::Terminal(chunk) => yield chunk,
            }
        }
    }
}
