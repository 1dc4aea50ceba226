use std::future::Future;

use bytes::Bytes;
use dashboard_logging::{dash_debug, dash_warn};
use encoding_rs::{CoderResult, Decoder, UTF_8};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{FailureKind, RequestError};

/// A response body as handed over by the transport.
pub enum ResponseBody {
    /// Chunks are delivered as they arrive.
    Incremental(BoxStream<'static, Result<Bytes, RequestError>>),
    /// The transport can only hand over the complete body.
    Whole(BoxFuture<'static, Result<Bytes, RequestError>>),
}

impl ResponseBody {
    pub fn incremental<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, RequestError>> + Send + 'static,
    {
        ResponseBody::Incremental(chunks.boxed())
    }

    pub fn whole<F>(body: F) -> Self
    where
        F: Future<Output = Result<Bytes, RequestError>> + Send + 'static,
    {
        ResponseBody::Whole(body.boxed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub text: String,
    /// The reader stopped early; `text` holds what arrived until then.
    pub cancelled: bool,
}

/// Accumulates the decoded text of one generation. Append-only until
/// finished; not reused afterwards.
pub struct StreamSession {
    buffer: String,
    decoder: Decoder,
    finished: bool,
    replaced: bool,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self {
            buffer: String::new(),
            decoder: UTF_8.new_decoder_with_bom_removal(),
            finished: false,
            replaced: false,
        }
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decodes `bytes` onto the buffer. A multi-byte sequence split across
    /// chunks is held back until its remaining bytes arrive. Returns whether
    /// any text was appended.
    pub fn push(&mut self, bytes: &[u8]) -> Result<bool, RequestError> {
        self.decode(bytes, false)
    }

    /// Flushes a dangling partial sequence (as U+FFFD) and closes the session.
    /// Returns whether the flush appended text.
    pub fn finish(&mut self) -> Result<bool, RequestError> {
        let appended = self.decode(&[], true)?;
        self.finished = true;
        if self.replaced {
            dash_warn!("streamed body contained invalid UTF-8; replaced with U+FFFD");
        }
        Ok(appended)
    }

    pub fn into_text(self) -> String {
        self.buffer
    }

    fn decode(&mut self, mut input: &[u8], last: bool) -> Result<bool, RequestError> {
        let before = self.buffer.len();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .ok_or_else(|| RequestError::new(FailureKind::Decode, "stream chunk too large"))?;
            self.buffer.reserve(needed);
            let (result, read, replaced) =
                self.decoder.decode_to_string(input, &mut self.buffer, last);
            self.replaced |= replaced;
            input = &input[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
        Ok(self.buffer.len() != before)
    }
}

/// Reads `body` to the end, reporting the growing text through `on_chunk`.
///
/// When `cancel` fires, reading stops and the text received so far is returned
/// with `cancelled = true`; `on_chunk` is not called again.
pub async fn consume<F>(
    body: ResponseBody,
    mut on_chunk: F,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, RequestError>
where
    F: FnMut(&str),
{
    let mut session = StreamSession::new();
    let incremental = matches!(body, ResponseBody::Incremental(_));

    match body {
        ResponseBody::Incremental(mut chunks) => loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(cancelled(session)),
                next = chunks.next() => next,
            };
            match next {
                Some(Ok(bytes)) => {
                    if session.push(&bytes)? {
                        on_chunk(session.buffer());
                    }
                }
                Some(Err(err)) if err.is_aborted() => return Ok(cancelled(session)),
                Some(Err(err)) => return Err(err),
                None => break,
            }
        },
        ResponseBody::Whole(body) => {
            let bytes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(cancelled(session)),
                bytes = body => bytes,
            };
            match bytes {
                Ok(bytes) => {
                    session.push(&bytes)?;
                }
                Err(err) if err.is_aborted() => return Ok(cancelled(session)),
                Err(err) => return Err(err),
            }
        }
    }

    let flushed = session.finish()?;
    // Whole bodies are reported once here, as a single chunk.
    if flushed || (!incremental && !session.buffer().is_empty()) {
        on_chunk(session.buffer());
    }
    Ok(StreamOutcome {
        text: session.into_text(),
        cancelled: false,
    })
}

fn cancelled(session: StreamSession) -> StreamOutcome {
    dash_debug!("stream cancelled after {} bytes of text", session.buffer().len());
    StreamOutcome {
        text: session.into_text(),
        cancelled: true,
    }
}
