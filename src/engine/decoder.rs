//! Per-stream CLC decoder
//!
//! One decoder consumes one reassembled stream. It waits for the first 8
//! bytes, checks the eyecatcher, reports the header if it matches, and then
//! drains the stream to end-of-stream without looking at it again.
//!
//! ```text
//!                    +--> Decoded    (eyecatcher matched, reported)
//!   Accumulating ----+--> Abandoned  (mismatch, overflow, stream errors)
//!                    +--> Closed     (end-of-stream before 8 bytes)
//! ```

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::DecoderConfig;
use crate::core::flow::StreamKey;
use crate::reassembly::{StreamError, StreamReader};
use crate::smc::{ClcHeader, CLC_HEADER_LEN};

/// Why a decoder gave up on its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// First 4 bytes were not the SMC eyecatcher
    BadEyecatcher,
    /// Scratch buffer filled up before a header could be judged
    Overflow,
    /// Too many consecutive read errors on the stream
    StreamErrors,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::BadEyecatcher => write!(f, "bad eyecatcher"),
            AbandonReason::Overflow => write!(f, "scratch buffer overflow"),
            AbandonReason::StreamErrors => write!(f, "stream errors"),
        }
    }
}

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Accumulating,
    Decoded(ClcHeader),
    Abandoned(AbandonReason),
    /// Stream ended before a header could be judged
    Closed,
}

impl DecoderState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecoderState::Accumulating)
    }
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderState::Accumulating => write!(f, "ACCUMULATING"),
            DecoderState::Decoded(_) => write!(f, "DECODED"),
            DecoderState::Abandoned(reason) => write!(f, "ABANDONED ({})", reason),
            DecoderState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A decoded handshake header and the stream it was found on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReport {
    pub stream: StreamKey,
    pub header: ClcHeader,
}

impl fmt::Display for HandshakeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SMC flow: {} {}", self.stream, self.header)
    }
}

/// Final result of a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOutcome {
    pub stream: StreamKey,
    pub state: DecoderState,
    /// Every data byte read from the stream, drained bytes included
    pub bytes_received: u64,
}

impl DecodeOutcome {
    pub fn header(&self) -> Option<&ClcHeader> {
        match &self.state {
            DecoderState::Decoded(header) => Some(header),
            _ => None,
        }
    }
}

/// Messages from decoder tasks to the collector
#[derive(Debug, Clone)]
pub enum DecoderEvent {
    /// Sent as soon as a header is decoded
    Report(HandshakeReport),
    /// Sent once the stream has been drained
    Finished(DecodeOutcome),
}

/// State machine for one stream
#[derive(Debug)]
pub struct FlowDecoder {
    stream: StreamKey,
    buf: Vec<u8>,
    capacity: usize,
    received: u64,
    state: DecoderState,
    consecutive_errors: u32,
    max_stream_errors: u32,
}

impl FlowDecoder {
    pub fn new(stream: StreamKey, config: &DecoderConfig) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(config.scratch_capacity.min(CLC_HEADER_LEN)),
            capacity: config.scratch_capacity,
            received: 0,
            state: DecoderState::Accumulating,
            consecutive_errors: 0,
            max_stream_errors: config.max_stream_errors,
        }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Consume a chunk of stream data
    pub fn feed(&mut self, chunk: &[u8]) {
        self.received += chunk.len() as u64;
        if self.state.is_terminal() {
            return;
        }
        self.consecutive_errors = 0;

        let room = self.capacity.saturating_sub(self.buf.len());
        let take = room.min(chunk.len());
        self.buf.extend_from_slice(&chunk[..take]);

        if self.buf.len() >= CLC_HEADER_LEN {
            self.state = match ClcHeader::parse(&self.buf) {
                Some(header) => DecoderState::Decoded(header),
                None => {
                    trace!("{}: no eyecatcher, abandoning", self.stream);
                    DecoderState::Abandoned(AbandonReason::BadEyecatcher)
                }
            };
        } else if self.buf.len() >= self.capacity && take < chunk.len() {
            warn!(
                "{}: scratch buffer ({} bytes) full before header complete",
                self.stream, self.capacity
            );
            self.state = DecoderState::Abandoned(AbandonReason::Overflow);
        }
    }

    /// Record a read error. Only errors while accumulating count towards the
    /// limit, and any data in between resets the count.
    pub fn stream_error(&mut self, err: &StreamError) {
        if self.state.is_terminal() {
            debug!("{}: {} while draining", self.stream, err);
            return;
        }

        self.consecutive_errors += 1;
        warn!(
            "{}: error reading stream: {} ({}/{})",
            self.stream, err, self.consecutive_errors, self.max_stream_errors
        );
        if self.consecutive_errors >= self.max_stream_errors {
            self.state = DecoderState::Abandoned(AbandonReason::StreamErrors);
        }
    }

    /// The stream has ended
    pub fn end_of_stream(&mut self) {
        if !self.state.is_terminal() {
            trace!("{}: closed after {} bytes", self.stream, self.received);
            self.state = DecoderState::Closed;
        }
    }

    /// Drive the decoder over a stream until end-of-stream.
    ///
    /// A report is sent on `events` as soon as a header is decoded, and the
    /// outcome once the stream has been drained.
    pub async fn run(
        mut self,
        mut reader: StreamReader,
        events: mpsc::UnboundedSender<DecoderEvent>,
    ) -> DecodeOutcome {
        while !self.state.is_terminal() {
            match reader.read().await {
                Some(Ok(chunk)) => self.feed(&chunk),
                Some(Err(err)) => self.stream_error(&err),
                None => self.end_of_stream(),
            }
        }

        if let DecoderState::Decoded(header) = self.state {
            let _ = events.send(DecoderEvent::Report(HandshakeReport {
                stream: self.stream,
                header,
            }));
        }

        if self.state != DecoderState::Closed {
            self.received += reader.discard_to_eof().await;
        }

        let outcome = DecodeOutcome {
            stream: self.stream,
            state: self.state,
            bytes_received: self.received,
        };
        let _ = events.send(DecoderEvent::Finished(outcome));
        outcome
    }
}
