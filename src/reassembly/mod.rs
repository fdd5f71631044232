//! TCP stream reassembly
//!
//! Rebuilds the ordered byte stream of each direction of a forwarded
//! connection from captured segments that may arrive out of order or more
//! than once.
//!
//! `Reassembler::assemble` returns a `StreamReader` the first time it sees a
//! stream; the caller decides what consumes it. Bytes are delivered strictly
//! in sequence order. A stream ends when its FIN has been reached, when a RST
//! arrives, when it is flushed as idle, or when the reassembler is closed.
//!
//! Out-of-order data is buffered up to `max_buffered_bytes` per stream. Past
//! that the missing range is skipped and the reader gets a
//! `StreamError::DataLost` in its place.

pub mod stream;

pub use stream::{StreamChunk, StreamError, StreamReader};

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::ReassemblyConfig;
use crate::core::flow::StreamKey;
use crate::core::packet::TcpSegment;
use stream::StreamWriter;

/// Reassembly statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub streams_opened: u64,
    pub streams_closed: u64,
    /// Streams closed by `flush_older_than`
    pub streams_flushed: u64,
    pub bytes_delivered: u64,
    /// Bytes skipped over in gaps
    pub bytes_skipped: u64,
    /// Segments whose payload had already been delivered
    pub duplicate_segments: u64,
}

/// Per-direction reassembly state
#[derive(Debug)]
struct HalfStream {
    writer: StreamWriter,
    /// Sequence number of stream offset 0
    base_seq: u32,
    /// Bytes delivered to the reader (or skipped)
    delivered: u64,
    /// Out-of-order data keyed by stream offset
    pending: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    /// Stream offset of the FIN, once seen
    fin_at: Option<u64>,
    last_seen: DateTime<Utc>,
}

/// Bytes moved by one flush
#[derive(Debug, Default, Clone, Copy)]
struct Flushed {
    delivered: u64,
    skipped: u64,
}

impl HalfStream {
    fn new(writer: StreamWriter, base_seq: u32, now: DateTime<Utc>) -> Self {
        Self {
            writer,
            base_seq,
            delivered: 0,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            fin_at: None,
            last_seen: now,
        }
    }

    /// Stream offset of a sequence number, relative to what was delivered.
    /// Negative for data older than the start of the stream.
    fn offset_of(&self, seq: u32) -> i64 {
        let next_seq = self.base_seq.wrapping_add(self.delivered as u32);
        self.delivered as i64 + seq.wrapping_sub(next_seq) as i32 as i64
    }

    /// Queue payload found at `offset`. Returns false if every byte was
    /// already delivered.
    fn insert(&mut self, offset: i64, data: &[u8]) -> bool {
        let end = offset + data.len() as i64;
        if end <= self.delivered as i64 {
            return false;
        }

        let (start, data) = if offset < self.delivered as i64 {
            let trim = (self.delivered as i64 - offset) as usize;
            (self.delivered, &data[trim..])
        } else {
            (offset as u64, data)
        };

        if let Some(existing) = self.pending.get(&start) {
            if existing.len() >= data.len() {
                return true;
            }
        }
        if let Some(old) = self.pending.insert(start, data.to_vec()) {
            self.pending_bytes -= old.len();
        }
        self.pending_bytes += data.len();
        true
    }

    /// Deliver contiguous data. While more than `max_buffered` bytes are
    /// still waiting behind a gap, skip the gap.
    fn flush(&mut self, max_buffered: usize) -> Flushed {
        let mut flushed = Flushed::default();

        loop {
            while let Some(entry) = self.pending.first_entry() {
                let start = *entry.key();
                if start > self.delivered {
                    break;
                }

                let chunk = entry.remove();
                self.pending_bytes -= chunk.len();

                let end = start + chunk.len() as u64;
                if end <= self.delivered {
                    continue;
                }

                let skip = (self.delivered - start) as usize;
                let data = if skip == 0 { chunk } else { chunk[skip..].to_vec() };
                flushed.delivered += data.len() as u64;
                self.delivered = end;
                self.writer.send_data(data);
            }

            if self.pending_bytes <= max_buffered {
                break;
            }
            let Some(&next) = self.pending.keys().next() else {
                break;
            };
            let skipped = next - self.delivered;
            self.writer.send_loss(skipped);
            flushed.skipped += skipped;
            self.delivered = next;
        }

        flushed
    }

    fn is_finished(&self) -> bool {
        self.fin_at.is_some_and(|fin| self.delivered >= fin)
    }
}

/// TCP reassembler for forwarded segments
#[derive(Debug)]
pub struct Reassembler {
    config: ReassemblyConfig,
    streams: HashMap<StreamKey, HalfStream>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            config,
            streams: HashMap::new(),
            stats: ReassemblyStats::default(),
        }
    }

    /// Add a segment to its stream.
    ///
    /// Returns the reader of a stream created by this segment. Each stream
    /// yields its reader exactly once. Only a SYN or a segment with payload
    /// opens a stream; bare ACK, FIN and RST segments for unknown streams
    /// are ignored.
    pub fn assemble(&mut self, segment: &TcpSegment) -> Option<StreamReader> {
        let key = segment.stream;
        let mut new_reader = None;

        if !self.streams.contains_key(&key) {
            if segment.flags.rst || (!segment.flags.syn && segment.payload.is_empty()) {
                trace!("Ignoring [{}] segment for unknown stream {}", segment.flags, key);
                return None;
            }

            let (writer, reader) = stream::channel(key);
            let base_seq = if segment.flags.syn {
                segment.seq.wrapping_add(1)
            } else {
                segment.seq
            };
            trace!("New stream {} on [{}] (base seq {})", key, segment.flags, base_seq);

            self.streams
                .insert(key, HalfStream::new(writer, base_seq, segment.timestamp));
            self.stats.streams_opened += 1;
            new_reader = Some(reader);
        }

        let max_buffered = self.config.max_buffered_bytes;
        let Some(stream) = self.streams.get_mut(&key) else {
            return new_reader;
        };
        stream.last_seen = segment.timestamp;

        if segment.flags.rst {
            debug!("RST on {}, closing stream", key);
            self.close(&key);
            return new_reader;
        }

        let data_seq = if segment.flags.syn {
            segment.seq.wrapping_add(1)
        } else {
            segment.seq
        };
        let offset = stream.offset_of(data_seq);

        if !segment.payload.is_empty() && !stream.insert(offset, &segment.payload) {
            self.stats.duplicate_segments += 1;
        }
        if segment.flags.fin {
            let fin_at = (offset + segment.payload.len() as i64).max(0) as u64;
            stream.fin_at = Some(fin_at);
        }

        let flushed = stream.flush(max_buffered);
        let finished = stream.is_finished();
        self.record(flushed);

        if finished {
            trace!("FIN reached on {}", key);
            self.close(&key);
        }

        new_reader
    }

    /// Close streams that have not seen a segment since `cutoff`, delivering
    /// whatever they still buffer. Returns the number of streams closed.
    pub fn flush_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let idle: Vec<StreamKey> = self
            .streams
            .iter()
            .filter(|(_, stream)| stream.last_seen < cutoff)
            .map(|(key, _)| *key)
            .collect();

        for key in &idle {
            debug!("Flushing idle stream {}", key);
            self.close(key);
        }
        self.stats.streams_flushed += idle.len() as u64;

        idle.len()
    }

    /// Close every open stream. Returns the number of streams closed.
    pub fn close_all(&mut self) -> usize {
        let keys: Vec<StreamKey> = self.streams.keys().copied().collect();
        for key in &keys {
            self.close(key);
        }
        keys.len()
    }

    /// Deliver remaining buffered data and end the stream
    fn close(&mut self, key: &StreamKey) {
        if let Some(mut stream) = self.streams.remove(key) {
            let flushed = stream.flush(0);
            self.record(flushed);
            self.stats.streams_closed += 1;
        }
    }

    fn record(&mut self, flushed: Flushed) {
        self.stats.bytes_delivered += flushed.delivered;
        self.stats.bytes_skipped += flushed.skipped;
    }

    /// Number of open streams
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flow::{NetworkFlow, TransportFlow};
    use crate::core::packet::TcpFlags;
    use chrono::Duration;
    use std::net::{IpAddr, Ipv4Addr};

    const ISN: u32 = 1000;

    fn key() -> StreamKey {
        StreamKey::new(
            NetworkFlow::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ),
            TransportFlow::new(40000, 12345),
        )
    }

    fn segment(seq: u32, flags: TcpFlags, payload: &[u8]) -> TcpSegment {
        TcpSegment {
            stream: key(),
            seq,
            flags,
            options: Vec::new(),
            payload: payload.to_vec(),
            timestamp: Utc::now(),
        }
    }

    fn syn(seq: u32) -> TcpSegment {
        segment(seq, TcpFlags { syn: true, ..Default::default() }, &[])
    }

    fn data(seq: u32, payload: &[u8]) -> TcpSegment {
        segment(seq, TcpFlags { ack: true, ..Default::default() }, payload)
    }

    fn fin(seq: u32) -> TcpSegment {
        segment(seq, TcpFlags { fin: true, ack: true, ..Default::default() }, &[])
    }

    fn reassembler() -> Reassembler {
        Reassembler::new(ReassemblyConfig::default())
    }

    /// Everything queued so far, concatenated
    fn drain(reader: &mut StreamReader) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = reader.try_read() {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[test]
    fn test_reader_returned_once() {
        let mut r = reassembler();
        assert!(r.assemble(&syn(ISN)).is_some());
        assert!(r.assemble(&data(ISN + 1, b"abc")).is_none());
        assert_eq!(r.active_streams(), 1);
        assert_eq!(r.stats().streams_opened, 1);
    }

    #[test]
    fn test_in_order_delivery() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&data(ISN + 1, b"hello "));
        r.assemble(&data(ISN + 7, b"world"));

        assert_eq!(drain(&mut reader), b"hello world");
        assert_eq!(r.stats().bytes_delivered, 11);
    }

    #[test]
    fn test_out_of_order_delivery() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&data(ISN + 5, b"efgh"));
        assert!(drain(&mut reader).is_empty());

        r.assemble(&data(ISN + 1, b"abcd"));
        assert_eq!(drain(&mut reader), b"abcdefgh");
    }

    #[test]
    fn test_retransmission_dropped() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&data(ISN + 1, b"abcd"));
        r.assemble(&data(ISN + 1, b"abcd"));
        // Overlapping retransmission carrying two new bytes
        r.assemble(&data(ISN + 3, b"cdef"));

        assert_eq!(drain(&mut reader), b"abcdef");
        assert_eq!(r.stats().duplicate_segments, 1);
    }

    #[test]
    fn test_syn_payload_follows_syn() {
        let mut r = reassembler();
        let mut reader = r
            .assemble(&segment(ISN, TcpFlags { syn: true, ..Default::default() }, b"fast"))
            .unwrap();
        r.assemble(&data(ISN + 5, b"open"));

        assert_eq!(drain(&mut reader), b"fastopen");
    }

    #[test]
    fn test_midstream_start() {
        let mut r = reassembler();
        let mut reader = r.assemble(&data(5000, b"abc")).unwrap();
        r.assemble(&data(5003, b"def"));

        assert_eq!(drain(&mut reader), b"abcdef");
    }

    #[tokio::test]
    async fn test_fin_ends_stream() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&data(ISN + 1, b"abc"));
        r.assemble(&fin(ISN + 4));

        assert_eq!(r.active_streams(), 0);
        assert_eq!(reader.read().await, Some(Ok(b"abc".to_vec())));
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn test_fin_waits_for_missing_data() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&fin(ISN + 4));
        assert_eq!(r.active_streams(), 1);

        r.assemble(&data(ISN + 1, b"abc"));
        assert_eq!(r.active_streams(), 0);
        assert_eq!(reader.read().await, Some(Ok(b"abc".to_vec())));
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn test_rst_ends_stream() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&segment(ISN + 1, TcpFlags { rst: true, ..Default::default() }, &[]));

        assert_eq!(r.active_streams(), 0);
        assert_eq!(reader.read().await, None);
    }

    #[test]
    fn test_bare_ack_or_fin_without_stream_ignored() {
        let mut r = reassembler();
        assert!(r.assemble(&data(ISN, &[])).is_none());
        assert!(r.assemble(&fin(ISN)).is_none());
        assert_eq!(r.active_streams(), 0);
        assert_eq!(r.stats().streams_opened, 0);
    }

    #[test]
    fn test_closed_stream_not_reopened_by_final_ack() {
        let mut r = reassembler();
        let _reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&data(ISN + 1, b"abc"));
        r.assemble(&fin(ISN + 4));
        assert_eq!(r.active_streams(), 0);

        assert!(r.assemble(&data(ISN + 5, &[])).is_none());
        assert_eq!(r.active_streams(), 0);
        assert_eq!(r.stats().streams_opened, 1);
    }

    #[test]
    fn test_rst_without_stream_ignored() {
        let mut r = reassembler();
        assert!(r
            .assemble(&segment(ISN, TcpFlags { rst: true, ..Default::default() }, &[]))
            .is_none());
        assert_eq!(r.stats().streams_opened, 0);
    }

    #[test]
    fn test_gap_skipped_when_buffer_full() {
        let mut r = Reassembler::new(ReassemblyConfig {
            max_buffered_bytes: 4,
            ..Default::default()
        });
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&data(ISN + 1, b"ab"));
        // Bytes 2..5 never arrive
        r.assemble(&data(ISN + 6, b"fghij"));

        assert_eq!(reader.try_read(), Some(Ok(b"ab".to_vec())));
        assert_eq!(reader.try_read(), Some(Err(StreamError::DataLost { skipped: 3 })));
        assert_eq!(reader.try_read(), Some(Ok(b"fghij".to_vec())));
        assert_eq!(r.stats().bytes_skipped, 3);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(u32::MAX - 1)).unwrap();
        r.assemble(&data(u32::MAX, b"ab"));
        r.assemble(&data(1, b"cd"));

        assert_eq!(drain(&mut reader), b"abcd");
    }

    #[tokio::test]
    async fn test_close_all_delivers_buffered_data() {
        let mut r = reassembler();
        let mut reader = r.assemble(&syn(ISN)).unwrap();
        r.assemble(&data(ISN + 4, b"def"));

        assert_eq!(r.close_all(), 1);
        assert_eq!(reader.read().await, Some(Err(StreamError::DataLost { skipped: 3 })));
        assert_eq!(reader.read().await, Some(Ok(b"def".to_vec())));
        assert_eq!(reader.read().await, None);
    }

    #[test]
    fn test_flush_older_than() {
        let mut r = reassembler();
        let _reader = r.assemble(&syn(ISN)).unwrap();

        assert_eq!(r.flush_older_than(Utc::now() - Duration::hours(1)), 0);
        assert_eq!(r.flush_older_than(Utc::now() + Duration::seconds(1)), 1);
        assert_eq!(r.active_streams(), 0);
        assert_eq!(r.stats().streams_flushed, 1);
    }
}
