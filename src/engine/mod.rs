//! Capture engine
//!
//! # Architecture
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Capture   │──▶│ Flow Tracker │──▶│ Reassembler  │──▶│ FlowDecoder  │
//! │ (pcap/file) │   │ (SMC option) │   │ (per stream) │   │ (1 per task) │
//! └─────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!        blocking thread, strict packet order                     │
//!                                                                  ▼
//!                                                          ┌──────────────┐
//!                                                          │  Collector   │
//!                                                          │  (reports)   │
//!                                                          └──────────────┘
//! ```
//!
//! The capture loop owns the flow tracker and the reassembler; nothing else
//! touches them. Every stream the reassembler opens gets its own decoder
//! task, and decoders only talk to the collector.

pub mod capture;
pub mod decoder;

#[cfg(feature = "live")]
pub use capture::LiveCapture;
pub use capture::{open_source, PacketSource, PcapFileSource};
pub use decoder::{
    AbandonReason, DecodeOutcome, DecoderEvent, DecoderState, FlowDecoder, HandshakeReport,
};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::core::packet::RawPacket;
use crate::core::parser::parse_tcp_segment;
use crate::error::PacketError;
use crate::flow::{FlowTracker, TrackerStats};
use crate::reassembly::{ReassemblyStats, Reassembler, StreamReader};

/// Capture loop statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Packets read from the source
    pub packets_received: u64,
    /// Packets without an IP or TCP layer
    pub packets_filtered: u64,
    /// Segments submitted to reassembly
    pub segments_forwarded: u64,
    /// Streams handed out for decoding
    pub streams_opened: u64,
}

/// What the capture loop did with one packet
#[derive(Debug)]
pub enum PacketVerdict {
    /// Not TCP over IP
    Filtered(PacketError),
    /// TCP, but not part of a tracked connection
    Skipped,
    /// Submitted to reassembly; carries the reader if a stream was opened
    Forwarded { new_stream: Option<StreamReader> },
}

/// Sequential packet processing: parse, track, reassemble
pub struct CaptureLoop {
    tracker: FlowTracker,
    reassembler: Reassembler,
    idle_timeout: Option<Duration>,
    next_idle_sweep: Option<DateTime<Utc>>,
    stats: CaptureStats,
}

impl CaptureLoop {
    pub fn new(config: &Config) -> Self {
        let idle_secs = config.reassembly.stream_idle_timeout_secs;
        Self {
            tracker: FlowTracker::new(),
            reassembler: Reassembler::new(config.reassembly.clone()),
            idle_timeout: (idle_secs > 0).then(|| Duration::seconds(idle_secs as i64)),
            next_idle_sweep: None,
            stats: CaptureStats::default(),
        }
    }

    /// Run one packet through the pipeline
    pub fn handle_packet(&mut self, raw: &RawPacket) -> PacketVerdict {
        self.stats.packets_received += 1;

        let segment = match parse_tcp_segment(raw) {
            Ok(segment) => segment,
            Err(e) => {
                trace!("Skipping packet: {}", e);
                self.stats.packets_filtered += 1;
                return PacketVerdict::Filtered(e);
            }
        };

        self.sweep_idle(segment.timestamp);

        if !self.tracker.process(&segment).is_forward() {
            return PacketVerdict::Skipped;
        }

        self.stats.segments_forwarded += 1;
        let new_stream = self.reassembler.assemble(&segment);
        if let Some(reader) = &new_stream {
            debug!("Decoding stream {}", reader.key());
            self.stats.streams_opened += 1;
        }

        PacketVerdict::Forwarded { new_stream }
    }

    /// Close idle streams, at most once per timeout period of capture time
    fn sweep_idle(&mut self, now: DateTime<Utc>) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };

        match self.next_idle_sweep {
            Some(next) if now < next => {}
            Some(_) => {
                let flushed = self.reassembler.flush_older_than(now - timeout);
                if flushed > 0 {
                    debug!("Closed {} idle streams", flushed);
                }
                self.next_idle_sweep = Some(now + timeout);
            }
            None => self.next_idle_sweep = Some(now + timeout),
        }
    }

    /// End of capture: close every open stream so decoders can finish.
    /// Returns the number of streams closed.
    pub fn finish(&mut self) -> usize {
        self.reassembler.close_all()
    }

    pub fn tracker(&self) -> &FlowTracker {
        &self.tracker
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }
}

/// Tally of decoder outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderTally {
    pub decoded: u64,
    pub abandoned: u64,
    pub closed: u64,
}

impl DecoderTally {
    fn record(&mut self, outcome: &DecodeOutcome) {
        match outcome.state {
            DecoderState::Decoded(_) => self.decoded += 1,
            DecoderState::Abandoned(_) => self.abandoned += 1,
            DecoderState::Closed => self.closed += 1,
            DecoderState::Accumulating => {}
        }
    }

    pub fn finished(&self) -> u64 {
        self.decoded + self.abandoned + self.closed
    }
}

/// Totals of a completed run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub capture: CaptureStats,
    pub tracker: TrackerStats,
    pub reassembly: ReassemblyStats,
    pub decoders: DecoderTally,
}

/// Capture from `source` until it is exhausted, decoding every SMC stream.
///
/// `on_report` is called for each decoded handshake header, in the order
/// decoders produce them. A source error ends the run with that error
/// immediately; decoders still running are not waited for.
pub async fn run<S, F>(config: Config, source: S, mut on_report: F) -> anyhow::Result<RunSummary>
where
    S: PacketSource + 'static,
    F: FnMut(&HandshakeReport) + Send + 'static,
{
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<DecoderEvent>();

    // Ends once every sender is gone: the capture loop's and all decoders'
    let collector = tokio::spawn(async move {
        let mut tally = DecoderTally::default();
        while let Some(event) = events_rx.recv().await {
            match event {
                DecoderEvent::Report(report) => on_report(&report),
                DecoderEvent::Finished(outcome) => {
                    trace!("{}: {}", outcome.stream, outcome.state);
                    tally.record(&outcome);
                }
            }
        }
        tally
    });

    let runtime = tokio::runtime::Handle::current();
    let capture = tokio::task::spawn_blocking(move || {
        let mut source = source;
        info!("Capturing from {}", source.describe());

        let mut capture_loop = CaptureLoop::new(&config);
        while let Some(raw) = source.next_packet()? {
            if let PacketVerdict::Forwarded { new_stream: Some(reader) } =
                capture_loop.handle_packet(&raw)
            {
                let decoder = FlowDecoder::new(reader.key(), &config.decoder);
                runtime.spawn(decoder.run(reader, events_tx.clone()));
            }
        }

        let closed = capture_loop.finish();
        info!("Capture finished, closed {} open streams", closed);
        Ok::<_, crate::error::SnifferError>(capture_loop)
    });

    let capture_loop = capture.await.context("capture thread panicked")??;
    let decoders = collector.await.context("decoder collector failed")?;

    let summary = RunSummary {
        capture: capture_loop.stats().clone(),
        tracker: capture_loop.tracker().stats().clone(),
        reassembly: capture_loop.reassembler().stats().clone(),
        decoders,
    };

    if summary.decoders.finished() < summary.capture.streams_opened {
        warn!(
            "{} decoders did not finish",
            summary.capture.streams_opened - summary.decoders.finished()
        );
    }
    info!(
        "{} packets, {} forwarded, {} streams: {} decoded, {} abandoned, {} closed",
        summary.capture.packets_received,
        summary.capture.segments_forwarded,
        summary.capture.streams_opened,
        summary.decoders.decoded,
        summary.decoders.abandoned,
        summary.decoders.closed
    );

    Ok(summary)
}
