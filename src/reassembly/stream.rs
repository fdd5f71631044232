//! Reassembled byte streams
//!
//! Each stream is an unbounded channel of ordered chunks. The writer half
//! stays inside the reassembler; dropping it is end-of-stream for the
//! reader.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::flow::StreamKey;

/// Read error on a reassembled stream. Never end-of-stream.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Reassembly gave up waiting for missing segments and skipped ahead
    #[error("{skipped} bytes lost in reassembly gap")]
    DataLost { skipped: u64 },
}

/// One item read from a stream
pub type StreamChunk = Result<Vec<u8>, StreamError>;

/// Create a connected writer/reader pair for a stream
pub(crate) fn channel(key: StreamKey) -> (StreamWriter, StreamReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StreamWriter { tx }, StreamReader { key, rx })
}

/// Sending half, owned by the reassembler
#[derive(Debug)]
pub(crate) struct StreamWriter {
    tx: mpsc::UnboundedSender<StreamChunk>,
}

impl StreamWriter {
    /// Deliver in-order bytes. A reader that went away is not an error.
    pub(crate) fn send_data(&self, data: Vec<u8>) {
        let _ = self.tx.send(Ok(data));
    }

    pub(crate) fn send_loss(&self, skipped: u64) {
        let _ = self.tx.send(Err(StreamError::DataLost { skipped }));
    }
}

/// Ordered, readable handle on one reassembled stream
#[derive(Debug)]
pub struct StreamReader {
    key: StreamKey,
    rx: mpsc::UnboundedReceiver<StreamChunk>,
}

impl StreamReader {
    /// Stream this reader belongs to
    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// Wait for the next chunk. `None` is end-of-stream.
    pub async fn read(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }

    /// Next chunk if one is already queued
    pub fn try_read(&mut self) -> Option<StreamChunk> {
        self.rx.try_recv().ok()
    }

    /// Read and drop everything up to end-of-stream, returning the number of
    /// bytes discarded
    pub async fn discard_to_eof(&mut self) -> u64 {
        let mut discarded = 0u64;
        while let Some(chunk) = self.rx.recv().await {
            if let Ok(data) = chunk {
                discarded += data.len() as u64;
            }
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flow::{NetworkFlow, TransportFlow};
    use std::net::{IpAddr, Ipv4Addr};

    fn key() -> StreamKey {
        StreamKey::new(
            NetworkFlow::new(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ),
            TransportFlow::new(40000, 12345),
        )
    }

    #[tokio::test]
    async fn test_read_until_writer_dropped() {
        let (writer, mut reader) = channel(key());
        writer.send_data(b"abc".to_vec());
        writer.send_loss(10);
        drop(writer);

        assert_eq!(reader.read().await, Some(Ok(b"abc".to_vec())));
        assert_eq!(reader.read().await, Some(Err(StreamError::DataLost { skipped: 10 })));
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn test_discard_counts_data_bytes_only() {
        let (writer, mut reader) = channel(key());
        writer.send_data(vec![0; 100]);
        writer.send_loss(50);
        writer.send_data(vec![0; 20]);
        drop(writer);

        assert_eq!(reader.discard_to_eof().await, 120);
    }

    #[test]
    fn test_try_read_empty() {
        let (_writer, mut reader) = channel(key());
        assert!(reader.try_read().is_none());
        assert_eq!(reader.key(), key());
    }
}
