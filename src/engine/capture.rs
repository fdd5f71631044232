//! Packet capture sources
//!
//! Supports two sources:
//! - Live capture from a network interface (libpcap, `live` feature)
//! - PCAP file replay

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;

use crate::config::CaptureConfig;
use crate::core::packet::{LinkType, RawPacket};
use crate::error::{Result, SnifferError};

/// Trait for packet capture implementations
pub trait PacketSource: Send {
    /// Block until the next packet is available.
    ///
    /// `Ok(None)` means the source is exhausted. Errors are unrecoverable.
    fn next_packet(&mut self) -> Result<Option<RawPacket>>;

    /// Human-readable name of the source, for logs
    fn describe(&self) -> String;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn next_packet(&mut self) -> Result<Option<RawPacket>> {
        (**self).next_packet()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Open the configured source: the file when one is given, the live
/// interface otherwise
pub fn open_source(config: &CaptureConfig, file: Option<&Path>) -> Result<Box<dyn PacketSource>> {
    match file {
        Some(path) => Ok(Box::new(PcapFileSource::open(path)?)),
        None => open_live(config),
    }
}

#[cfg(feature = "live")]
fn open_live(config: &CaptureConfig) -> Result<Box<dyn PacketSource>> {
    Ok(Box::new(LiveCapture::open(config)?))
}

#[cfg(not(feature = "live"))]
fn open_live(_config: &CaptureConfig) -> Result<Box<dyn PacketSource>> {
    Err(SnifferError::LiveCaptureUnavailable)
}

fn timestamp_from(secs: i64, nanos: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
}

#[cfg(feature = "live")]
pub use live::LiveCapture;

#[cfg(feature = "live")]
mod live {
    use tracing::info;

    use super::timestamp_from;
    use crate::config::CaptureConfig;
    use crate::core::packet::{LinkType, RawPacket};
    use crate::error::{Result, SnifferError};
    use super::PacketSource;

    /// Live interface capture through libpcap
    pub struct LiveCapture {
        interface: String,
        cap: pcap::Capture<pcap::Active>,
        link: LinkType,
    }

    impl LiveCapture {
        /// Open the interface. No read timeout: `next_packet` blocks until
        /// traffic arrives.
        pub fn open(config: &CaptureConfig) -> Result<Self> {
            let open_err = |e: pcap::Error| SnifferError::CaptureOpen {
                source_name: config.interface.clone(),
                reason: e.to_string(),
            };

            let cap = pcap::Capture::from_device(config.interface.as_str())
                .map_err(open_err)?
                .promisc(config.promiscuous)
                .snaplen(config.snaplen)
                .timeout(0)
                .open()
                .map_err(open_err)?;

            let link = LinkType::from_dlt(cap.get_datalink().0 as u32);
            info!(
                "Listening on {} (link {}, snaplen {}, promisc {})",
                config.interface, link, config.snaplen, config.promiscuous
            );

            Ok(Self {
                interface: config.interface.clone(),
                cap,
                link,
            })
        }
    }

    impl PacketSource for LiveCapture {
        fn next_packet(&mut self) -> Result<Option<RawPacket>> {
            loop {
                match self.cap.next_packet() {
                    Ok(packet) => {
                        let ts = packet.header.ts;
                        let timestamp =
                            timestamp_from(ts.tv_sec as i64, (ts.tv_usec as u32).saturating_mul(1000));
                        return Ok(Some(RawPacket::new(timestamp, self.link, packet.data.to_vec())));
                    }
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(pcap::Error::NoMorePackets) => return Ok(None),
                    Err(e) => return Err(SnifferError::CaptureRead(e.to_string())),
                }
            }
        }

        fn describe(&self) -> String {
            format!("interface {}", self.interface)
        }
    }
}

/// PCAP file replay
pub struct PcapFileSource {
    path: PathBuf,
    reader: PcapReader<BufReader<File>>,
    link: LinkType,
}

impl PcapFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |reason: String| SnifferError::CaptureOpen {
            source_name: path.display().to_string(),
            reason,
        };

        let file = File::open(&path).map_err(|e| open_err(e.to_string()))?;
        let reader = PcapReader::new(BufReader::new(file)).map_err(|e| open_err(e.to_string()))?;
        let link = link_type_of(reader.header().datalink);

        Ok(Self { path, reader, link })
    }

    pub fn link(&self) -> LinkType {
        self.link
    }
}

impl PacketSource for PcapFileSource {
    fn next_packet(&mut self) -> Result<Option<RawPacket>> {
        match self.reader.next_packet() {
            None => Ok(None),
            Some(Err(e)) => Err(SnifferError::CaptureRead(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
            Some(Ok(packet)) => {
                let timestamp = duration_to_timestamp(packet.timestamp);
                Ok(Some(RawPacket::new(timestamp, self.link, packet.data.into_owned())))
            }
        }
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

fn duration_to_timestamp(ts: Duration) -> DateTime<Utc> {
    timestamp_from(ts.as_secs() as i64, ts.subsec_nanos())
}

fn link_type_of(datalink: DataLink) -> LinkType {
    match datalink {
        DataLink::ETHERNET => LinkType::Ethernet,
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => LinkType::RawIp,
        DataLink::LINUX_SLL => LinkType::LinuxSll,
        other => LinkType::Other(u32::from(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};

    fn write_pcap(path: &Path, datalink: DataLink, frames: &[&[u8]]) {
        let file = File::create(path).unwrap();
        let header = PcapHeader {
            datalink,
            ..Default::default()
        };
        let mut writer = PcapWriter::with_header(file, header).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            let ts = Duration::new(1_700_000_000 + i as u64, 500_000);
            writer
                .write_packet(&PcapPacket::new(ts, frame.len() as u32, frame))
                .unwrap();
        }
    }

    #[test]
    fn test_pcap_file_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.pcap");
        write_pcap(&path, DataLink::ETHERNET, &[&[1u8; 60], &[2u8; 70]]);

        let mut source = PcapFileSource::open(&path).unwrap();
        assert_eq!(source.link(), LinkType::Ethernet);

        let first = source.next_packet().unwrap().unwrap();
        assert_eq!(first.data.len(), 60);
        assert_eq!(first.timestamp.timestamp(), 1_700_000_000);

        let second = source.next_packet().unwrap().unwrap();
        assert_eq!(second.data, vec![2u8; 70]);

        assert!(source.next_packet().unwrap().is_none());
        assert!(source.describe().contains("two.pcap"));
    }

    #[test]
    fn test_raw_ip_datalink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.pcap");
        write_pcap(&path, DataLink::RAW, &[]);

        let source = PcapFileSource::open(&path).unwrap();
        assert_eq!(source.link(), LinkType::RawIp);
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let err = open_source(&CaptureConfig::default(), Some(Path::new("/nonexistent/x.pcap")))
            .err()
            .unwrap();
        assert!(matches!(err, SnifferError::CaptureOpen { .. }));
    }

    #[test]
    fn test_not_a_pcap_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.pcap");
        std::fs::write(&path, b"definitely not a capture").unwrap();

        assert!(PcapFileSource::open(&path).is_err());
    }
}
