use crate::error::{CaptureError, CaptureErrorKind};
use log::{debug, info};
use netpulse_core::config::CaptureConfig;
use netpulse_core::packet::LinkType;
use pcap::{Active, Capture, Device};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Interface-level counters reported by the device at read time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceStats {
    pub dropped: u64,
    pub if_dropped: u64,
}

/// One frame handed up by the device's blocking loop.
#[derive(Debug)]
pub struct CapturedFrame {
    /// Frame length on the wire; `data` may be shorter under snap-length truncation.
    pub length: u32,
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
}

/// Outcome of one blocking poll of an active capture.
pub enum FramePoll {
    Frame(CapturedFrame),
    /// A frame the device could not deliver intact. Recorded, never fatal.
    Skip(CaptureError),
    /// The read timeout elapsed without a frame.
    TimedOut,
    /// The source has no further frames and never will.
    Finished,
}

/// A capture device the session can bind. Opening it yields the activated
/// handle the background pump drives; open failures propagate synchronously
/// to the `start` caller.
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;
    fn open(&mut self, config: &CaptureConfig) -> Result<Box<dyn ActiveCapture>, CaptureError>;
}

/// An opened device. `poll_frame` blocks up to the configured read timeout.
/// Errors returned from `poll_frame` are fatal to the capture loop;
/// recoverable conditions travel inside [`FramePoll`].
pub trait ActiveCapture: Send {
    fn poll_frame(&mut self) -> Result<FramePoll, CaptureError>;
    fn stats(&mut self) -> Result<DeviceStats, CaptureError>;
    fn link_type(&self) -> LinkType;
}

/// Libpcap-backed capture device, addressed by interface name.
pub struct PcapDevice {
    name: String,
}

impl PcapDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl CaptureDevice for PcapDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, config: &CaptureConfig) -> Result<Box<dyn ActiveCapture>, CaptureError> {
        let devices = Device::list()?;
        let target = devices
            .into_iter()
            .find(|d| d.name == self.name)
            .ok_or(CaptureError::new(
                CaptureErrorKind::DeviceError,
                &format!("Capture device {} not found", self.name),
            ))?;
        let mut capture = Capture::from_device(target)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.read_timeout_ms)
            .immediate_mode(config.immediate_mode)
            .open()?;

        if let Some(filter) = &config.filter {
            capture.filter(filter, true)?;
            info!("Filter applied: {filter}");
        }

        let link_type = LinkType::from_pcap(capture.get_datalink());
        info!("Listening on: {:?}", self.name);

        Ok(Box::new(PcapActive { capture, link_type }))
    }
}

struct PcapActive {
    capture: Capture<Active>,
    link_type: LinkType,
}

impl ActiveCapture for PcapActive {
    fn poll_frame(&mut self) -> Result<FramePoll, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let header = *packet.header;
                let timestamp = UNIX_EPOCH
                    + Duration::new(header.ts.tv_sec as u64, (header.ts.tv_usec as u32) * 1000);
                Ok(FramePoll::Frame(CapturedFrame {
                    length: header.len,
                    data: packet.data.to_vec(),
                    timestamp,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(FramePoll::TimedOut),
            Err(pcap::Error::NoMorePackets) => {
                debug!("Capture source has no more packets");
                Ok(FramePoll::Finished)
            }
            Err(e) => Err(CaptureError::from(e)),
        }
    }

    fn stats(&mut self) -> Result<DeviceStats, CaptureError> {
        let stats = self.capture.stats()?;
        Ok(DeviceStats {
            dropped: stats.dropped as u64,
            if_dropped: stats.if_dropped as u64,
        })
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }
}
