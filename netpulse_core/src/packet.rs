use bytes::Bytes;
use std::time::SystemTime;

/// Link-layer type tag reported by the capture device for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    RawIp,
    Loopback,
    Other(i32),
}

impl LinkType {
    /// Maps a pcap datalink value onto the link-layer tag carried by [`RawPacket`].
    ///
    /// DLT_NULL (0) is the BSD loopback encapsulation; 12 and 101 are the two
    /// raw-IP datalink values seen in the wild.
    pub fn from_pcap(link: pcap::Linktype) -> Self {
        match link.0 {
            0 => LinkType::Loopback,
            1 => LinkType::Ethernet,
            12 | 101 => LinkType::RawIp,
            other => LinkType::Other(other),
        }
    }
}

/// One captured frame, immutable once constructed.
///
/// `length` is the device-reported frame length on the wire and may exceed
/// `payload.len()` when the frame was truncated by the snap length. The
/// payload is a [`Bytes`] buffer, so clones are cheap and the value can be
/// shared across threads without synchronization.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub length: u32,
    pub payload: Bytes,
    pub timestamp: SystemTime,
    pub link_type: LinkType,
}

impl RawPacket {
    pub fn new(
        length: u32,
        payload: impl Into<Bytes>,
        timestamp: SystemTime,
        link_type: LinkType,
    ) -> Self {
        Self {
            length,
            payload: payload.into(),
            timestamp,
            link_type,
        }
    }

    /// True when the snap length cut the captured bytes short of the frame.
    pub fn is_truncated(&self) -> bool {
        (self.payload.len() as u32) < self.length
    }
}
