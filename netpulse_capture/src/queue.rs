//! Ordered hand-off buffer between the capture pump and the async consumer.
//!
//! Multi-producer, single-consumer, unbounded: a push never blocks and never
//! fails, so the capture thread is never held back by a slow reader. The
//! price is that an unconsumed queue grows without bound if the consumer
//! stalls. Once finalized (every sender dropped, cleanly or with a fault)
//! no further writes land; the consumer drains what is buffered and then
//! observes completion.

use crate::error::CaptureError;
use netpulse_core::packet::RawPacket;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Creates a fresh queue pair. One pair per capture session.
pub fn packet_queue() -> (PacketSender, PacketReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let fault = Arc::new(OnceLock::new());
    (
        PacketSender {
            tx,
            fault: Arc::clone(&fault),
        },
        PacketReceiver { rx, fault },
    )
}

/// Write side of the capture queue.
#[derive(Clone)]
pub struct PacketSender {
    tx: mpsc::UnboundedSender<RawPacket>,
    fault: Arc<OnceLock<CaptureError>>,
}

impl PacketSender {
    /// Pushes a packet; never blocks. When the consumer is gone the packet
    /// is silently discarded.
    pub fn push(&self, packet: RawPacket) {
        let _ = self.tx.send(packet);
    }

    /// Clean finalization. Consuming the sender closes the write side once
    /// the last clone is gone; pending reads drain, then complete.
    pub fn finalize(self) {}

    /// Finalization carrying a fatal fault. The consumer drains buffered
    /// packets first and then observes the fault instead of a clean end.
    pub fn finalize_with_error(self, error: CaptureError) {
        let _ = self.fault.set(error);
    }
}

/// Read side of the capture queue; owned by exactly one consumer.
#[derive(Debug)]
pub struct PacketReceiver {
    rx: mpsc::UnboundedReceiver<RawPacket>,
    fault: Arc<OnceLock<CaptureError>>,
}

impl PacketReceiver {
    /// Suspends until a packet is buffered or the queue is finalized.
    pub async fn recv(&mut self) -> Option<RawPacket> {
        self.rx.recv().await
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<RawPacket>> {
        self.rx.poll_recv(cx)
    }

    /// The fault the queue was finalized with, if any. Meaningful once
    /// `recv` has returned `None`.
    pub fn fault(&self) -> Option<CaptureError> {
        self.fault.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureErrorKind;
    use netpulse_core::packet::LinkType;
    use std::time::SystemTime;

    fn packet(length: u32) -> RawPacket {
        RawPacket::new(
            length,
            vec![0u8; length as usize],
            SystemTime::now(),
            LinkType::Ethernet,
        )
    }

    #[tokio::test]
    async fn preserves_push_order() {
        let (tx, mut rx) = packet_queue();
        for length in [64, 128, 256] {
            tx.push(packet(length));
        }
        assert_eq!(rx.recv().await.unwrap().length, 64);
        assert_eq!(rx.recv().await.unwrap().length, 128);
        assert_eq!(rx.recv().await.unwrap().length, 256);
    }

    #[tokio::test]
    async fn drains_then_completes_after_finalize() {
        let (tx, mut rx) = packet_queue();
        tx.push(packet(64));
        tx.push(packet(512));
        tx.finalize();

        assert_eq!(rx.recv().await.unwrap().length, 64);
        assert_eq!(rx.recv().await.unwrap().length, 512);
        assert!(rx.recv().await.is_none());
        assert!(rx.fault().is_none());
    }

    #[tokio::test]
    async fn fault_is_visible_after_drain() {
        let (tx, mut rx) = packet_queue();
        tx.push(packet(64));
        tx.finalize_with_error(CaptureError::new(
            CaptureErrorKind::DeviceError,
            "device went away",
        ));

        assert_eq!(rx.recv().await.unwrap().length, 64);
        assert!(rx.recv().await.is_none());
        let fault = rx.fault().unwrap();
        assert!(matches!(fault.error_kind, CaptureErrorKind::DeviceError));
    }

    #[tokio::test]
    async fn push_after_consumer_gone_is_silent() {
        let (tx, rx) = packet_queue();
        drop(rx);
        tx.push(packet(64));
    }

    #[tokio::test]
    async fn producers_can_be_cloned() {
        let (tx, mut rx) = packet_queue();
        let tx2 = tx.clone();
        tx.push(packet(64));
        tx2.push(packet(128));
        drop(tx);
        drop(tx2);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
