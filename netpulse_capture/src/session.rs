//! Capture session lifecycle: binds a device, pumps its blocking capture
//! loop on a background thread, and hands frames to an async consumer
//! through the capture queue while the metrics aggregator keeps count.

use crate::device::{ActiveCapture, CaptureDevice, DeviceStats, FramePoll};
use crate::error::CaptureError;
use crate::metrics::{CaptureMetrics, MetricsSnapshot};
use crate::queue::{PacketReceiver, PacketSender, packet_queue};
use futures::Stream;
use log::{debug, error, info, warn};
use netpulse_core::config::CaptureConfig;
use netpulse_core::packet::RawPacket;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Lifecycle position of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound,
    Capturing,
}

type SharedCapture = Arc<Mutex<Option<Box<dyn ActiveCapture>>>>;

/// The capture session state machine.
///
/// `Unbound` → `set_device` → `Bound` → `start` → `Capturing` → `stop` →
/// `Bound`, with `try_remove_device` leading back to `Unbound` when not
/// capturing. Every `start` creates a fresh queue and a fresh metrics
/// instance; nothing carries over between sessions.
pub struct CaptureSession {
    config: CaptureConfig,
    device: Option<Box<dyn CaptureDevice>>,
    active: SharedCapture,
    pump: Option<JoinHandle<()>>,
    pump_token: CancellationToken,
    metrics: Option<Arc<CaptureMetrics>>,
    receiver: Option<PacketReceiver>,
    started: bool,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            device: None,
            active: Arc::new(Mutex::new(None)),
            pump: None,
            pump_token: CancellationToken::new(),
            metrics: None,
            receiver: None,
            started: false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.started {
            SessionState::Capturing
        } else if self.device.is_some() {
            SessionState::Bound
        } else {
            SessionState::Unbound
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.started
    }

    /// Binds a capture device. Rebinding while another device is bound is
    /// rejected; remove the current device first.
    pub fn set_device(&mut self, device: Box<dyn CaptureDevice>) -> Result<(), CaptureError> {
        if self.device.is_some() {
            return Err(CaptureError::invalid_state(
                "a capture device is already bound; remove it first",
            ));
        }
        info!("Capture device bound: {}", device.name());
        self.device = Some(device);
        Ok(())
    }

    /// Unbinds the device. Returns `false` and leaves the device in place
    /// while capturing; idempotent when already unbound.
    pub fn try_remove_device(&mut self) -> bool {
        if self.started {
            return false;
        }
        if let Some(device) = self.device.take() {
            info!("Capture device removed: {}", device.name());
        }
        true
    }

    /// Opens the bound device and launches the background pump.
    ///
    /// A no-op when already capturing: the running session keeps its queue
    /// and metrics. Device open/configure failures propagate to the caller
    /// and leave the session not started.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.started {
            debug!("Capture already running; start ignored");
            return Ok(());
        }
        let device = self
            .device
            .as_mut()
            .ok_or(CaptureError::invalid_state("no capture device bound"))?;
        let capture = device.open(&self.config)?;

        let metrics = Arc::new(CaptureMetrics::new());
        let (sender, receiver) = packet_queue();
        let token = CancellationToken::new();
        *self.active.lock() = Some(capture);

        let pump = tokio::task::spawn_blocking({
            let active = Arc::clone(&self.active);
            let metrics = Arc::clone(&metrics);
            let token = token.clone();
            move || pump_loop(active, sender, metrics, token)
        });

        self.pump_token = token;
        self.pump = Some(pump);
        self.metrics = Some(metrics);
        self.receiver = Some(receiver);
        self.started = true;
        info!("Capture started");
        Ok(())
    }

    /// Stops the capture loop, closes the device and finalizes the queue.
    /// Buffered packets stay readable until drained. A no-op when not
    /// capturing.
    pub async fn stop(&mut self) {
        if !self.started {
            debug!("Capture not running; stop ignored");
            return;
        }
        self.pump_token.cancel();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!("Capture pump did not shut down cleanly: {e}");
            }
        }
        // Dropping the activated handle closes the device.
        *self.active.lock() = None;
        if let Some(metrics) = &self.metrics {
            metrics.on_capture_complete();
        }
        self.started = false;
        info!("Capture stopped");
    }

    /// The asynchronous packet sequence.
    ///
    /// Lazy and restartable per call: each invocation resumes over the same
    /// underlying queue, yielding buffered packets first. The mutable
    /// borrow enforces the single-consumer contract at compile time.
    /// Cancelling the token ends the stream promptly with one
    /// `Err(Cancelled)` item even while packets remain queued; a fatal
    /// capture-loop failure surfaces as one `Err` after the buffered
    /// packets have drained. Iterating never starts or stops capture.
    ///
    /// Fails with an invalid-state error until the session has been
    /// started at least once.
    pub fn packet_stream(
        &mut self,
        cancellation_token: CancellationToken,
    ) -> Result<PacketStream<'_>, CaptureError> {
        let receiver = self
            .receiver
            .as_mut()
            .ok_or(CaptureError::invalid_state("capture has never been started"))?;
        Ok(PacketStream::new(receiver, cancellation_token))
    }

    /// The most recent session's metrics, surviving `stop`. `None` until
    /// the first `start` — a deliberate choice over fabricating an empty
    /// zero-valued aggregate.
    pub fn metrics(&self) -> Option<&Arc<CaptureMetrics>> {
        self.metrics.as_ref()
    }

    /// Derived statistics merged with the device's own drop counters,
    /// queried at read time. `None` until the first `start`.
    pub fn metrics_snapshot(&self) -> Option<MetricsSnapshot> {
        let metrics = self.metrics.as_ref()?;
        let mut snapshot = metrics.snapshot();
        snapshot.merge_device_stats(self.device_stats());
        Some(snapshot)
    }

    /// Interface-level drop counters. Degrades to zero whenever the device
    /// is closed, busy with a frame, or failing its statistics query.
    pub fn device_stats(&self) -> DeviceStats {
        match self.active.try_lock() {
            Some(mut guard) => match guard.as_mut() {
                Some(capture) => capture.stats().unwrap_or_default(),
                None => DeviceStats::default(),
            },
            None => DeviceStats::default(),
        }
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // The blocking pump must not outlive the session.
        self.pump_token.cancel();
    }
}

/// Background pump: drives the device's blocking loop, one frame per
/// iteration. The device lock is taken per iteration so `stop` and stats
/// readers interleave between frames.
///
/// A malformed frame is recorded and skipped; only a failing device ends
/// the loop, finalizing the queue with the fault so a suspended consumer
/// resumes and observes completion-with-error instead of hanging.
fn pump_loop(
    active: SharedCapture,
    queue: PacketSender,
    metrics: Arc<CaptureMetrics>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            debug!("Capture pump cancelled");
            queue.finalize();
            return;
        }
        let mut guard = active.lock();
        let Some(capture) = guard.as_mut() else {
            queue.finalize();
            return;
        };
        match capture.poll_frame() {
            Ok(FramePoll::Frame(frame)) => {
                let packet = RawPacket::new(
                    frame.length,
                    frame.data,
                    frame.timestamp,
                    capture.link_type(),
                );
                drop(guard);
                metrics.on_packet_captured(packet.length);
                queue.push(packet);
            }
            Ok(FramePoll::Skip(e)) => {
                drop(guard);
                debug!("Skipping undeliverable frame: {e}");
                metrics.record_error(e);
            }
            Ok(FramePoll::TimedOut) => {}
            Ok(FramePoll::Finished) => {
                info!("Capture source delivered its last frame");
                queue.finalize();
                return;
            }
            Err(e) => {
                drop(guard);
                error!("Capture loop failed: {e}");
                metrics.record_error(e.clone());
                queue.finalize_with_error(e);
                return;
            }
        }
    }
}

/// Cancellable, single-consumer view over the capture queue. See
/// [`CaptureSession::packet_stream`].
#[derive(Debug)]
pub struct PacketStream<'a> {
    receiver: &'a mut PacketReceiver,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
}

impl<'a> PacketStream<'a> {
    fn new(receiver: &'a mut PacketReceiver, cancellation_token: CancellationToken) -> Self {
        Self {
            receiver,
            cancelled: Box::pin(cancellation_token.cancelled_owned()),
            finished: false,
        }
    }
}

impl Stream for PacketStream<'_> {
    type Item = Result<RawPacket, CaptureError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        // Cancellation is checked before the queue so it wins over buffered
        // packets; the remainder is visibly abandoned, not silently yielded.
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finished = true;
            return Poll::Ready(Some(Err(CaptureError::cancelled())));
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(packet)) => Poll::Ready(Some(Ok(packet))),
            Poll::Ready(None) => {
                this.finished = true;
                match this.receiver.fault() {
                    Some(fault) => Poll::Ready(Some(Err(fault))),
                    None => Poll::Ready(None),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
