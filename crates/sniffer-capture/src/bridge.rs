//! Thread-safe delivery bridge between the capture thread and the
//! embedder's thread (spec.md §4.5). Carries `Message`, `FatalError`, and
//! `CaptureStopped` events; the latter two are never dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use sniffer_core::model::CaptureEvent;
use std::time::Duration;
use tracing::warn;

/// Control events (`FatalError`, `CaptureStopped`) are sent on an unbounded
/// channel so they are never dropped regardless of `Message` backlog.
/// `Message` events go through a bounded channel; when full, the newest one
/// is dropped and counted rather than blocking the capture loop.
#[derive(Clone)]
pub struct BridgeSender {
    messages: Sender<CaptureEvent>,
    control: Sender<CaptureEvent>,
    dropped_messages: Arc<AtomicU64>,
}

pub struct BridgeReceiver {
    messages: Receiver<CaptureEvent>,
    control: Receiver<CaptureEvent>,
    dropped_messages: Arc<AtomicU64>,
}

/// Build a bridge whose `Message` side holds at most `capacity` queued
/// records before newest-is-dropped back-pressure kicks in.
pub fn bridge(capacity: usize) -> (BridgeSender, BridgeReceiver) {
    let (message_tx, message_rx) = crossbeam_channel::bounded(capacity);
    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let dropped_messages = Arc::new(AtomicU64::new(0));
    (
        BridgeSender {
            messages: message_tx,
            control: control_tx,
            dropped_messages: dropped_messages.clone(),
        },
        BridgeReceiver {
            messages: message_rx,
            control: control_rx,
            dropped_messages,
        },
    )
}

impl BridgeSender {
    /// Send a `Message` event. Never blocks: on a full buffer the event is
    /// dropped and the overflow counter is incremented.
    pub fn send_message(&self, event: CaptureEvent) {
        debug_assert!(matches!(event, CaptureEvent::Message(_)));
        match self.messages.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(total_dropped = total, "delivery bridge overflow, message dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Send a control event (`FatalError` or `CaptureStopped`). Blocks
    /// until delivered; these must never be dropped.
    pub fn send_control(&self, event: CaptureEvent) {
        debug_assert!(!matches!(event, CaptureEvent::Message(_)));
        let _ = self.control.send(event);
    }

    pub fn dropped_message_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl BridgeReceiver {
    /// Drain whatever is immediately available from both channels,
    /// preferring control events so a pending `CaptureStopped` is never
    /// starved behind a burst of messages.
    pub fn try_recv(&self) -> Option<CaptureEvent> {
        if let Ok(event) = self.control.try_recv() {
            return Some(event);
        }
        self.messages.try_recv().ok()
    }

    /// Block up to `timeout` for the next event from either channel.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<CaptureEvent, RecvTimeoutError> {
        if let Ok(event) = self.control.try_recv() {
            return Ok(event);
        }
        crossbeam_channel::select! {
            recv(self.control) -> msg => msg.map_err(|_| RecvTimeoutError::Disconnected),
            recv(self.messages) -> msg => msg.map_err(|_| RecvTimeoutError::Disconnected),
            default(timeout) => Err(RecvTimeoutError::Timeout),
        }
    }

    pub fn dropped_message_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniffer_core::model::{CaptureStatistics, HttpMessageRecord, MessageDirection};

    fn sample_message() -> CaptureEvent {
        CaptureEvent::Message(HttpMessageRecord {
            receiver: sniffer_core::model::Endpoint::new("10.0.0.1", 80),
            destination: sniffer_core::model::Endpoint::new("10.0.0.2", 1),
            direction: MessageDirection::Request,
            headers: Default::default(),
            method: Some("GET".to_string()),
            path: Some("/".to_string()),
            status_code: None,
            body: vec![],
            body_truncated: false,
            body_encoding: None,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        })
    }

    #[test]
    fn full_message_buffer_drops_newest_and_counts_it() {
        let (tx, rx) = bridge(1);
        tx.send_message(sample_message());
        tx.send_message(sample_message());
        assert_eq!(tx.dropped_message_count(), 1);
        assert_eq!(rx.dropped_message_count(), 1);
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn control_events_never_dropped_and_preferred_over_messages() {
        let (tx, rx) = bridge(4);
        tx.send_message(sample_message());
        tx.send_control(CaptureEvent::CaptureStopped { stats: None::<CaptureStatistics> });
        match rx.try_recv() {
            Some(CaptureEvent::CaptureStopped { .. }) => {}
            other => panic!("expected CaptureStopped first, got {other:?}"),
        }
    }
}
