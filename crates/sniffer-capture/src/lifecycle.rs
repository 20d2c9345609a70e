//! Public `start`/`stop`/`is_running` surface (spec.md §4.6). Owns the
//! capture thread and a delivery thread that drains the bridge into the
//! embedder's callbacks; ensures one capture at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sniffer_core::capture::CaptureSource;
use sniffer_core::config::CaptureConfig;
use sniffer_core::error::{CaptureError, FatalErrorCode};
use sniffer_core::model::{
    CaptureEvent, CaptureStatistics, ConnectionId, MessageDirection, PipelineStats,
};
use tracing::{error, info};

use crate::bridge::{self, BridgeSender};
use crate::clock::MonotonicClock;
use crate::http_parser::HttpStreamParser;
use crate::reassembler::Reassembler;

/// How often the capture thread sweeps for idle connections, independent
/// of segment arrival rate.
const IDLE_SWEEP_INTERVAL_MS: u64 = 1_000;
/// Bound on how long the delivery thread waits between bridge polls while
/// looking for `CaptureStopped` during a drain.
const DELIVERY_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// `Message` events queued before back-pressure kicks in.
const BRIDGE_CAPACITY: usize = 4_096;

enum State<S> {
    Idle { source: S },
    Running {
        stop_flag: Arc<AtomicBool>,
        capture_thread: JoinHandle<(S, Result<(), CaptureError>)>,
        delivery_thread: JoinHandle<Option<CaptureStatistics>>,
    },
    /// Transient placeholder used while moving a source out of and back
    /// into the mutex; never observed outside of a single method call.
    Transitioning,
}

pub struct LifecycleController<S: CaptureSource + 'static> {
    state: Mutex<State<S>>,
}

impl<S: CaptureSource + 'static> LifecycleController<S> {
    pub fn new(source: S) -> Self {
        Self {
            state: Mutex::new(State::Idle { source }),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Running { .. })
    }

    pub fn start(
        &self,
        config: CaptureConfig,
        mut on_message: impl FnMut(sniffer_core::model::HttpMessageRecord) + Send + 'static,
        mut on_stats: impl FnMut(PipelineStats) + Send + 'static,
        mut on_error: impl FnMut(FatalErrorCode, String) + Send + 'static,
    ) -> Result<(), CaptureError> {
        let mut guard = self.state.lock().unwrap();
        let mut source = match std::mem::replace(&mut *guard, State::Transitioning) {
            State::Idle { source } => source,
            other @ State::Running { .. } => {
                *guard = other;
                return Err(CaptureError::AlreadyRunning);
            }
            State::Transitioning => unreachable!("no method leaves state Transitioning"),
        };

        if let Err(e) = source.open(&config) {
            *guard = State::Idle { source };
            return Err(e);
        }

        let (bridge_tx, bridge_rx) = bridge::bridge(BRIDGE_CAPACITY);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let capture_thread = {
            let stop_flag = stop_flag.clone();
            let bridge_tx = bridge_tx.clone();
            let config = config.clone();
            thread::spawn(move || run_capture_thread(source, stop_flag, bridge_tx, config))
        };

        let delivery_thread = thread::spawn(move || {
            let mut stats = None;
            loop {
                match bridge_rx.recv_timeout(DELIVERY_POLL_INTERVAL) {
                    Ok(CaptureEvent::Message(record)) => on_message(record),
                    Ok(CaptureEvent::Stats(pipeline_stats)) => on_stats(pipeline_stats),
                    Ok(CaptureEvent::FatalError { code, message }) => {
                        let code = parse_fatal_code(&code);
                        on_error(code, message);
                    }
                    Ok(CaptureEvent::CaptureStopped { stats: s }) => {
                        stats = s;
                        break;
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
            // Drain anything left in the buffer after CaptureStopped so no
            // already-parsed message is lost (spec.md §4.5's drain-on-stop).
            while let Some(event) = bridge_rx.try_recv() {
                if let CaptureEvent::Message(record) = event {
                    on_message(record);
                }
            }
            stats
        });

        *guard = State::Running {
            stop_flag,
            capture_thread,
            delivery_thread,
        };
        Ok(())
    }

    pub fn stop(&self) -> Result<Option<CaptureStatistics>, CaptureError> {
        let mut guard = self.state.lock().unwrap();
        let (stop_flag, capture_thread, delivery_thread) =
            match std::mem::replace(&mut *guard, State::Transitioning) {
                State::Running {
                    stop_flag,
                    capture_thread,
                    delivery_thread,
                } => (stop_flag, capture_thread, delivery_thread),
                other @ State::Idle { .. } => {
                    *guard = other;
                    return Err(CaptureError::NotRunning);
                }
                State::Transitioning => unreachable!("no method leaves state Transitioning"),
            };

        stop_flag.store(true, Ordering::Release);
        let (source, run_result) = capture_thread.join().expect("capture thread panicked");
        let stats = delivery_thread.join().expect("delivery thread panicked");

        if let Err(e) = run_result {
            error!(error = %e, "capture thread exited with an error");
        }

        *guard = State::Idle { source };
        Ok(stats)
    }
}

fn parse_fatal_code(code: &str) -> FatalErrorCode {
    match code {
        "INVALID_INTERFACE" => FatalErrorCode::InvalidInterface,
        "CAPTURE_OPEN_FAILED" => FatalErrorCode::CaptureOpenFailed,
        _ => FatalErrorCode::Unrecoverable,
    }
}

fn run_capture_thread<S: CaptureSource>(
    mut source: S,
    stop_flag: Arc<AtomicBool>,
    bridge_tx: BridgeSender,
    config: CaptureConfig,
) -> (S, Result<(), CaptureError>) {
    let mut reassembler = Reassembler::new(
        &config.ports,
        config.max_concurrent_connections,
        config.connection_idle_timeout_ms,
        config.sample_rate,
    );
    let mut parsers: HashMap<ConnectionId, (HttpStreamParser, HttpStreamParser)> = HashMap::new();
    let clock = MonotonicClock::new();
    let mut last_sweep_ms = 0u64;
    let max_body_size = config.max_body_size;

    // Cumulative ambient counters (SPEC_FULL.md §2.10), snapshotted and
    // sent through the bridge's control channel on the same cadence as
    // the idle sweep rather than once per event — packets/messages can
    // arrive far faster than a dashboard redraws.
    let mut packets_decoded = 0u64;
    let mut requests_emitted = 0u64;
    let mut responses_emitted = 0u64;
    let mut non_http_streams = 0u64;

    let run_result = source.run(&stop_flag, &mut |segment| {
        let now_ms = clock.now_ms();
        packets_decoded += 1;
        let evicted_on_admit = reassembler.push_segment(segment, now_ms, |chunk| {
            let (request_parser, response_parser) =
                parsers.entry(chunk.connection_id.clone()).or_insert_with(|| {
                    (
                        HttpStreamParser::new(
                            chunk.connection_id.clone(),
                            MessageDirection::Request,
                            chunk.receiver.clone(),
                            chunk.destination.clone(),
                            max_body_size,
                        ),
                        HttpStreamParser::new(
                            chunk.connection_id.clone(),
                            MessageDirection::Response,
                            chunk.receiver.clone(),
                            chunk.destination.clone(),
                            max_body_size,
                        ),
                    )
                });
            let parser = if chunk.client_to_server {
                &mut *request_parser
            } else {
                &mut *response_parser
            };
            let entered_non_http = parser.feed(&chunk.data, |record| {
                match record.direction {
                    MessageDirection::Request => requests_emitted += 1,
                    MessageDirection::Response => responses_emitted += 1,
                }
                bridge_tx.send_message(CaptureEvent::Message(record));
            });
            if entered_non_http {
                non_http_streams += 1;
            }
        });
        for id in evicted_on_admit {
            parsers.remove(&id);
        }

        if now_ms.saturating_sub(last_sweep_ms) >= IDLE_SWEEP_INTERVAL_MS {
            last_sweep_ms = now_ms;
            for id in reassembler.evict_idle(now_ms) {
                parsers.remove(&id);
            }
            bridge_tx.send_control(CaptureEvent::Stats(PipelineStats {
                packets_decoded,
                active_connections: reassembler.connection_count() as u64,
                requests_emitted,
                responses_emitted,
                evictions: reassembler.eviction_count(),
                gaps: reassembler.gap_count(),
                non_http_streams,
                sink_overflows: bridge_tx.dropped_message_count(),
            }));
        }
    });

    bridge_tx.send_control(CaptureEvent::Stats(PipelineStats {
        packets_decoded,
        active_connections: reassembler.connection_count() as u64,
        requests_emitted,
        responses_emitted,
        evictions: reassembler.eviction_count(),
        gaps: reassembler.gap_count(),
        non_http_streams,
        sink_overflows: bridge_tx.dropped_message_count(),
    }));

    let stats = source.stats();
    source.close();

    match &run_result {
        Ok(()) => {
            info!(?stats, "capture stopped");
            bridge_tx.send_control(CaptureEvent::CaptureStopped { stats });
        }
        Err(e) => {
            let (code, message) = e
                .as_fatal()
                .map(|(c, m)| (c.as_str().to_string(), m.to_string()))
                .unwrap_or_else(|| (FatalErrorCode::Unrecoverable.as_str().to_string(), e.to_string()));
            bridge_tx.send_control(CaptureEvent::FatalError {
                code,
                message: message.clone(),
            });
            bridge_tx.send_control(CaptureEvent::CaptureStopped { stats });
        }
    }

    (source, run_result)
}
