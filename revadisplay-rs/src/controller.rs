/* Stream controller: the supervisor. Owns the transport, protocol engine,
 * previous frame, and status behind a single exclusive lock, the
 * synchronous equivalent of the teacher's actor-plus-channel model — every
 * public call runs to completion on the caller's thread while holding the
 * lock, rather than being queued to a background task. */
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::differ;
use crate::error::{EngineError, Result};
use crate::models::{
    BudgetStatus, EventRecord, PerformanceTargets, ProtocolState, SendMode, SendStats, StreamStatus,
};
use crate::protocol::RevAProtocol;
use crate::transport::{self, SerialConfig, Transport};

const MAX_EVENTS: usize = 1000;
const MAX_RECOVER_ATTEMPTS: u8 = 5;
const BACKOFF_BASE_S: f64 = 0.25;
const BACKOFF_CAP_S: f64 = 4.0;
const BACKOFF_JITTER_MAX_S: f64 = 0.15;
const MIN_POLL_MS: u32 = 200;
const MAX_POLL_MS: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Adaptive,
    Full,
}

struct Inner {
    width: u32,
    height: u32,
    mode: StreamMode,
    poll_ms: u32,
    port_override: Option<String>,
    transport: Box<dyn Transport>,
    protocol: RevAProtocol,
    status: StreamStatus,
    previous_frame: Option<Vec<u8>>,
    ewma_bps: f64,
    events: Vec<EventRecord>,
    force_full_frames_remaining: u32,
}

/// Synchronous supervisor over the serial transport and protocol engine.
/// Every public method acquires the internal lock for its full duration;
/// the only suspension points inside that critical section are the
/// transport's bounded read and the backoff sleep.
pub struct StreamController {
    inner: Mutex<Inner>,
    clock: Box<dyn Clock>,
}

impl StreamController {
    pub fn new(width: u32, height: u32, mode: StreamMode, poll_ms: u32, port_override: Option<String>) -> Self {
        Self::with_transport_and_clock(
            width,
            height,
            mode,
            poll_ms,
            port_override,
            Box::new(transport::SerialTransport::new()),
            Box::new(SystemClock),
        )
    }

    pub fn with_transport_and_clock(
        width: u32,
        height: u32,
        mode: StreamMode,
        poll_ms: u32,
        port_override: Option<String>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let inner = Inner {
            width,
            height,
            mode,
            poll_ms: poll_ms.clamp(MIN_POLL_MS, MAX_POLL_MS),
            port_override,
            transport,
            protocol: RevAProtocol::new(width, height),
            status: StreamStatus::default(),
            previous_frame: None,
            ewma_bps: 0.0,
            events: Vec::new(),
            force_full_frames_remaining: 0,
        };
        Self {
            inner: Mutex::new(inner),
            clock,
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.inner.lock().unwrap().status.clone()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<EventRecord> {
        let inner = self.inner.lock().unwrap();
        let start = inner.events.len().saturating_sub(limit);
        inner.events[start..].to_vec()
    }

    /// Resolve the port, open the transport, and run the handshake.
    pub fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::connect_locked(&mut inner, &*self.clock)
    }

    pub fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        Self::disconnect_locked(&mut inner);
    }

    /// No-op while disconnected, matching the original controller's
    /// decision not to route brightness through the recovery ladder.
    pub fn set_brightness(&self, percent: u8) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.status.connected {
            return Ok(());
        }
        let mut transport = std::mem::replace(&mut inner.transport, Box::new(transport::SerialTransport::new()));
        let result = inner.protocol.set_brightness(&mut *transport, percent);
        inner.transport = transport;
        result
    }

    pub fn apply_budget(&self, budget: &BudgetStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.poll_ms = budget.recommended_poll_ms.clamp(MIN_POLL_MS, MAX_POLL_MS);
        inner.mode = if budget.recommended_mode == "full" {
            StreamMode::Full
        } else {
            StreamMode::Adaptive
        };

        if budget.overloaded {
            inner.status.state = ProtocolState::Degraded;
            inner.force_full_frames_remaining = inner.force_full_frames_remaining.max(2);
            let new_chunk = (inner.width as usize * 4).max(256);
            inner.protocol.set_chunk_size(new_chunk);
            let poll_ms = inner.poll_ms;
            Self::log_event_locked(&mut inner, "budget_overload", json!({ "poll_ms": poll_ms }));
        } else {
            let chunk = inner.width as usize * 8;
            inner.protocol.set_chunk_size(chunk);
        }
    }

    /// Send one frame: pick full vs. dirty, transmit, update throughput
    /// stats, and drive recovery on failure. Holds the supervisor lock for
    /// the entire call, including the on-demand connect and any recovery
    /// ladder, so no other public method can observe a partial state or
    /// interleave a disconnect/reconnect mid-send.
    pub fn send(&self, frame: &[u8]) -> Result<SendStats> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.status.connected {
            Self::connect_locked(&mut inner, &*self.clock)?;
        }

        let start = Instant::now();
        let mut stats = match Self::send_once_locked(&mut inner, frame) {
            Ok(stats) => stats,
            Err(e) => {
                Self::log_event_locked(&mut inner, "send_error", json!({ "error": e.to_string() }));
                inner.status.last_error = Some(e.to_string());
                inner.status.state = ProtocolState::Recovering;
                Self::recover_with_backoff_locked(&mut inner, &*self.clock)?;
                let inner_ref: &mut Inner = &mut inner;
                let mut retry_stats = inner_ref.protocol.send_frame(&mut *inner_ref.transport, frame)?;
                retry_stats.retries += 1;
                retry_stats
            }
        };

        let elapsed = start.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);
        let fps = 1.0 / elapsed;
        let bps = stats.bytes_sent as f64 / elapsed;
        inner.ewma_bps = if inner.ewma_bps == 0.0 {
            bps
        } else {
            0.75 * inner.ewma_bps + 0.25 * bps
        };
        stats.duration_s = elapsed;

        inner.previous_frame = Some(frame.to_vec());
        inner.status.fps = fps;
        inner.status.throughput_bps = inner.ewma_bps;
        inner.status.state = if inner.force_full_frames_remaining > 0 {
            ProtocolState::Degraded
        } else {
            ProtocolState::Streaming
        };

        let throughput_bps = inner.ewma_bps;
        Self::log_event_locked(
            &mut inner,
            "send_ok",
            json!({
                "mode": mode_name(stats.mode),
                "bytes": stats.bytes_sent,
                "packets_sent": stats.packets_sent,
                "fps": fps,
                "throughput_bps": throughput_bps,
            }),
        );

        Ok(stats)
    }

    fn connect_locked(inner: &mut Inner, clock: &dyn Clock) -> Result<()> {
        inner.status.state = ProtocolState::Connecting;

        let port = match &inner.port_override {
            Some(p) => p.clone(),
            None => {
                let devices = inner.transport.discover()?;
                let selected = transport::auto_select_device(&devices).ok_or(EngineError::NoCompatibleDevice)?;
                selected.device.clone()
            }
        };

        Self::log_event_locked(inner, "connect_start", json!({ "port": port }));

        let config = SerialConfig::new(port.clone());
        inner.transport.open(&config)?;
        inner.status.state = ProtocolState::PortOpen;

        let _ = clock;
        inner.protocol.handshake(&mut *inner.transport, 500)?;

        inner.status.connected = true;
        inner.status.port = Some(port.clone());
        inner.status.state = ProtocolState::Ready;
        inner.status.recovery_attempts = 0;
        inner.status.backoff_seconds = 0.0;
        inner.status.last_error = None;

        let sub_revision = inner.protocol.sub_revision().name;
        Self::log_event_locked(
            inner,
            "connect_ok",
            json!({ "port": port, "sub_revision": sub_revision }),
        );
        info!(port = %port, "display connected");
        Ok(())
    }

    fn disconnect_locked(inner: &mut Inner) {
        inner.transport.close();
        inner.previous_frame = None;
        inner.ewma_bps = 0.0;
        inner.force_full_frames_remaining = 0;
        inner.status.connected = false;
        inner.status.state = ProtocolState::Disconnected;
        inner.status.port = None;
        Self::log_event_locked(inner, "disconnect", Map::new());
    }

    /// Pick forced-full / adaptive-diff / full-fallback and transmit.
    /// Pure transmission — timing, throughput accounting, status and event
    /// logging are the caller's responsibility (`send` needs them to span
    /// the retry-after-recovery path too).
    fn send_once_locked(inner: &mut Inner, frame: &[u8]) -> Result<SendStats> {
        if inner.force_full_frames_remaining > 0 {
            inner.force_full_frames_remaining -= 1;
            return inner.protocol.send_frame(&mut *inner.transport, frame);
        }

        if inner.mode == StreamMode::Adaptive && inner.previous_frame.is_some() {
            let previous = inner.previous_frame.as_ref().unwrap();
            let rects = differ::diff_frames(previous, frame, inner.width, inner.height, differ::DEFAULT_TILE, differ::DEFAULT_MAX_RATIO)?;
            let is_full = rects.len() == 1 && rects[0].is_full_frame(inner.width, inner.height);
            if !rects.is_empty() && !is_full {
                return inner.protocol.send_dirty_rects(&mut *inner.transport, &rects, frame);
            }
        }

        inner.protocol.send_frame(&mut *inner.transport, frame)
    }

    fn recover_with_backoff_locked(inner: &mut Inner, clock: &dyn Clock) -> Result<()> {
        let mut last_cause = String::new();
        let mut rng = rand::thread_rng();

        for attempt in 1..=MAX_RECOVER_ATTEMPTS {
            let base_delay = (BACKOFF_BASE_S * 2f64.powi((attempt - 1) as i32)).min(BACKOFF_CAP_S);
            let jitter: f64 = rng.gen_range(0.0..=BACKOFF_JITTER_MAX_S);
            let delay = base_delay + jitter;

            inner.status.state = ProtocolState::BackoffWait;
            inner.status.backoff_seconds = delay;
            inner.status.recovery_attempts = attempt;
            Self::log_event_locked(inner, "recover_wait", json!({ "attempt": attempt, "wait_s": delay }));

            clock.sleep(Duration::from_secs_f64(delay));

            inner.status.state = ProtocolState::Recovering;
            Self::disconnect_locked(inner);

            match Self::connect_locked(inner, clock) {
                Ok(()) => {
                    inner.status.state = ProtocolState::Degraded;
                    inner.force_full_frames_remaining = 3;
                    Self::log_event_locked(inner, "recover_ok", json!({ "attempt": attempt }));
                    return Ok(());
                }
                Err(e) => {
                    last_cause = e.to_string();
                    Self::log_event_locked(inner, "recover_error", json!({ "attempt": attempt, "error": last_cause }));
                }
            }
        }

        inner.status.connected = false;
        inner.status.state = ProtocolState::Recovering;
        Err(EngineError::RecoverFailed {
            attempts: MAX_RECOVER_ATTEMPTS,
            cause: last_cause,
        })
    }

    fn log_event_locked(inner: &mut Inner, event: &str, fields: impl Into<Value>) {
        let fields_value = fields.into();
        let fields_map = match fields_value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warn!(?other, "event fields were not an object; dropping");
                Map::new()
            }
        };
        inner.events.push(EventRecord {
            ts_utc: chrono::Utc::now().to_rfc3339(),
            event: event.to_string(),
            state: inner.status.state,
            fields: fields_map,
        });
        if inner.events.len() > MAX_EVENTS {
            let overflow = inner.events.len() - MAX_EVENTS;
            inner.events.drain(0..overflow);
        }
    }
}

fn mode_name(mode: SendMode) -> &'static str {
    match mode {
        SendMode::Full => "full",
        SendMode::Dirty => "dirty",
        SendMode::Noop => "noop",
    }
}

pub fn default_targets() -> PerformanceTargets {
    PerformanceTargets::default()
}
