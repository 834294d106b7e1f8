/* Shared data types for the streaming engine. */
use serde::{Deserialize, Serialize};

/// A changed rectangle within a frame, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl DirtyRect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_full_frame(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.w == width && self.h == height
    }
}

/// State machine positions the controller moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolState {
    Disconnected,
    Connecting,
    PortOpen,
    Hello,
    OrientationSet,
    Ready,
    Streaming,
    BackoffWait,
    Recovering,
    Degraded,
}

/// Device sub-identifier inferred from the HELLO echo, carrying the
/// device's native portrait dimensions (informational only — the
/// engine always programs 800x480 landscape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRevision {
    pub name: &'static str,
    pub portrait_width: u32,
    pub portrait_height: u32,
}

pub const SUB_REVISION_UNKNOWN: SubRevision = SubRevision {
    name: "unknown",
    portrait_width: 320,
    portrait_height: 480,
};

pub const SUB_REVISION_3_5: SubRevision = SubRevision {
    name: "usbmonitor_3_5",
    portrait_width: 320,
    portrait_height: 480,
};

pub const SUB_REVISION_5: SubRevision = SubRevision {
    name: "usbmonitor_5",
    portrait_width: 480,
    portrait_height: 800,
};

pub const SUB_REVISION_7: SubRevision = SubRevision {
    name: "usbmonitor_7",
    portrait_width: 600,
    portrait_height: 1024,
};

/// Match a 6-byte HELLO echo against the known sub-revision table.
pub fn sub_revision_from_echo(echo: &[u8]) -> SubRevision {
    match echo {
        [0x01, 0x01, 0x01, 0x01, 0x01, 0x01] => SUB_REVISION_3_5,
        [0x02, 0x02, 0x02, 0x02, 0x02, 0x02] => SUB_REVISION_5,
        [0x03, 0x03, 0x03, 0x03, 0x03, 0x03] => SUB_REVISION_7,
        _ => SUB_REVISION_UNKNOWN,
    }
}

/// Transmission mode a `send_*` call actually took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    Full,
    Dirty,
    Noop,
}

/// Per-call outcome of a frame transmission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SendStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub errors: u32,
    pub retries: u32,
    pub duration_s: f64,
    pub mode: SendMode,
}

impl SendStats {
    pub fn new(mode: SendMode) -> Self {
        Self {
            bytes_sent: 0,
            packets_sent: 0,
            errors: 0,
            retries: 0,
            duration_s: 0.0,
            mode,
        }
    }
}

/// Observable snapshot of the controller's state, safe to read without
/// holding the supervisor lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub state: ProtocolState,
    pub fps: f64,
    pub throughput_bps: f64,
    pub last_error: Option<String>,
    pub backoff_seconds: f64,
    pub recovery_attempts: u8,
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self {
            connected: false,
            port: None,
            state: ProtocolState::Disconnected,
            fps: 0.0,
            throughput_bps: 0.0,
            last_error: None,
            backoff_seconds: 0.0,
            recovery_attempts: 0,
        }
    }
}

/// A structured, append-only log entry recorded by the stream controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts_utc: String,
    pub event: String,
    pub state: ProtocolState,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Targets the performance budgeter measures samples against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTargets {
    pub cpu_percent_max: f64,
    pub rss_mb_max: f64,
    pub fps_min: f64,
    pub fps_max: f64,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            cpu_percent_max: 8.0,
            rss_mb_max: 300.0,
            fps_min: 5.0,
            fps_max: 10.0,
        }
    }
}

/// Result of a single performance sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub cpu_percent: f64,
    pub rss_mb: f64,
    pub fps: f64,
    pub overloaded: bool,
    pub warning: Option<String>,
    pub recommended_poll_ms: u32,
    pub recommended_mode: String,
}

/// One enumerated serial candidate device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub device: String,
    pub description: String,
    pub hwid: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}
