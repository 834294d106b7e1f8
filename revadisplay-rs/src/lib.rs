//! Rev-A USB-serial secondary display streaming engine.
//!
//! Drives an 800x480 landscape RGB565 display over a serial link:
//! handshake, adaptive full/dirty-rect transmission, reconnect with
//! exponential backoff, and performance-driven mode adaptation. See
//! [`controller::StreamController`] for the supervising entry point and
//! [`replay`] for offline transcript analysis.

pub mod budget;
pub mod clock;
pub mod codec;
pub mod controller;
pub mod differ;
pub mod error;
pub mod models;
pub mod protocol;
pub mod replay;
pub mod transport;

pub use controller::{StreamController, StreamMode};
pub use error::{EngineError, Result};
pub use models::{
    BudgetStatus, DirtyRect, EventRecord, PerformanceTargets, ProtocolState, SendMode, SendStats,
    SerialDeviceInfo, StreamStatus, SubRevision,
};

/// Logical width/height this engine always programs the device to, in
/// landscape orientation.
pub const DISPLAY_WIDTH: u32 = 800;
pub const DISPLAY_HEIGHT: u32 = 480;

/// Install a `tracing` subscriber reading filter directives from
/// `RUST_LOG`, falling back to `info`. Intended to be called once by the
/// binary that embeds this engine; the library itself never initializes
/// global logging state.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
