//! Device capability interface: what the OS-facing layer calls.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::gpio::{LineSet, PlatformLineSet};
use crate::lock::CancelToken;
use crate::writer::{ColorWriter, InitError, Shutdown, WriteError};

/// A color as it arrives from a caller: raw, unvalidated channel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub r: i32,
    pub g: i32,
    pub b: i32,
}

impl WriteRequest {
    pub const OFF: WriteRequest = WriteRequest { r: 0, g: 0, b: 0 };

    pub fn new(r: i32, g: i32, b: i32) -> Self {
        WriteRequest { r, g, b }
    }
}

impl fmt::Display for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.r, self.g, self.b)
    }
}

// ── Trait ──

/// Lifecycle and write hooks for a registered LED device.
pub trait LedDevice: Send + Sync {
    type Lines: LineSet;

    fn init(lines: Self::Lines) -> std::result::Result<Self, InitError>
    where
        Self: Sized;

    fn handle_write_request(
        &self,
        request: WriteRequest,
        cancel: &CancelToken,
    ) -> std::result::Result<(), WriteError>;

    fn teardown(&self) -> Shutdown;
}

impl<L: LineSet> LedDevice for ColorWriter<L> {
    type Lines = L;

    fn init(lines: L) -> std::result::Result<Self, InitError> {
        ColorWriter::init(lines)
    }

    fn handle_write_request(
        &self,
        request: WriteRequest,
        cancel: &CancelToken,
    ) -> std::result::Result<(), WriteError> {
        self.set_color(request.r, request.g, request.b, cancel)
    }

    fn teardown(&self) -> Shutdown {
        self.shutdown()
    }
}

pub type PlatformDevice = ColorWriter<PlatformLineSet>;

/// Open the configured GPIO chip and bring the device up.
pub fn open_platform(config: &Config) -> crate::error::Result<PlatformDevice> {
    let lines = PlatformLineSet::open(&config.chip, config.pins, &config.consumer)?;
    log::info!(
        "gpio chip {} ({}), pins {:?}",
        config.chip,
        lines.chip_label(),
        config.pins
    );
    Ok(<PlatformDevice as LedDevice>::init(lines)?)
}
