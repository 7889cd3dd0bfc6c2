//! Color writer: validation, single-writer serialization, safe shutdown.

use std::fmt;
use std::time::Duration;

use crate::gpio::{AcquireError, DriveError, Level, Line, LineSet};
use crate::lock::{CancelToken, Close, LockError, WriteLock};
use crate::protocol::{self, Color, ColorError, HALF_PERIOD_US};

// ── Error types ──

/// Why a `set_color` call did not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteError {
    /// A channel was out of range. Nothing was locked or driven.
    InvalidColor(ColorError),
    /// The wait for the write lock was cancelled. Nothing was driven.
    Interrupted,
    /// A line write failed mid-frame. The peripheral may hold a partial frame.
    HardwareFault(DriveError),
    /// The device is being torn down.
    Closed,
}

impl WriteError {
    /// Short machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::InvalidColor(_) => "invalid-color",
            WriteError::Interrupted => "interrupted",
            WriteError::HardwareFault(_) => "hardware-fault",
            WriteError::Closed => "closed",
        }
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::InvalidColor(e) => write!(f, "Invalid color: {e}"),
            WriteError::Interrupted => write!(f, "Interrupted while waiting for the LED"),
            WriteError::HardwareFault(e) => write!(f, "Hardware fault: {e}"),
            WriteError::Closed => write!(f, "LED device is shutting down"),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::InvalidColor(e) => Some(e),
            WriteError::HardwareFault(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ColorError> for WriteError {
    fn from(e: ColorError) -> Self {
        WriteError::InvalidColor(e)
    }
}

impl From<DriveError> for WriteError {
    fn from(e: DriveError) -> Self {
        WriteError::HardwareFault(e)
    }
}

/// Device initialization failed. Lines acquired before the failure have
/// already been released, most recent first.
#[derive(Debug, Clone, PartialEq)]
pub struct InitError {
    pub source: AcquireError,
    pub rolled_back: Vec<Line>,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device init failed: {}", self.source)
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

// ── Held lines ──

/// A line set plus the ordered list of lines it currently holds.
///
/// Dropping it releases whatever is still held, in reverse order.
pub struct HeldLines<L: LineSet> {
    lines: L,
    held: Vec<Line>,
}

impl<L: LineSet> HeldLines<L> {
    /// Acquire every line in [`Line::ALL`] order. On the first failure, the
    /// lines acquired so far are released in reverse before returning.
    pub fn acquire_all(mut lines: L) -> Result<Self, InitError> {
        let mut held = Vec::with_capacity(Line::ALL.len());
        for line in Line::ALL {
            if let Err(source) = lines.acquire(line) {
                let rolled_back = unwind(&mut lines, &mut held);
                log::warn!("acquire failed ({source}); released {rolled_back:?}");
                return Err(InitError {
                    source,
                    rolled_back,
                });
            }
            held.push(line);
        }
        Ok(HeldLines { lines, held })
    }

    /// All four lines still held, by our bookkeeping and by the backend.
    pub fn is_complete(&self) -> bool {
        Line::ALL
            .iter()
            .all(|&l| self.held.contains(&l) && self.lines.is_acquired(l))
    }

    pub fn held(&self) -> &[Line] {
        &self.held
    }

    /// Release everything still held, most recently acquired first.
    pub fn release_all(&mut self) -> Vec<Line> {
        unwind(&mut self.lines, &mut self.held)
    }

    pub fn lines_mut(&mut self) -> &mut L {
        &mut self.lines
    }
}

impl<L: LineSet> Drop for HeldLines<L> {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn unwind<L: LineSet>(lines: &mut L, held: &mut Vec<Line>) -> Vec<Line> {
    let mut released = Vec::with_capacity(held.len());
    while let Some(line) = held.pop() {
        lines.release(line);
        released.push(line);
    }
    released
}

// ── Transmission ──

/// Clock one frame out. Stops at the first failed line write.
pub fn transmit<L: LineSet>(lines: &mut L, color: Color) -> Result<(), DriveError> {
    for slot in protocol::frame(color) {
        for (line, level) in slot.levels() {
            lines.drive(line, level)?;
        }
        lines.drive(Line::Clock, Level::High)?;
        lines.delay_us(HALF_PERIOD_US);
        lines.drive(Line::Clock, Level::Low)?;
        lines.delay_us(HALF_PERIOD_US);
    }
    Ok(())
}

// ── Writer ──

/// What [`ColorWriter::shutdown`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Shutdown {
    /// The off frame went out and the lines were released.
    LedOff,
    /// A writer was mid-frame. The LED keeps whatever it ends up with; the
    /// lines are released when that writer finishes.
    WriterBusy,
    /// The off frame failed part-way. The lines were still released.
    OffFailed(DriveError),
    /// The backend no longer holds every line, so no frame was attempted.
    Incomplete,
    AlreadyClosed,
}

/// The only write path to the LED.
pub struct ColorWriter<L: LineSet> {
    state: WriteLock<HeldLines<L>>,
}

impl<L: LineSet> ColorWriter<L> {
    /// Acquire all four lines and create the write lock.
    pub fn init(lines: L) -> Result<Self, InitError> {
        let held = HeldLines::acquire_all(lines)?;
        log::info!("acquired lines {:?}", held.held());
        Ok(ColorWriter {
            state: WriteLock::new(held),
        })
    }

    /// Validate, wait for the lock, then clock out one frame.
    ///
    /// Only the lock wait observes `cancel`. Once the first line is driven
    /// the frame runs to completion or to the first hardware fault.
    pub fn set_color(&self, r: i32, g: i32, b: i32, cancel: &CancelToken) -> Result<(), WriteError> {
        let color = Color::new(r, g, b)?;

        let mut guard = self.state.lock_interruptible(cancel).map_err(|e| match e {
            LockError::Cancelled => WriteError::Interrupted,
            LockError::Closed => WriteError::Closed,
        })?;

        let result = transmit(guard.lines_mut(), color);
        drop(guard);

        match result {
            Ok(()) => {
                log::debug!("frame {color} sent");
                Ok(())
            }
            Err(e) => {
                log::warn!("frame {color} aborted: {e}");
                Err(WriteError::HardwareFault(e))
            }
        }
    }

    /// Teardown: switch the LED off if nobody is writing, then release the
    /// lines. Never waits for an in-flight writer.
    pub fn shutdown(&self) -> Shutdown {
        match self.state.close() {
            Close::Acquired(mut held) => {
                let outcome = if held.is_complete() {
                    match transmit(held.lines_mut(), Color::OFF) {
                        Ok(()) => Shutdown::LedOff,
                        Err(e) => {
                            log::warn!("could not switch LED off: {e}");
                            Shutdown::OffFailed(e)
                        }
                    }
                } else {
                    Shutdown::Incomplete
                };
                let released = held.release_all();
                log::info!("released lines {released:?}");
                outcome
            }
            Close::Busy => {
                log::warn!("writer in flight at shutdown; leaving LED as-is");
                Shutdown::WriterBusy
            }
            Close::AlreadyClosed => Shutdown::AlreadyClosed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// After a [`Shutdown::WriterBusy`], wait up to `timeout` for the
    /// in-flight frame to finish and the lines to be released.
    pub fn wait_released(&self, timeout: Duration) -> bool {
        self.state.wait_closed(timeout)
    }
}
