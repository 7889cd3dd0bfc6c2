//! GPIO line set: trait + Linux character-device backend.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ── Lines and levels ──

/// Logical role of one of the four LED lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Line {
    Red,
    Green,
    Blue,
    Clock,
}

impl Line {
    /// Acquisition order. Release always walks this in reverse.
    pub const ALL: [Line; 4] = [Line::Red, Line::Green, Line::Blue, Line::Clock];

    /// Stable index into per-line arrays.
    pub fn index(self) -> usize {
        match self {
            Line::Red => 0,
            Line::Green => 1,
            Line::Blue => 2,
            Line::Clock => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Line::Red => "red",
            Line::Green => "green",
            Line::Blue => "blue",
            Line::Clock => "clock",
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Electrical level driven onto a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Raw value expected by GPIO line handles.
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("L"),
            Level::High => f.write_str("H"),
        }
    }
}

// ── Pin mapping ──

/// Physical line offsets on the GPIO chip, one per logical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    #[serde(default = "default_red")]
    pub red: u32,
    #[serde(default = "default_green")]
    pub green: u32,
    #[serde(default = "default_blue")]
    pub blue: u32,
    #[serde(default = "default_clock")]
    pub clock: u32,
}

fn default_red() -> u32 {
    17
}
fn default_green() -> u32 {
    27
}
fn default_blue() -> u32 {
    22
}
fn default_clock() -> u32 {
    4
}

impl Default for PinMap {
    fn default() -> Self {
        PinMap {
            red: default_red(),
            green: default_green(),
            blue: default_blue(),
            clock: default_clock(),
        }
    }
}

impl PinMap {
    pub fn pin(&self, line: Line) -> u32 {
        match line {
            Line::Red => self.red,
            Line::Green => self.green,
            Line::Blue => self.blue,
            Line::Clock => self.clock,
        }
    }

    /// Pairs of lines mapped to the same offset.
    pub fn conflicts(&self) -> Vec<(Line, Line, u32)> {
        let mut out = Vec::new();
        for (i, &a) in Line::ALL.iter().enumerate() {
            for &b in &Line::ALL[i + 1..] {
                if self.pin(a) == self.pin(b) {
                    out.push((a, b, self.pin(a)));
                }
            }
        }
        out
    }
}

// ── Error types ──

/// Failure to reserve a line.
///
/// String payloads follow the convention **"context: details"**.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireError {
    /// The line exists but another consumer holds it.
    AlreadyTaken(Line, String),
    /// The line (or its chip) cannot be reserved at all.
    Unavailable(Line, String),
}

impl AcquireError {
    pub fn line(&self) -> Line {
        match self {
            AcquireError::AlreadyTaken(line, _) | AcquireError::Unavailable(line, _) => *line,
        }
    }
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::AlreadyTaken(line, e) => write!(f, "{line} line already taken: {e}"),
            AcquireError::Unavailable(line, e) => write!(f, "{line} line unavailable: {e}"),
        }
    }
}

impl std::error::Error for AcquireError {}

/// Failure to set a line level.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveError {
    NotAcquired(Line),
    Failed(Line, String),
}

impl DriveError {
    pub fn line(&self) -> Line {
        match self {
            DriveError::NotAcquired(line) | DriveError::Failed(line, _) => *line,
        }
    }
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveError::NotAcquired(line) => write!(f, "{line} line driven before acquire"),
            DriveError::Failed(line, e) => write!(f, "{line} line write failed: {e}"),
        }
    }
}

impl std::error::Error for DriveError {}

// ── Trait ──

/// The four LED lines behind acquire/release/drive primitives.
pub trait LineSet: Send {
    /// Reserve `line` for exclusive output use, driving it low on success.
    fn acquire(&mut self, line: Line) -> Result<(), AcquireError>;

    /// Release `line`. No-op if it was never acquired.
    fn release(&mut self, line: Line);

    fn is_acquired(&self, line: Line) -> bool;

    fn drive(&mut self, line: Line, level: Level) -> Result<(), DriveError>;

    /// Hold the current levels for `micros` microseconds.
    fn delay_us(&mut self, micros: u32) {
        spin_delay(Duration::from_micros(u64::from(micros)));
    }
}

/// Busy-wait on the monotonic clock.
///
/// Thread sleeps overshoot by tens of microseconds on a stock kernel, which
/// is longer than a whole half-period.
pub fn spin_delay(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

// ── Linux implementation ──

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;

    use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

    /// Lines on a GPIO character device (`/dev/gpiochipN`).
    pub struct CdevLineSet {
        chip: Chip,
        pins: PinMap,
        consumer: String,
        handles: [Option<LineHandle>; 4],
    }

    impl CdevLineSet {
        /// Open the chip. No line is requested until [`LineSet::acquire`].
        pub fn open(chip_path: &str, pins: PinMap, consumer: &str) -> crate::error::Result<Self> {
            let chip = Chip::new(chip_path).map_err(|e| {
                crate::RgbledError::Chip(format!("open {chip_path}: {e}"))
            })?;
            Ok(CdevLineSet {
                chip,
                pins,
                consumer: consumer.to_string(),
                handles: [None, None, None, None],
            })
        }

        /// Kernel-reported chip label, e.g. `pinctrl-bcm2835`.
        pub fn chip_label(&self) -> String {
            self.chip.label().to_string()
        }
    }

    impl LineSet for CdevLineSet {
        fn acquire(&mut self, line: Line) -> Result<(), AcquireError> {
            if self.handles[line.index()].is_some() {
                return Ok(());
            }
            let offset = self.pins.pin(line);
            let gpio_line = self
                .chip
                .get_line(offset)
                .map_err(|e| AcquireError::Unavailable(line, format!("offset {offset}: {e}")))?;
            // Initial value 0: the line comes up low.
            let handle = gpio_line
                .request(LineRequestFlags::OUTPUT, 0, &self.consumer)
                .map_err(|e| AcquireError::AlreadyTaken(line, format!("offset {offset}: {e}")))?;
            self.handles[line.index()] = Some(handle);
            Ok(())
        }

        fn release(&mut self, line: Line) {
            // Dropping the handle hands the line back to the kernel.
            self.handles[line.index()] = None;
        }

        fn is_acquired(&self, line: Line) -> bool {
            self.handles[line.index()].is_some()
        }

        fn drive(&mut self, line: Line, level: Level) -> Result<(), DriveError> {
            let handle = self.handles[line.index()]
                .as_ref()
                .ok_or(DriveError::NotAcquired(line))?;
            handle
                .set_value(level.as_u8())
                .map_err(|e| DriveError::Failed(line, format!("set_value({}): {e}", level.as_u8())))
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::CdevLineSet;

// ── Stub for unsupported platforms ──

#[cfg(not(target_os = "linux"))]
pub struct StubLineSet;

#[cfg(not(target_os = "linux"))]
impl StubLineSet {
    pub fn open(_chip_path: &str, _pins: PinMap, _consumer: &str) -> crate::error::Result<Self> {
        Ok(StubLineSet)
    }

    pub fn chip_label(&self) -> String {
        "unsupported".into()
    }
}

#[cfg(not(target_os = "linux"))]
impl LineSet for StubLineSet {
    fn acquire(&mut self, line: Line) -> Result<(), AcquireError> {
        Err(AcquireError::Unavailable(
            line,
            "GPIO character devices are only supported on Linux".into(),
        ))
    }
    fn release(&mut self, _line: Line) {}
    fn is_acquired(&self, _line: Line) -> bool {
        false
    }
    fn drive(&mut self, line: Line, _level: Level) -> Result<(), DriveError> {
        Err(DriveError::NotAcquired(line))
    }
}

#[cfg(target_os = "linux")]
pub type PlatformLineSet = CdevLineSet;
#[cfg(not(target_os = "linux"))]
pub type PlatformLineSet = StubLineSet;

// ── Mock line set for testing ──

/// In-memory line set for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex, PoisonError};

    /// One recorded call against the mock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        Acquire(Line),
        Release(Line),
        Drive(Line, Level),
        Delay(u32),
    }

    /// Shared, cloneable event log. Clones observe the same trace, so a test
    /// keeps one after the mock has moved into a writer.
    #[derive(Debug, Clone, Default)]
    pub struct Trace(Arc<Mutex<Vec<Event>>>);

    impl Trace {
        pub fn push(&self, event: Event) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }

        pub fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub fn clear(&self) {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }

        /// Only the `Drive` events, in order.
        pub fn drives(&self) -> Vec<(Line, Level)> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Drive(line, level) => Some((line, level)),
                    _ => None,
                })
                .collect()
        }

        /// Rising clock edges.
        pub fn clock_pulses(&self) -> usize {
            self.drives()
                .iter()
                .filter(|&&d| d == (Line::Clock, Level::High))
                .count()
        }

        pub fn acquired(&self) -> Vec<Line> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Acquire(line) => Some(line),
                    _ => None,
                })
                .collect()
        }

        pub fn released(&self) -> Vec<Line> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Release(line) => Some(line),
                    _ => None,
                })
                .collect()
        }
    }

    /// Records every call into a [`Trace`]. Acquire records only on success;
    /// release records only for lines actually held.
    pub struct MockLineSet {
        trace: Trace,
        held: [bool; 4],
        /// If set, acquiring this line fails with `AlreadyTaken`.
        pub fail_acquire: Option<Line>,
        /// If set, the drive with this zero-based ordinal fails.
        pub fail_drive_at: Option<usize>,
        drive_count: usize,
        /// If true, `delay_us` yields the thread so concurrent callers get a
        /// chance to run mid-frame.
        pub yield_on_delay: bool,
    }

    impl Default for MockLineSet {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockLineSet {
        pub fn new() -> Self {
            MockLineSet {
                trace: Trace::default(),
                held: [false; 4],
                fail_acquire: None,
                fail_drive_at: None,
                drive_count: 0,
                yield_on_delay: true,
            }
        }

        /// Handle onto the shared event log.
        pub fn trace(&self) -> Trace {
            self.trace.clone()
        }
    }

    impl LineSet for MockLineSet {
        fn acquire(&mut self, line: Line) -> Result<(), AcquireError> {
            if self.fail_acquire == Some(line) {
                return Err(AcquireError::AlreadyTaken(
                    line,
                    "mock: acquire failure injected".into(),
                ));
            }
            if !self.held[line.index()] {
                self.held[line.index()] = true;
                self.trace.push(Event::Acquire(line));
            }
            Ok(())
        }

        fn release(&mut self, line: Line) {
            if self.held[line.index()] {
                self.held[line.index()] = false;
                self.trace.push(Event::Release(line));
            }
        }

        fn is_acquired(&self, line: Line) -> bool {
            self.held[line.index()]
        }

        fn drive(&mut self, line: Line, level: Level) -> Result<(), DriveError> {
            if !self.held[line.index()] {
                return Err(DriveError::NotAcquired(line));
            }
            let n = self.drive_count;
            self.drive_count += 1;
            if self.fail_drive_at == Some(n) {
                return Err(DriveError::Failed(
                    line,
                    "mock: drive failure injected".into(),
                ));
            }
            self.trace.push(Event::Drive(line, level));
            Ok(())
        }

        fn delay_us(&mut self, micros: u32) {
            self.trace.push(Event::Delay(micros));
            if self.yield_on_delay {
                std::thread::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{Event, MockLineSet};
    use super::*;

    #[test]
    fn acquisition_order_is_data_then_clock() {
        assert_eq!(
            Line::ALL,
            [Line::Red, Line::Green, Line::Blue, Line::Clock]
        );
        for (i, line) in Line::ALL.iter().enumerate() {
            assert_eq!(line.index(), i);
        }
    }

    #[test]
    fn line_display_names() {
        assert_eq!(Line::Red.to_string(), "red");
        assert_eq!(Line::Clock.to_string(), "clock");
    }

    #[test]
    fn level_raw_values() {
        assert_eq!(Level::Low.as_u8(), 0);
        assert_eq!(Level::High.as_u8(), 1);
    }

    #[test]
    fn pin_map_lookup() {
        let pins = PinMap {
            red: 1,
            green: 2,
            blue: 3,
            clock: 4,
        };
        assert_eq!(pins.pin(Line::Red), 1);
        assert_eq!(pins.pin(Line::Green), 2);
        assert_eq!(pins.pin(Line::Blue), 3);
        assert_eq!(pins.pin(Line::Clock), 4);
    }

    #[test]
    fn default_pin_map_has_no_conflicts() {
        assert!(PinMap::default().conflicts().is_empty());
    }

    #[test]
    fn pin_map_reports_conflicts() {
        let pins = PinMap {
            red: 5,
            green: 6,
            blue: 5,
            clock: 6,
        };
        assert_eq!(
            pins.conflicts(),
            vec![(Line::Red, Line::Blue, 5), (Line::Green, Line::Clock, 6)]
        );
    }

    #[test]
    fn acquire_error_display() {
        let e = AcquireError::AlreadyTaken(Line::Blue, "offset 22: EBUSY".into());
        assert_eq!(e.to_string(), "blue line already taken: offset 22: EBUSY");
        assert_eq!(e.line(), Line::Blue);
    }

    #[test]
    fn drive_error_display() {
        let e = DriveError::Failed(Line::Clock, "set_value(1): EIO".into());
        assert_eq!(e.to_string(), "clock line write failed: set_value(1): EIO");
        assert_eq!(DriveError::NotAcquired(Line::Red).line(), Line::Red);
    }

    #[test]
    fn spin_delay_waits_at_least_duration() {
        let start = Instant::now();
        spin_delay(Duration::from_micros(200));
        assert!(start.elapsed() >= Duration::from_micros(200));
    }

    // ── Mock behavior ──

    #[test]
    fn mock_release_is_idempotent() {
        let mut lines = MockLineSet::new();
        let trace = lines.trace();
        lines.release(Line::Red); // never acquired
        lines.acquire(Line::Red).unwrap();
        lines.release(Line::Red);
        lines.release(Line::Red);
        assert_eq!(
            trace.events(),
            vec![Event::Acquire(Line::Red), Event::Release(Line::Red)]
        );
    }

    #[test]
    fn mock_drive_requires_acquire() {
        let mut lines = MockLineSet::new();
        assert_eq!(
            lines.drive(Line::Green, Level::High),
            Err(DriveError::NotAcquired(Line::Green))
        );
        assert!(lines.trace().drives().is_empty());
    }

    #[test]
    fn mock_injected_acquire_failure() {
        let mut lines = MockLineSet::new();
        lines.fail_acquire = Some(Line::Blue);
        assert!(lines.acquire(Line::Red).is_ok());
        assert!(matches!(
            lines.acquire(Line::Blue),
            Err(AcquireError::AlreadyTaken(Line::Blue, _))
        ));
        assert!(!lines.is_acquired(Line::Blue));
    }

    #[test]
    fn mock_injected_drive_failure_counts_attempts() {
        let mut lines = MockLineSet::new();
        lines.fail_drive_at = Some(1);
        lines.acquire(Line::Clock).unwrap();
        assert!(lines.drive(Line::Clock, Level::High).is_ok());
        assert!(lines.drive(Line::Clock, Level::Low).is_err());
        assert!(lines.drive(Line::Clock, Level::Low).is_ok());
        assert_eq!(lines.trace().drives().len(), 2);
    }

    #[test]
    fn trace_counts_rising_clock_edges() {
        let mut lines = MockLineSet::new();
        let trace = lines.trace();
        lines.acquire(Line::Clock).unwrap();
        for _ in 0..3 {
            lines.drive(Line::Clock, Level::High).unwrap();
            lines.delay_us(10);
            lines.drive(Line::Clock, Level::Low).unwrap();
        }
        assert_eq!(trace.clock_pulses(), 3);
        trace.clear();
        assert!(trace.events().is_empty());
    }
}
