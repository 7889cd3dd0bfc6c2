//! Integration tests: full device lifecycles through the public API.
//!
//! These drive `ColorWriter` from several threads and check the recorded
//! line activity: frames never interleave, cancelled waiters never touch
//! the lines, and teardown neither blocks nor leaks a line.

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use rgbled_lib::device::{LedDevice, WriteRequest};
use rgbled_lib::gpio::mock::{Event, MockLineSet, Trace};
use rgbled_lib::gpio::{AcquireError, DriveError, Level, Line, LineSet};
use rgbled_lib::lock::CancelToken;
use rgbled_lib::protocol::CHANNEL_BITS;
use rgbled_lib::writer::{ColorWriter, Shutdown, WriteError};

/// Drives per bit slot: three data lines, clock high, clock low.
const DRIVES_PER_BIT: usize = 5;
const DRIVES_PER_FRAME: usize = DRIVES_PER_BIT * CHANNEL_BITS as usize;

/// Helper: decode a drive log into the colors it carried, asserting that
/// every bit slot has the expected shape.
fn decode_frames(drives: &[(Line, Level)]) -> Vec<(u16, u16, u16)> {
    assert_eq!(drives.len() % DRIVES_PER_FRAME, 0, "partial frame in trace");
    drives
        .chunks(DRIVES_PER_FRAME)
        .map(|frame| {
            let mut rgb = [0u16; 3];
            for slot in frame.chunks(DRIVES_PER_BIT) {
                assert_eq!(slot[0].0, Line::Red);
                assert_eq!(slot[1].0, Line::Green);
                assert_eq!(slot[2].0, Line::Blue);
                assert_eq!(slot[3], (Line::Clock, Level::High));
                assert_eq!(slot[4], (Line::Clock, Level::Low));
                for (value, (_, level)) in rgb.iter_mut().zip(&slot[..3]) {
                    *value = (*value << 1) | u16::from(*level == Level::Low);
                }
            }
            (rgb[0], rgb[1], rgb[2])
        })
        .collect()
}

fn writer() -> (ColorWriter<MockLineSet>, Trace) {
    let lines = MockLineSet::new();
    let trace = lines.trace();
    let dev = ColorWriter::init(lines).unwrap();
    trace.clear();
    (dev, trace)
}

// ── Test: concurrent writers are serialized ──

#[test]
fn concurrent_writes_never_interleave() {
    let (dev, trace) = writer();
    let dev = Arc::new(dev);
    let colors: Vec<(i32, i32, i32)> = (0..8).map(|i| (i * 200, 2047 - i * 100, i + 1)).collect();

    let handles: Vec<_> = colors
        .iter()
        .map(|&(r, g, b)| {
            let dev = Arc::clone(&dev);
            std::thread::spawn(move || dev.set_color(r, g, b, &CancelToken::new()))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    let mut sent = decode_frames(&trace.drives());
    let mut expected: Vec<(u16, u16, u16)> = colors
        .iter()
        .map(|&(r, g, b)| (r as u16, g as u16, b as u16))
        .collect();
    sent.sort_unstable();
    expected.sort_unstable();
    assert_eq!(sent, expected);
}

#[test]
fn frame_is_msb_first_active_low() {
    let (dev, trace) = writer();
    dev.set_color(1024, 0, 2047, &CancelToken::new()).unwrap();

    let drives = trace.drives();
    // First slot carries the MSB: red 1 (Low), green 0 (High), blue 1 (Low).
    assert_eq!(drives[0], (Line::Red, Level::Low));
    assert_eq!(drives[1], (Line::Green, Level::High));
    assert_eq!(drives[2], (Line::Blue, Level::Low));
    assert_eq!(decode_frames(&drives), vec![(1024, 0, 2047)]);
}

#[test]
fn invalid_color_touches_nothing() {
    let (dev, trace) = writer();
    let err = dev.set_color(0, -1, 0, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind(), "invalid-color");
    assert!(trace.events().is_empty());
    // Lock was never taken, so the next write goes straight through.
    dev.set_color(0, 0, 0, &CancelToken::new()).unwrap();
    assert_eq!(trace.clock_pulses(), 11);
}

// ── Test: cancellation ──

/// Line set that parks the writer inside its first delay until released.
struct GatedLineSet {
    inner: MockLineSet,
    entered: Option<mpsc::Sender<()>>,
    gate: Arc<Barrier>,
}

impl LineSet for GatedLineSet {
    fn acquire(&mut self, line: Line) -> Result<(), AcquireError> {
        self.inner.acquire(line)
    }
    fn release(&mut self, line: Line) {
        self.inner.release(line)
    }
    fn is_acquired(&self, line: Line) -> bool {
        self.inner.is_acquired(line)
    }
    fn drive(&mut self, line: Line, level: Level) -> Result<(), DriveError> {
        self.inner.drive(line, level)
    }
    fn delay_us(&mut self, micros: u32) {
        self.inner.delay_us(micros);
        if let Some(entered) = self.entered.take() {
            let _ = entered.send(());
            self.gate.wait();
        }
    }
}

fn gated_writer() -> (Arc<ColorWriter<GatedLineSet>>, Trace, mpsc::Receiver<()>, Arc<Barrier>) {
    let inner = MockLineSet::new();
    let trace = inner.trace();
    let (tx, rx) = mpsc::channel();
    let gate = Arc::new(Barrier::new(2));
    let lines = GatedLineSet {
        inner,
        entered: Some(tx),
        gate: Arc::clone(&gate),
    };
    let dev = ColorWriter::init(lines).unwrap();
    trace.clear();
    (Arc::new(dev), trace, rx, gate)
}

#[test]
fn cancelled_waiter_drives_nothing() {
    let (dev, trace, entered, gate) = gated_writer();

    let holder = {
        let dev = Arc::clone(&dev);
        std::thread::spawn(move || dev.set_color(2047, 0, 0, &CancelToken::new()))
    };
    entered.recv().unwrap();
    let drives_before = trace.drives().len();

    let cancel = CancelToken::new();
    let waiter = {
        let dev = Arc::clone(&dev);
        let cancel = cancel.clone();
        std::thread::spawn(move || dev.set_color(0, 2047, 0, &cancel))
    };
    std::thread::sleep(Duration::from_millis(30));
    cancel.cancel();
    assert_eq!(waiter.join().unwrap(), Err(WriteError::Interrupted));
    assert_eq!(trace.drives().len(), drives_before);

    gate.wait();
    holder.join().unwrap().unwrap();
    assert_eq!(decode_frames(&trace.drives()), vec![(2047, 0, 0)]);
}

// ── Test: teardown ──

#[test]
fn teardown_after_write_sends_off_and_releases_in_reverse() {
    let (dev, trace) = writer();
    dev.handle_write_request(WriteRequest::new(5, 6, 7), &CancelToken::new())
        .unwrap();
    assert_eq!(dev.teardown(), Shutdown::LedOff);

    assert_eq!(decode_frames(&trace.drives()), vec![(5, 6, 7), (0, 0, 0)]);
    assert_eq!(
        trace.released(),
        vec![Line::Clock, Line::Blue, Line::Green, Line::Red]
    );
    // Releases come after the last drive.
    let events = trace.events();
    let last_drive = events.iter().rposition(|e| matches!(e, Event::Drive(..)));
    let first_release = events.iter().position(|e| matches!(e, Event::Release(_)));
    assert!(last_drive < first_release);

    let err = dev.set_color(1, 1, 1, &CancelToken::new()).unwrap_err();
    assert_eq!(err, WriteError::Closed);
}

#[test]
fn teardown_while_busy_does_not_block() {
    let (dev, trace, entered, gate) = gated_writer();

    let holder = {
        let dev = Arc::clone(&dev);
        std::thread::spawn(move || dev.set_color(0, 0, 2047, &CancelToken::new()))
    };
    entered.recv().unwrap();

    let start = Instant::now();
    assert_eq!(dev.teardown(), Shutdown::WriterBusy);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(trace.released().is_empty());
    assert!(!dev.wait_released(Duration::from_millis(20)));

    gate.wait();
    // The frame already on the wire runs to the end before the lines go.
    assert!(dev.wait_released(Duration::from_secs(5)));
    assert_eq!(trace.clock_pulses(), 11);
    holder.join().unwrap().unwrap();

    // Only the in-flight frame went out, then its guard released the lines.
    assert_eq!(decode_frames(&trace.drives()), vec![(0, 0, 2047)]);
    assert_eq!(trace.released().len(), 4);
    assert_eq!(dev.teardown(), Shutdown::AlreadyClosed);
}

// ── Test: init rollback ──

#[test]
fn init_failure_rolls_back_in_reverse() {
    let mut lines = MockLineSet::new();
    lines.fail_acquire = Some(Line::Blue);
    let trace = lines.trace();

    let err = ColorWriter::init(lines).err().unwrap();
    assert_eq!(err.source.line(), Line::Blue);
    assert_eq!(err.rolled_back, vec![Line::Green, Line::Red]);
    assert_eq!(trace.acquired(), vec![Line::Red, Line::Green]);
    assert_eq!(trace.released(), vec![Line::Green, Line::Red]);
    assert!(trace.drives().is_empty());
}

#[test]
fn hardware_fault_mid_frame_keeps_device_usable() {
    let mut lines = MockLineSet::new();
    lines.fail_drive_at = Some(7);
    let trace = lines.trace();
    let dev = ColorWriter::init(lines).unwrap();

    let err = dev.set_color(1, 2, 3, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, WriteError::HardwareFault(DriveError::Failed(Line::Blue, _))));

    trace.clear();
    dev.set_color(1, 2, 3, &CancelToken::new()).unwrap();
    assert_eq!(decode_frames(&trace.drives()), vec![(1, 2, 3)]);
}
