//! Wire protocol constants and frame encoding.
//!
//! A frame is 11 clock pulses. Before each rising edge the three data lines
//! carry one bit of each channel, MSB first, inverted: the peripheral's input
//! stage is active-low, so a `0` bit goes out as a high level.

use std::fmt;

use serde::Serialize;

use crate::gpio::{Level, Line};

/// Bits per channel.
pub const CHANNEL_BITS: u32 = 11;

/// Largest channel value, `2^11 - 1`.
pub const CHANNEL_MAX: u16 = (1 << CHANNEL_BITS) - 1;

/// Clock high time and low time, in microseconds.
pub const HALF_PERIOD_US: u32 = 10;

// ── Channels ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    /// Data line carrying this channel.
    pub fn line(self) -> Line {
        match self {
            Channel::Red => Line::Red,
            Channel::Green => Line::Green,
            Channel::Blue => Line::Blue,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.line().name())
    }
}

// ── Color ──

/// A channel value outside `[0, CHANNEL_MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorError {
    pub channel: Channel,
    pub value: i32,
}

impl fmt::Display for ColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} value {} out of range (0-{CHANNEL_MAX})",
            self.channel, self.value
        )
    }
}

impl std::error::Error for ColorError {}

/// A validated 11-bit-per-channel color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    r: u16,
    g: u16,
    b: u16,
}

impl Color {
    pub const OFF: Color = Color { r: 0, g: 0, b: 0 };

    /// Validate raw channel values. Reports the first offending channel in
    /// red, green, blue order.
    pub fn new(r: i32, g: i32, b: i32) -> Result<Self, ColorError> {
        Ok(Color {
            r: check(Channel::Red, r)?,
            g: check(Channel::Green, g)?,
            b: check(Channel::Blue, b)?,
        })
    }

    pub fn channel(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Red => self.r,
            Channel::Green => self.g,
            Channel::Blue => self.b,
        }
    }

    pub fn r(&self) -> u16 {
        self.r
    }

    pub fn g(&self) -> u16 {
        self.g
    }

    pub fn b(&self) -> u16 {
        self.b
    }
}

fn check(channel: Channel, value: i32) -> Result<u16, ColorError> {
    if (0..=i32::from(CHANNEL_MAX)).contains(&value) {
        Ok(value as u16)
    } else {
        Err(ColorError { channel, value })
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

// ── Encoding ──

/// Bits of `value`, most significant first.
pub fn channel_bits(value: u16) -> [bool; CHANNEL_BITS as usize] {
    let mut bits = [false; CHANNEL_BITS as usize];
    for (slot, bit) in bits.iter_mut().zip((0..CHANNEL_BITS).rev()) {
        *slot = (value >> bit) & 1 == 1;
    }
    bits
}

/// Level that carries `bit` to the peripheral.
pub fn wire_level(bit: bool) -> Level {
    if bit { Level::Low } else { Level::High }
}

/// Data-line levels latched by one clock pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitSlot {
    /// Bit position within each channel, 10 down to 0.
    pub bit: u32,
    pub red: Level,
    pub green: Level,
    pub blue: Level,
}

impl BitSlot {
    /// `(line, level)` pairs in the order they are driven.
    pub fn levels(&self) -> [(Line, Level); 3] {
        [
            (Line::Red, self.red),
            (Line::Green, self.green),
            (Line::Blue, self.blue),
        ]
    }
}

/// The full frame for `color`, in transmission order.
pub fn frame(color: Color) -> [BitSlot; CHANNEL_BITS as usize] {
    let r = channel_bits(color.r);
    let g = channel_bits(color.g);
    let b = channel_bits(color.b);
    std::array::from_fn(|i| BitSlot {
        bit: CHANNEL_BITS - 1 - i as u32,
        red: wire_level(r[i]),
        green: wire_level(g[i]),
        blue: wire_level(b[i]),
    })
}
