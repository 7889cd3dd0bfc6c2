//! rgbled: write-only driver for a 4-line (red, green, blue, clock) RGB LED.

pub mod color;
pub mod config;
pub mod device;
pub mod error;
pub mod gpio;
pub mod lock;
pub mod protocol;
#[cfg(unix)]
pub mod transport;
pub mod writer;

pub use error::RgbledError;
