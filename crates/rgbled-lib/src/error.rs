//! Unified error type for the rgbled-lib crate.
//!
//! [`RgbledError`] wraps module-specific errors (`InitError`, `WriteError`)
//! and domain-specific error kinds (`Chip`, `Config`, `Color`, `Rejected`).
//! `From` impls allow `?` to propagate across module boundaries seamlessly.

use std::fmt;

use crate::protocol::ColorError;
use crate::writer::{InitError, WriteError};

/// Unified error type for rgbled-lib operations.
#[derive(Debug)]
pub enum RgbledError {
    /// Line acquisition failed while bringing the device up.
    Init(InitError),
    /// A local write did not complete.
    Write(WriteError),
    /// GPIO chip could not be opened.
    Chip(String),
    /// Standard I/O error (socket, config persistence).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
    /// Color argument parsing error.
    Color(String),
    /// The daemon refused a write. `kind` is the wire error name.
    Rejected { kind: String, message: String },
    /// The daemon sent something that is not a reply.
    Protocol(String),
}

impl fmt::Display for RgbledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RgbledError::Init(e) => write!(f, "{e}"),
            RgbledError::Write(e) => write!(f, "{e}"),
            RgbledError::Chip(e) => write!(f, "GPIO chip error: {e}"),
            RgbledError::Io(e) => write!(f, "I/O error: {e}"),
            RgbledError::Config(e) => write!(f, "Config error: {e}"),
            RgbledError::Color(e) => write!(f, "Color error: {e}"),
            RgbledError::Rejected { kind, message } => {
                write!(f, "Device rejected write ({kind}): {message}")
            }
            RgbledError::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for RgbledError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RgbledError::Init(e) => Some(e),
            RgbledError::Write(e) => Some(e),
            RgbledError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InitError> for RgbledError {
    fn from(e: InitError) -> Self {
        RgbledError::Init(e)
    }
}

impl From<WriteError> for RgbledError {
    fn from(e: WriteError) -> Self {
        RgbledError::Write(e)
    }
}

impl From<ColorError> for RgbledError {
    fn from(e: ColorError) -> Self {
        RgbledError::Write(WriteError::InvalidColor(e))
    }
}

impl From<std::io::Error> for RgbledError {
    fn from(e: std::io::Error) -> Self {
        RgbledError::Io(e)
    }
}

/// Crate-level Result alias using [`RgbledError`].
pub type Result<T> = std::result::Result<T, RgbledError>;
