//! CLI subcommands: daemon, client writes, frame preview, config.

mod config_cmd;
mod frame;
#[cfg(unix)]
mod serve;
#[cfg(unix)]
mod set;

use std::path::Path;

use clap::Subcommand;
use serde::Serialize;

#[cfg(unix)]
pub(super) use crate::RUNNING;
pub(super) use rgbled_lib::RgbledError;
pub(super) use rgbled_lib::color;
pub(super) use rgbled_lib::config::{Config, ValidationError};
pub(super) use rgbled_lib::device::WriteRequest;
pub(super) use rgbled_lib::error::Result;
pub(super) use rgbled_lib::gpio::Level;
pub(super) use rgbled_lib::protocol::{self, BitSlot, Color};

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct FrameOutput {
    pub color: Color,
    pub bits: Vec<BitSlot>,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub problems: Vec<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Acquire the GPIO lines and serve write requests until Ctrl+C
    Serve,

    /// Send a color to the running daemon
    Set {
        /// A color name, an R,G,B triple, or three values (0-2047 each)
        #[arg(required = true, num_args = 1..=3, allow_negative_numbers = true)]
        color: Vec<String>,
    },

    /// Switch the LED off through the running daemon
    Off,

    /// Show the bit frame for a color (no hardware required)
    Frame {
        /// A color name, an R,G,B triple, or three values (0-2047 each)
        #[arg(required = true, num_args = 1..=3, allow_negative_numbers = true)]
        color: Vec<String>,
    },

    /// Show current configuration and file path
    Config {
        /// Write the effective configuration to the config path (refuses to overwrite)
        #[arg(long)]
        init: bool,
    },
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

/// Load config from a custom path or the platform default, logging parse warnings.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    match custom_path {
        Some(path) => {
            let (config, warnings) = Config::load_from(path);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Serve => {
            if json {
                warn_json_unsupported("serve");
            }
            serve_cmd(&load_config(config_path))
        }
        Command::Set { color } => {
            if json {
                warn_json_unsupported("set");
            }
            let request = color::parse_color_args(&color)?;
            set_cmd(&load_config(config_path), request)
        }
        Command::Off => {
            if json {
                warn_json_unsupported("off");
            }
            set_cmd(&load_config(config_path), WriteRequest::OFF)
        }
        Command::Frame { color } => frame::cmd_frame(&color, json),
        Command::Config { init: true } => {
            if json {
                warn_json_unsupported("config --init");
            }
            config_cmd::cmd_config_init(config_path)
        }
        Command::Config { init: false } => config_cmd::cmd_config(json, config_path),
    }
}

#[cfg(unix)]
fn serve_cmd(config: &Config) -> Result<()> {
    serve::cmd_serve(config)
}

#[cfg(unix)]
fn set_cmd(config: &Config, request: WriteRequest) -> Result<()> {
    set::cmd_set(config, request)
}

#[cfg(not(unix))]
fn serve_cmd(_config: &Config) -> Result<()> {
    Err(no_device_node())
}

#[cfg(not(unix))]
fn set_cmd(_config: &Config, _request: WriteRequest) -> Result<()> {
    Err(no_device_node())
}

#[cfg(not(unix))]
fn no_device_node() -> RgbledError {
    RgbledError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "the device node is a Unix socket; this platform has none",
    ))
}
