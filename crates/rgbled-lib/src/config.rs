//! Daemon configuration: TOML-based, platform-aware paths.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::gpio::{Line, PinMap};

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# rgbled configuration. Pin offsets are line numbers on the GPIO chip.\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// GPIO character device. Default: "/dev/gpiochip0".
    #[serde(default = "default_chip")]
    pub chip: String,

    /// Consumer label shown by `gpioinfo` for the requested lines.
    #[serde(default = "default_consumer")]
    pub consumer: String,

    /// Device node the daemon listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Octal permission bits for the device node. Default: "0222" (write-only).
    #[serde(default = "default_socket_mode")]
    pub socket_mode: String,

    /// Line offsets for red, green, blue, and clock. Kept last so it
    /// serializes as a trailing `[pins]` table.
    #[serde(default)]
    pub pins: PinMap,
}

fn default_chip() -> String {
    "/dev/gpiochip0".into()
}
fn default_consumer() -> String {
    "rgbled".into()
}
fn default_socket_path() -> String {
    "/run/rgbled.sock".into()
}
fn default_socket_mode() -> String {
    "0222".into()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chip: default_chip(),
            consumer: default_consumer(),
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            pins: PinMap::default(),
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyChip,
    EmptySocketPath,
    /// `socket_mode` is not an octal permission value.
    InvalidSocketMode(String),
    /// Two lines share one offset.
    DuplicatePin { first: Line, second: Line, pin: u32 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyChip => write!(f, "GPIO chip path cannot be empty"),
            ValidationError::EmptySocketPath => write!(f, "Socket path cannot be empty"),
            ValidationError::InvalidSocketMode(e) => write!(f, "Invalid socket mode: {e}"),
            ValidationError::DuplicatePin { first, second, pin } => {
                write!(f, "{first} and {second} lines both use pin {pin}")
            }
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rgbled"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems; fall back to direct write + cleanup
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Parse `socket_mode` as octal permission bits.
    pub fn parse_socket_mode(&self) -> crate::error::Result<u32> {
        let s = self.socket_mode.trim();
        let digits = s.strip_prefix("0o").unwrap_or(s);
        let mode = u32::from_str_radix(digits, 8).map_err(|_| {
            crate::RgbledError::Config(format!("{s} is not an octal mode"))
        })?;
        if mode > 0o777 {
            return Err(crate::RgbledError::Config(format!(
                "{s} has bits outside 0777"
            )));
        }
        Ok(mode)
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.chip.trim().is_empty() {
            errors.push(ValidationError::EmptyChip);
        }
        if self.socket_path.trim().is_empty() {
            errors.push(ValidationError::EmptySocketPath);
        }
        if let Err(e) = self.parse_socket_mode() {
            let reason = match e {
                crate::RgbledError::Config(msg) => msg,
                other => other.to_string(),
            };
            errors.push(ValidationError::InvalidSocketMode(reason));
        }
        for (first, second, pin) in self.pins.conflicts() {
            errors.push(ValidationError::DuplicatePin { first, second, pin });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
