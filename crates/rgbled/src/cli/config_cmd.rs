//! `config` subcommand: show current configuration and file path.

use std::path::Path;

use super::{Config, ConfigOutput, Result, RgbledError, kv, kv_indent, kv_width};

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let problems: Vec<String> = match config.validate() {
        Ok(()) => vec![],
        Err(errors) => errors.iter().map(ToString::to_string).collect(),
    };

    if json {
        let output = ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
            problems,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).map_err(std::io::Error::other)?
        );
        return Ok(());
    }

    // Human-readable output
    let w = kv_width(
        &["Config file:"],
        &[
            "chip:",
            "consumer:",
            "socket_path:",
            "socket_mode:",
            "red:",
            "green:",
            "blue:",
            "clock:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Settings:");
    kv_indent("chip:", &config.chip, w);
    kv_indent("consumer:", &config.consumer, w);
    kv_indent("socket_path:", &config.socket_path, w);
    let mode_display = match config.parse_socket_mode() {
        Ok(mode) if mode & 0o444 == 0 => format!("{mode:04o} (write-only)"),
        Ok(mode) => format!("{mode:04o}"),
        Err(_) => format!("{} (invalid)", config.socket_mode),
    };
    kv_indent("socket_mode:", mode_display, w);
    println!();

    println!("Pins:");
    kv_indent("red:", config.pins.red, w);
    kv_indent("green:", config.pins.green, w);
    kv_indent("blue:", config.pins.blue, w);
    kv_indent("clock:", config.pins.clock, w);

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}

/// `config --init`: save the effective configuration so it can be edited.
pub(super) fn cmd_config_init(custom_path: Option<&Path>) -> Result<()> {
    let Some(path) = custom_path.map(|p| p.to_path_buf()).or_else(Config::path) else {
        return Err(RgbledError::Config("no config directory".into()));
    };
    if path.exists() {
        return Err(RgbledError::Config(format!(
            "{} already exists",
            path.display()
        )));
    }
    super::load_config(custom_path).save_to(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
