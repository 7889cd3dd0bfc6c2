//! `serve` subcommand: own the GPIO lines and serve the device node.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{Config, RUNNING, Result, RgbledError, ValidationError};
use rgbled_lib::device::{self, LedDevice};
use rgbled_lib::transport::Server;
use rgbled_lib::writer::Shutdown;

/// Upper bound on waiting for a frame that was mid-flight at shutdown.
const FRAME_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

fn validation_summary(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub(super) fn cmd_serve(config: &Config) -> Result<()> {
    config
        .validate()
        .map_err(|errors| RgbledError::Config(validation_summary(&errors)))?;
    let mode = config.parse_socket_mode()?;

    let device = Arc::new(device::open_platform(config)?);
    log::info!("rgbled: device ready");
    println!(
        "[device] {} (R={} G={} B={} CLK={})",
        config.chip, config.pins.red, config.pins.green, config.pins.blue, config.pins.clock
    );

    let server = match Server::bind(Path::new(&config.socket_path), mode, Arc::clone(&device)) {
        Ok(server) => server,
        Err(e) => {
            device.teardown();
            return Err(e.into());
        }
    };
    println!("[serve]  {} (mode {mode:04o})", server.path().display());
    println!("Press Ctrl+C to stop.");

    let result = server.run(&RUNNING);
    drop(server);

    match device.teardown() {
        Shutdown::LedOff => println!("[device] LED off, lines released"),
        Shutdown::WriterBusy => {
            // Exiting now would cut the in-flight frame short.
            if device.wait_released(FRAME_DRAIN_TIMEOUT) {
                println!("[device] in-flight frame finished, lines released");
            } else {
                log::warn!("in-flight frame still running after {FRAME_DRAIN_TIMEOUT:?}");
            }
        }
        Shutdown::OffFailed(e) => println!("[device] could not switch LED off: {e}"),
        Shutdown::Incomplete => println!("[device] lines incomplete, LED left as-is"),
        Shutdown::AlreadyClosed => {}
    }
    log::info!("rgbled: device released");
    result.map_err(Into::into)
}
