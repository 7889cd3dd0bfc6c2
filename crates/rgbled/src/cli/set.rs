//! `set` and `off` subcommands: hand one color to the running daemon.

use std::path::Path;

use super::{Config, Result, WriteRequest};
use rgbled_lib::transport;

pub(super) fn cmd_set(config: &Config, request: WriteRequest) -> Result<()> {
    let path = Path::new(&config.socket_path);
    log::debug!("sending write {request} to {}", path.display());
    transport::send_write(path, request)?;
    println!("LED set to {request}");
    Ok(())
}
