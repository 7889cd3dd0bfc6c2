//! Device node: a Unix socket that accepts write requests.
//!
//! Line protocol, one request per line:
//!
//! ```text
//! -> write 2047 0 512
//! <- ok
//! -> write 4096 0 0
//! <- err invalid-color: Invalid color: red value 4096 out of range (0-2047)
//! ```
//!
//! The node is write-only: `write` is the only command.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::device::{LedDevice, WriteRequest};
use crate::error::RgbledError;
use crate::lock::CancelToken;

/// A connection with no request for this long is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept-loop poll interval while no client is connecting.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Connections served at once. Further clients are answered `err busy`.
pub const MAX_CONNECTIONS: usize = 32;

/// How often a request waiting for the LED checks that its client is still there.
const PEER_POLL: Duration = Duration::from_millis(5);

/// How long a refused client gets to send its request before the reply.
const REFUSE_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest request line accepted.
const MAX_REQUEST_LEN: usize = 128;

// ── Wire format ──

/// A parsed request line.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Write(WriteRequest),
}

/// Why a request line could not be served.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Known command, malformed arguments.
    BadRequest(String),
    /// Any command other than `write`.
    Unsupported(String),
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::BadRequest(_) => "bad-request",
            RequestError::Unsupported(_) => "unsupported",
        }
    }

    fn message(&self) -> &str {
        match self {
            RequestError::BadRequest(m) | RequestError::Unsupported(m) => m,
        }
    }
}

pub fn parse_request(line: &str) -> Result<Request, RequestError> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("write") => {}
        Some(other) => {
            return Err(RequestError::Unsupported(format!(
                "{other}: device is write-only"
            )));
        }
        None => return Err(RequestError::BadRequest("empty request".into())),
    }
    let args: Vec<&str> = words.collect();
    let [r, g, b] = args[..] else {
        return Err(RequestError::BadRequest(format!(
            "write takes 3 values, got {}",
            args.len()
        )));
    };
    let channel = |s: &str| {
        s.parse::<i32>()
            .map_err(|_| RequestError::BadRequest(format!("not an integer: {s}")))
    };
    Ok(Request::Write(WriteRequest::new(
        channel(r)?,
        channel(g)?,
        channel(b)?,
    )))
}

pub fn format_request(request: &WriteRequest) -> String {
    format!("write {request}\n")
}

fn format_error(kind: &str, message: &str) -> String {
    format!("err {kind}: {message}\n")
}

/// Parse a reply line. `Ok(())` for `ok`, `Rejected` for `err`.
pub fn parse_reply(line: &str) -> crate::error::Result<()> {
    let line = line.trim_end();
    if line == "ok" {
        return Ok(());
    }
    let Some(rest) = line.strip_prefix("err ") else {
        return Err(RgbledError::Protocol(format!("unexpected reply: {line:?}")));
    };
    let (kind, message) = rest.split_once(": ").unwrap_or((rest, ""));
    Err(RgbledError::Rejected {
        kind: kind.to_string(),
        message: message.to_string(),
    })
}

// ── Server ──

/// Listens on the device node and hands each request to the device.
pub struct Server<D: LedDevice + 'static> {
    listener: UnixListener,
    path: PathBuf,
    device: Arc<D>,
    cancel: CancelToken,
    active: Arc<AtomicUsize>,
    max_connections: usize,
}

impl<D: LedDevice + 'static> Server<D> {
    /// Bind the device node, replacing a stale socket file, and apply `mode`.
    pub fn bind(path: &Path, mode: u32, device: Arc<D>) -> io::Result<Self> {
        if path.exists() {
            // A previous daemon that did not shut down cleanly leaves its
            // socket file behind; refuse to clobber a live one.
            if UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} is served by another process", path.display()),
                ));
            }
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        listener.set_nonblocking(true)?;
        log::info!("listening on {} (mode {mode:04o})", path.display());
        Ok(Server {
            listener,
            path: path.to_path_buf(),
            device,
            cancel: CancelToken::new(),
            active: Arc::default(),
            max_connections: MAX_CONNECTIONS,
        })
    }

    /// Serve at most `max` clients at once (at least one).
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cancelling this token interrupts every request still waiting for the LED.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Accept connections until `running` goes false, then cancel waiters.
    pub fn run(&self, running: &AtomicBool) -> io::Result<()> {
        while running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = self.spawn_connection(stream) {
                        log::warn!("dropping connection: {e}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.cancel.cancel();
                    return Err(e);
                }
            }
        }
        self.cancel.cancel();
        Ok(())
    }

    fn spawn_connection(&self, stream: UnixStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        // Only this thread claims slots, so the check cannot race.
        if self.active_connections() >= self.max_connections {
            log::warn!(
                "{} connections open; refusing client",
                self.max_connections
            );
            return refuse(stream);
        }
        stream.set_read_timeout(Some(IDLE_TIMEOUT))?;
        let slot = ConnectionSlot::claim(&self.active);
        let device = Arc::clone(&self.device);
        let cancel = self.cancel.clone();
        std::thread::spawn(move || {
            let _slot = slot;
            if let Err(e) = serve_connection(stream, device.as_ref(), &cancel) {
                log::debug!("connection closed: {e}");
            }
        });
        Ok(())
    }
}

/// One counted connection. Dropping it frees the slot.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn claim(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        ConnectionSlot(Arc::clone(active))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answer a client over the connection limit. The request line is read
/// first so the client is not mid-write when the socket closes.
fn refuse(stream: UnixStream) -> io::Result<()> {
    stream.set_read_timeout(Some(REFUSE_READ_TIMEOUT))?;
    let mut writer = stream.try_clone()?;
    let mut line = String::new();
    let _ = BufReader::new(stream)
        .take(MAX_REQUEST_LEN as u64 + 1)
        .read_line(&mut line);
    writer.write_all(format_error("busy", "too many connections").as_bytes())
}

impl<D: LedDevice + 'static> Drop for Server<D> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Serve requests on one connection until EOF, idle timeout, or I/O error.
pub fn serve_connection<D: LedDevice + ?Sized>(
    stream: UnixStream,
    device: &D,
    cancel: &CancelToken,
) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let peer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let n = (&mut reader)
            .take(MAX_REQUEST_LEN as u64 + 1)
            .read_line(&mut line)?;
        if n == 0 {
            return Ok(());
        }
        if line.len() > MAX_REQUEST_LEN {
            writer.write_all(format_error("bad-request", "request too long").as_bytes())?;
            return Ok(());
        }
        let reply = handle_watched(line.trim(), device, cancel, &peer);
        writer.write_all(reply.as_bytes())?;
    }
}

/// Handle one request under its own cancel token, which fires when the
/// server stops or when the client hangs up while the request waits.
fn handle_watched<D: LedDevice + ?Sized>(
    line: &str,
    device: &D,
    cancel: &CancelToken,
    peer: &UnixStream,
) -> String {
    let request_cancel = cancel.child();
    let done = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| watch_peer(peer, &request_cancel, &done));
        let reply = handle_line(line, device, &request_cancel);
        done.store(true, Ordering::SeqCst);
        reply
    })
}

fn watch_peer(peer: &UnixStream, cancel: &CancelToken, done: &AtomicBool) {
    while !done.load(Ordering::SeqCst) {
        if peer_hung_up(peer) {
            log::debug!("client hung up; cancelling its request");
            cancel.cancel();
            return;
        }
        std::thread::sleep(PEER_POLL);
    }
}

/// Whether the client has closed its end. Never consumes data.
fn peer_hung_up(peer: &UnixStream) -> bool {
    let mut byte = 0u8;
    // SAFETY: `byte` is a live one-byte buffer and `peer` keeps the fd open.
    let n = unsafe {
        libc::recv(
            peer.as_raw_fd(),
            (&mut byte as *mut u8).cast(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    match n {
        0 => true,
        n if n > 0 => false,
        _ => !matches!(
            io::Error::last_os_error().kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ),
    }
}

fn handle_line<D: LedDevice + ?Sized>(line: &str, device: &D, cancel: &CancelToken) -> String {
    match parse_request(line) {
        Ok(Request::Write(req)) => match device.handle_write_request(req, cancel) {
            Ok(()) => "ok\n".to_string(),
            Err(e) => {
                log::debug!("write {req} refused: {e}");
                format_error(e.kind(), &e.to_string())
            }
        },
        Err(e) => format_error(e.kind(), e.message()),
    }
}

// ── Client ──

/// Send one write request to the daemon at `path` and wait for its reply.
pub fn send_write(path: &Path, request: WriteRequest) -> crate::error::Result<()> {
    let mut stream = UnixStream::connect(path).map_err(|e| {
        RgbledError::Io(io::Error::new(
            e.kind(),
            format!("connect {}: {e}", path.display()),
        ))
    })?;
    stream.write_all(format_request(&request).as_bytes())?;
    let mut reply = String::new();
    BufReader::new(&stream).read_line(&mut reply)?;
    if reply.is_empty() {
        return Err(RgbledError::Protocol("daemon closed the connection".into()));
    }
    parse_reply(&reply)
}
