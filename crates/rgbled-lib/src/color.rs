//! Color argument parsing for the command-line client.
//!
//! Values are passed through unvalidated: range checks belong to the writer,
//! which rejects out-of-range channels with `InvalidColor`.

use crate::device::WriteRequest;
use crate::protocol::CHANNEL_MAX;

const FULL: i32 = CHANNEL_MAX as i32;

/// Full-scale presets.
pub const NAMED_COLORS: &[(&str, WriteRequest)] = &[
    ("off", WriteRequest { r: 0, g: 0, b: 0 }),
    ("black", WriteRequest { r: 0, g: 0, b: 0 }),
    ("red", WriteRequest { r: FULL, g: 0, b: 0 }),
    ("green", WriteRequest { r: 0, g: FULL, b: 0 }),
    ("blue", WriteRequest { r: 0, g: 0, b: FULL }),
    ("white", WriteRequest { r: FULL, g: FULL, b: FULL }),
    ("yellow", WriteRequest { r: FULL, g: FULL, b: 0 }),
    ("cyan", WriteRequest { r: 0, g: FULL, b: FULL }),
    ("magenta", WriteRequest { r: FULL, g: 0, b: FULL }),
    ("purple", WriteRequest { r: FULL, g: 0, b: FULL }),
];

/// Parse a single color argument.
///
/// Accepts:
/// - Named: `"red"`, `"off"`, ... (see [`NAMED_COLORS`])
/// - Triple: `"2047,0,512"` (spaces allowed around values)
pub fn parse_color(s: &str) -> crate::error::Result<WriteRequest> {
    let s = s.trim();

    let lower = s.to_lowercase();
    if let Some((_, req)) = NAMED_COLORS.iter().find(|(name, _)| *name == lower) {
        return Ok(*req);
    }

    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(crate::RgbledError::Color(format!(
            "Invalid color: {s} (use R,G,B or a color name)"
        )));
    }
    parse_channels(&parts)
}

/// Parse command-line color arguments: either one argument (see
/// [`parse_color`]) or three separate channel values, as in `set 2047 0 0`.
pub fn parse_color_args<S: AsRef<str>>(args: &[S]) -> crate::error::Result<WriteRequest> {
    match args {
        [one] => parse_color(one.as_ref()),
        [r, g, b] => parse_channels(&[r.as_ref(), g.as_ref(), b.as_ref()]),
        _ => Err(crate::RgbledError::Color(format!(
            "Expected a color name, R,G,B, or three values; got {} argument{}",
            args.len(),
            if args.len() == 1 { "" } else { "s" }
        ))),
    }
}

fn parse_channels(parts: &[&str]) -> crate::error::Result<WriteRequest> {
    let mut values = [0i32; 3];
    for (slot, part) in values.iter_mut().zip(parts) {
        let part = part.trim();
        *slot = part
            .parse::<i32>()
            .map_err(|_| crate::RgbledError::Color(format!("Invalid channel value: {part}")))?;
    }
    Ok(WriteRequest::new(values[0], values[1], values[2]))
}
