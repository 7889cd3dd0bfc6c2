//! `frame` subcommand: show the bit frame for a color without hardware.

use super::{BitSlot, Color, FrameOutput, Level, Result, color, protocol};

fn level_bit(level: Level) -> u8 {
    // Active-low: Low carries a 1.
    u8::from(level == Level::Low)
}

pub(super) fn cmd_frame(args: &[String], json: bool) -> Result<()> {
    let request = color::parse_color_args(args)?;
    let color = Color::new(request.r, request.g, request.b)?;
    let bits: Vec<BitSlot> = protocol::frame(color).to_vec();

    if json {
        let output = FrameOutput { color, bits };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).map_err(std::io::Error::other)?
        );
        return Ok(());
    }

    println!("Color: {color}");
    println!();
    println!("bit  R  G  B   value");
    for slot in &bits {
        println!(
            "{:>3}  {}  {}  {}   {}{}{}",
            slot.bit,
            slot.red,
            slot.green,
            slot.blue,
            level_bit(slot.red),
            level_bit(slot.green),
            level_bit(slot.blue),
        );
    }
    Ok(())
}
