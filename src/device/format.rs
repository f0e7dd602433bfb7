//! Human-readable renderings of serial traffic for the debug log.

use std::fmt::Write;

/// Render bytes as an unambiguous C-escaped string (without surrounding quotes).
///
/// Internal spaces are kept as-is; leading and trailing spaces become `\x20`
/// so they stay visible.
pub fn format_ascii(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    let mut seen_non_space = false;
    let mut pending_spaces = 0usize;

    for &byte in data {
        if byte == b' ' {
            if seen_non_space {
                // Internal or trailing; decided by what follows.
                pending_spaces += 1;
            } else {
                push_escaped(&mut out, byte);
            }
            continue;
        }

        seen_non_space = true;
        for _ in 0..pending_spaces {
            out.push(' ');
        }
        pending_spaces = 0;

        if needs_escape(byte) {
            push_escaped(&mut out, byte);
        } else {
            out.push(byte as char);
        }
    }

    for _ in 0..pending_spaces {
        push_escaped(&mut out, b' ');
    }
    out
}

/// Render bytes as lowercase hex pairs separated by single spaces.
pub fn format_binary(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Prefix of a traffic log line. Arrows point away from the device for input.
pub fn communication_line(prefix: &str, is_input: bool, body: &str) -> String {
    let arrow = if is_input { " <- " } else { " -> " };
    format!("{}{}{}", prefix, arrow, body)
}

fn needs_escape(byte: u8) -> bool {
    !byte.is_ascii_graphic() || matches!(byte, b'\'' | b'"' | b'\\')
}

fn push_escaped(out: &mut String, byte: u8) {
    match byte {
        b'\'' => out.push_str("\\'"),
        b'"' => out.push_str("\\\""),
        b'\\' => out.push_str("\\\\"),
        0 => out.push_str("\\0"),
        b'\n' => out.push_str("\\n"),
        b'\r' => out.push_str("\\r"),
        b'\t' => out.push_str("\\t"),
        other => {
            let _ = write!(out, "\\x{:02x}", other);
        }
    }
}
