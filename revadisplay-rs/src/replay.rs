/* Replay analyzer: classifies a captured host<->device transcript against
 * the Rev-A wire format without touching any hardware. Field aliases and
 * hex-scrubbing rules mirror what a hand transcript (pasted from a
 * terminal, with stray spaces/colons) actually looks like. */
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::codec::Command;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
    /// `dir`/`direction` absent or not one of the two known values. Still
    /// counted in `total_events`/`raw_bytes_total` and classified by
    /// command, just excluded from the host/device breakdown.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ReplayEvent {
    pub line: usize,
    pub direction: Direction,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    pub total_events: u64,
    pub host_to_device_events: u64,
    pub device_to_host_events: u64,
    pub hello_count: u64,
    pub orientation_count: u64,
    pub window_count: u64,
    pub payload_packets: u64,
    pub raw_bytes_total: u64,
    pub command_counts: HashMap<String, u64>,
    pub errors: Vec<String>,
}

/// Strip non-hex characters, then decode. A dangling odd trailing nibble
/// after stripping is truncated rather than rejected.
fn decode_hex(value: &str) -> Vec<u8> {
    let mut cleaned: String = value.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if cleaned.len() % 2 != 0 {
        cleaned.pop();
    }
    let mut out = Vec::with_capacity(cleaned.len() / 2);
    let bytes = cleaned.as_bytes();
    for chunk in bytes.chunks(2) {
        let byte_str = std::str::from_utf8(chunk).unwrap();
        if let Ok(b) = u8::from_str_radix(byte_str, 16) {
            out.push(b);
        }
    }
    out
}

fn parse_line(line_no: usize, line: &str) -> Option<ReplayEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    let dir_str = obj
        .get("dir")
        .or_else(|| obj.get("direction"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let direction = match dir_str {
        "host_to_device" => Direction::HostToDevice,
        "device_to_host" => Direction::DeviceToHost,
        _ => Direction::Unknown,
    };

    let hex_str = obj
        .get("payload_hex")
        .or_else(|| obj.get("hex"))
        .or_else(|| obj.get("hex_preview"))
        .and_then(Value::as_str)
        .unwrap_or("");

    Some(ReplayEvent {
        line: line_no,
        direction,
        payload: decode_hex(hex_str),
    })
}

/// Parse every non-blank line of a transcript file into `ReplayEvent`s.
pub fn parse_transcript(path: &Path) -> Result<Vec<ReplayEvent>> {
    let contents = fs::read_to_string(path).map_err(|e| EngineError::Transport {
        port: path.display().to_string(),
        source: e,
    })?;

    Ok(contents
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_line(i + 1, line))
        .collect())
}

const HELLO_ECHO: [u8; 6] = [Command::Hello as u8; 6];

/// Classify every event and produce a summary report. In strict mode,
/// missing a HELLO/orientation/window record is recorded as an error.
pub fn run_replay(events: &[ReplayEvent], strict: bool) -> ReplayReport {
    let mut report = ReplayReport::default();

    for event in events {
        report.total_events += 1;
        match event.direction {
            Direction::HostToDevice => report.host_to_device_events += 1,
            Direction::DeviceToHost => report.device_to_host_events += 1,
            Direction::Unknown => {}
        }
        report.raw_bytes_total += event.payload.len() as u64;

        if event.payload.is_empty() {
            continue;
        }

        if event.payload.len() == 6 && event.payload == HELLO_ECHO {
            report.hello_count += 1;
            *report.command_counts.entry("HELLO".to_string()).or_insert(0) += 1;
        } else if event.payload.len() >= 6 && event.payload[5] == Command::SetOrientation as u8 {
            report.orientation_count += 1;
            *report
                .command_counts
                .entry("SET_ORIENTATION".to_string())
                .or_insert(0) += 1;
        } else if event.payload.len() >= 6 && event.payload[5] == Command::DisplayBitmap as u8 {
            report.window_count += 1;
            *report
                .command_counts
                .entry("DISPLAY_BITMAP".to_string())
                .or_insert(0) += 1;
        } else {
            report.payload_packets += 1;
        }
    }

    if strict {
        if report.hello_count == 0 {
            report.errors.push("missing_hello".to_string());
        }
        if report.orientation_count == 0 {
            report.errors.push("missing_orientation".to_string());
        }
        if report.window_count == 0 {
            report.errors.push("missing_window".to_string());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_event(dir: &str, hex: &str) -> String {
        format!(r#"{{"dir":"{dir}","payload_hex":"{hex}"}}"#)
    }

    #[test]
    fn decode_hex_strips_separators_and_truncates_odd_trailer() {
        assert_eq!(decode_hex("45:45 45-45_45 45 0"), vec![0x45; 6]);
    }

    #[test]
    fn strict_replay_with_all_three_markers_has_no_errors() {
        let lines = vec![
            hex_event("host_to_device", "454545454545"),
            hex_event("host_to_device", "000000000079"),
            hex_event("host_to_device", "00000c7ddfc5"),
        ];
        let events: Vec<ReplayEvent> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| parse_line(i + 1, l))
            .collect();
        let report = run_replay(&events, true);
        assert_eq!(report.hello_count, 1);
        assert_eq!(report.orientation_count, 1);
        assert_eq!(report.window_count, 1);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn strict_replay_flags_missing_markers() {
        let lines = vec![hex_event("host_to_device", "454545454545")];
        let events: Vec<ReplayEvent> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| parse_line(i + 1, l))
            .collect();
        let report = run_replay(&events, true);
        assert!(report.errors.contains(&"missing_orientation".to_string()));
        assert!(report.errors.contains(&"missing_window".to_string()));
    }

    #[test]
    fn accepts_direction_and_hex_field_aliases() {
        let line = r#"{"direction":"device_to_host","hex":"45-45-45-45-45-45"}"#;
        let event = parse_line(1, line).expect("parses");
        assert_eq!(event.direction, Direction::DeviceToHost);
        assert_eq!(event.payload, vec![0x45; 6]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line(1, "   ").is_none());
    }

    #[test]
    fn missing_direction_defaults_to_unknown_but_still_counts() {
        let line = r#"{"payload_hex":"454545454545"}"#;
        let event = parse_line(1, line).expect("parses");
        assert_eq!(event.direction, Direction::Unknown);

        let report = run_replay(&[event], false);
        assert_eq!(report.total_events, 1);
        assert_eq!(report.host_to_device_events, 0);
        assert_eq!(report.device_to_host_events, 0);
        assert_eq!(report.hello_count, 1);
    }
}
