//! Drop rendering: log lines, hex dumps, JSON records.

use std::collections::HashMap;
use std::fmt::Write;

use dropmon::{DropEvent, Origin};
use serde::Serialize;

/// One drop as a flat JSON record for `--json` mode.
#[derive(Serialize)]
struct DropRecord<'a> {
    iface: &'a str,
    ifindex: u32,
    symbol: &'a str,
    pc: String,
    proto: u16,
    orig_len: u32,
    origin: &'static str,
    timestamp_ns: u64,
    payload: String,
}

/// Resolve the interface name for an event, preferring the kernel-supplied
/// port name over the dump-time map.
pub fn iface_name<'a>(event: &'a DropEvent, names: &'a HashMap<u32, String>) -> &'a str {
    let from_port = event.port_name();
    if !from_port.is_empty() {
        return from_port;
    }
    names
        .get(&event.ifindex())
        .map(String::as_str)
        .unwrap_or("?")
}

/// The one-line summary printed per matching drop.
pub fn drop_line(event: &DropEvent, names: &HashMap<u32, String>) -> String {
    format!(
        "drop on iface:{} at {}:{:016x}",
        iface_name(event, names),
        event.symbol(),
        event.pc()
    )
}

/// The JSON record printed per matching drop in `--json` mode.
pub fn json_line(event: &DropEvent, names: &HashMap<u32, String>) -> String {
    let record = DropRecord {
        iface: iface_name(event, names),
        ifindex: event.ifindex(),
        symbol: event.symbol(),
        pc: format!("{:#x}", event.pc()),
        proto: event.proto(),
        orig_len: event.length(),
        origin: match event.origin() {
            Origin::Software => "software",
            Origin::Hardware => "hardware",
        },
        timestamp_ns: event.timestamp(),
        payload: hex_string(event.packet()),
    };
    // A flat struct of strings and integers always serializes.
    serde_json::to_string(&record).unwrap_or_default()
}

fn hex_string(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Render a classic 16-bytes-per-row hex dump with an ASCII column.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();

    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", row * 16);

        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }

        out.push(' ');
        out.push('|');
        for b in chunk {
            out.push(if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            });
        }
        out.push('|');
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropmon::codec::AttrEncoder;
    use dropmon::schema::{DropAttr, PortAttr};

    fn sample_event() -> DropEvent {
        let mut enc = AttrEncoder::new();
        enc.u64(DropAttr::Pc as u16, 0xffffffff81234567)
            .string(DropAttr::Symbol as u16, "tcp_v4_rcv")
            .nested(DropAttr::InPort as u16, |port| {
                port.u32(PortAttr::Ifindex as u16, 2);
            });
        DropEvent::from_payload(&enc.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_drop_line() {
        let names = HashMap::from([(2u32, "eth0".to_string())]);
        assert_eq!(
            drop_line(&sample_event(), &names),
            "drop on iface:eth0 at tcp_v4_rcv:ffffffff81234567"
        );
    }

    #[test]
    fn test_drop_line_unknown_iface() {
        let names = HashMap::new();
        assert!(drop_line(&sample_event(), &names).starts_with("drop on iface:?"));
    }

    #[test]
    fn test_json_line_is_valid_json() {
        let names = HashMap::from([(2u32, "eth0".to_string())]);
        let line = json_line(&sample_event(), &names);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["iface"], "eth0");
        assert_eq!(value["symbol"], "tcp_v4_rcv");
        assert_eq!(value["pc"], "0xffffffff81234567");
    }

    #[test]
    fn test_hex_dump_shape() {
        let data: Vec<u8> = (0u8..20).collect();
        let dump = hex_dump(&data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  00 01 02 03"));
        assert!(lines[1].starts_with("00000010  10 11 12 13"));
        assert!(lines[0].ends_with('|'));
    }
}
