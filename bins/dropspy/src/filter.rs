//! Drop event filtering.

use std::collections::HashSet;

use dropmon::DropEvent;
use regex::Regex;

/// Predicate chain evaluated against each decoded drop.
///
/// Empty members accept everything; a populated member must match for the
/// event to pass. Include and exclude symbol lists are mutually exclusive at
/// the CLI layer.
#[derive(Debug, Default)]
pub struct DropFilter {
    /// Show only drops on these interface indexes.
    pub ifaces: HashSet<u32>,
    /// Minimum original packet length.
    pub min_len: Option<u32>,
    /// Maximum original packet length.
    pub max_len: Option<u32>,
    /// Keep only drops whose symbol matches every one of these.
    pub include_syms: Vec<Regex>,
    /// Discard drops whose symbol matches any of these.
    pub exclude_syms: Vec<Regex>,
    /// Keep only drops whose payload contains this byte pattern.
    pub payload: Option<Vec<u8>>,
}

impl DropFilter {
    /// Evaluate the chain against one event.
    pub fn matches(&self, event: &DropEvent) -> bool {
        if !self.ifaces.is_empty() && !self.ifaces.contains(&event.ifindex()) {
            return false;
        }

        let len = event.length();
        if let Some(min) = self.min_len
            && len < min
        {
            return false;
        }
        if let Some(max) = self.max_len
            && len > max
        {
            return false;
        }

        let sym = event.symbol();
        if self.exclude_syms.iter().any(|rx| rx.is_match(sym)) {
            return false;
        }
        if !self.include_syms.is_empty() && !self.include_syms.iter().all(|rx| rx.is_match(sym)) {
            return false;
        }

        if let Some(pattern) = &self.payload
            && !pattern.is_empty()
        {
            let packet = event.packet();
            if packet.len() < pattern.len()
                || !packet.windows(pattern.len()).any(|w| w == pattern)
            {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropmon::codec::AttrEncoder;
    use dropmon::schema::{DropAttr, PortAttr};

    fn event(symbol: &str, len: u32, ifindex: u32, payload: &[u8]) -> DropEvent {
        let mut enc = AttrEncoder::new();
        enc.string(DropAttr::Symbol as u16, symbol)
            .u32(DropAttr::OrigLen as u16, len)
            .bytes(DropAttr::Payload as u16, payload)
            .nested(DropAttr::InPort as u16, |port| {
                port.u32(PortAttr::Ifindex as u16, ifindex);
            });
        DropEvent::from_payload(&enc.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_empty_filter_accepts_all() {
        let filter = DropFilter::default();
        assert!(filter.matches(&event("tcp_v4_rcv", 100, 2, &[])));
    }

    #[test]
    fn test_iface_set() {
        let filter = DropFilter {
            ifaces: [2, 3].into_iter().collect(),
            ..Default::default()
        };
        assert!(filter.matches(&event("x", 0, 2, &[])));
        assert!(!filter.matches(&event("x", 0, 4, &[])));
    }

    #[test]
    fn test_length_bounds() {
        let filter = DropFilter {
            min_len: Some(64),
            max_len: Some(1500),
            ..Default::default()
        };
        assert!(!filter.matches(&event("x", 63, 0, &[])));
        assert!(filter.matches(&event("x", 64, 0, &[])));
        assert!(filter.matches(&event("x", 1500, 0, &[])));
        assert!(!filter.matches(&event("x", 1501, 0, &[])));
    }

    #[test]
    fn test_symbol_regexes() {
        let include = DropFilter {
            include_syms: vec![Regex::new("^tcp_").unwrap()],
            ..Default::default()
        };
        assert!(include.matches(&event("tcp_v4_rcv", 0, 0, &[])));
        assert!(!include.matches(&event("udp_rcv", 0, 0, &[])));

        let exclude = DropFilter {
            exclude_syms: vec![Regex::new("unix").unwrap()],
            ..Default::default()
        };
        assert!(exclude.matches(&event("tcp_v4_rcv", 0, 0, &[])));
        assert!(!exclude.matches(&event("unix_dgram_sendmsg", 0, 0, &[])));
    }

    #[test]
    fn test_payload_pattern() {
        let filter = DropFilter {
            payload: Some(vec![0xDE, 0xAD]),
            ..Default::default()
        };
        assert!(filter.matches(&event("x", 0, 0, &[0x00, 0xDE, 0xAD, 0x01])));
        assert!(!filter.matches(&event("x", 0, 0, &[0xDE, 0x00, 0xAD])));
        assert!(!filter.matches(&event("x", 0, 0, &[])));
    }
}
