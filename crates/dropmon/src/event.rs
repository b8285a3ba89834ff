//! Decoded views over drop monitor messages.

use crate::codec::{self, AttributeSet};
use crate::error::Result;
use crate::schema::{self, AlertMode, DropAttr, Origin, PortAttr, StatsAttr};

/// Length of the link-layer header skipped by [`DropEvent::l3_packet`].
const LINK_HDR_LEN: usize = 14;

/// One decoded packet-drop alert.
///
/// A thin accessor layer over the alert's attribute set. Every accessor is
/// total: an attribute the kernel did not include reads as its zero value
/// (empty string, 0, empty byte sequence); absence is not an error at this
/// layer. Constructed once per received multicast message and immutable.
#[derive(Debug, Clone)]
pub struct DropEvent {
    attrs: AttributeSet,
}

impl DropEvent {
    /// Decode an event from the attribute bytes of a packet-alert message.
    pub fn from_payload(data: &[u8]) -> Result<Self> {
        let attrs = codec::decode(data, schema::drop_attr_kind)?;
        Ok(Self { attrs })
    }

    /// The kernel program counter where the drop occurred, for later symbol
    /// resolution.
    pub fn pc(&self) -> u64 {
        self.attrs.u64(DropAttr::Pc as u16).unwrap_or(0)
    }

    /// The kernel function where the drop occurred, when available.
    pub fn symbol(&self) -> &str {
        self.attrs.string(DropAttr::Symbol as u16).unwrap_or("")
    }

    /// Alert timestamp in nanoseconds, when available.
    pub fn timestamp(&self) -> u64 {
        self.attrs.u64(DropAttr::Timestamp as u16).unwrap_or(0)
    }

    /// The layer-3 protocol of the dropped packet (an EtherType).
    pub fn proto(&self) -> u16 {
        self.attrs.u16(DropAttr::Proto as u16).unwrap_or(0)
    }

    /// True if the dropped packet is IPv4.
    pub fn is_ipv4(&self) -> bool {
        self.proto() == 0x0800
    }

    /// True if the dropped packet is IPv6.
    pub fn is_ipv6(&self) -> bool {
        self.proto() == 0x86DD
    }

    /// The (truncated) raw bytes of the dropped packet, starting at the
    /// link-layer header.
    pub fn packet(&self) -> &[u8] {
        self.attrs.bytes(DropAttr::Payload as u16).unwrap_or(&[])
    }

    /// The (truncated) raw bytes of the dropped packet with the link-layer
    /// header skipped, i.e. starting at the IP header of an IP packet.
    ///
    /// This is a fixed 14-byte skip, not a link-layer parse; payloads at or
    /// below that size read as empty.
    pub fn l3_packet(&self) -> &[u8] {
        let packet = self.packet();
        if packet.len() <= LINK_HDR_LEN {
            return &[];
        }
        &packet[LINK_HDR_LEN..]
    }

    /// The original, un-truncated length of the dropped packet.
    pub fn length(&self) -> u32 {
        self.attrs.u32(DropAttr::OrigLen as u16).unwrap_or(0)
    }

    /// The index of the interface the packet was dropped on.
    pub fn ifindex(&self) -> u32 {
        self.attrs
            .nested(DropAttr::InPort as u16)
            .and_then(|port| port.u32(PortAttr::Ifindex as u16))
            .unwrap_or(0)
    }

    /// The name of the interface the packet was dropped on, when the kernel
    /// includes it in the port block.
    pub fn port_name(&self) -> &str {
        self.attrs
            .nested(DropAttr::InPort as u16)
            .and_then(|port| port.string(PortAttr::Name as u16))
            .unwrap_or("")
    }

    /// Whether the drop was detected in kernel software or offload hardware.
    pub fn origin(&self) -> Origin {
        Origin::from_raw(self.attrs.u16(DropAttr::Origin as u16).unwrap_or(0))
    }

    /// The underlying attribute set, for callers that want attributes this
    /// view does not surface.
    pub fn attrs(&self) -> &AttributeSet {
        &self.attrs
    }
}

/// The drop monitor's configuration as of one config query.
///
/// Never cached; re-fetched on each [`crate::Session::config`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigSnapshot {
    /// Current alert mode.
    pub alert_mode: AlertMode,
    /// Per-alert payload truncation length.
    pub trunc_len: u32,
    /// Per-device alert queue length.
    pub queue_len: u32,
}

impl ConfigSnapshot {
    pub(crate) fn from_attrs(attrs: &AttributeSet) -> Self {
        Self {
            alert_mode: AlertMode::from_raw(attrs.u8(DropAttr::AlertMode as u16).unwrap_or(0)),
            trunc_len: attrs.u32(DropAttr::TruncLen as u16).unwrap_or(0),
            queue_len: attrs.u32(DropAttr::QueueLen as u16).unwrap_or(0),
        }
    }
}

/// Drop counters as of one stats query.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    /// Alerts dropped in software before they could be sent (queue overrun).
    pub dropped: u64,
    /// Alerts dropped by offload hardware.
    pub hw_dropped: u64,
}

impl StatsSnapshot {
    pub(crate) fn from_attrs(attrs: &AttributeSet) -> Self {
        let dropped = attrs
            .nested(DropAttr::Stats as u16)
            .and_then(|s| s.u64(StatsAttr::Dropped as u16))
            .unwrap_or(0);
        let hw_dropped = attrs
            .nested(DropAttr::HwStats as u16)
            .and_then(|s| s.u64(StatsAttr::Dropped as u16))
            .unwrap_or(0);
        Self {
            dropped,
            hw_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AttrEncoder;

    fn event_from(enc: AttrEncoder) -> DropEvent {
        DropEvent::from_payload(&enc.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_pc_and_payload_only() {
        let mut enc = AttrEncoder::new();
        enc.u64(DropAttr::Pc as u16, 0xFFFF_FFFF_8123_4567);
        enc.bytes(DropAttr::Payload as u16, &[1, 2, 3, 4]);
        let event = event_from(enc);

        assert_eq!(event.pc(), 0xFFFF_FFFF_8123_4567);
        assert_eq!(event.packet(), &[1, 2, 3, 4]);
        // Everything absent reads as its zero value.
        assert_eq!(event.symbol(), "");
        assert_eq!(event.length(), 0);
        assert_eq!(event.ifindex(), 0);
        assert_eq!(event.port_name(), "");
        assert_eq!(event.proto(), 0);
        assert_eq!(event.timestamp(), 0);
        assert_eq!(event.origin(), Origin::Software);
    }

    #[test]
    fn test_l3_packet_at_boundary() {
        let mut enc = AttrEncoder::new();
        enc.bytes(DropAttr::Payload as u16, &[0u8; 10]);
        assert!(event_from(enc).l3_packet().is_empty());

        let mut enc = AttrEncoder::new();
        enc.bytes(DropAttr::Payload as u16, &[0u8; 14]);
        assert!(event_from(enc).l3_packet().is_empty());

        let payload: Vec<u8> = (0u8..20).collect();
        let mut enc = AttrEncoder::new();
        enc.bytes(DropAttr::Payload as u16, &payload);
        let event = event_from(enc);
        assert_eq!(event.l3_packet(), &payload[14..20]);
    }

    #[test]
    fn test_protocol_classification() {
        let mut enc = AttrEncoder::new();
        enc.u16(DropAttr::Proto as u16, 0x0800);
        let event = event_from(enc);
        assert!(event.is_ipv4());
        assert!(!event.is_ipv6());

        let mut enc = AttrEncoder::new();
        enc.u16(DropAttr::Proto as u16, 0x86DD);
        let event = event_from(enc);
        assert!(event.is_ipv6());
        assert!(!event.is_ipv4());
    }

    #[test]
    fn test_port_block() {
        let mut enc = AttrEncoder::new();
        enc.nested(DropAttr::InPort as u16, |port| {
            port.u32(PortAttr::Ifindex as u16, 3)
                .string(PortAttr::Name as u16, "eth0");
        });
        let event = event_from(enc);
        assert_eq!(event.ifindex(), 3);
        assert_eq!(event.port_name(), "eth0");
    }

    #[test]
    fn test_origin() {
        let mut enc = AttrEncoder::new();
        enc.u16(DropAttr::Origin as u16, 1);
        assert_eq!(event_from(enc).origin(), Origin::Hardware);
    }

    #[test]
    fn test_drop_source_flags_roundtrip() {
        // The request the session sends on start: sw on, hw off. Exactly one
        // attribute must survive the trip.
        let mut enc = AttrEncoder::new();
        enc.flag(DropAttr::SwDrops as u16, true);
        enc.flag(DropAttr::HwDrops as u16, false);
        let raw = enc.encode().unwrap();

        let set = crate::codec::decode(&raw, schema::drop_attr_kind).unwrap();
        assert!(set.contains(DropAttr::SwDrops as u16));
        assert!(!set.contains(DropAttr::HwDrops as u16));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_config_snapshot() {
        let mut enc = AttrEncoder::new();
        enc.u8(DropAttr::AlertMode as u16, 1)
            .u32(DropAttr::TruncLen as u16, 100)
            .u32(DropAttr::QueueLen as u16, 4096);
        let raw = enc.encode().unwrap();

        let set = crate::codec::decode(&raw, schema::drop_attr_kind).unwrap();
        let config = ConfigSnapshot::from_attrs(&set);
        assert_eq!(config.alert_mode, AlertMode::Packet);
        assert_eq!(config.trunc_len, 100);
        assert_eq!(config.queue_len, 4096);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut enc = AttrEncoder::new();
        enc.nested(DropAttr::Stats as u16, |stats| {
            stats.u64(StatsAttr::Dropped as u16, 17);
        });
        enc.nested(DropAttr::HwStats as u16, |stats| {
            stats.u64(StatsAttr::Dropped as u16, 2);
        });
        let raw = enc.encode().unwrap();

        let set = crate::codec::decode(&raw, schema::drop_attr_kind).unwrap();
        let stats = StatsSnapshot::from_attrs(&set);
        assert_eq!(stats.dropped, 17);
        assert_eq!(stats.hw_dropped, 2);
    }
}
