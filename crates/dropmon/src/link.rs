//! Interface index to name resolution.
//!
//! Drop alerts carry the originating interface as a numeric index; front
//! ends want names. This module does one RTM_GETLINK dump over a routing
//! socket and returns the index-to-name map. No link management and no
//! caching; callers re-dump when they care about freshness.

use std::collections::HashMap;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::{AttrIter, get};
use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    MessageIter, NLM_F_DUMP, NLM_F_REQUEST, NlMsgError, NlMsgType,
};
use super::socket::{NetlinkSocket, Protocol};

/// Interface info header (mirrors struct ifinfomsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct IfInfoMsg {
    ifi_family: u8,
    _ifi_pad: u8,
    ifi_type: u16,
    ifi_index: i32,
    ifi_flags: u32,
    ifi_change: u32,
}

const IFINFO_LEN: usize = std::mem::size_of::<IfInfoMsg>();

/// IFLA_IFNAME attribute code.
const IFLA_IFNAME: u16 = 3;

/// List all network interfaces as an index → name map.
pub async fn interface_names() -> Result<HashMap<u32, String>> {
    let socket = NetlinkSocket::new(Protocol::Route)?;

    let mut builder = MessageBuilder::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP);
    builder.append(&IfInfoMsg::default());

    let seq = socket.next_seq();
    builder.set_seq(seq);
    builder.set_pid(socket.pid());
    socket.send(&builder.finish()).await?;

    let mut names = HashMap::new();

    loop {
        let datagram = socket.recv_msg().await?;
        for result in MessageIter::new(&datagram) {
            let (header, payload) = result?;

            if header.nlmsg_seq != seq {
                continue;
            }
            if header.is_done() {
                return Ok(names);
            }
            if header.is_error() {
                let err = NlMsgError::from_bytes(payload)?;
                if !err.is_ack() {
                    return Err(Error::from_errno(err.error));
                }
                continue;
            }
            if header.nlmsg_type != NlMsgType::RTM_NEWLINK {
                continue;
            }

            if let Some((index, name)) = parse_link(payload)? {
                names.insert(index, name);
            }
        }
    }
}

/// Pull the interface index and IFLA_IFNAME out of one RTM_NEWLINK payload.
fn parse_link(payload: &[u8]) -> Result<Option<(u32, String)>> {
    let (info, attrs) =
        IfInfoMsg::read_from_prefix(payload).map_err(|_| Error::Truncated {
            expected: IFINFO_LEN,
            actual: payload.len(),
        })?;

    for (attr_type, value) in AttrIter::new(attrs) {
        if attr_type == IFLA_IFNAME {
            return Ok(Some((info.ifi_index as u32, get::string(value)?.to_string())));
        }
    }

    // A link without a name attribute is useless for display; skip it.
    Ok(None)
}
