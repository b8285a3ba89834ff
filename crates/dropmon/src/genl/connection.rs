//! Generic Netlink connection with family resolution.

use std::collections::HashMap;

use super::header::{GENL_HDRLEN, GenlMsgHdr};
use super::{CtrlAttr, CtrlAttrMcastGrp, CtrlCmd, GENL_ID_CTRL};
use crate::attr::{AttrIter, get};
use crate::builder::MessageBuilder;
use crate::error::{Error, Result};
use crate::message::{MessageIter, NLM_F_ACK, NLM_F_REQUEST, NlMsgError};
use crate::socket::{NetlinkSocket, Protocol};

/// Information about a Generic Netlink family.
#[derive(Debug, Clone)]
pub struct FamilyInfo {
    /// Dynamically assigned family ID (used as nlmsg_type).
    pub id: u16,
    /// Family version.
    pub version: u8,
    /// Multicast groups: name -> group ID.
    pub mcast_groups: HashMap<String, u32>,
}

/// Generic Netlink connection.
///
/// Owns one `Protocol::Generic` socket and provides the operations the drop
/// monitor session is built from: family resolution by name, acknowledged
/// and fire-and-forget commands, multicast membership, and raw receive.
///
/// There is no family cache here: a session resolves its family exactly once
/// at construction and the IDs are immutable afterward.
pub struct GenlConnection {
    socket: NetlinkSocket,
}

impl GenlConnection {
    /// Create a new Generic Netlink connection.
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: NetlinkSocket::new(Protocol::Generic)?,
        })
    }

    /// Get the underlying socket.
    pub fn socket(&self) -> &NetlinkSocket {
        &self.socket
    }

    /// Query the kernel for information about a Generic Netlink family.
    pub async fn get_family(&self, name: &str) -> Result<FamilyInfo> {
        // Build CTRL_CMD_GETFAMILY request
        let mut builder = MessageBuilder::new(GENL_ID_CTRL, NLM_F_REQUEST | NLM_F_ACK);

        // Append GENL header
        let genl_hdr = GenlMsgHdr::new(CtrlCmd::GetFamily as u8, 1);
        builder.append(&genl_hdr);

        // Append family name attribute
        builder.append_attr_str(CtrlAttr::FamilyName as u16, name);

        // Send request
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;

        // Receive response
        let response = self.socket.recv_msg().await?;

        // Parse response
        parse_family_response(&response, seq, name)
    }

    /// Send a GENL command with NLM_F_ACK and wait for the acknowledgment.
    ///
    /// `attrs` is a pre-encoded attribute stream (see
    /// [`crate::codec::AttrEncoder`]); it follows the GENL header verbatim.
    pub async fn acked_command(
        &self,
        family_id: u16,
        cmd: u8,
        version: u8,
        attrs: &[u8],
    ) -> Result<()> {
        let seq = self.send_request(family_id, cmd, version, attrs, NLM_F_REQUEST | NLM_F_ACK)
            .await?;

        // Receive and check the ack
        let response = self.socket.recv_msg().await?;
        process_response(&response, seq)
    }

    /// Send a GENL command without requesting an acknowledgment.
    ///
    /// Returns as soon as the request has been written to the socket; no
    /// reply is read. Used for the stop request and for GET commands whose
    /// reply the caller receives itself.
    pub async fn send_command(
        &self,
        family_id: u16,
        cmd: u8,
        version: u8,
        attrs: &[u8],
    ) -> Result<()> {
        self.send_request(family_id, cmd, version, attrs, NLM_F_REQUEST)
            .await?;
        Ok(())
    }

    /// Receive one datagram from the socket.
    pub async fn recv(&self) -> Result<Vec<u8>> {
        self.socket.recv_msg().await
    }

    /// Join a multicast group by numeric ID.
    pub fn join_group(&mut self, group: u32) -> Result<()> {
        self.socket.add_membership(group)
    }

    /// Leave a multicast group by numeric ID.
    pub fn leave_group(&mut self, group: u32) -> Result<()> {
        self.socket.drop_membership(group)
    }

    async fn send_request(
        &self,
        family_id: u16,
        cmd: u8,
        version: u8,
        attrs: &[u8],
        flags: u16,
    ) -> Result<u32> {
        let mut builder = MessageBuilder::new(family_id, flags);

        let genl_hdr = GenlMsgHdr::new(cmd, version);
        builder.append(&genl_hdr);
        builder.append_bytes(attrs);

        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());

        let msg = builder.finish();
        self.socket.send(&msg).await?;
        Ok(seq)
    }
}

/// Parse a CTRL_CMD_GETFAMILY response.
fn parse_family_response(data: &[u8], seq: u32, name: &str) -> Result<FamilyInfo> {
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        // Check sequence number
        if header.nlmsg_seq != seq {
            continue;
        }

        // Check for error
        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                // ENOENT means family not found
                if err.error == -libc::ENOENT {
                    return Err(Error::FamilyNotFound {
                        name: name.to_string(),
                    });
                }
                return Err(Error::from_errno(err.error));
            }
            continue;
        }

        // Skip DONE message
        if header.is_done() {
            continue;
        }

        // Parse attributes after GENL header
        if payload.len() < GENL_HDRLEN {
            return Err(Error::InvalidMessage("GENL header too short".into()));
        }
        return parse_family_attrs(&payload[GENL_HDRLEN..]);
    }

    Err(Error::FamilyNotFound {
        name: name.to_string(),
    })
}

/// Parse family attributes from a CTRL_CMD_GETFAMILY response.
fn parse_family_attrs(data: &[u8]) -> Result<FamilyInfo> {
    let mut id: Option<u16> = None;
    let mut version: u8 = 0;
    let mut mcast_groups = HashMap::new();

    for (attr_type, payload) in AttrIter::new(data) {
        match attr_type {
            t if t == CtrlAttr::FamilyId as u16 => {
                id = Some(get::u16_ne(payload)?);
            }
            t if t == CtrlAttr::Version as u16 => {
                version = get::u32_ne(payload)? as u8;
            }
            t if t == CtrlAttr::McastGroups as u16 => {
                mcast_groups = parse_mcast_groups(payload)?;
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| Error::InvalidMessage("missing family ID".into()))?;

    Ok(FamilyInfo {
        id,
        version,
        mcast_groups,
    })
}

/// Parse multicast groups from CTRL_ATTR_MCAST_GROUPS.
fn parse_mcast_groups(data: &[u8]) -> Result<HashMap<String, u32>> {
    let mut groups = HashMap::new();

    // The mcast_groups attribute contains nested arrays
    for (_group_idx, group_payload) in AttrIter::new(data) {
        let mut name: Option<String> = None;
        let mut grp_id: Option<u32> = None;

        // Parse the nested group attributes
        for (attr_type, payload) in AttrIter::new(group_payload) {
            match attr_type {
                t if t == CtrlAttrMcastGrp::Name as u16 => {
                    name = Some(get::string(payload)?.to_string());
                }
                t if t == CtrlAttrMcastGrp::Id as u16 => {
                    grp_id = Some(get::u32_ne(payload)?);
                }
                _ => {}
            }
        }

        if let (Some(name), Some(id)) = (name, grp_id) {
            groups.insert(name, id);
        }
    }

    Ok(groups)
}

/// Process an ack response, checking for errors.
fn process_response(data: &[u8], seq: u32) -> Result<()> {
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if header.nlmsg_seq != seq {
            continue;
        }

        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                return Err(Error::from_errno(err.error));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::NlAttr;
    use crate::message::{NLMSG_HDRLEN, NlMsgHdr, NlMsgType};

    fn push_attr(buf: &mut Vec<u8>, attr_type: u16, payload: &[u8]) {
        buf.extend_from_slice(NlAttr::new(attr_type, payload.len()).as_bytes());
        buf.extend_from_slice(payload);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    fn family_attr_bytes(groups: &[(&str, u32)]) -> Vec<u8> {
        let mut attrs = Vec::new();
        push_attr(&mut attrs, CtrlAttr::FamilyId as u16, &29u16.to_ne_bytes());
        push_attr(&mut attrs, CtrlAttr::Version as u16, &2u32.to_ne_bytes());

        let mut group_list = Vec::new();
        for (idx, (name, id)) in groups.iter().enumerate() {
            let mut entry = Vec::new();
            let mut cname = name.as_bytes().to_vec();
            cname.push(0);
            push_attr(&mut entry, CtrlAttrMcastGrp::Name as u16, &cname);
            push_attr(&mut entry, CtrlAttrMcastGrp::Id as u16, &id.to_ne_bytes());
            push_attr(&mut group_list, idx as u16 + 1, &entry);
        }
        push_attr(&mut attrs, CtrlAttr::McastGroups as u16, &group_list);
        attrs
    }

    #[test]
    fn test_parse_family_attrs() {
        let attrs = family_attr_bytes(&[("events", 7)]);
        let info = parse_family_attrs(&attrs).unwrap();
        assert_eq!(info.id, 29);
        assert_eq!(info.version, 2);
        assert_eq!(info.mcast_groups.len(), 1);
        assert_eq!(info.mcast_groups["events"], 7);
    }

    #[test]
    fn test_parse_family_attrs_missing_id() {
        let mut attrs = Vec::new();
        push_attr(&mut attrs, CtrlAttr::Version as u16, &2u32.to_ne_bytes());
        assert!(parse_family_attrs(&attrs).is_err());
    }

    #[test]
    fn test_parse_family_response_enoent() {
        // NLMSG_ERROR carrying -ENOENT: family does not exist.
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-libc::ENOENT).to_ne_bytes());
        payload.extend_from_slice(NlMsgHdr::new(GENL_ID_CTRL, 0).as_bytes());

        let mut header = NlMsgHdr::new(NlMsgType::ERROR, 0);
        header.nlmsg_seq = 3;
        header.nlmsg_len = (NLMSG_HDRLEN + payload.len()) as u32;

        let mut msg = header.as_bytes().to_vec();
        msg.extend_from_slice(&payload);

        match parse_family_response(&msg, 3, "NET_DM") {
            Err(Error::FamilyNotFound { name }) => assert_eq!(name, "NET_DM"),
            other => panic!("expected FamilyNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_process_response_kernel_error() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-libc::EBUSY).to_ne_bytes());
        payload.extend_from_slice(NlMsgHdr::new(29, 0).as_bytes());

        let mut header = NlMsgHdr::new(NlMsgType::ERROR, 0);
        header.nlmsg_seq = 9;
        header.nlmsg_len = (NLMSG_HDRLEN + payload.len()) as u32;

        let mut msg = header.as_bytes().to_vec();
        msg.extend_from_slice(&payload);

        let err = process_response(&msg, 9).unwrap_err();
        assert!(err.is_busy());
    }
}
