//! The drop monitor session state machine.

use tokio::time::{Instant, timeout_at};

use crate::codec::{self, AttrEncoder, AttributeSet};
use crate::error::{Error, Result};
use crate::event::{ConfigSnapshot, DropEvent, StatsSnapshot};
use crate::genl::{FamilyInfo, GENL_HDRLEN, GenlConnection, GenlMsgHdr};
use crate::message::MessageIter;
use crate::schema::{
    AlertMode, DropAttr, DropCmd, FAMILY_NAME, GENL_VERSION, QUEUE_LEN, TRUNC_LEN, drop_attr_kind,
};

/// Session lifecycle states.
///
/// There is no third state: `start` only transitions to `Monitoring` after
/// every step of the start sequence has succeeded, and rolls the kernel back
/// on the way out otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Not monitoring; the multicast group is not joined.
    Idle,
    /// Kernel alerting enabled and the multicast group joined.
    Monitoring,
}

/// One channel to the kernel drop monitor.
///
/// Construction resolves the `NET_DM` family and its single multicast alert
/// group; both IDs are immutable for the life of the session. The transport
/// is exclusively owned, and the methods that drive the protocol take
/// `&mut self`: one logical owner drives start/stop/read, serialized.
///
/// Closing the session (dropping it) closes the socket, which implicitly
/// leaves any joined multicast group.
///
/// # Example
///
/// ```rust,no_run
/// use tokio::time::{Duration, Instant};
///
/// # async fn example() -> dropmon::Result<()> {
/// let mut session = dropmon::Session::new().await?;
/// session.start(true, false).await?;
///
/// let deadline = Instant::now() + Duration::from_secs(5);
/// session
///     .read_until(Some(deadline), |event| {
///         println!("drop at {}", event.symbol());
///         true
///     })
///     .await?;
///
/// session.stop(true, false).await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    genl: GenlConnection,
    family: u16,
    group: u32,
    state: State,
}

impl Session {
    /// Connect to generic netlink and resolve the drop monitor family.
    ///
    /// Fails with [`Error::FamilyNotFound`] when the kernel does not expose
    /// `NET_DM` (the module is not loaded), and with [`Error::Discovery`]
    /// when the family registration looks wrong.
    pub async fn new() -> Result<Self> {
        let genl = GenlConnection::new()?;
        let info = genl.get_family(FAMILY_NAME).await?;
        let group = resolve_alert_group(&info)?;

        Ok(Self {
            genl,
            family: info.id,
            group,
            state: State::Idle,
        })
    }

    /// The resolved numeric family ID.
    pub fn family(&self) -> u16 {
        self.family
    }

    /// The resolved multicast alert group ID.
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Whether the session is currently monitoring.
    pub fn is_monitoring(&self) -> bool {
        self.state == State::Monitoring
    }

    /// Fetch the drop monitor's current configuration.
    ///
    /// Issued fresh on every call; nothing is cached and session state is
    /// not touched.
    pub async fn config(&self) -> Result<ConfigSnapshot> {
        let attrs = self.query(DropCmd::ConfigGet, DropCmd::ConfigNew).await?;
        Ok(ConfigSnapshot::from_attrs(&attrs))
    }

    /// Fetch the drop monitor's alert-loss counters.
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let attrs = self.query(DropCmd::StatsGet, DropCmd::StatsNew).await?;
        Ok(StatsSnapshot::from_attrs(&attrs))
    }

    /// Start monitoring: put the kernel into packet alert mode, enable
    /// alerting for the selected drop sources, and join the alert group.
    ///
    /// `sw` and `hw` select software and hardware drop monitoring
    /// respectively; hardware drops are detected by offload hardware rather
    /// than kernel code. Packet mode carries dropped-packet payloads and
    /// needs CAP_NET_ADMIN.
    ///
    /// The sequence is ordered and rolls back on failure: a config failure
    /// changes nothing; a start or group-join failure triggers a best-effort
    /// stop (whose own outcome is only logged) before the original error is
    /// returned. The session is Monitoring only when every step succeeded,
    /// and still Idle otherwise.
    ///
    /// Calling `start` while already monitoring is rejected with
    /// [`Error::AlreadyMonitoring`]; silently re-entering would
    /// double-register request state with the kernel.
    pub async fn start(&mut self, sw: bool, hw: bool) -> Result<()> {
        if self.state == State::Monitoring {
            return Err(Error::AlreadyMonitoring);
        }

        // Step 1: packet alert mode with fixed truncation and queue lengths.
        // Acknowledged; nothing to roll back if it fails.
        self.configure_packet_mode().await?;

        // Step 2: acknowledged start. Past this point the kernel may be
        // alerting, so any failure has to try to turn it off again.
        let attrs = drop_source_attrs(sw, hw)?;
        if let Err(e) = self
            .genl
            .acked_command(self.family, DropCmd::Start as u8, GENL_VERSION, &attrs)
            .await
        {
            self.rollback_start(sw, hw).await;
            return Err(e);
        }

        // Step 3: join the alert group.
        if let Err(e) = self.genl.join_group(self.group) {
            self.rollback_start(sw, hw).await;
            return Err(e);
        }

        self.state = State::Monitoring;
        Ok(())
    }

    /// Stop monitoring: leave the alert group and disable kernel alerting
    /// for the selected drop sources.
    ///
    /// The group leave is best-effort; a failed leave must not prevent the
    /// kernel-side stop, and most of the time the group is left simply by
    /// closing the socket. The stop request itself is unacknowledged; this
    /// method never waits for a reply and is safe to call redundantly as
    /// cleanup on any exit path. The session is Idle afterwards in every
    /// case, including when the stop request could not be sent, so that
    /// stop-then-start recovery is always well-defined.
    pub async fn stop(&mut self, sw: bool, hw: bool) -> Result<()> {
        best_effort("leave alert group", self.genl.leave_group(self.group));

        self.state = State::Idle;

        let attrs = drop_source_attrs(sw, hw)?;
        self.genl
            .send_command(self.family, DropCmd::Stop as u8, GENL_VERSION, &attrs)
            .await
    }

    /// Read packet alerts until the deadline elapses, calling `f` on each;
    /// read indefinitely if `deadline` is `None`.
    ///
    /// Messages on the group that are not packet alerts are discarded
    /// silently. `f` returning `false` ends the loop immediately with
    /// `Ok(())`. An elapsed deadline is the normal termination condition of
    /// a bounded capture and also returns `Ok(())`; a deadline already in
    /// the past returns before any callback fires. Receive failures and
    /// malformed alerts abort the loop with the error: a corrupt attribute
    /// stream cannot be trusted to resynchronize.
    pub async fn read_until(
        &mut self,
        deadline: Option<Instant>,
        mut f: impl FnMut(DropEvent) -> bool,
    ) -> Result<()> {
        loop {
            // An already-elapsed deadline ends the loop before the receive:
            // timeout_at polls the inner future first and would otherwise
            // hand over one more queued datagram.
            if let Some(at) = deadline
                && Instant::now() >= at
            {
                return Ok(());
            }

            let datagram = match deadline {
                Some(at) => match timeout_at(at, self.genl.recv()).await {
                    Ok(received) => received?,
                    // We're done reading.
                    Err(_elapsed) => return Ok(()),
                },
                None => self.genl.recv().await?,
            };

            for result in MessageIter::new(&datagram) {
                let (header, payload) = result?;

                // Only this family's data messages are interesting; acks and
                // control traffic on the same socket are not.
                if header.nlmsg_type != self.family {
                    continue;
                }
                let Some(genl_hdr) = GenlMsgHdr::from_bytes(payload) else {
                    continue;
                };
                if genl_hdr.cmd != DropCmd::PacketAlert as u8 {
                    continue;
                }

                let event = DropEvent::from_payload(&payload[GENL_HDRLEN..])?;
                if !f(event) {
                    return Ok(());
                }
            }
        }
    }

    /// Switch the kernel into packet alert mode with the fixed truncation
    /// and queue lengths. Alerting must be stopped for this to succeed.
    async fn configure_packet_mode(&self) -> Result<()> {
        let mut enc = AttrEncoder::new();
        enc.u8(DropAttr::AlertMode as u16, AlertMode::Packet as u8)
            .u32(DropAttr::TruncLen as u16, TRUNC_LEN)
            .u32(DropAttr::QueueLen as u16, QUEUE_LEN);
        let attrs = enc.encode()?;

        self.genl
            .acked_command(self.family, DropCmd::Config as u8, GENL_VERSION, &attrs)
            .await
    }

    /// Undo a partially completed start: leave the group if it was joined
    /// and ask the kernel to stop alerting. Both steps are best-effort; the
    /// failure that triggered the rollback is the one the caller sees.
    async fn rollback_start(&mut self, sw: bool, hw: bool) {
        best_effort("leave alert group", self.genl.leave_group(self.group));

        let stop = async {
            let attrs = drop_source_attrs(sw, hw)?;
            self.genl
                .send_command(self.family, DropCmd::Stop as u8, GENL_VERSION, &attrs)
                .await
        };
        best_effort("stop monitoring", stop.await);
    }

    /// Issue an unacknowledged GET and decode the single reply carrying
    /// `reply_cmd`.
    async fn query(&self, get_cmd: DropCmd, reply_cmd: DropCmd) -> Result<AttributeSet> {
        self.genl
            .send_command(self.family, get_cmd as u8, GENL_VERSION, &[])
            .await?;

        let datagram = self.genl.recv().await?;
        for result in MessageIter::new(&datagram) {
            let (header, payload) = result?;

            if header.is_error() {
                let err = crate::message::NlMsgError::from_bytes(payload)?;
                if !err.is_ack() {
                    return Err(Error::from_errno(err.error));
                }
                continue;
            }
            if header.nlmsg_type != self.family {
                continue;
            }
            let Some(genl_hdr) = GenlMsgHdr::from_bytes(payload) else {
                continue;
            };
            if genl_hdr.cmd != reply_cmd as u8 {
                continue;
            }

            return codec::decode(&payload[GENL_HDRLEN..], drop_attr_kind);
        }

        Err(Error::InvalidMessage(format!(
            "no {:?} reply to {:?}",
            reply_cmd, get_cmd
        )))
    }
}

/// Pick the alert group out of the resolved family.
///
/// The design assumes a single alert group and refuses to silently pick an
/// arbitrary one from a family that registers more.
fn resolve_alert_group(info: &FamilyInfo) -> Result<u32> {
    if info.mcast_groups.len() != 1 {
        return Err(Error::Discovery(format!(
            "martian {} family: {} multicast groups, expected exactly 1",
            FAMILY_NAME,
            info.mcast_groups.len()
        )));
    }
    info.mcast_groups
        .values()
        .next()
        .copied()
        .ok_or_else(|| Error::Discovery("no multicast group".into()))
}

/// Encode the {software, hardware} drop source selection shared by the
/// start and stop requests.
fn drop_source_attrs(sw: bool, hw: bool) -> Result<Vec<u8>> {
    let mut enc = AttrEncoder::new();
    enc.flag(DropAttr::SwDrops as u16, sw)
        .flag(DropAttr::HwDrops as u16, hw);
    enc.encode()
}

/// Run a cleanup step whose failure must not mask the primary failure.
///
/// The suppressed error is reported through `tracing` so the behavior stays
/// observable; this is a deliberate contract, not an incidental discard.
fn best_effort(what: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::debug!(error = %e, "best-effort {what} failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn family_with_groups(groups: &[(&str, u32)]) -> FamilyInfo {
        FamilyInfo {
            id: 29,
            version: GENL_VERSION,
            mcast_groups: groups
                .iter()
                .map(|(n, g)| (n.to_string(), *g))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_resolve_alert_group() {
        let info = family_with_groups(&[("events", 1)]);
        assert_eq!(resolve_alert_group(&info).unwrap(), 1);
    }

    #[test]
    fn test_resolve_alert_group_rejects_zero_groups() {
        let info = family_with_groups(&[]);
        assert!(matches!(
            resolve_alert_group(&info),
            Err(Error::Discovery(_))
        ));
    }

    #[test]
    fn test_resolve_alert_group_rejects_extra_groups() {
        let info = family_with_groups(&[("events", 1), ("extra", 2)]);
        assert!(matches!(
            resolve_alert_group(&info),
            Err(Error::Discovery(_))
        ));
    }

    #[test]
    fn test_drop_source_attrs_shape() {
        // sw only: one flag attribute, nothing else.
        let raw = drop_source_attrs(true, false).unwrap();
        let set = codec::decode(&raw, drop_attr_kind).unwrap();
        assert!(set.contains(DropAttr::SwDrops as u16));
        assert!(!set.contains(DropAttr::HwDrops as u16));
        assert_eq!(set.len(), 1);

        // Neither: an empty attribute stream.
        assert!(drop_source_attrs(false, false).unwrap().is_empty());
    }
}
