//! FIP VLAN discovery.
//!
//! Before soliciting FCFs the controller may have to learn which VLAN
//! carries FCoE: it sends an untagged VLAN request to the all-FCFs
//! group and adopts the first VLAN id offered in a notification. While
//! the id is unknown (`vlan_id == 0`) discovery solicitations are held
//! back and the request is retried from the timer.

use tokio::time::Instant;
use tracing::debug;

use fcoe_proto::constants::*;
use fcoe_proto::defaults;
use fcoe_proto::wire::FipFrame;
use fcoe_proto::{FrameBuilder, MacAddr};

use crate::ctlr::{Ctlr, FcEvent};
use crate::lport::FcLport;

/// Send a VLAN discovery request and arm the retry timer. Resets the
/// link to untagged so the request goes out on the native VLAN.
pub(crate) fn vlan_request(c: &mut Ctlr, now: Instant) {
    let mut b = FrameBuilder::new(
        MacAddr::ALL_FCFS,
        c.ctl_src_addr,
        FIP_OP_VLAN,
        FIP_SC_VL_REQ,
        0,
    );
    b.mac_desc(c.ctl_src_addr);
    c.vlan_id = 0;
    c.events.push(FcEvent::SetVlanTag(0));
    c.tx.push(b.finish());
    c.arm_timer(now + defaults::VLAN_DISC_RETRY_TOV);
}

/// Handle a VLAN notification. Requires both the MAC and at least one
/// VLAN descriptor; adopts the first offered id that is not already in
/// use, applies the tag, and starts FCF discovery.
pub(crate) fn recv_vlan_note(c: &mut Ctlr, lport: &dyn FcLport, now: Instant, frame: &FipFrame<'_>) {
    let mut desc_mask = (1u32 << FIP_DT_MAC) | (1 << FIP_DT_VLAN);
    let mut old_vlan_valid = false;
    let mut new_vlan = 0u16;

    for desc in frame.descriptors() {
        let Ok(desc) = desc else {
            return;
        };
        match desc.dtype {
            FIP_DT_MAC => {
                if desc.mac().is_err() {
                    return;
                }
                desc_mask &= !(1 << FIP_DT_MAC);
            }
            FIP_DT_VLAN => {
                let Ok(fd_vlan) = desc.vlan() else {
                    return;
                };
                if fd_vlan == c.vlan_id {
                    old_vlan_valid = true;
                } else if new_vlan == 0 {
                    new_vlan = fd_vlan;
                }
                desc_mask &= !(1 << FIP_DT_VLAN);
            }
            other if other < FIP_DT_VENDOR_BASE => {
                debug!(dtype = other, "unexpected descriptor in VLAN notification");
                return;
            }
            _ => {}
        }
    }
    if desc_mask != 0 {
        debug!(desc_mask, "VLAN notification missing required descriptors");
        return;
    }
    if old_vlan_valid || new_vlan == 0 {
        return;
    }
    if new_vlan > VLAN_VID_MASK {
        debug!(vlan_id = new_vlan, "ignoring out-of-range VLAN id");
        return;
    }
    debug!(vlan_id = new_vlan, "FIP VLAN discovered");
    c.vlan_id = new_vlan;
    c.events.push(FcEvent::SetVlanTag(new_vlan));
    c.solicit(lport, None, now);
}
