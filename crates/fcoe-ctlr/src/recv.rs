//! Receive dispatch: frame validation, advertisement handling, and
//! Clear Virtual Link.

use tokio::time::Instant;
use tracing::{debug, info};

use fcoe_proto::constants::*;
use fcoe_proto::defaults;
use fcoe_proto::error::{FipError, FipResult};
use fcoe_proto::wire::FipFrame;
use fcoe_proto::MacAddr;

use crate::ctlr::{Ctlr, FcEvent, FipMode, FipState};
use crate::fcf::Fcf;
use crate::lport::FcLport;
use crate::vlan;
use crate::vn2vn;

/// Validate and dispatch one received FIP frame.
pub(crate) fn on_frame(c: &mut Ctlr, lport: &dyn FcLport, now: Instant, raw: &[u8]) {
    let frame = match FipFrame::parse(raw) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(%err, "dropping malformed FIP frame");
            return;
        }
    };

    // Accept only frames addressed to us or to our multicast groups.
    let dest = frame.eth.dest;
    let for_us = if c.mode == FipMode::Vn2Vn {
        dest == c.ctl_src_addr || dest == MacAddr::ALL_VN2VN || dest == MacAddr::ALL_P2P
    } else {
        dest == c.ctl_src_addr || dest == MacAddr::ALL_ENODES
    };
    if !for_us {
        return;
    }

    if c.state == FipState::Auto {
        debug!("FIP traffic observed, using FIP mode");
        c.map_dest = false;
        c.state = FipState::Enabled;
    }

    let op = frame.hdr.op;
    let sub = frame.hdr.subcode;
    if c.mode == FipMode::Vn2Vn && op == FIP_OP_VN2VN {
        vn2vn::vn_recv(c, &frame);
        return;
    }
    if !matches!(
        c.state,
        FipState::Enabled | FipState::Vn2VnUp | FipState::Vn2VnClaim
    ) {
        return;
    }
    if op == FIP_OP_LS {
        crate::els::recv_els(c, now, &frame);
        return;
    }
    if c.state != FipState::Enabled {
        return;
    }
    match (op, sub) {
        (FIP_OP_DISC, FIP_SC_ADV) => on_adv(c, lport, now, &frame),
        (FIP_OP_CTRL, FIP_SC_CLR_VLINK) => recv_clr_vlink(c, lport, now, &frame),
        (FIP_OP_VLAN, FIP_SC_VL_NOTE) => {
            if c.vlan_id != VLAN_DISCOVERY_DISABLED {
                vlan::recv_vlan_note(c, lport, now, &frame);
            }
        }
        // Keep-alives are only ever sent by an initiator, never consumed.
        _ => {}
    }
}

/// Decode an advertisement into a candidate FCF record.
///
/// Requires valid MAC, name, and fabric descriptors. A keep-alive
/// period below the protocol minimum falls back to the default; the
/// priority defaults when the descriptor is absent.
pub(crate) fn parse_adv(frame: &FipFrame<'_>, now: Instant) -> FipResult<Fcf> {
    let mut mac = None;
    let mut switch_name = None;
    let mut fabric = None;
    let mut pri = FIP_DEF_PRI;
    let mut fka_period = defaults::DEF_FKA;
    let mut fka_disabled = false;

    for desc in frame.descriptors() {
        let desc = desc?;
        match desc.dtype {
            FIP_DT_PRI => pri = desc.pri()?,
            FIP_DT_MAC => {
                let m = desc.mac()?;
                if !m.is_valid_unicast() {
                    return Err(FipError::InvalidMac);
                }
                mac = Some(m);
            }
            FIP_DT_NAME => switch_name = Some(desc.wwn()?),
            FIP_DT_FAB => fabric = Some(desc.fabric()?),
            FIP_DT_FKA => {
                let (flags, period_ms) = desc.fka()?;
                fka_disabled = flags & FIP_FKA_ADV_D != 0;
                if u128::from(period_ms) >= defaults::MIN_FKA.as_millis() {
                    fka_period = std::time::Duration::from_millis(u64::from(period_ms));
                }
            }
            other if other < FIP_DT_VENDOR_BASE => return Err(FipError::UnexpectedDesc),
            _ => {}
        }
    }

    let fcf_mac = mac.ok_or(FipError::MissingDesc)?;
    let switch_name = switch_name.ok_or(FipError::InvalidName)?;
    let (fabric_name, vfid, fc_map) = fabric.ok_or(FipError::MissingDesc)?;
    if fc_map == 0 || fc_map & 0x1_0000 != 0 {
        return Err(FipError::InvalidFcMap);
    }
    if switch_name == 0 {
        return Err(FipError::InvalidName);
    }
    Ok(Fcf {
        fcf_mac,
        switch_name,
        fabric_name,
        vfid,
        fc_map,
        pri,
        flags: frame.hdr.flags,
        fka_period,
        fka_disabled,
        time: now,
    })
}

/// Fold an advertisement into the registry and drive validation:
/// unvalidated records get a targeted solicitation, the first record
/// triggers a paced multicast re-solicit, and a newly validated usable
/// record arms the deferred selection deadline.
fn on_adv(c: &mut Ctlr, lport: &dyn FcLport, now: Instant, frame: &FipFrame<'_>) {
    let new = match parse_adv(frame, now) {
        Ok(new) => new,
        Err(err) => {
            debug!(%err, "ignoring invalid advertisement");
            return;
        }
    };
    let Some(up) = c.fcfs.upsert(new) else {
        return;
    };
    if let Some((old, new_period)) = up.selected_ka_change {
        // Re-anchor the pending controller keep-alive to the new period.
        if let Some(base) = c.ctlr_ka_time.checked_sub(old) {
            c.ctlr_ka_time = base + new_period;
            c.arm_timer(c.ctlr_ka_time);
        }
    }
    let Some(fcf) = c.fcfs.find(&up.key) else {
        return;
    };
    let (mtu_valid, usable) = (fcf.mtu_valid(), fcf.usable());
    if up.created {
        info!(
            fabric = format_args!("{:016x}", fcf.fabric_name),
            fc_map = format_args!("{:06x}", fcf.fc_map),
            mac = %fcf.fcf_mac,
            validated = mtu_valid,
            "new FCF"
        );
    }

    if !mtu_valid {
        c.solicit(lport, Some(up.key.mac), now);
    }
    if up.was_empty
        && c.sol_time
            .map_or(true, |t| now > t + defaults::SOL_TOV)
    {
        c.solicit(lport, None, now);
    }
    if mtu_valid && usable && c.fcfs.selection().is_none() {
        if up.created {
            c.sel_time = Some(now + defaults::FCF_START_DELAY);
        }
        match c.sel_time {
            Some(at) => c.arm_timer(at),
            // A known record just became usable: fire the timer so the
            // aging pass can anchor the selection deadline.
            None => c.arm_timer(now),
        }
    }
}

/// Clear Virtual Link: the FCF orders this VN_Port's login torn down.
/// All-or-nothing validation: the frame must identify the selected FCF
/// (MAC and switch name) and this exact VN_Port (MAC, WWPN, FC_ID), or
/// the whole frame is ignored.
fn recv_clr_vlink(c: &mut Ctlr, lport: &dyn FcLport, now: Instant, frame: &FipFrame<'_>) {
    debug!("Clear Virtual Link received");
    let Some((fcf_mac, switch_name)) = c.fcfs.selected().map(|f| (f.fcf_mac, f.switch_name)) else {
        return;
    };
    if lport.port_id() == 0 {
        return;
    }

    let mut desc_mask = (1u32 << FIP_DT_MAC) | (1 << FIP_DT_NAME) | (1 << FIP_DT_VN_ID);
    for desc in frame.descriptors() {
        let Ok(desc) = desc else {
            return;
        };
        match desc.dtype {
            FIP_DT_MAC => {
                if desc.mac() != Ok(fcf_mac) {
                    return;
                }
                desc_mask &= !(1 << FIP_DT_MAC);
            }
            FIP_DT_NAME => {
                if desc.wwn() != Ok(switch_name) {
                    return;
                }
                desc_mask &= !(1 << FIP_DT_NAME);
            }
            FIP_DT_VN_ID => {
                let Ok(vn) = desc.vn_id() else {
                    return;
                };
                if vn.mac != lport.get_src_addr()
                    || vn.wwpn != lport.wwpn()
                    || vn.fc_id != lport.port_id()
                {
                    debug!(mac = %vn.mac, fc_id = format_args!("{:06x}", vn.fc_id),
                           "Clear Virtual Link names a different VN_Port");
                    return;
                }
                desc_mask &= !(1 << FIP_DT_VN_ID);
            }
            other if other < FIP_DT_VENDOR_BASE => return,
            _ => {}
        }
    }
    if desc_mask != 0 {
        debug!(desc_mask, "Clear Virtual Link missing required descriptors");
        return;
    }

    info!("performing Clear Virtual Link");
    c.stats.vlink_failures += 1;
    c.reset(now);
    c.events.push(FcEvent::Reset);
    if c.vlan_id == VLAN_DISCOVERY_DISABLED {
        c.solicit(lport, None, now);
    } else {
        vlan::vlan_request(c, now);
    }
}
