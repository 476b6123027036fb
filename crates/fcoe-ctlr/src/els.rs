//! ELS encapsulation and de-encapsulation.
//!
//! The FC layer hands complete ELS frames down through
//! [`FcoeCtlr::els_send`](crate::FcoeCtlr::els_send); depending on the
//! settled mode they are FIP-wrapped, sent natively over FCoE by the
//! caller, or dropped. Received FIP link-service frames are unwrapped
//! here and delivered upward with any forwarder-granted MAC attached.

use tokio::time::Instant;
use tracing::debug;

use fcoe_proto::constants::*;
use fcoe_proto::defaults;
use fcoe_proto::error::FipError;
use fcoe_proto::fc::{
    els_opcode, FcHeader, ELS_FDISC, ELS_FLOGI, ELS_LOGO, ELS_LS_ACC, ELS_LS_RJT, FC_RCTL_ELS_REP,
    FC_RCTL_ELS_REQ, FC_TYPE_ELS,
};
use fcoe_proto::wire::FipFrame;
use fcoe_proto::{FrameBuilder, MacAddr};

use crate::ctlr::{Ctlr, FcEvent, FipMode, FipState};
use crate::fcf::Fcf;
use crate::lport::{ElsDelivery, FcLport};
use crate::vn2vn;

/// What the caller must do with an outgoing ELS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElsSendOutcome {
    /// The controller wrapped and transmitted the frame.
    Sent,
    /// Send it yourself, with plain FCoE encapsulation.
    Native,
    /// Invalid in the current state; do not send.
    Drop,
}

/// Decide how an outgoing ELS frame travels, and wrap it when FIP
/// addressing applies. The frame length must be a 4-byte multiple.
pub(crate) fn els_send(
    c: &mut Ctlr,
    lport: &dyn FcLport,
    els: &[u8],
    reply_encaps: Option<u8>,
) -> ElsSendOutcome {
    let (Ok(fh), Ok(op)) = (FcHeader::decode(els), els_opcode(els)) else {
        return ElsSendOutcome::Drop;
    };
    if els.len() % FIP_BPW != 0 {
        return ElsSendOutcome::Drop;
    }

    if op == ELS_FLOGI && c.mode != FipMode::Vn2Vn {
        let old_xid = c.flogi_oxid;
        c.flogi_oxid = fh.ox_id;
        if c.state == FipState::Auto {
            if old_xid == FC_XID_UNKNOWN {
                c.flogi_count = 0;
            }
            c.flogi_count += 1;
            if c.flogi_count <= defaults::FLOGI_AUTO_RETRIES {
                return ElsSendOutcome::Drop;
            }
            debug!(attempts = c.flogi_count, "no FIP response, committing to non-FIP mode");
            c.map_dest_addr();
            return ElsSendOutcome::Native;
        }
        if c.state == FipState::NonFip {
            c.map_dest = true;
        }
    }

    // A point-to-point FLOGI we accepted grants the peer an FC_ID; once
    // the accept goes out, address by that FC_ID.
    if op == ELS_LS_ACC && c.state == FipState::NonFip && c.flogi_oxid != FC_XID_UNKNOWN {
        c.flogi_oxid = FC_XID_UNKNOWN;
        c.events
            .push(FcEvent::UpdateMac(MacAddr::from_fc_id(FIP_DEF_FC_MAP, fh.d_id)));
    }

    if c.state == FipState::NonFip {
        return ElsSendOutcome::Native;
    }
    if c.fcfs.selection().is_none() && c.mode != FipMode::Vn2Vn {
        return ElsSendOutcome::Drop;
    }

    let dtype = match op {
        ELS_FLOGI => FIP_DT_FLOGI,
        ELS_FDISC => {
            // FDISC before fabric login has granted an FC_ID is invalid.
            if fh.s_id == 0 {
                return ElsSendOutcome::Drop;
            }
            FIP_DT_FDISC
        }
        ELS_LOGO => {
            if c.mode == FipMode::Vn2Vn {
                if c.state != FipState::Vn2VnUp || fh.d_id == FC_FID_FLOGI {
                    return ElsSendOutcome::Drop;
                }
            } else {
                if c.state != FipState::Enabled || fh.d_id != FC_FID_FLOGI {
                    return ElsSendOutcome::Native;
                }
            }
            FIP_DT_LOGO
        }
        ELS_LS_ACC | ELS_LS_RJT => match reply_encaps {
            // Echo the encapsulation the request arrived under.
            Some(d) => d,
            None => return ElsSendOutcome::Native,
        },
        _ => {
            if c.state != FipState::Enabled && c.state != FipState::Vn2VnUp {
                return ElsSendOutcome::Drop;
            }
            return ElsSendOutcome::Native;
        }
    };
    debug!(dtype, d_id = format_args!("{:06x}", fh.d_id), "wrapping outgoing ELS");
    match encaps(c, lport, dtype, op, els, fh.d_id) {
        Some(frame) => {
            c.tx.push(frame);
            ElsSendOutcome::Sent
        }
        None => ElsSendOutcome::Drop,
    }
}

/// Build the FIP frame wrapping one ELS. Replies carry the reply
/// subcode; everything but a reject also carries a MAC descriptor,
/// whose content depends on the login type and addressing mode.
fn encaps(
    c: &Ctlr,
    lport: &dyn FcLport,
    dtype: u8,
    op: u8,
    els: &[u8],
    d_id: u32,
) -> Option<Vec<u8>> {
    let (dest, flags) = if c.mode == FipMode::Vn2Vn {
        (vn2vn::vn_lookup(c, d_id)?, 0)
    } else {
        let fcf = c.fcfs.selected()?;
        let mask = if c.spma {
            FIP_FL_SPMA | FIP_FL_FPMA
        } else {
            FIP_FL_FPMA
        };
        let flags = fcf.flags & mask;
        if flags == 0 {
            return None;
        }
        (fcf.fcf_mac, flags)
    };
    let subcode = if op == ELS_LS_ACC || op == ELS_LS_RJT {
        FIP_SC_REP
    } else {
        FIP_SC_REQ
    };
    let mut b = FrameBuilder::new(dest, c.ctl_src_addr, FIP_OP_LS, subcode, flags);
    b.encaps_desc(dtype, els);
    if op != ELS_LS_RJT {
        let mac = if dtype != FIP_DT_FLOGI && dtype != FIP_DT_FDISC {
            lport.get_src_addr()
        } else if c.mode == FipMode::Vn2Vn {
            MacAddr::from_fc_id(FIP_VN_FC_MAP, lport.port_id())
        } else if flags & FIP_FL_SPMA != 0 {
            c.ctl_src_addr
        } else {
            // FPMA login: the forwarder assigns the MAC, ours stays zero.
            MacAddr::ZERO
        };
        b.mac_desc(mac);
    }
    Some(b.finish())
}

/// Unwrap a received FIP link-service frame and deliver the inner ELS.
pub(crate) fn recv_els(c: &mut Ctlr, now: Instant, frame: &FipFrame<'_>) {
    let sub = frame.hdr.subcode;
    if sub != FIP_SC_REQ && sub != FIP_SC_REP {
        return;
    }

    let mut granted_mac: Option<MacAddr> = None;
    let mut els: Option<(u8, &[u8])> = None;
    for desc in frame.descriptors() {
        let Ok(desc) = desc else {
            return;
        };
        match desc.dtype {
            FIP_DT_MAC => {
                let Ok(mac) = desc.mac() else {
                    return;
                };
                if !mac.is_valid_unicast() {
                    debug!(%mac, "invalid granted MAC in FIP link-service frame");
                    return;
                }
                granted_mac = Some(mac);
            }
            FIP_DT_FLOGI | FIP_DT_FDISC | FIP_DT_LOGO | FIP_DT_ELP => {
                if els.is_some() {
                    return;
                }
                let Ok(payload) = desc.els_payload() else {
                    return;
                };
                els = Some((desc.dtype, payload));
            }
            other if other < FIP_DT_VENDOR_BASE => {
                debug!(dtype = other, "unexpected descriptor in FIP link-service frame");
                return;
            }
            _ => {}
        }
    }
    let Some((els_dtype, els)) = els else {
        return;
    };
    let (Ok(fh), Ok(els_op)) = (FcHeader::decode(els), els_opcode(els)) else {
        return;
    };

    if els_dtype == FIP_DT_FLOGI
        && sub == FIP_SC_REP
        && c.flogi_oxid == fh.ox_id
        && c.mode != FipMode::Vn2Vn
    {
        if els_op == ELS_LS_ACC && granted_mac.is_some() {
            c.flogi_oxid = FC_XID_UNKNOWN;
        } else if c.fcfs.selection().is_some() {
            // Login rejected: mark this FCF unavailable and fail over to
            // the next candidate (NPV switches answer for several FCFs).
            debug!("fabric login failed, trying next FCF");
            if let Some(fcf) = c.fcfs.selected_mut() {
                fcf.flags &= !FIP_FL_AVAIL;
            }
            c.fcfs.select();
            if let Some(Fcf { fcf_mac, fka_period, .. }) = c.fcfs.selected().cloned() {
                c.dest_addr = fcf_mac;
                c.port_ka_time = now + defaults::PORT_KA_PERIOD;
                c.ctlr_ka_time = now + fka_period;
                c.arm_timer(c.ctlr_ka_time);
            }
        }
    }

    c.stats.rx_frames += 1;
    c.stats.rx_words += (els.len() / FIP_BPW) as u64;
    c.events.push(FcEvent::DeliverEls(ElsDelivery {
        els: els.to_vec(),
        encaps: els_dtype,
        granted_mac,
    }));
}

/// Snoop a non-FIP FC frame for FLOGI traffic while the addressing mode
/// is unsettled. An accepted outstanding FLOGI settles non-FIP mode and
/// yields the FC-MAP-derived granted MAC; an incoming FLOGI request
/// pins the peer's source MAC for point-to-point replies.
pub(crate) fn recv_flogi(
    c: &mut Ctlr,
    frame: &[u8],
    source: MacAddr,
) -> Result<Option<MacAddr>, FipError> {
    let fh = FcHeader::decode(frame)?;
    if fh.fc_type != FC_TYPE_ELS {
        return Ok(None);
    }
    let op = els_opcode(frame)?;
    if op == ELS_LS_ACC && fh.r_ctl == FC_RCTL_ELS_REP && c.flogi_oxid == fh.ox_id {
        if c.state != FipState::Auto && c.state != FipState::NonFip {
            return Err(FipError::WrongState);
        }
        debug!("received FLOGI accept, using non-FIP mode");
        c.state = FipState::NonFip;
        if source == MacAddr::FLOGI {
            c.map_dest_addr();
        } else {
            c.dest_addr = source;
            c.map_dest = false;
        }
        c.flogi_oxid = FC_XID_UNKNOWN;
        return Ok(Some(MacAddr::from_fc_id(FIP_DEF_FC_MAP, fh.d_id)));
    }
    if op == ELS_FLOGI && fh.r_ctl == FC_RCTL_ELS_REQ {
        if c.state == FipState::Auto || c.state == FipState::NonFip {
            if c.state == FipState::Auto {
                debug!("received non-FIP FLOGI, using non-FIP mode");
            }
            c.dest_addr = source;
            c.map_dest = false;
            c.state = FipState::NonFip;
        }
    }
    Ok(None)
}
