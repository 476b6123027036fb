//! VN2VN multipoint hooks.
//!
//! Fabric-less VN2VN operation (FC-BB-6 probe/claim/beacon) is not
//! implemented; these entry points keep the mode wired into the state
//! machine and the receive dispatch so the rest of the controller does
//! not special-case it. A port configured for VN2VN parks in
//! `Vn2VnStart` and drops VN2VN frames.

use tracing::debug;

use fcoe_proto::constants::FIP_VN_FC_MAP;
use fcoe_proto::wire::FipFrame;
use fcoe_proto::MacAddr;

use crate::ctlr::{Ctlr, FipState};

/// Enter VN2VN operation at link-up.
pub(crate) fn vn_start(c: &mut Ctlr) {
    c.state = FipState::Vn2VnStart;
    c.map_dest_addr();
    debug!("VN2VN multipoint operation not implemented, staying in start state");
}

/// Handle a received VN2VN frame.
pub(crate) fn vn_recv(_c: &mut Ctlr, frame: &FipFrame<'_>) {
    debug!(
        subcode = frame.hdr.subcode,
        "dropping VN2VN frame, multipoint operation not implemented"
    );
}

/// VN2VN timer work (probe/claim retransmits and beacons).
pub(crate) fn vn_timeout(_c: &mut Ctlr) {}

/// Resolve a peer FC_ID to its VN2VN MAC. With no peer table every
/// destination resolves to the FC-MAP-derived address.
pub(crate) fn vn_lookup(c: &Ctlr, d_id: u32) -> Option<MacAddr> {
    if c.state != FipState::Vn2VnUp {
        return None;
    }
    Some(MacAddr::from_fc_id(FIP_VN_FC_MAP, d_id))
}
