//! # fcoe-ctlr
//!
//! The FIP controller: discovers Fibre-Channel-over-Ethernet Forwarders
//! (FCFs), selects one, and maintains the virtual link to it with
//! keep-alives. ELS login traffic (FLOGI/FDISC/LOGO) is FIP-encapsulated
//! while a forwarder is in use, with a legacy point-to-point fallback
//! when no FIP-capable device answers.
//!
//! One [`FcoeCtlr`] instance exists per initiator port. It owns two
//! background tasks: a timer task that only computes deadlines and flags
//! work, and a work task that drains the received-frame queue and does
//! all frame building and upward notification. All mutable state sits
//! behind a single lock; collaborators are injected through the
//! [`FipTransport`] and [`FcLport`] trait objects.

pub mod ctlr;
pub mod fcf;
pub mod lport;
pub mod transport;

mod els;
mod recv;
mod vlan;
mod vn2vn;

pub use ctlr::{CtlrConfig, CtlrStats, FcoeCtlr, FipMode, FipState};
pub use els::ElsSendOutcome;
pub use fcf::{Fcf, FcfKey};
pub use lport::{ElsDelivery, FcLport, VnPort};
pub use transport::FipTransport;
