//! Fibre Channel local-port seam.
//!
//! The controller never looks inside ELS payloads beyond the opcode; the
//! FC exchange/login layer behind this trait owns that. Identity getters
//! are synchronous and may be called while the controller lock is held;
//! the async notifications are delivered with the lock released.

use async_trait::async_trait;

use fcoe_proto::MacAddr;

/// An NPIV virtual port logged in through the same physical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VnPort {
    pub port_id: u32,
    pub wwpn: u64,
    pub mac: MacAddr,
}

/// A de-encapsulated ELS frame handed up to the FC layer.
#[derive(Debug, Clone)]
pub struct ElsDelivery {
    /// The inner FC frame, header included.
    pub els: Vec<u8>,
    /// FIP descriptor type the frame arrived under; replies to this
    /// exchange must be sent back with the same encapsulation.
    pub encaps: u8,
    /// Forwarder-granted MAC address, when the frame carried one.
    pub granted_mac: Option<MacAddr>,
}

/// The local Fibre Channel port this controller serves.
#[async_trait]
pub trait FcLport: Send + Sync {
    fn wwnn(&self) -> u64;
    fn wwpn(&self) -> u64;
    /// Assigned FC address; 0 before fabric login completes.
    fn port_id(&self) -> u32;
    /// Maximum FC payload size supported by this port.
    fn mfs(&self) -> u16;
    /// Current data-plane source MAC (granted or derived).
    fn get_src_addr(&self) -> MacAddr;
    /// Logged-in NPIV ports needing their own port keep-alives.
    fn vn_ports(&self) -> Vec<VnPort>;

    async fn link_up(&self);
    async fn link_down(&self);
    /// Drop all logins and restart from fabric login.
    async fn reset(&self);
    /// Adopt a new forwarder-granted data-plane MAC.
    async fn update_mac(&self, mac: MacAddr);
    /// Deliver a received ELS frame to the exchange layer.
    async fn deliver_els(&self, delivery: ElsDelivery);
}
