//! Ethernet transport seam.

use async_trait::async_trait;

/// The L2 send path and VLAN tag control for one port.
///
/// `send` is fire-and-forget: transmit failures are invisible to the
/// controller, which relies on protocol-level retries instead.
#[async_trait]
pub trait FipTransport: Send + Sync {
    /// Transmit a raw Ethernet frame.
    async fn send(&self, frame: Vec<u8>);

    /// Apply a VLAN tag to subsequent traffic; 0 means untagged.
    /// Returns false if the tag could not be applied.
    async fn set_vlan_tag(&self, vlan_id: u16) -> bool;

    /// A statically configured link VLAN id, if the administrator set
    /// one. A valid static id makes FIP VLAN discovery unnecessary.
    fn static_vlan(&self) -> Option<u16>;

    /// Whether the underlying L2 link is up and carrying traffic.
    fn l2_link_ok(&self) -> bool;
}
