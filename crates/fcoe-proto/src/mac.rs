//! Ethernet MAC addresses and FC name derivation.
//!
//! FCoE derives both data-plane MAC addresses (FC-MAP + FC_ID) and
//! world-wide names (NAA schemes 1 and 2) from 48-bit MACs.

use std::fmt;

use crate::constants::ETH_ALEN;

/// A 48-bit Ethernet MAC address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; ETH_ALEN]);

impl MacAddr {
    /// All-zero address, never valid on the wire.
    pub const ZERO: MacAddr = MacAddr([0; ETH_ALEN]);

    /// All-FCF multicast group (solicitation / VLAN request targets).
    pub const ALL_FCFS: MacAddr = MacAddr([0x01, 0x10, 0x18, 0x01, 0x00, 0x02]);
    /// All-ENode multicast group (advertisements arrive here).
    pub const ALL_ENODES: MacAddr = MacAddr([0x01, 0x10, 0x18, 0x01, 0x00, 0x01]);
    /// All-VN2VN-node multicast group.
    pub const ALL_VN2VN: MacAddr = MacAddr([0x01, 0x10, 0x18, 0x01, 0x00, 0x04]);
    /// All-point-to-point-node multicast group.
    pub const ALL_P2P: MacAddr = MacAddr([0x01, 0x10, 0x18, 0x01, 0x00, 0x05]);

    /// Well-known FLOGI destination MAC (FC-MAP mapped FC_FID_FLOGI).
    pub const FLOGI: MacAddr = MacAddr([0x0e, 0xfc, 0x00, 0xff, 0xff, 0xfe]);

    /// Copy an address out of a wire buffer. `None` unless exactly six
    /// bytes are given.
    pub fn from_slice(b: &[u8]) -> Option<MacAddr> {
        if b.len() != ETH_ALEN {
            return None;
        }
        let mut mac = [0u8; ETH_ALEN];
        mac.copy_from_slice(b);
        Some(MacAddr(mac))
    }

    /// Derive the FCoE data-plane MAC for an FC_ID under an FC-MAP.
    pub fn from_fc_id(fc_map: u32, fc_id: u32) -> MacAddr {
        MacAddr([
            (fc_map >> 16) as u8,
            (fc_map >> 8) as u8,
            fc_map as u8,
            (fc_id >> 16) as u8,
            (fc_id >> 8) as u8,
            fc_id as u8,
        ])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; ETH_ALEN]
    }

    /// Group bit clear?
    pub fn is_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0
    }

    /// Valid as a station address: unicast and not all-zero.
    pub fn is_valid_unicast(&self) -> bool {
        self.is_unicast() && !self.is_zero()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Convert a MAC address to a 64-bit world-wide name.
///
/// `scheme` selects the NAA format: 1 embeds only the MAC, 2 also
/// carries a 12-bit `port` discriminator. Other schemes yield `None`.
pub fn wwn_from_mac(mac: MacAddr, scheme: u32, port: u32) -> Option<u64> {
    let host_mac = mac.0.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let wwn = host_mac | (u64::from(scheme) << 60);
    match scheme {
        1 if port == 0 => Some(wwn),
        2 if port < 0xfff => Some(wwn | (u64::from(port) << 48)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicast_checks() {
        assert!(!MacAddr::ZERO.is_valid_unicast());
        assert!(!MacAddr::ALL_FCFS.is_valid_unicast());
        assert!(MacAddr([0x02, 0, 0, 0, 0, 1]).is_valid_unicast());
    }

    #[test]
    fn test_from_fc_id() {
        let mac = MacAddr::from_fc_id(0x0efc00, 0xfffffe);
        assert_eq!(mac, MacAddr::FLOGI);
    }

    #[test]
    fn test_from_slice_length() {
        assert!(MacAddr::from_slice(&[1, 2, 3]).is_none());
        let mac = MacAddr::from_slice(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(mac.0, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_wwn_from_mac() {
        let mac = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(wwn_from_mac(mac, 1, 0), Some(0x1000_0011_2233_4455));
        assert_eq!(wwn_from_mac(mac, 2, 5), Some(0x2005_0011_2233_4455));
        assert_eq!(wwn_from_mac(mac, 1, 1), None);
        assert_eq!(wwn_from_mac(mac, 3, 0), None);
    }
}
