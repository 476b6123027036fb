/// FIP wire protocol constants (FC-BB-5).

/// Ethertype of FIP frames.
pub const ETH_P_FIP: u16 = 0x8914;

/// Ethernet header length.
pub const ETH_HLEN: usize = 14;
/// Ethernet address length.
pub const ETH_ALEN: usize = 6;

/// FIP protocol version, carried in the high nibble of the first header byte.
pub const FIP_VER: u8 = 1;
/// Bytes per descriptor-length word.
pub const FIP_BPW: usize = 4;
/// FIP header length, following the Ethernet header.
pub const FIP_HDR_LEN: usize = 10;

/// FIP operation codes
pub const FIP_OP_DISC: u16 = 1;
pub const FIP_OP_LS: u16 = 2;
pub const FIP_OP_CTRL: u16 = 3;
pub const FIP_OP_VLAN: u16 = 4;
pub const FIP_OP_VN2VN: u16 = 5;

/// Discovery subcodes
pub const FIP_SC_SOL: u8 = 1;
pub const FIP_SC_ADV: u8 = 2;

/// Link service subcodes
pub const FIP_SC_REQ: u8 = 1;
pub const FIP_SC_REP: u8 = 2;

/// Control subcodes
pub const FIP_SC_KEEP_ALIVE: u8 = 1;
pub const FIP_SC_CLR_VLINK: u8 = 2;

/// VLAN discovery subcodes
pub const FIP_SC_VL_REQ: u8 = 1;
pub const FIP_SC_VL_NOTE: u8 = 2;

/// Descriptor type codes
pub const FIP_DT_PRI: u8 = 1;
pub const FIP_DT_MAC: u8 = 2;
pub const FIP_DT_MAP_OUI: u8 = 3;
pub const FIP_DT_NAME: u8 = 4;
pub const FIP_DT_FAB: u8 = 5;
pub const FIP_DT_FCOE_SIZE: u8 = 6;
pub const FIP_DT_FLOGI: u8 = 7;
pub const FIP_DT_FDISC: u8 = 8;
pub const FIP_DT_LOGO: u8 = 9;
pub const FIP_DT_ELP: u8 = 10;
pub const FIP_DT_VN_ID: u8 = 11;
pub const FIP_DT_FKA: u8 = 12;
pub const FIP_DT_VENDOR: u8 = 13;
pub const FIP_DT_VLAN: u8 = 14;
/// Unknown descriptor types at or above this are skipped; below it they
/// reject the whole frame.
pub const FIP_DT_VENDOR_BASE: u8 = 128;

/// FIP header flags
pub const FIP_FL_FPMA: u16 = 0x8000;
pub const FIP_FL_SPMA: u16 = 0x4000;
pub const FIP_FL_AVAIL: u16 = 0x0004;
pub const FIP_FL_SOL: u16 = 0x0002;
pub const FIP_FL_FPORT: u16 = 0x0001;

/// FKA descriptor flag: the FCF asks that keep-alives not be sent (D-bit).
pub const FIP_FKA_ADV_D: u8 = 0x01;

/// Descriptor sizes, in bytes (including the 2-byte type/length header)
pub const FIP_MAC_DESC_LEN: usize = 8;
pub const FIP_WWN_DESC_LEN: usize = 12;
pub const FIP_FAB_DESC_LEN: usize = 16;
pub const FIP_FKA_DESC_LEN: usize = 8;
pub const FIP_PRI_DESC_LEN: usize = 4;
pub const FIP_SIZE_DESC_LEN: usize = 4;
pub const FIP_VN_DESC_LEN: usize = 20;
pub const FIP_VLAN_DESC_LEN: usize = 4;
/// ELS encapsulation descriptor header, preceding the FC frame.
pub const FIP_ENCAPS_LEN: usize = 4;

/// Default FIP priority when an advertisement omits the descriptor.
pub const FIP_DEF_PRI: u8 = 128;

/// Default FC-MAP for fabric-provided MAC addresses.
pub const FIP_DEF_FC_MAP: u32 = 0x0e_fc00;
/// FC-MAP used for VN2VN assigned MAC addresses.
pub const FIP_VN_FC_MAP: u32 = 0x0e_fd00;

/// Well-known FC_ID for fabric login.
pub const FC_FID_FLOGI: u32 = 0xff_fffe;
/// Sentinel exchange id: no fabric login outstanding.
pub const FC_XID_UNKNOWN: u16 = 0xffff;

/// Highest valid 802.1Q VLAN id.
pub const VLAN_VID_MASK: u16 = 0x0fff;
/// VLAN id sentinel: FIP VLAN discovery is disabled for this port.
pub const VLAN_DISCOVERY_DISABLED: u16 = 0xffff;

/// FCoE framing overhead added to the FC payload for the FCoE-Size
/// descriptor: FC frame header, FCoE header, and CRC/EOF trailer.
pub const FC_FRAME_HDR_LEN: usize = 24;
pub const FCOE_HDR_LEN: usize = 14;
pub const FCOE_CRC_EOF_LEN: usize = 8;
