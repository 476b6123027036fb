//! FIP frame encoding and decoding.
//!
//! All multi-byte fields are network byte order; descriptor lengths are
//! counted in 4-byte words and must be non-zero. Decoding fails closed:
//! a descriptor that underruns its own header, overruns the descriptor
//! region, or carries an unknown type below the vendor threshold
//! rejects the whole frame rather than being partially processed.

use crate::constants::*;
use crate::error::{FipError, FipResult};
use crate::mac::MacAddr;

fn be16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn be24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn be64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Ethernet header of a FIP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHeader {
    pub dest: MacAddr,
    pub source: MacAddr,
    pub ethertype: u16,
}

impl EthHeader {
    pub fn decode(frame: &[u8]) -> FipResult<EthHeader> {
        if frame.len() < ETH_HLEN {
            return Err(FipError::Truncated);
        }
        Ok(EthHeader {
            dest: MacAddr::from_slice(&frame[0..6]).ok_or(FipError::InvalidMac)?,
            source: MacAddr::from_slice(&frame[6..12]).ok_or(FipError::InvalidMac)?,
            ethertype: be16(&frame[12..14]),
        })
    }
}

/// FIP header fields, following the Ethernet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FipHeader {
    pub op: u16,
    pub subcode: u8,
    /// Descriptor-region length in 4-byte words.
    pub dl_len: u16,
    pub flags: u16,
}

/// A validated FIP frame borrowing the raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct FipFrame<'a> {
    pub eth: EthHeader,
    pub hdr: FipHeader,
    desc: &'a [u8],
}

impl<'a> FipFrame<'a> {
    /// Parse and validate the framing of a raw Ethernet frame.
    ///
    /// Checks the ethertype, the FIP version nibble, and that the
    /// declared descriptor region fits inside the frame. Trailing pad
    /// bytes beyond the descriptor region are permitted and ignored.
    pub fn parse(frame: &'a [u8]) -> FipResult<FipFrame<'a>> {
        if frame.len() < ETH_HLEN + FIP_HDR_LEN {
            return Err(FipError::Truncated);
        }
        let eth = EthHeader::decode(frame)?;
        if eth.ethertype != ETH_P_FIP {
            return Err(FipError::Version);
        }
        let b = &frame[ETH_HLEN..];
        if b[0] >> 4 != FIP_VER {
            return Err(FipError::Version);
        }
        let hdr = FipHeader {
            op: be16(&b[2..4]),
            subcode: b[5],
            dl_len: be16(&b[6..8]),
            flags: be16(&b[8..10]),
        };
        let rlen = usize::from(hdr.dl_len) * FIP_BPW;
        if FIP_HDR_LEN + rlen > b.len() {
            return Err(FipError::Truncated);
        }
        Ok(FipFrame {
            eth,
            hdr,
            desc: &b[FIP_HDR_LEN..FIP_HDR_LEN + rlen],
        })
    }

    /// Iterate the descriptor TLVs of this frame.
    pub fn descriptors(&self) -> DescIter<'a> {
        DescIter { rest: self.desc }
    }
}

/// One raw TLV descriptor. `data` spans the whole descriptor including
/// its 2-byte type/length header.
#[derive(Debug, Clone, Copy)]
pub struct Desc<'a> {
    pub dtype: u8,
    pub data: &'a [u8],
}

impl<'a> Desc<'a> {
    fn fixed(&self, len: usize) -> FipResult<&'a [u8]> {
        if self.data.len() != len {
            return Err(FipError::DescLength);
        }
        Ok(self.data)
    }

    /// MAC descriptor payload. The address is not validated here;
    /// consumers decide whether zero/multicast is acceptable.
    pub fn mac(&self) -> FipResult<MacAddr> {
        let d = self.fixed(FIP_MAC_DESC_LEN)?;
        MacAddr::from_slice(&d[2..8]).ok_or(FipError::InvalidMac)
    }

    /// Name descriptor payload (64-bit WWN).
    pub fn wwn(&self) -> FipResult<u64> {
        let d = self.fixed(FIP_WWN_DESC_LEN)?;
        Ok(be64(&d[4..12]))
    }

    /// Fabric descriptor payload: (fabric name, virtual fabric id, FC-MAP).
    pub fn fabric(&self) -> FipResult<(u64, u16, u32)> {
        let d = self.fixed(FIP_FAB_DESC_LEN)?;
        Ok((be64(&d[8..16]), be16(&d[2..4]), be24(&d[5..8])))
    }

    /// Keep-alive descriptor payload: (flags, period in milliseconds).
    pub fn fka(&self) -> FipResult<(u8, u32)> {
        let d = self.fixed(FIP_FKA_DESC_LEN)?;
        Ok((d[3], be32(&d[4..8])))
    }

    /// Priority descriptor payload.
    pub fn pri(&self) -> FipResult<u8> {
        let d = self.fixed(FIP_PRI_DESC_LEN)?;
        Ok(d[3])
    }

    /// FCoE-Size descriptor payload.
    pub fn fcoe_size(&self) -> FipResult<u16> {
        let d = self.fixed(FIP_SIZE_DESC_LEN)?;
        Ok(be16(&d[2..4]))
    }

    /// VN_Port identification descriptor payload.
    pub fn vn_id(&self) -> FipResult<VnIdDesc> {
        let d = self.fixed(FIP_VN_DESC_LEN)?;
        Ok(VnIdDesc {
            mac: MacAddr::from_slice(&d[2..8]).ok_or(FipError::InvalidMac)?,
            fc_id: be24(&d[9..12]),
            wwpn: be64(&d[12..20]),
        })
    }

    /// VLAN descriptor payload (vlan id).
    pub fn vlan(&self) -> FipResult<u16> {
        let d = self.fixed(FIP_VLAN_DESC_LEN)?;
        Ok(be16(&d[2..4]))
    }

    /// Encapsulated ELS payload: the FC frame after the 4-byte
    /// encapsulation header. Must hold at least an FC frame header plus
    /// the ELS opcode byte.
    pub fn els_payload(&self) -> FipResult<&'a [u8]> {
        if self.data.len() < FIP_ENCAPS_LEN + FC_FRAME_HDR_LEN + 1 {
            return Err(FipError::DescLength);
        }
        Ok(&self.data[FIP_ENCAPS_LEN..])
    }
}

/// VN_Port identity carried in a VN_ID descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VnIdDesc {
    pub mac: MacAddr,
    pub fc_id: u32,
    pub wwpn: u64,
}

/// Fail-closed iterator over the descriptor region.
///
/// Yields at most one `Err`, after which iteration ends; the caller
/// must then discard the whole frame.
pub struct DescIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for DescIter<'a> {
    type Item = FipResult<Desc<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < 2 {
            self.rest = &[];
            return Some(Err(FipError::Truncated));
        }
        let dlen = usize::from(self.rest[1]) * FIP_BPW;
        if dlen == 0 || dlen > self.rest.len() {
            self.rest = &[];
            return Some(Err(FipError::DescBounds));
        }
        let (data, rest) = self.rest.split_at(dlen);
        self.rest = rest;
        Some(Ok(Desc {
            dtype: data[0],
            data,
        }))
    }
}

/// Builds a FIP frame: Ethernet header, FIP header, then descriptors.
/// The descriptor-region length is patched in [`FrameBuilder::finish`].
pub struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(dest: MacAddr, source: MacAddr, op: u16, subcode: u8, flags: u16) -> FrameBuilder {
        let mut buf = Vec::with_capacity(ETH_HLEN + FIP_HDR_LEN + 64);
        buf.extend_from_slice(&dest.0);
        buf.extend_from_slice(&source.0);
        buf.extend_from_slice(&ETH_P_FIP.to_be_bytes());
        buf.push(FIP_VER << 4);
        buf.push(0);
        buf.extend_from_slice(&op.to_be_bytes());
        buf.push(0);
        buf.push(subcode);
        buf.extend_from_slice(&0u16.to_be_bytes()); // dl_len, patched later
        buf.extend_from_slice(&flags.to_be_bytes());
        FrameBuilder { buf }
    }

    fn desc_hdr(&mut self, dtype: u8, bytes: usize) {
        self.buf.push(dtype);
        self.buf.push((bytes / FIP_BPW) as u8);
    }

    pub fn mac_desc(&mut self, mac: MacAddr) {
        self.desc_hdr(FIP_DT_MAC, FIP_MAC_DESC_LEN);
        self.buf.extend_from_slice(&mac.0);
    }

    /// Name descriptor; `dtype` distinguishes switch/node name uses.
    pub fn wwn_desc(&mut self, dtype: u8, wwn: u64) {
        self.desc_hdr(dtype, FIP_WWN_DESC_LEN);
        self.buf.extend_from_slice(&[0, 0]);
        self.buf.extend_from_slice(&wwn.to_be_bytes());
    }

    pub fn fabric_desc(&mut self, fabric_name: u64, vfid: u16, fc_map: u32) {
        self.desc_hdr(FIP_DT_FAB, FIP_FAB_DESC_LEN);
        self.buf.extend_from_slice(&vfid.to_be_bytes());
        self.buf.push(0);
        self.buf
            .extend_from_slice(&[(fc_map >> 16) as u8, (fc_map >> 8) as u8, fc_map as u8]);
        self.buf.extend_from_slice(&fabric_name.to_be_bytes());
    }

    pub fn fka_desc(&mut self, flags: u8, period_ms: u32) {
        self.desc_hdr(FIP_DT_FKA, FIP_FKA_DESC_LEN);
        self.buf.push(0);
        self.buf.push(flags);
        self.buf.extend_from_slice(&period_ms.to_be_bytes());
    }

    pub fn pri_desc(&mut self, pri: u8) {
        self.desc_hdr(FIP_DT_PRI, FIP_PRI_DESC_LEN);
        self.buf.push(0);
        self.buf.push(pri);
    }

    pub fn fcoe_size_desc(&mut self, size: u16) {
        self.desc_hdr(FIP_DT_FCOE_SIZE, FIP_SIZE_DESC_LEN);
        self.buf.extend_from_slice(&size.to_be_bytes());
    }

    pub fn vn_id_desc(&mut self, mac: MacAddr, fc_id: u32, wwpn: u64) {
        self.desc_hdr(FIP_DT_VN_ID, FIP_VN_DESC_LEN);
        self.buf.extend_from_slice(&mac.0);
        self.buf.push(0);
        self.buf
            .extend_from_slice(&[(fc_id >> 16) as u8, (fc_id >> 8) as u8, fc_id as u8]);
        self.buf.extend_from_slice(&wwpn.to_be_bytes());
    }

    pub fn vlan_desc(&mut self, vlan_id: u16) {
        self.desc_hdr(FIP_DT_VLAN, FIP_VLAN_DESC_LEN);
        self.buf.extend_from_slice(&vlan_id.to_be_bytes());
    }

    /// ELS encapsulation descriptor wrapping a complete FC frame.
    /// `els.len()` must be a multiple of 4; the caller checks.
    pub fn encaps_desc(&mut self, dtype: u8, els: &[u8]) {
        self.desc_hdr(dtype, FIP_ENCAPS_LEN + els.len());
        self.buf.extend_from_slice(&[0, 0]);
        self.buf.extend_from_slice(els);
    }

    /// Finish the frame, patching the descriptor-region length.
    pub fn finish(mut self) -> Vec<u8> {
        let dl_len = ((self.buf.len() - ETH_HLEN - FIP_HDR_LEN) / FIP_BPW) as u16;
        self.buf[ETH_HLEN + 6..ETH_HLEN + 8].copy_from_slice(&dl_len.to_be_bytes());
        self.buf
    }
}
