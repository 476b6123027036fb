//! Minimal Fibre Channel framing: the 24-byte frame header and the ELS
//! opcodes the FIP controller needs to recognize. Full FC frame
//! processing belongs to the layer above; the controller only inspects
//! the header and the first payload byte.

use crate::error::{FipError, FipResult};

/// FC frame header length in bytes.
pub const FC_FRAME_HDR_LEN: usize = crate::constants::FC_FRAME_HDR_LEN;

/// R_CTL values for extended link service frames.
pub const FC_RCTL_ELS_REQ: u8 = 0x22;
pub const FC_RCTL_ELS_REP: u8 = 0x23;

/// TYPE field value for extended link services.
pub const FC_TYPE_ELS: u8 = 0x01;

/// ELS command opcodes (first payload byte).
pub const ELS_LS_RJT: u8 = 0x01;
pub const ELS_LS_ACC: u8 = 0x02;
pub const ELS_FLOGI: u8 = 0x04;
pub const ELS_LOGO: u8 = 0x05;
pub const ELS_FDISC: u8 = 0x51;

/// Decoded FC frame header fields the controller cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FcHeader {
    pub r_ctl: u8,
    pub d_id: u32,
    pub s_id: u32,
    pub fc_type: u8,
    pub ox_id: u16,
}

impl FcHeader {
    /// Decode the header from the start of an FC frame.
    pub fn decode(frame: &[u8]) -> FipResult<FcHeader> {
        if frame.len() < FC_FRAME_HDR_LEN {
            return Err(FipError::Truncated);
        }
        Ok(FcHeader {
            r_ctl: frame[0],
            d_id: be24(&frame[1..4]),
            s_id: be24(&frame[5..8]),
            fc_type: frame[8],
            ox_id: u16::from_be_bytes([frame[16], frame[17]]),
        })
    }
}

fn be24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

/// The ELS opcode of an FC frame, if the payload carries one.
pub fn els_opcode(frame: &[u8]) -> FipResult<u8> {
    if frame.len() < FC_FRAME_HDR_LEN + 1 {
        return Err(FipError::Truncated);
    }
    Ok(frame[FC_FRAME_HDR_LEN])
}
