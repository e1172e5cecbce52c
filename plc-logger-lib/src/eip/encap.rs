//! EtherNet/IP encapsulation layer: the 24-byte header and the common
//! packet format items carried by `SendRRData`.

use crate::error::LoggerError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const HEADER_SIZE: usize = 24;

/// Protocol version sent in `RegisterSession`.
const PROTOCOL_VERSION: u16 = 1;

/// CPF item type ids.
const ITEM_NULL_ADDRESS: u16 = 0x0000;
const ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum EncapCommand {
    Nop = 0x0000,
    ListIdentity = 0x0063,
    RegisterSession = 0x0065,
    UnRegisterSession = 0x0066,
    SendRRData = 0x006F,
    SendUnitData = 0x0070,

    #[num_enum(catch_all)]
    Unknown(u16),
}

/// Wire layout of the encapsulation header, little endian.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EncapHeaderRaw {
    pub command: U16,
    /// Length of the data following the header.
    pub length: U16,
    pub session_handle: U32,
    pub status: U32,
    pub sender_context: [u8; 8],
    pub options: U32,
}

/// One encapsulation message.
#[derive(Debug, Clone, PartialEq)]
pub struct EncapFrame {
    pub command: EncapCommand,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: [u8; 8],
    pub data: Bytes,
}

impl EncapFrame {
    pub fn new(command: EncapCommand, session_handle: u32, sender_context: [u8; 8], data: Bytes) -> Self {
        Self {
            command,
            session_handle,
            status: 0,
            sender_context,
            data,
        }
    }

    pub fn encode(&self) -> Result<Bytes, LoggerError> {
        let length = u16::try_from(self.data.len())
            .map_err(|_| LoggerError::Protocol(format!("encapsulated payload too large: {} bytes", self.data.len())))?;
        let header = EncapHeaderRaw {
            command: U16::new(self.command.into()),
            length: U16::new(length),
            session_handle: U32::new(self.session_handle),
            status: U32::new(self.status),
            sender_context: self.sender_context,
            options: U32::new(0),
        };
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data);
        Ok(out.freeze())
    }

    /// Parses the fixed header. Returns it with the announced data length.
    pub fn decode_header(bytes: &[u8]) -> Result<(EncapHeaderRaw, usize), LoggerError> {
        let header = EncapHeaderRaw::read_from_bytes(bytes).map_err(|_| {
            LoggerError::Protocol(format!("encapsulation header must be {} bytes, got {}", HEADER_SIZE, bytes.len()))
        })?;
        let length = usize::from(header.length.get());
        Ok((header, length))
    }

    pub fn from_parts(header: EncapHeaderRaw, data: Bytes) -> Self {
        Self {
            command: EncapCommand::from_primitive(header.command.get()),
            session_handle: header.session_handle.get(),
            status: header.status.get(),
            sender_context: header.sender_context,
            data,
        }
    }
}

/// `RegisterSession` request data.
pub fn register_session_data() -> Bytes {
    let mut out = BytesMut::with_capacity(4);
    out.put_u16_le(PROTOCOL_VERSION);
    out.put_u16_le(0);
    out.freeze()
}

/// `SendRRData` request data wrapping an unconnected CIP message.
pub fn rr_data(cip: &[u8], timeout_secs: u16) -> Result<Bytes, LoggerError> {
    let item_len = u16::try_from(cip.len())
        .map_err(|_| LoggerError::Protocol(format!("CIP message too large: {} bytes", cip.len())))?;
    let mut out = BytesMut::with_capacity(16 + cip.len());
    out.put_u32_le(0); // interface handle: CIP
    out.put_u16_le(timeout_secs);
    out.put_u16_le(2); // item count
    out.put_u16_le(ITEM_NULL_ADDRESS);
    out.put_u16_le(0);
    out.put_u16_le(ITEM_UNCONNECTED_DATA);
    out.put_u16_le(item_len);
    out.extend_from_slice(cip);
    Ok(out.freeze())
}

/// Extracts the unconnected data item from a `SendRRData` reply.
pub fn parse_rr_data(mut data: Bytes) -> Result<Bytes, LoggerError> {
    if data.remaining() < 8 {
        return Err(LoggerError::Protocol("SendRRData reply too short".to_string()));
    }
    let _interface = data.get_u32_le();
    let _timeout = data.get_u16_le();
    let items = data.get_u16_le();

    for _ in 0..items {
        if data.remaining() < 4 {
            return Err(LoggerError::Protocol("truncated CPF item header".to_string()));
        }
        let item_type = data.get_u16_le();
        let item_len = usize::from(data.get_u16_le());
        if data.remaining() < item_len {
            return Err(LoggerError::Protocol(format!(
                "CPF item 0x{:04x} announces {} bytes, {} left",
                item_type,
                item_len,
                data.remaining()
            )));
        }
        let item = data.split_to(item_len);
        if item_type == ITEM_UNCONNECTED_DATA {
            return Ok(item);
        }
    }
    Err(LoggerError::Protocol("SendRRData reply has no unconnected data item".to_string()))
}
