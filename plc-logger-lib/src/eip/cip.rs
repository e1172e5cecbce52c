//! CIP message encoding for Logix tag reads: symbolic tag paths, Read Tag,
//! Multiple Service Packet and Unconnected Send, plus reply decoding.

use crate::error::LoggerError;
use crate::tag::TagValue;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use std::ops::Range;

pub const SERVICE_READ_TAG: u8 = 0x4C;
pub const SERVICE_MULTIPLE: u8 = 0x0A;
pub const SERVICE_UNCONNECTED_SEND: u8 = 0x52;
const REPLY_FLAG: u8 = 0x80;

/// Class 0x02 (Message Router), instance 1.
const MESSAGE_ROUTER_PATH: [u8; 4] = [0x20, 0x02, 0x24, 0x01];
/// Class 0x06 (Connection Manager), instance 1.
const CONNECTION_MANAGER_PATH: [u8; 4] = [0x20, 0x06, 0x24, 0x01];
/// Backplane port.
const BACKPLANE_PORT: u8 = 0x01;
const PRIORITY_TIME_TICK: u8 = 0x0A;
const TIMEOUT_TICKS: u8 = 0x0E;

/// Largest message a Logix processor accepts over unconnected messaging.
pub const MAX_UNCONNECTED_SIZE: usize = 504;

/// Service, path size, Message Router path and count field.
const MULTIPLE_REQUEST_OVERHEAD: usize = 2 + MESSAGE_ROUTER_PATH.len() + 2;
/// Service, reserved, status, extended status size and count field.
const MULTIPLE_REPLY_OVERHEAD: usize = 4 + 2;
/// Reply header, type code and the widest atomic value.
const MAX_SCALAR_REPLY: usize = 4 + 2 + 8;

const SEGMENT_SYMBOLIC: u8 = 0x91;
const SEGMENT_ELEMENT_8: u8 = 0x28;
const SEGMENT_ELEMENT_16: u8 = 0x29;
const SEGMENT_ELEMENT_32: u8 = 0x2A;

/// Atomic data type codes returned in Read Tag replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum CipType {
    Bool = 0x00C1,
    Sint = 0x00C2,
    Int = 0x00C3,
    Dint = 0x00C4,
    Lint = 0x00C5,
    Usint = 0x00C6,
    Uint = 0x00C7,
    Udint = 0x00C8,
    Ulint = 0x00C9,
    Real = 0x00CA,
    Lreal = 0x00CB,
    Dword = 0x00D3,
    Struct = 0x02A0,

    #[num_enum(catch_all)]
    Unknown(u16),
}

impl CipType {
    fn element_size(self) -> Option<usize> {
        match self {
            CipType::Bool | CipType::Sint | CipType::Usint => Some(1),
            CipType::Int | CipType::Uint => Some(2),
            CipType::Dint | CipType::Udint | CipType::Real | CipType::Dword => Some(4),
            CipType::Lint | CipType::Ulint | CipType::Lreal => Some(8),
            CipType::Struct | CipType::Unknown(_) => None,
        }
    }
}

/// CIP general status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum GeneralStatus {
    Success = 0x00,
    ConnectionFailure = 0x01,
    ResourceUnavailable = 0x02,
    PathSegmentError = 0x04,
    PathDestinationUnknown = 0x05,
    PartialTransfer = 0x06,
    ServiceNotSupported = 0x08,
    AttributeNotSupported = 0x14,
    NotEnoughData = 0x13,
    TooMuchData = 0x15,
    EmbeddedServiceError = 0x1E,
    GeneralError = 0x1F,
    PathSizeInvalid = 0x26,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl fmt::Display for GeneralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GeneralStatus::Success => "Success",
            GeneralStatus::ConnectionFailure => "Connection failure",
            GeneralStatus::ResourceUnavailable => "Resource unavailable",
            GeneralStatus::PathSegmentError => "Path segment error",
            GeneralStatus::PathDestinationUnknown => "Path destination unknown",
            GeneralStatus::PartialTransfer => "Partial transfer",
            GeneralStatus::ServiceNotSupported => "Service not supported",
            GeneralStatus::AttributeNotSupported => "Attribute not supported",
            GeneralStatus::NotEnoughData => "Not enough data",
            GeneralStatus::TooMuchData => "Too much data",
            GeneralStatus::EmbeddedServiceError => "Embedded service error",
            GeneralStatus::GeneralError => "General error",
            GeneralStatus::PathSizeInvalid => "Path size invalid",
            GeneralStatus::Unknown(code) => return write!(f, "Unknown status 0x{:02x}", code),
        };
        f.write_str(text)
    }
}

/// Encodes a Logix tag name (`Program:Main.Recipe[2].Name`) as a padded
/// EPATH of symbolic and element segments.
pub fn encode_tag_path(tag: &str) -> Result<Vec<u8>, LoggerError> {
    let invalid = |why: &str| LoggerError::tag_read(tag, format!("invalid tag name: {}", why));
    let mut path = Vec::with_capacity(tag.len() + 8);

    for member in tag.split('.') {
        let (name, indices) = match member.find('[') {
            Some(open) => {
                let close = member.rfind(']').filter(|&c| c > open).ok_or_else(|| invalid("unbalanced '['"))?;
                if close != member.len() - 1 {
                    return Err(invalid("text after ']'"));
                }
                (&member[..open], Some(&member[open + 1..close]))
            }
            None => (member, None),
        };
        if name.is_empty() {
            return Err(invalid("empty member"));
        }
        let len = u8::try_from(name.len()).map_err(|_| invalid("member longer than 255 bytes"))?;
        path.push(SEGMENT_SYMBOLIC);
        path.push(len);
        path.extend_from_slice(name.as_bytes());
        if name.len() % 2 == 1 {
            path.push(0);
        }

        if let Some(indices) = indices {
            for index in indices.split(',') {
                let index: u32 = index.trim().parse().map_err(|_| invalid("non-numeric array index"))?;
                if let Ok(small) = u8::try_from(index) {
                    path.extend_from_slice(&[SEGMENT_ELEMENT_8, small]);
                } else if let Ok(mid) = u16::try_from(index) {
                    path.extend_from_slice(&[SEGMENT_ELEMENT_16, 0]);
                    path.extend_from_slice(&mid.to_le_bytes());
                } else {
                    path.extend_from_slice(&[SEGMENT_ELEMENT_32, 0]);
                    path.extend_from_slice(&index.to_le_bytes());
                }
            }
        }
    }
    if path.len() / 2 > usize::from(u8::MAX) {
        return Err(invalid("path too long"));
    }
    Ok(path)
}

/// Read Tag service request for `count` elements.
pub fn read_tag_request(tag: &str, count: u16) -> Result<Bytes, LoggerError> {
    let path = encode_tag_path(tag)?;
    let mut out = BytesMut::with_capacity(4 + path.len());
    out.put_u8(SERVICE_READ_TAG);
    out.put_u8((path.len() / 2) as u8);
    out.extend_from_slice(&path);
    out.put_u16_le(count);
    Ok(out.freeze())
}

/// Bundles several requests into one Multiple Service Packet addressed to
/// the Message Router.
pub fn multiple_service_request(requests: &[Bytes]) -> Result<Bytes, LoggerError> {
    let count = u16::try_from(requests.len())
        .map_err(|_| LoggerError::Protocol("too many requests in one packet".to_string()))?;
    let mut out = BytesMut::new();
    out.put_u8(SERVICE_MULTIPLE);
    out.put_u8((MESSAGE_ROUTER_PATH.len() / 2) as u8);
    out.extend_from_slice(&MESSAGE_ROUTER_PATH);
    out.put_u16_le(count);

    // Offsets are relative to the count field.
    let mut offset = 2 + 2 * requests.len();
    for request in requests {
        let value = u16::try_from(offset)
            .map_err(|_| LoggerError::Protocol("multiple service packet too large".to_string()))?;
        out.put_u16_le(value);
        offset += request.len();
    }
    for request in requests {
        out.extend_from_slice(request);
    }
    Ok(out.freeze())
}

/// Splits `requests` into consecutive runs whose Multiple Service Packet,
/// and the single-element scalar replies it asks for, both fit in `limit`
/// bytes. A request too large to share a packet gets a run of its own.
pub fn pack_requests(requests: &[Bytes], limit: usize) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut request_size = MULTIPLE_REQUEST_OVERHEAD;
    let mut reply_size = MULTIPLE_REPLY_OVERHEAD;

    for (i, request) in requests.iter().enumerate() {
        let request_cost = 2 + request.len();
        let reply_cost = 2 + MAX_SCALAR_REPLY;
        if i > start && (request_size + request_cost > limit || reply_size + reply_cost > limit) {
            runs.push(start..i);
            start = i;
            request_size = MULTIPLE_REQUEST_OVERHEAD;
            reply_size = MULTIPLE_REPLY_OVERHEAD;
        }
        request_size += request_cost;
        reply_size += reply_cost;
    }
    if start < requests.len() {
        runs.push(start..requests.len());
    }
    runs
}

/// Routes `embedded` through the Connection Manager to the processor in
/// backplane `slot`.
pub fn unconnected_send(embedded: &[u8], slot: u8) -> Result<Bytes, LoggerError> {
    let size = u16::try_from(embedded.len())
        .map_err(|_| LoggerError::Protocol("embedded request too large".to_string()))?;
    let mut out = BytesMut::with_capacity(16 + embedded.len());
    out.put_u8(SERVICE_UNCONNECTED_SEND);
    out.put_u8((CONNECTION_MANAGER_PATH.len() / 2) as u8);
    out.extend_from_slice(&CONNECTION_MANAGER_PATH);
    out.put_u8(PRIORITY_TIME_TICK);
    out.put_u8(TIMEOUT_TICKS);
    out.put_u16_le(size);
    out.extend_from_slice(embedded);
    if embedded.len() % 2 == 1 {
        out.put_u8(0);
    }
    out.put_u8(1); // route path size in words
    out.put_u8(0); // reserved
    out.put_u8(BACKPLANE_PORT);
    out.put_u8(slot);
    Ok(out.freeze())
}

/// A decoded CIP reply header with its service data.
#[derive(Debug, Clone, PartialEq)]
pub struct CipReply {
    pub service: u8,
    pub status: GeneralStatus,
    pub extended_status: Vec<u16>,
    pub data: Bytes,
}

impl CipReply {
    pub fn parse(mut bytes: Bytes) -> Result<Self, LoggerError> {
        if bytes.remaining() < 4 {
            return Err(LoggerError::Protocol(format!("CIP reply too short: {} bytes", bytes.len())));
        }
        let service = bytes.get_u8();
        if service & REPLY_FLAG == 0 {
            return Err(LoggerError::Protocol(format!("service 0x{:02x} is not a reply", service)));
        }
        let _reserved = bytes.get_u8();
        let status = GeneralStatus::from_primitive(bytes.get_u8());
        let words = usize::from(bytes.get_u8());
        if bytes.remaining() < words * 2 {
            return Err(LoggerError::Protocol("truncated extended status".to_string()));
        }
        let extended_status = (0..words).map(|_| bytes.get_u16_le()).collect();
        Ok(Self {
            service: service & !REPLY_FLAG,
            status,
            extended_status,
            data: bytes,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == GeneralStatus::Success
    }

    /// Status text, including extended status words when present.
    pub fn status_text(&self) -> String {
        if self.extended_status.is_empty() {
            self.status.to_string()
        } else {
            let ext: Vec<String> = self.extended_status.iter().map(|w| format!("0x{:04x}", w)).collect();
            format!("{} ({})", self.status, ext.join(", "))
        }
    }
}

/// Splits a Multiple Service Packet reply into its embedded replies.
pub fn parse_multiple_reply(data: &Bytes) -> Result<Vec<CipReply>, LoggerError> {
    let mut cursor = data.clone();
    if cursor.remaining() < 2 {
        return Err(LoggerError::Protocol("multiple service reply too short".to_string()));
    }
    let count = usize::from(cursor.get_u16_le());
    if cursor.remaining() < count * 2 {
        return Err(LoggerError::Protocol("truncated multiple service offsets".to_string()));
    }
    let offsets: Vec<usize> = (0..count).map(|_| usize::from(cursor.get_u16_le())).collect();

    let mut replies = Vec::with_capacity(count);
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        if start > end || end > data.len() {
            return Err(LoggerError::Protocol(format!("bad reply offset {} in multiple service reply", start)));
        }
        replies.push(CipReply::parse(data.slice(start..end))?);
    }
    Ok(replies)
}

fn split_type(data: &Bytes) -> Result<(CipType, Bytes), String> {
    let mut cursor = data.clone();
    if cursor.remaining() < 2 {
        return Err("reply carries no data type".to_string());
    }
    let ty = CipType::from_primitive(cursor.get_u16_le());
    if ty == CipType::Struct {
        if cursor.remaining() < 2 {
            return Err("structure reply carries no handle".to_string());
        }
        let _handle = cursor.get_u16_le();
    }
    Ok((ty, cursor))
}

/// Decodes the first element of a Read Tag reply. Errors are reported as
/// status text for the tag.
pub fn decode_value(data: &Bytes) -> Result<TagValue, String> {
    let (ty, mut body) = split_type(data)?;
    let size = ty
        .element_size()
        .ok_or_else(|| format!("unsupported data type {:?}", ty))?;
    if body.remaining() < size {
        return Err(format!("{:?} value truncated", ty));
    }
    let value = match ty {
        CipType::Bool => TagValue::Bool(body.get_u8() != 0),
        CipType::Sint => TagValue::Int(i64::from(body.get_i8())),
        CipType::Int => TagValue::Int(i64::from(body.get_i16_le())),
        CipType::Dint => TagValue::Int(i64::from(body.get_i32_le())),
        CipType::Lint => TagValue::Int(body.get_i64_le()),
        CipType::Usint => TagValue::Int(i64::from(body.get_u8())),
        CipType::Uint => TagValue::Int(i64::from(body.get_u16_le())),
        CipType::Udint | CipType::Dword => TagValue::Int(i64::from(body.get_u32_le())),
        CipType::Ulint => {
            let raw = body.get_u64_le();
            i64::try_from(raw).map(TagValue::Int).unwrap_or(TagValue::Real(raw as f64))
        }
        CipType::Real => TagValue::Real(f64::from(body.get_f32_le())),
        CipType::Lreal => TagValue::Real(body.get_f64_le()),
        CipType::Struct | CipType::Unknown(_) => return Err(format!("unsupported data type {:?}", ty)),
    };
    Ok(value)
}

/// Decodes a Read Tag reply of byte-sized elements.
pub fn decode_bytes(data: &Bytes, count: usize) -> Result<Vec<u8>, String> {
    let (ty, body) = split_type(data)?;
    if ty.element_size() != Some(1) {
        return Err(format!("expected byte elements, got {:?}", ty));
    }
    if body.len() < count {
        return Err(format!("expected {} bytes, got {}", count, body.len()));
    }
    Ok(body[..count].to_vec())
}
