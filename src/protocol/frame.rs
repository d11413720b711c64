//! Frame assembly and parsing for the region server wire protocol.
//!
//! Every record on the wire after the connection preamble is a frame:
//!
//! ```text
//! ┌────────────┬─────────────────────┬─────────────────────┐
//! │ length     │ header              │ body                │
//! │ 4 bytes BE │ varint-delimited    │ varint-delimited    │
//! │            │ protobuf message    │ serialized request/ │
//! │            │                     │ response            │
//! └────────────┴─────────────────────┴─────────────────────┘
//! ```
//!
//! The length covers everything after itself. Requests carry a
//! [`RequestHeader`], responses a [`ResponseHeader`].

use bytes::Bytes;

use crate::error::{Result, RpcError};

use super::header::{RequestHeader, ResponseHeader};
use super::proto;

/// Magic bytes opening the connection preamble.
const CONNECTION_MAGIC: &[u8; 4] = b"HBas";

/// Wire protocol version byte.
const PROTOCOL_VERSION: u8 = 0;

/// SIMPLE authentication marker in the preamble.
const AUTH_SIMPLE: u8 = 0x50;

/// User reported to the server in the connection header.
const EFFECTIVE_USER: &str = "gopher";

// ConnectionHeader field numbers.
const CONNECTION_USER_INFO: u32 = 1;
const CONNECTION_SERVICE_NAME: u32 = 2;

// UserInformation field numbers.
const USER_EFFECTIVE_USER: u32 = 1;

/// Which server-side service a connection talks to, chosen at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// A region server.
    Region,
    /// The master.
    Master,
}

impl ServiceKind {
    /// Service name announced in the connection preamble.
    pub fn service_name(self) -> &'static str {
        match self {
            ServiceKind::Region => "ClientService",
            ServiceKind::Master => "MasterService",
        }
    }
}

/// Build the connection preamble: magic, version, auth marker, then the
/// length-prefixed connection header naming the user and the service.
/// Written exactly once per connection, before any frame; the server
/// sends nothing back for it.
pub fn hello_frame(kind: ServiceKind) -> Vec<u8> {
    let mut user_info = Vec::new();
    proto::put_string_field(&mut user_info, USER_EFFECTIVE_USER, EFFECTIVE_USER);

    let mut header = Vec::new();
    proto::put_message_field(&mut header, CONNECTION_USER_INFO, &user_info);
    proto::put_string_field(&mut header, CONNECTION_SERVICE_NAME, kind.service_name());

    let mut frame = Vec::with_capacity(6 + 4 + header.len());
    frame.extend_from_slice(CONNECTION_MAGIC);
    frame.push(PROTOCOL_VERSION);
    frame.push(AUTH_SIMPLE);
    frame.extend_from_slice(&(header.len() as u32).to_be_bytes());
    frame.extend_from_slice(&header);
    frame
}

/// Assemble a request frame from its header and serialized body.
pub fn request_frame(header: &RequestHeader, body: &[u8]) -> Vec<u8> {
    let header_bytes = header.encode();
    let total = proto::varint_len(header_bytes.len() as u64)
        + header_bytes.len()
        + proto::varint_len(body.len() as u64)
        + body.len();

    let mut frame = Vec::with_capacity(4 + total);
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    proto::put_len_prefixed(&mut frame, &header_bytes);
    proto::put_len_prefixed(&mut frame, body);
    frame
}

/// Assemble a response frame. The body is omitted entirely when empty.
/// Used by servers and test fixtures; the client only parses responses.
pub fn response_frame(header: &ResponseHeader, body: &[u8]) -> Vec<u8> {
    let header_bytes = header.encode();
    let mut total = proto::varint_len(header_bytes.len() as u64) + header_bytes.len();
    if !body.is_empty() {
        total += proto::varint_len(body.len() as u64) + body.len();
    }

    let mut frame = Vec::with_capacity(4 + total);
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    proto::put_len_prefixed(&mut frame, &header_bytes);
    if !body.is_empty() {
        proto::put_len_prefixed(&mut frame, body);
    }
    frame
}

/// Split a request frame body (everything after the length prefix) into
/// its header and serialized request. The counterpart of
/// [`request_frame`]; used by servers and test fixtures.
pub fn parse_request(frame: Bytes) -> Result<(RequestHeader, Bytes)> {
    let (header_bytes, body) = split_frame(&frame)?;
    Ok((RequestHeader::decode(header_bytes)?, body))
}

/// Split a response frame body (everything after the length prefix) into
/// its header and result payload. An absent body parses as empty.
pub fn parse_response(frame: Bytes) -> Result<(ResponseHeader, Bytes)> {
    let (header_bytes, body) = split_frame(&frame)?;
    Ok((ResponseHeader::decode(header_bytes)?, body))
}

/// Common frame splitting: a varint-delimited header message followed by
/// an optional varint-delimited body, sliced zero-copy out of `frame`.
fn split_frame(frame: &Bytes) -> Result<(&[u8], Bytes)> {
    let mut cursor: &[u8] = frame;
    let header_bytes = proto::read_len_prefixed(&mut cursor)
        .ok_or_else(|| RpcError::Protocol("truncated frame header".to_string()))?;

    let body = if cursor.is_empty() {
        Bytes::new()
    } else {
        let before = cursor.len();
        let body_bytes = proto::read_len_prefixed(&mut cursor)
            .ok_or_else(|| RpcError::Protocol("truncated frame body".to_string()))?;
        let start = frame.len() - before + proto::varint_len(body_bytes.len() as u64);
        frame.slice(start..start + body_bytes.len())
    };

    Ok((header_bytes, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ExceptionResponse;

    #[test]
    fn hello_frame_region_bytes() {
        assert_eq!(
            hello_frame(ServiceKind::Region),
            b"HBas\x00P\x00\x00\x00\x19\n\x08\n\x06gopher\x12\rClientService"
        );
    }

    #[test]
    fn hello_frame_master_bytes() {
        assert_eq!(
            hello_frame(ServiceKind::Master),
            b"HBas\x00P\x00\x00\x00\x19\n\x08\n\x06gopher\x12\rMasterService"
        );
    }

    #[test]
    fn hello_frame_is_35_bytes() {
        assert_eq!(hello_frame(ServiceKind::Region).len(), 35);
        assert_eq!(hello_frame(ServiceKind::Master).len(), 35);
    }

    #[test]
    fn request_frame_overhead() {
        // A 3-byte method name and a single-byte call id cost exactly
        // 15 bytes on top of the payload.
        let payload = b"rpc_0";
        let frame = request_frame(&RequestHeader::new(0, "lol"), payload);
        assert_eq!(frame.len(), 15 + payload.len());
        assert!(frame.ends_with(payload));

        let declared = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, frame.len() - 4);
    }

    #[test]
    fn request_frame_roundtrip() {
        let header = RequestHeader::new(1234, "Scan");
        let frame = request_frame(&header, b"opaque request bytes");
        let (decoded, body) = parse_request(Bytes::from(frame).slice(4..)).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(&body[..], b"opaque request bytes");
    }

    #[test]
    fn response_frame_roundtrip() {
        let header = ResponseHeader {
            call_id: 77,
            exception: None,
        };
        let frame = response_frame(&header, b"result");
        let (decoded, body) = parse_response(Bytes::from(frame).slice(4..)).unwrap();
        assert_eq!(decoded.call_id, 77);
        assert!(decoded.exception.is_none());
        assert_eq!(&body[..], b"result");
    }

    #[test]
    fn response_frame_empty_body() {
        let header = ResponseHeader {
            call_id: 5,
            exception: Some(ExceptionResponse {
                class: "SomeException".to_string(),
                stack_trace: String::new(),
            }),
        };
        let frame = response_frame(&header, b"");
        let (decoded, body) = parse_response(Bytes::from(frame).slice(4..)).unwrap();
        assert_eq!(decoded.call_id, 5);
        assert!(decoded.exception.is_some());
        assert!(body.is_empty());
    }

    #[test]
    fn truncated_response_is_rejected() {
        let frame = response_frame(
            &ResponseHeader {
                call_id: 1,
                exception: None,
            },
            b"result",
        );
        let short = Bytes::from(frame).slice(4..);
        let short = short.slice(..short.len() - 1);
        assert!(parse_response(short).is_err());
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(parse_response(Bytes::new()).is_err());
    }
}
