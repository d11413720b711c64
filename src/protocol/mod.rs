//! Wire protocol: connection preamble, frame layout, header messages.
//!
//! - Minimal protobuf primitives for the header messages
//! - Request/response header encode/decode
//! - Frame assembly (4-byte big-endian length prefix) and parsing

mod frame;
mod header;
mod proto;

pub use frame::{
    hello_frame, parse_request, parse_response, request_frame, response_frame, ServiceKind,
};
pub use header::{ExceptionResponse, RequestHeader, ResponseHeader};
