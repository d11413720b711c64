//! Request and response header messages.
//!
//! Every request frame starts with a `RequestHeader` carrying the call id
//! the server will echo back and the method being invoked; every response
//! frame starts with a `ResponseHeader` carrying that id and, when the
//! call failed server-side, an exception descriptor instead of a result.

use crate::error::{Result, RpcError};

use super::proto;

// RequestHeader field numbers. Field 2 (trace info) is never written.
const REQUEST_CALL_ID: u32 = 1;
const REQUEST_METHOD_NAME: u32 = 3;
const REQUEST_PARAM: u32 = 4;

// ResponseHeader field numbers.
const RESPONSE_CALL_ID: u32 = 1;
const RESPONSE_EXCEPTION: u32 = 2;

// ExceptionResponse field numbers.
const EXCEPTION_CLASS: u32 = 1;
const EXCEPTION_STACK_TRACE: u32 = 2;

/// Header prepended to every outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Correlation id echoed back by the server.
    pub call_id: u32,
    /// Method name, e.g. `"Get"` or `"Mutate"`.
    pub method_name: String,
}

impl RequestHeader {
    /// Create a header for the given call.
    pub fn new(call_id: u32, method_name: &str) -> Self {
        Self {
            call_id,
            method_name: method_name.to_string(),
        }
    }

    /// Encode the header message (without its length delimiter).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.method_name.len());
        proto::put_uint32_field(&mut buf, REQUEST_CALL_ID, self.call_id);
        proto::put_string_field(&mut buf, REQUEST_METHOD_NAME, &self.method_name);
        // A serialized request always follows the header in the frame.
        proto::put_bool_field(&mut buf, REQUEST_PARAM, true);
        buf
    }

    /// Decode a header message. Unknown fields are skipped.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut call_id = 0;
        let mut method_name = String::new();
        while !buf.is_empty() {
            let (field, wire) = proto::read_tag(&mut buf)
                .ok_or_else(|| RpcError::Protocol("truncated request header".to_string()))?;
            match (field, wire) {
                (REQUEST_CALL_ID, proto::WIRE_VARINT) => {
                    call_id = proto::read_varint(&mut buf).ok_or_else(|| {
                        RpcError::Protocol("truncated request call id".to_string())
                    })? as u32;
                }
                (REQUEST_METHOD_NAME, proto::WIRE_LEN) => {
                    let raw = proto::read_len_prefixed(&mut buf).ok_or_else(|| {
                        RpcError::Protocol("truncated request method name".to_string())
                    })?;
                    method_name = std::str::from_utf8(raw)
                        .map_err(|_| {
                            RpcError::Protocol("method name is not valid UTF-8".to_string())
                        })?
                        .to_string();
                }
                _ => {
                    proto::skip_value(&mut buf, wire).ok_or_else(|| {
                        RpcError::Protocol("malformed request header field".to_string())
                    })?;
                }
            }
        }
        Ok(Self {
            call_id,
            method_name,
        })
    }
}

/// Header prepended to every incoming response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Correlation id of the call this response answers.
    pub call_id: u32,
    /// Server-side failure, if the call raised one.
    pub exception: Option<ExceptionResponse>,
}

impl ResponseHeader {
    /// Encode the header message (without its length delimiter).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        proto::put_uint32_field(&mut buf, RESPONSE_CALL_ID, self.call_id);
        if let Some(exception) = &self.exception {
            proto::put_message_field(&mut buf, RESPONSE_EXCEPTION, &exception.encode());
        }
        buf
    }

    /// Decode a header message. Unknown fields are skipped.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut header = ResponseHeader::default();
        while !buf.is_empty() {
            let (field, wire) = proto::read_tag(&mut buf)
                .ok_or_else(|| RpcError::Protocol("truncated response header".to_string()))?;
            match (field, wire) {
                (RESPONSE_CALL_ID, proto::WIRE_VARINT) => {
                    header.call_id = proto::read_varint(&mut buf).ok_or_else(|| {
                        RpcError::Protocol("truncated response call id".to_string())
                    })? as u32;
                }
                (RESPONSE_EXCEPTION, proto::WIRE_LEN) => {
                    let raw = proto::read_len_prefixed(&mut buf).ok_or_else(|| {
                        RpcError::Protocol("truncated response exception".to_string())
                    })?;
                    header.exception = Some(ExceptionResponse::decode(raw)?);
                }
                _ => {
                    proto::skip_value(&mut buf, wire).ok_or_else(|| {
                        RpcError::Protocol("malformed response header field".to_string())
                    })?;
                }
            }
        }
        Ok(header)
    }
}

/// Server-side exception carried in a response header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionResponse {
    /// Java class name of the exception.
    pub class: String,
    /// Stack trace of the exception, if the server included one.
    pub stack_trace: String,
}

impl ExceptionResponse {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        proto::put_string_field(&mut buf, EXCEPTION_CLASS, &self.class);
        proto::put_string_field(&mut buf, EXCEPTION_STACK_TRACE, &self.stack_trace);
        buf
    }

    fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut exception = ExceptionResponse::default();
        while !buf.is_empty() {
            let (field, wire) = proto::read_tag(&mut buf)
                .ok_or_else(|| RpcError::Protocol("truncated exception".to_string()))?;
            match (field, wire) {
                (EXCEPTION_CLASS, proto::WIRE_LEN) => {
                    let raw = proto::read_len_prefixed(&mut buf)
                        .ok_or_else(|| RpcError::Protocol("truncated exception".to_string()))?;
                    exception.class = String::from_utf8_lossy(raw).into_owned();
                }
                (EXCEPTION_STACK_TRACE, proto::WIRE_LEN) => {
                    let raw = proto::read_len_prefixed(&mut buf)
                        .ok_or_else(|| RpcError::Protocol("truncated exception".to_string()))?;
                    exception.stack_trace = String::from_utf8_lossy(raw).into_owned();
                }
                _ => {
                    proto::skip_value(&mut buf, wire).ok_or_else(|| {
                        RpcError::Protocol("malformed exception field".to_string())
                    })?;
                }
            }
        }
        Ok(exception)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_roundtrip() {
        let header = RequestHeader::new(42, "Get");
        let decoded = RequestHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn request_header_known_encoding() {
        // call_id 0, method "lol", request-param marker: 9 bytes.
        let header = RequestHeader::new(0, "lol");
        assert_eq!(
            header.encode(),
            [0x08, 0x00, 0x1a, 0x03, b'l', b'o', b'l', 0x20, 0x01]
        );
    }

    #[test]
    fn response_header_roundtrip_plain() {
        let header = ResponseHeader {
            call_id: 7,
            exception: None,
        };
        let decoded = ResponseHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn response_header_roundtrip_exception() {
        let header = ResponseHeader {
            call_id: u32::MAX,
            exception: Some(ExceptionResponse {
                class: "org.apache.hadoop.hbase.NotServingRegionException".to_string(),
                stack_trace: "at Region.get".to_string(),
            }),
        };
        let decoded = ResponseHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn response_header_skips_unknown_fields() {
        let mut buf = ResponseHeader {
            call_id: 3,
            exception: None,
        }
        .encode();
        // Field 9, length-delimited: something from a newer server.
        super::proto::put_string_field(&mut buf, 9, "future");
        let decoded = ResponseHeader::decode(&buf).unwrap();
        assert_eq!(decoded.call_id, 3);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let buf = ResponseHeader {
            call_id: 300,
            exception: None,
        }
        .encode();
        assert!(ResponseHeader::decode(&buf[..buf.len() - 1]).is_err());
    }
}
