//! Request parser: turns a framed header block into a [`RequestHeader`].
//!
//! The framer guarantees the block is complete (terminator included), so the
//! parser never sees partial input. Failure modes are kept distinct because
//! they map to different wire responses:
//!
//! - not valid UTF-8 → [`ParseError::InvalidEncoding`] (400)
//! - tokenizer rejects the block → [`ParseError::InvalidHeader`] (400)
//! - version the engine does not speak → [`ParseError::UnsupportedVersion`] (505)

use std::mem::MaybeUninit;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Request};
use httparse::{Error, Status};

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
pub(crate) const MAX_HEADER_NUM: usize = 64;

/// Parses complete header blocks produced by the framer.
#[derive(Debug, Default)]
pub struct RequestParser;

impl RequestParser {
    pub fn new() -> Self {
        Default::default()
    }

    /// Parses one header block into a typed header plus the body size the
    /// headers announce.
    pub fn parse(&self, block: &Bytes) -> Result<(RequestHeader, PayloadSize), ParseError> {
        // decode failure is reported distinctly and never reaches the pipeline
        ensure!(std::str::from_utf8(block).is_ok(), ParseError::InvalidEncoding);

        let mut req = httparse::Request::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header>; MAX_HEADER_NUM] = [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];

        let parsed = req.parse_with_uninit_headers(block, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            Error::Version => version_error(block),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        match parsed {
            Status::Complete(_) => {}
            // unreachable with a framed block, but never panic on a protocol path
            Status::Partial => return Err(ParseError::invalid_header("truncated header block")),
        }

        let header_count = req.headers.len();
        ensure!(header_count <= MAX_HEADER_NUM, ParseError::too_many_headers(header_count));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            // HTTP/2 and HTTP/3 are not spoken here
            _ => return Err(ParseError::UnsupportedVersion),
        };

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);

        let header_map = builder.headers_mut().ok_or_else(|| ParseError::invalid_header("invalid request line"))?;
        header_map.reserve(header_count);

        for parsed_header in &req.headers[..header_count] {
            let name =
                HeaderName::from_bytes(parsed_header.name.as_bytes()).map_err(|e| ParseError::invalid_header(e.to_string()))?;
            let value = HeaderValue::from_bytes(parsed_header.value).map_err(|e| ParseError::invalid_header(e.to_string()))?;
            header_map.append(name, value);
        }

        let header =
            RequestHeader::from(builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?);
        let payload_size = parse_payload(&header)?;

        Ok((header, payload_size))
    }
}

/// The tokenizer reports `Version` for any request line whose last token is
/// not `HTTP/1.x`, including plain garbage. Only a line that actually names
/// an `HTTP/` version deserves a 505; everything else is a 400.
fn version_error(block: &[u8]) -> ParseError {
    let line_end = block.iter().position(|&b| b == b'\r' || b == b'\n').unwrap_or(block.len());
    let version_token = block[..line_end].rsplit(|&b| b == b' ').next().unwrap_or(&[]);
    if version_token.starts_with(b"HTTP/") {
        ParseError::UnsupportedVersion
    } else {
        ParseError::invalid_header("malformed request line")
    }
}

/// Determines the announced body size from `Content-Length` /
/// `Transfer-Encoding` (RFC 9112 §6), for any method: a DELETE carrying
/// `Content-Length` still has that many body bytes on the wire, and ignoring
/// them would desync the framing for the next request. Chunked request
/// bodies are out of scope for this engine and rejected outright.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(_), None) => Err(ParseError::ChunkedUnsupported),

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length =
                cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            if length == 0 {
                Ok(PayloadSize::Empty)
            } else {
                Ok(PayloadSize::Length(length))
            }
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}
