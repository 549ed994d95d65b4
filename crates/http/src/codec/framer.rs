//! Connection framer: detects the end-of-headers boundary on a raw byte
//! stream and yields the header block as one unit.
//!
//! The framer is deliberately dumb: it knows nothing about request lines or
//! header fields, only about the `\r\n\r\n` terminator (a bare `\n\n` is
//! tolerated for sloppy clients). Everything after the terminator stays in
//! the read buffer: that tail is the body source, and once the body has been
//! consumed the framer resumes scanning for the next pipelined request on the
//! same connection.
//!
//! Boundary detection is an explicit five-state machine:
//!
//! ```text
//! NotYet --\r--> SeenCr --\n--> SeenEol --\r--> SeenEolCr --\n--> done
//!    \------------\n------------/  \----------\n-----------------/
//! ```
//!
//! Any byte that breaks the expected sequence resets the scan to `NotYet`
//! (with `\r` re-entering `SeenCr` directly, so `\r\r\n\r\n` still frames).

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::ParseError;

/// Maximum size in bytes allowed for the entire header block
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    NotYet,
    SeenCr,
    SeenEol,
    SeenEolCr,
}

/// A [`Decoder`] yielding raw header blocks, terminator included.
#[derive(Debug)]
pub struct HeaderFramer {
    state: ScanState,
    /// Bytes of `src` already scanned; avoids rescanning on partial reads.
    scanned: usize,
}

impl HeaderFramer {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for HeaderFramer {
    fn default() -> Self {
        Self { state: ScanState::NotYet, scanned: 0 }
    }
}

impl Decoder for HeaderFramer {
    type Item = Bytes;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        use ScanState::*;

        while self.scanned < src.len() {
            let byte = src[self.scanned];
            self.scanned += 1;

            let terminated = match (self.state, byte) {
                (SeenEol, b'\n') | (SeenEolCr, b'\n') => true,
                _ => {
                    self.state = match (self.state, byte) {
                        (NotYet, b'\r') | (SeenEolCr, b'\r') => SeenCr,
                        (NotYet, b'\n') => SeenEol,
                        (SeenCr, b'\n') => SeenEol,
                        (SeenCr, b'\r') => SeenCr,
                        (SeenEol, b'\r') => SeenEolCr,
                        _ => NotYet,
                    };
                    false
                }
            };

            if terminated {
                let block = src.split_to(self.scanned).freeze();
                trace!(header_bytes = block.len(), "framed header block");
                self.state = NotYet;
                self.scanned = 0;
                ensure!(block.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(block.len(), MAX_HEADER_BYTES));
                return Ok(Some(block));
            }
        }

        // still incomplete: refuse to buffer unbounded garbage
        ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(input: &[u8]) -> (Vec<Bytes>, BytesMut) {
        let mut framer = HeaderFramer::new();
        let mut buf = BytesMut::from(input);
        let mut blocks = Vec::new();
        while let Some(block) = framer.decode(&mut buf).unwrap() {
            blocks.push(block);
        }
        (blocks, buf)
    }

    #[test]
    fn frames_single_header_block() {
        let (blocks, rest) = frame_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(&blocks[0][..], b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(rest.is_empty());
    }

    #[test]
    fn terminator_bytes_are_included_and_tail_is_left() {
        let (blocks, rest) = frame_all(b"POST /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].ends_with(b"\r\n\r\n"));
        assert_eq!(&rest[..], b"abc");
    }

    #[test]
    fn tolerates_bare_lf_terminator() {
        let (blocks, rest) = frame_all(b"GET / HTTP/1.1\nHost: a\n\n");
        assert_eq!(blocks.len(), 1);
        assert!(rest.is_empty());
    }

    #[test]
    fn pipelined_requests_frame_independently() {
        let first = b"GET /a HTTP/1.1\r\n\r\n";
        let second = b"GET /b HTTP/1.1\r\n\r\n";
        let mut input = Vec::new();
        input.extend_from_slice(first);
        input.extend_from_slice(second);

        let (blocks, rest) = frame_all(&input);
        assert_eq!(blocks.len(), 2);
        assert_eq!(&blocks[0][..], &first[..]);
        assert_eq!(&blocks[1][..], &second[..]);
        assert!(rest.is_empty());
    }

    #[test]
    fn broken_sequence_resets_scan() {
        // \r\n\r X \r\n\r\n: the X resets the machine, only the later
        // terminator frames
        let input = b"A: b\r\n\rX\r\n\r\n";
        let (blocks, rest) = frame_all(input);
        assert_eq!(blocks.len(), 1);
        assert_eq!(&blocks[0][..], &input[..]);
        assert!(rest.is_empty());
    }

    #[test]
    fn cr_reenters_cr_state() {
        let (blocks, _) = frame_all(b"x\r\r\n\r\n");
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn incomplete_block_returns_none() {
        let mut framer = HeaderFramer::new();
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: a\r\n"[..]);
        assert!(framer.decode(&mut buf).unwrap().is_none());

        // feeding the rest completes the frame without rescanning
        buf.extend_from_slice(b"\r\n");
        assert!(framer.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut framer = HeaderFramer::new();
        let mut buf = BytesMut::from(vec![b'a'; MAX_HEADER_BYTES + 1].as_slice());
        assert!(matches!(framer.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }
}
