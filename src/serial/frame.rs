//! Line framing for the serial byte stream
//!
//! The device terminates every telemetry frame with `\n` (optionally preceded
//! by `\r`). Bytes arrive in arbitrary chunks, so partial lines are buffered
//! until their terminator shows up.

use bytes::BytesMut;

use crate::error::{EngineError, EngineResult};

/// Default limit for a buffered partial line
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

const LINE_TERMINATOR: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// Splits a chunked byte stream into complete text lines.
///
/// One framer lives for exactly one transport session. A reconnect builds a
/// fresh framer so no partial line leaks from a dead session into a new one.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_len: usize,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(4096)),
            max_len,
        }
    }

    /// Append a chunk and iterate over every line it completes.
    ///
    /// The iterator is lazy: lines are cut from the buffer as they are pulled.
    /// A line longer than the limit yields `FrameOverflow` whether or not its
    /// terminator arrived in the same chunk. A complete overlong line is
    /// dropped; an unterminated one discards the whole buffer.
    pub fn feed(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.buf.extend_from_slice(chunk);
        Lines { framer: self }
    }

    /// Bytes currently held for an unterminated line
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn next_line(&mut self) -> Option<EngineResult<String>> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == LINE_TERMINATOR) else {
                if self.buf.len() > self.max_len {
                    let buffered = self.buf.len();
                    self.buf.clear();
                    return Some(Err(EngineError::FrameOverflow {
                        buffered,
                        limit: self.max_len,
                    }));
                }
                return None;
            };

            let mut line = self.buf.split_to(pos + 1);
            if pos > self.max_len {
                return Some(Err(EngineError::FrameOverflow {
                    buffered: pos,
                    limit: self.max_len,
                }));
            }
            line.truncate(pos);
            if line.last() == Some(&CARRIAGE_RETURN) {
                line.truncate(line.len() - 1);
            }

            // Bare terminators carry no readings
            if line.is_empty() {
                continue;
            }

            return Some(Ok(String::from_utf8_lossy(&line).into_owned()));
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

/// Lines completed by the most recent [`LineFramer::feed`]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = EngineResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(framer: &mut LineFramer, chunk: &[u8]) -> Vec<String> {
        framer
            .feed(chunk)
            .collect::<EngineResult<Vec<_>>>()
            .expect("no overflow")
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut framer = LineFramer::default();
        assert!(collect(&mut framer, b"10|20").is_empty());
        assert_eq!(framer.buffered(), 5);
    }

    #[test]
    fn test_terminator_split_across_chunks() {
        let mut framer = LineFramer::default();
        assert!(collect(&mut framer, b"10|20").is_empty());
        assert_eq!(collect(&mut framer, b"|30\n40|5"), vec!["10|20|30"]);
        assert_eq!(collect(&mut framer, b"0|60\n"), vec!["40|50|60"]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::default();
        let lines = collect(&mut framer, b"1|2\n3|4\n5|6\n7");
        assert_eq!(lines, vec!["1|2", "3|4", "5|6"]);
        assert_eq!(framer.buffered(), 1);
    }

    #[test]
    fn test_carriage_return_is_stripped() {
        let mut framer = LineFramer::default();
        assert_eq!(collect(&mut framer, b"50|30\r"), Vec::<String>::new());
        assert_eq!(collect(&mut framer, b"\n"), vec!["50|30"]);
    }

    #[test]
    fn test_empty_lines_are_skipped() {
        let mut framer = LineFramer::default();
        assert_eq!(collect(&mut framer, b"\n\r\n1|2\n"), vec!["1|2"]);
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let mut framer = LineFramer::new(8);
        let results: Vec<_> = framer.feed(b"1|2\n0123456789").collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_deref().ok(), Some("1|2"));
        assert!(matches!(
            results[1],
            Err(EngineError::FrameOverflow { buffered: 10, limit: 8 })
        ));
        assert_eq!(framer.buffered(), 0);

        // The framer keeps working after the overflow was reported
        assert_eq!(collect(&mut framer, b"3|4\n"), vec!["3|4"]);
    }

    #[test]
    fn test_overlong_terminated_line_overflows() {
        let mut framer = LineFramer::new(8);
        let results: Vec<_> = framer.feed(b"0123456789012\n1|2\n").collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Err(EngineError::FrameOverflow { buffered: 13, limit: 8 })
        ));
        assert_eq!(results[1].as_deref().ok(), Some("1|2"));
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let mut framer = LineFramer::new(8);
        assert_eq!(collect(&mut framer, b"12345678\n"), vec!["12345678"]);
    }

    /// Lines up to the first overflow, and whether one happened
    fn drain_until_overflow(framer: &mut LineFramer, chunk: &[u8], out: &mut Vec<String>) -> bool {
        for line in framer.feed(chunk) {
            match line {
                Ok(line) => out.push(line),
                Err(_) => return true,
            }
        }
        false
    }

    #[test]
    fn test_fresh_framer_has_no_leftovers() {
        let mut old = LineFramer::default();
        let _ = collect(&mut old, b"99|9");
        let mut fresh = LineFramer::default();
        assert_eq!(collect(&mut fresh, b"1|2\n"), vec!["1|2"]);
    }

    proptest! {
        #[test]
        fn prop_framing_is_chunk_boundary_independent(
            lines in proptest::collection::vec("[0-9|]{1,16}", 1..8),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
            crlf in any::<bool>(),
        ) {
            let terminator = if crlf { "\r\n" } else { "\n" };
            let stream: String = lines.iter().map(|l| format!("{l}{terminator}")).collect();
            let bytes = stream.as_bytes();

            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            offsets.push(0);
            offsets.push(bytes.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut framer = LineFramer::default();
            let mut chunked = Vec::new();
            for window in offsets.windows(2) {
                chunked.extend(collect(&mut framer, &bytes[window[0]..window[1]]));
            }

            let mut whole = LineFramer::default();
            prop_assert_eq!(&chunked, &collect(&mut whole, bytes));
            prop_assert_eq!(chunked, lines);
        }

        #[test]
        fn prop_overflow_is_chunk_boundary_independent(
            lines in proptest::collection::vec("[0-9|]{1,20}", 1..8),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            const LIMIT: usize = 12;
            let stream: String = lines.iter().map(|l| format!("{l}\n")).collect();
            let bytes = stream.as_bytes();

            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            offsets.push(0);
            offsets.push(bytes.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut framer = LineFramer::new(LIMIT);
            let mut chunked = Vec::new();
            let mut chunked_overflow = false;
            for window in offsets.windows(2) {
                if drain_until_overflow(&mut framer, &bytes[window[0]..window[1]], &mut chunked) {
                    chunked_overflow = true;
                    break;
                }
            }

            let mut whole = Vec::new();
            let whole_overflow = drain_until_overflow(&mut LineFramer::new(LIMIT), bytes, &mut whole);

            let expected: Vec<String> = lines.iter().take_while(|l| l.len() <= LIMIT).cloned().collect();
            let expect_overflow = expected.len() < lines.len();

            prop_assert_eq!(chunked_overflow, expect_overflow);
            prop_assert_eq!(whole_overflow, expect_overflow);
            prop_assert_eq!(&chunked, &expected);
            prop_assert_eq!(whole, expected);
        }
    }
}
