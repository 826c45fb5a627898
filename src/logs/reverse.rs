use std::io::{Read, Seek, SeekFrom};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::content::LineLimit;

/// Default size of the window read on each backward step (4KB)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Longest line the reader will assemble (1MB)
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("read cancelled")]
    Cancelled,
}

/// What a reverse read produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Text {
        /// Qualifying lines, newest first
        lines: Vec<String>,
        /// At least one non-blank line was dropped because it didn't contain
        /// the search term
        filtered: bool,
    },
    /// The head of the file is not valid UTF-8
    Binary,
}

/// Reads the last lines of a file by walking fixed-size chunks from the end
/// toward the start, so only the tail that is actually needed gets read.
#[derive(Debug, Clone, Copy)]
pub struct ReverseLineReader {
    chunk_size: usize,
    max_line: usize,
}

impl Default for ReverseLineReader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ReverseLineReader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_line: MAX_LINE_BYTES,
        }
    }

    /// Fail with `ReadError::LineTooLong` instead of assembling lines longer
    /// than `bytes`
    pub fn with_max_line(mut self, bytes: usize) -> Self {
        self.max_line = bytes.max(1);
        self
    }

    /// Collect up to `limit` qualifying lines, newest first.
    ///
    /// The first chunk of the file is validated as UTF-8 before anything
    /// else; if it fails the read stops immediately with `ReadOutcome::Binary`.
    /// `cancel` is checked before every chunk. Memory use is bounded by the
    /// chunk size plus the longest line assembled.
    pub fn read<R: Read + Seek>(
        &self,
        file: &mut R,
        limit: LineLimit,
        search: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, ReadError> {
        let size = file.seek(SeekFrom::End(0))?;
        let mut buf = vec![0u8; self.chunk_size];

        let head_len = (self.chunk_size as u64).min(size) as usize;
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf[..head_len])?;
        if !is_text(&buf[..head_len], (head_len as u64) < size) {
            return Ok(ReadOutcome::Binary);
        }

        let mut collector = LineCollector::new(limit, search);
        // Unterminated line at the low-offset edge of the chunks read so far
        let mut partial = Fragment::new(self.max_line);
        let mut offset = size;

        while offset > 0 && !collector.is_full() {
            if cancel.is_cancelled() {
                return Err(ReadError::Cancelled);
            }

            let to_read = (self.chunk_size as u64).min(offset) as usize;
            offset -= to_read as u64;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf[..to_read])?;
            let chunk = &buf[..to_read];

            let Some(last) = chunk.iter().rposition(|&b| b == b'\n') else {
                partial.push(chunk)?;
                continue;
            };

            // Bytes after the last newline finish the line carried so far
            let line = partial.take_with(&chunk[last + 1..])?;
            if !collector.offer(&line) {
                break;
            }

            let mut segments = chunk[..last].split(|&b| b == b'\n');
            // The first segment may continue into the chunk before this one
            let front = segments.next().unwrap_or_default();
            let complete: Vec<&[u8]> = segments.collect();

            for segment in complete.iter().rev() {
                if !collector.offer(segment) {
                    break;
                }
            }
            if !collector.is_full() {
                partial.push(front)?;
            }
        }

        if offset == 0 && !collector.is_full() {
            let line = partial.take_with(&[])?;
            collector.offer(&line);
        }

        Ok(collector.finish())
    }
}

/// A line being assembled back to front. Chunks are kept in the order they
/// were read and joined once, when the newline before them turns up.
struct Fragment {
    pieces: Vec<Vec<u8>>,
    len: usize,
    max: usize,
}

impl Fragment {
    fn new(max: usize) -> Self {
        Self {
            pieces: Vec::new(),
            len: 0,
            max,
        }
    }

    fn check(&self, extra: usize) -> Result<(), ReadError> {
        if self.len + extra > self.max {
            return Err(ReadError::LineTooLong { limit: self.max });
        }
        Ok(())
    }

    /// Add bytes that sit before everything collected so far
    fn push(&mut self, piece: &[u8]) -> Result<(), ReadError> {
        if piece.is_empty() {
            return Ok(());
        }
        self.check(piece.len())?;
        self.len += piece.len();
        self.pieces.push(piece.to_vec());
        Ok(())
    }

    /// The complete line `head` + collected pieces. Leaves the fragment empty.
    fn take_with(&mut self, head: &[u8]) -> Result<Vec<u8>, ReadError> {
        self.check(head.len())?;
        let mut line = Vec::with_capacity(head.len() + self.len);
        line.extend_from_slice(head);
        for piece in self.pieces.drain(..).rev() {
            line.extend_from_slice(&piece);
        }
        self.len = 0;
        Ok(line)
    }
}

/// Full UTF-8 validation. When the buffer stops short of the end of the
/// file (`truncated`), a multi-byte sequence cut off at the end is allowed
/// since the chunk boundary can land inside it.
pub fn is_text(bytes: &[u8], truncated: bool) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => truncated && e.error_len().is_none(),
    }
}

struct LineCollector<'a> {
    limit: LineLimit,
    search: Option<&'a str>,
    lines: Vec<String>,
    filtered: bool,
}

impl<'a> LineCollector<'a> {
    fn new(limit: LineLimit, search: Option<&'a str>) -> Self {
        Self {
            limit,
            search,
            lines: Vec::new(),
            filtered: false,
        }
    }

    fn is_full(&self) -> bool {
        self.limit.is_reached(self.lines.len())
    }

    /// Consider one raw line. Returns false once the limit is reached.
    fn offer(&mut self, raw: &[u8]) -> bool {
        if self.is_full() {
            return false;
        }

        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw).replace('\0', "");
        if line.trim().is_empty() {
            return true;
        }

        match self.search {
            Some(term) if !line.contains(term) => self.filtered = true,
            _ => self.lines.push(line),
        }

        !self.is_full()
    }

    fn finish(self) -> ReadOutcome {
        ReadOutcome::Text {
            lines: self.lines,
            filtered: self.filtered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    /// "line 1\n" .. "line n\n"
    fn numbered(n: usize) -> Vec<u8> {
        (1..=n).map(|i| format!("line {}\n", i)).collect::<String>().into_bytes()
    }

    fn read(data: &[u8], chunk: usize, limit: LineLimit, search: Option<&str>) -> ReadOutcome {
        ReverseLineReader::new(chunk)
            .read(&mut Cursor::new(data), limit, search, &CancellationToken::new())
            .unwrap()
    }

    fn lines(outcome: ReadOutcome) -> Vec<String> {
        match outcome {
            ReadOutcome::Text { lines, .. } => lines,
            ReadOutcome::Binary => panic!("expected text"),
        }
    }

    #[test]
    fn test_last_five_of_twenty_five() {
        let got = lines(read(&numbered(25), DEFAULT_CHUNK_SIZE, LineLimit::Count(5), None));
        assert_eq!(got, vec!["line 25", "line 24", "line 23", "line 22", "line 21"]);
    }

    #[test]
    fn test_fewer_lines_than_requested() {
        let got = lines(read(&numbered(3), DEFAULT_CHUNK_SIZE, LineLimit::Count(10), None));
        assert_eq!(got, vec!["line 3", "line 2", "line 1"]);
    }

    #[test]
    fn test_unbounded_reads_whole_file() {
        let got = lines(read(&numbered(25), 16, LineLimit::All, None));
        assert_eq!(got.len(), 25);
        assert_eq!(got.first().map(String::as_str), Some("line 25"));
        assert_eq!(got.last().map(String::as_str), Some("line 1"));
    }

    #[test]
    fn test_chunk_boundaries_never_split_lines() {
        let data = numbered(200);
        let expected: Vec<String> = (1..=200).rev().map(|i| format!("line {}", i)).collect();
        for chunk in [1, 2, 3, 5, 7, 8, 13, 64, 4096] {
            let got = lines(read(&data, chunk, LineLimit::All, None));
            assert_eq!(got, expected, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_missing_trailing_newline() {
        let got = lines(read(b"first\nsecond\nthird", 4, LineLimit::All, None));
        assert_eq!(got, vec!["third", "second", "first"]);
    }

    #[test]
    fn test_blank_lines_are_skipped_and_not_counted() {
        let data = b"a\n\n   \n\t\nb\n\n\nc\n\n";
        let got = lines(read(data, 3, LineLimit::Count(2), None));
        assert_eq!(got, vec!["c", "b"]);
    }

    #[test]
    fn test_crlf_and_null_bytes_are_stripped() {
        let data = b"one\r\ntw\0o\r\n\0\0\r\n";
        let got = lines(read(data, 5, LineLimit::All, None));
        assert_eq!(got, vec!["two", "one"]);
    }

    #[test]
    fn test_search_filters_and_reports() {
        let data = b"INFO boot\nERROR disk\nINFO ok\nERROR net\nINFO done\n";
        let outcome = read(data, 8, LineLimit::Count(5), Some("ERROR"));
        assert_eq!(
            outcome,
            ReadOutcome::Text {
                lines: vec!["ERROR net".into(), "ERROR disk".into()],
                filtered: true,
            }
        );

        let outcome = read(data, 8, LineLimit::Count(5), Some("PANIC"));
        assert_eq!(
            outcome,
            ReadOutcome::Text {
                lines: vec![],
                filtered: true,
            }
        );
    }

    #[test]
    fn test_search_respects_limit() {
        let data: Vec<u8> = (1..=50)
            .map(|i| format!("{} {}\n", if i % 2 == 0 { "even" } else { "odd" }, i))
            .collect::<String>()
            .into_bytes();
        let got = lines(read(&data, 16, LineLimit::Count(3), Some("even")));
        assert_eq!(got, vec!["even 50", "even 48", "even 46"]);
    }

    #[test]
    fn test_empty_file() {
        let outcome = read(b"", DEFAULT_CHUNK_SIZE, LineLimit::Count(5), Some("x"));
        assert_eq!(
            outcome,
            ReadOutcome::Text {
                lines: vec![],
                filtered: false,
            }
        );
    }

    #[test]
    fn test_binary_head_is_rejected() {
        let mut data = vec![0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe];
        data.extend_from_slice(&numbered(10));
        for limit in [LineLimit::Count(1), LineLimit::Count(50), LineLimit::All] {
            assert_eq!(read(&data, 64, limit, None), ReadOutcome::Binary);
            assert_eq!(read(&data, 64, limit, Some("line")), ReadOutcome::Binary);
        }
    }

    #[test]
    fn test_multibyte_char_cut_by_first_chunk_is_text() {
        // "é" is two bytes; a 2-byte chunk splits it after "a"
        let data = "aé\nzażółć\n".as_bytes();
        let got = lines(read(data, 2, LineLimit::All, None));
        assert_eq!(got, vec!["zażółć", "aé"]);
    }

    #[test]
    fn test_is_text() {
        assert!(is_text(b"plain ascii", false));
        assert!(is_text("ünïcödé".as_bytes(), false));
        assert!(is_text(&"é".as_bytes()[..1], true));
        assert!(!is_text(&"é".as_bytes()[..1], false));
        assert!(!is_text(&[0xff, 0x00, 0x41], true));
    }

    #[test]
    fn test_file_ending_mid_character_is_binary() {
        // The whole file fits in the head chunk, so the cut sequence is real
        let data = [b"ok\n".as_slice(), &"é".as_bytes()[..1]].concat();
        assert_eq!(read(&data, 64, LineLimit::All, None), ReadOutcome::Binary);
    }

    #[test]
    fn test_long_line_is_assembled_in_linear_time() {
        let line_len = 8 * 1024 * 1024;
        let mut data = b"first\n".to_vec();
        data.resize(data.len() + line_len, b'a');
        data.push(b'\n');

        let started = Instant::now();
        let outcome = ReverseLineReader::new(DEFAULT_CHUNK_SIZE)
            .with_max_line(16 * 1024 * 1024)
            .read(
                &mut Cursor::new(&data),
                LineLimit::All,
                None,
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());

        let got = lines(outcome);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].len(), line_len);
        assert_eq!(got[1], "first");
    }

    #[test]
    fn test_line_over_limit_is_an_error() {
        let mut data = b"first\n".to_vec();
        data.resize(data.len() + 3 * MAX_LINE_BYTES, b'x');
        data.extend_from_slice(b"\ntail\n");

        // Lines after the oversized one are still served
        let got = lines(read(&data, DEFAULT_CHUNK_SIZE, LineLimit::Count(1), None));
        assert_eq!(got, vec!["tail"]);

        let result = ReverseLineReader::default().read(
            &mut Cursor::new(&data),
            LineLimit::All,
            None,
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(ReadError::LineTooLong { limit: MAX_LINE_BYTES })
        ));
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let reader = ReverseLineReader::new(3).with_max_line(10);
        let data = b"0123456789\nabc\n";
        let outcome = reader
            .read(
                &mut Cursor::new(data),
                LineLimit::All,
                None,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(lines(outcome), vec!["abc", "0123456789"]);

        let result = reader.read(
            &mut Cursor::new(b"0123456789X\nabc\n"),
            LineLimit::All,
            None,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(ReadError::LineTooLong { limit: 10 })));
    }

    /// Serves `reads_left` reads, then fails like a dying disk
    struct FailingFile {
        inner: Cursor<Vec<u8>>,
        reads_left: usize,
    }

    impl Read for FailingFile {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.reads_left == 0 {
                return Err(std::io::Error::other("input/output error"));
            }
            self.reads_left -= 1;
            self.inner.read(buf)
        }
    }

    impl Seek for FailingFile {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_io_error_midway_fails_the_read() {
        // Head check plus one tail chunk succeed, the next chunk fails
        let mut file = FailingFile {
            inner: Cursor::new(numbered(20)),
            reads_left: 2,
        };
        let result = ReverseLineReader::new(8).read(
            &mut file,
            LineLimit::All,
            None,
            &CancellationToken::new(),
        );
        match result {
            Err(ReadError::Io(e)) => assert_eq!(e.to_string(), "input/output error"),
            other => panic!("expected an I/O error, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ReverseLineReader::new(8).read(
            &mut Cursor::new(numbered(10)),
            LineLimit::All,
            None,
            &cancel,
        );
        assert!(matches!(result, Err(ReadError::Cancelled)));
    }
}
