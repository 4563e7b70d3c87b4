use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt};

use logpipe_api::{LineSupplier, PluginError, RawLine};

// ═══════════════════════════════════════════════════════════════
//  LinesFraming
// ═══════════════════════════════════════════════════════════════

/// Newline-delimited framing: `\n` terminates a frame, a trailing `\r`
/// is stripped. Stateless, all buffering lives with the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinesFraming {
    /// Maximum line length in bytes (0 = unlimited).
    max_length: usize,
}

impl LinesFraming {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Extract one frame from the buffer.
    /// Returns (frame_data, bytes_consumed) or None if the frame is incomplete.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, PluginError> {
        let pos = match buf.iter().position(|&b| b == b'\n') {
            Some(p) => p,
            None => {
                // A trailing \r may belong to a CRLF split across reads.
                let pending = strip_cr(buf);
                if self.max_length > 0 && pending.len() > self.max_length {
                    return Err(PluginError::format_err(format!(
                        "line too long: {} bytes (max {}) and no newline found",
                        pending.len(),
                        self.max_length
                    )));
                }
                return Ok(None);
            }
        };

        let consumed = pos + 1; // including \n
        let line = strip_cr(&buf[..pos]);

        if self.max_length > 0 && line.len() > self.max_length {
            return Err(PluginError::format_err(format!(
                "line too long: {} bytes (max {})",
                line.len(),
                self.max_length
            )));
        }

        Ok(Some((line.to_vec(), consumed)))
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

// ═══════════════════════════════════════════════════════════════
//  FramedLineReader: AsyncRead → LinesFraming → RawLine
// ═══════════════════════════════════════════════════════════════

const READ_CHUNK: usize = 8192;

/// Line supplier over any byte stream.
///
/// An overlong line yields one `Format` error and is skipped up to its
/// newline; reading continues afterwards. A final line without newline is
/// still produced at end of stream. Read failures surface as `Io` errors.
pub struct FramedLineReader<R> {
    name: String,
    reader: Option<R>,
    framing: LinesFraming,
    buf: Vec<u8>,
    tmp: Box<[u8]>,
    line_no: u64,
    discarding: bool,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> FramedLineReader<R> {
    pub fn new(name: impl Into<String>, reader: R, framing: LinesFraming) -> Self {
        Self {
            name: name.into(),
            reader: Some(reader),
            framing,
            buf: Vec::with_capacity(READ_CHUNK),
            tmp: vec![0u8; READ_CHUNK].into_boxed_slice(),
            line_no: 0,
            discarding: false,
            eof: false,
        }
    }

    /// Lines framed so far (including skipped ones).
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }

    async fn read_line(&mut self) -> Result<Option<RawLine>, PluginError> {
        loop {
            if self.discarding {
                match self.buf.iter().position(|&b| b == b'\n') {
                    Some(p) => {
                        self.buf.drain(..=p);
                        self.discarding = false;
                    }
                    None => self.buf.clear(),
                }
            }

            if !self.discarding {
                match self.framing.decode(&self.buf) {
                    Ok(Some((frame, consumed))) => {
                        self.buf.drain(..consumed);
                        self.line_no += 1;
                        return Ok(Some(RawLine::new(self.line_no, frame)));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.line_no += 1;
                        match self.buf.iter().position(|&b| b == b'\n') {
                            Some(p) => {
                                self.buf.drain(..=p);
                            }
                            None => {
                                self.buf.clear();
                                self.discarding = true;
                            }
                        }
                        return Err(PluginError::format_err(format!(
                            "[{}] line {}: {}",
                            self.name,
                            self.line_no,
                            e.message()
                        )));
                    }
                }
            }

            if self.eof {
                if self.discarding || self.buf.is_empty() {
                    self.buf.clear();
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buf);
                self.line_no += 1;
                return Ok(Some(RawLine::new(self.line_no, strip_cr(&rest).to_vec())));
            }

            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            match reader.read(&mut self.tmp).await {
                Ok(0) => self.eof = true,
                Ok(n) => self.buf.extend_from_slice(&self.tmp[..n]),
                Err(e) => {
                    return Err(PluginError::io(format!("[{}] read error: {e}", self.name)));
                }
            }
        }
    }
}

impl<R: AsyncRead + Unpin + Send> LineSupplier for FramedLineReader<R> {
    fn next_line(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<RawLine>, PluginError>> + Send + '_>> {
        Box::pin(self.read_line())
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        // Dropping the reader releases the file handle / HTTP body.
        self.reader = None;
        self.eof = true;
        self.buf.clear();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe_api::ErrorKind;

    async fn collect(input: &'static [u8], max_length: usize) -> Vec<Result<RawLine, PluginError>> {
        let mut reader = FramedLineReader::new("test", input, LinesFraming::new(max_length));
        let mut out = Vec::new();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => out.push(Ok(line)),
                Ok(None) => break,
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    #[test]
    fn decode_strips_crlf() {
        let f = LinesFraming::default();
        let (frame, consumed) = f.decode(b"abc\r\nrest").unwrap().unwrap();
        assert_eq!(frame, b"abc");
        assert_eq!(consumed, 5);
        assert!(f.decode(b"partial").unwrap().is_none());
    }

    #[test]
    fn decode_rejects_overlong_lines() {
        let f = LinesFraming::new(4);
        assert_eq!(f.decode(b"12345\n").unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(f.decode(b"123456").unwrap_err().kind(), ErrorKind::Format);
        assert!(f.decode(b"1234\n").unwrap().is_some());
    }

    #[tokio::test]
    async fn reads_lines_and_final_unterminated_line() {
        let lines = collect(b"{\"a\":1}\n\n{\"b\":2}", 0).await;
        let lines: Vec<RawLine> = lines.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            lines,
            vec![
                RawLine::new(1, "{\"a\":1}"),
                RawLine::new(2, ""),
                RawLine::new(3, "{\"b\":2}"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_input_is_immediately_exhausted() {
        assert!(collect(b"", 0).await.is_empty());
    }

    #[tokio::test]
    async fn overlong_line_is_skipped_and_stream_continues() {
        let out = collect(b"ok\nthis-line-is-way-too-long\nfine\n", 8).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap(), &RawLine::new(1, "ok"));
        assert_eq!(out[1].as_ref().unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(out[2].as_ref().unwrap(), &RawLine::new(3, "fine"));
    }

    #[test]
    fn decode_waits_for_newline_after_trailing_cr() {
        let f = LinesFraming::new(4);
        assert!(f.decode(b"1234\r").unwrap().is_none());
        assert_eq!(f.decode(b"12345\r").unwrap_err().kind(), ErrorKind::Format);
    }

    #[tokio::test]
    async fn crlf_split_across_reads_at_max_length() {
        let input = (&b"1234\r"[..]).chain(&b"\nok\n"[..]);
        let mut reader = FramedLineReader::new("test", input, LinesFraming::new(4));
        assert_eq!(reader.next_line().await.unwrap(), Some(RawLine::new(1, "1234")));
        assert_eq!(reader.next_line().await.unwrap(), Some(RawLine::new(2, "ok")));
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exhausted_reader_stays_exhausted() {
        let mut reader = FramedLineReader::new("test", &b"x\n"[..], LinesFraming::default());
        assert!(reader.next_line().await.unwrap().is_some());
        assert!(reader.next_line().await.unwrap().is_none());
        assert!(reader.next_line().await.unwrap().is_none());
        reader.close().await.unwrap();
        assert!(reader.next_line().await.unwrap().is_none());
    }
}
