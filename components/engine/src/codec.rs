//! Line framing: CRLF-terminated command lines capped at 255 octets
//! including the terminator, and dot-stuffing for multi-line payloads
//! (`RETR`, `TOP`, `LIST`/`UIDL`/`CAPA` without an argument).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 255 octets including the trailing CRLF.
pub const MAX_LINE_LEN: usize = 255;

#[derive(Debug)]
pub enum LineOutcome {
    /// A complete line, CRLF stripped. Not yet UTF-8 validated or
    /// tokenized; that is the command parser's job.
    Line(Vec<u8>),
    /// Either the line (including its terminator) exceeded
    /// [`MAX_LINE_LEN`], or it was terminated by a bare LF instead of CRLF.
    /// Both are framing violations rejected the same way.
    Reject,
    /// The peer closed the connection before sending a complete line.
    Eof,
}

/// Read one CRLF-terminated line from `reader`, enforcing the 255-octet cap.
///
/// Reads a byte at a time so an over-long or missing terminator is detected
/// without buffering an unbounded amount of attacker-controlled input.
pub async fn read_command_line<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<LineOutcome> {
    let mut buf: Vec<u8> = Vec::with_capacity(128);
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Ok(LineOutcome::Eof);
        }
        buf.push(byte[0]);
        if buf.len() > MAX_LINE_LEN {
            return Ok(LineOutcome::Reject);
        }
        if byte[0] == b'\n' {
            return if buf.len() >= 2 && buf[buf.len() - 2] == b'\r' {
                buf.truncate(buf.len() - 2);
                Ok(LineOutcome::Line(buf))
            } else {
                Ok(LineOutcome::Reject)
            };
        }
    }
}

/// Dot-stuff a whole buffer at once: any line starting with `.` gets an
/// extra leading `.`. Used by tests and by responses assembled in memory.
pub fn stuff_bytes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + 8);
    let mut start = 0;
    for (i, &b) in input.iter().enumerate() {
        if b == b'\n' {
            stuff_line_into(&mut out, &input[start..=i]);
            start = i + 1;
        }
    }
    if start < input.len() {
        stuff_line_into(&mut out, &input[start..]);
    }
    out
}

fn stuff_line_into(out: &mut Vec<u8>, line: &[u8]) {
    if line.starts_with(b".") {
        out.push(b'.');
    }
    out.extend_from_slice(line);
}

/// Inverse of [`stuff_bytes`]: strips exactly one leading `.` from any line
/// that starts with `..`.
pub fn unstuff_bytes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut start = 0;
    for (i, &b) in input.iter().enumerate() {
        if b == b'\n' {
            unstuff_line_into(&mut out, &input[start..=i]);
            start = i + 1;
        }
    }
    if start < input.len() {
        unstuff_line_into(&mut out, &input[start..]);
    }
    out
}

fn unstuff_line_into(out: &mut Vec<u8>, line: &[u8]) {
    if line.starts_with(b"..") {
        out.extend_from_slice(&line[1..]);
    } else {
        out.extend_from_slice(line);
    }
}

/// Streams an RFC 5322 body to the wire, dot-stuffing as it goes and never
/// splitting a CRLF pair across two writes, even when the two bytes land in
/// different input chunks.
pub struct DotStuffingWriter<W> {
    inner: W,
    at_line_start: bool,
    pending_cr: bool,
}

impl<W: AsyncWrite + Unpin> DotStuffingWriter<W> {
    pub fn new(inner: W) -> Self {
        DotStuffingWriter {
            inner,
            at_line_start: true,
            pending_cr: false,
        }
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(chunk.len() + 2);
        for &b in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    buf.push(b'\r');
                    buf.push(b'\n');
                    self.at_line_start = true;
                    continue;
                }
                buf.push(b'\r');
            }
            if b == b'\r' {
                self.pending_cr = true;
                continue;
            }
            if self.at_line_start && b == b'.' {
                buf.push(b'.');
            }
            buf.push(b);
            self.at_line_start = false;
        }
        if !buf.is_empty() {
            self.inner.write_all(&buf).await?;
        }
        Ok(())
    }

    /// Flush any pending bare CR, close the final line if needed, and write
    /// the `.` CRLF terminator.
    pub async fn finish(mut self) -> std::io::Result<W> {
        if self.pending_cr {
            self.inner.write_all(b"\r").await?;
            self.at_line_start = false;
        }
        if !self.at_line_start {
            self.inner.write_all(b"\r\n").await?;
        }
        self.inner.write_all(b".\r\n").await?;
        Ok(self.inner)
    }
}

/// Copy an entire `AsyncRead` message body through a [`DotStuffingWriter`],
/// finishing it with the multi-line terminator.
pub async fn write_stuffed_body<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    body: &mut R,
    out: W,
) -> std::io::Result<W> {
    let mut writer = DotStuffingWriter::new(out);
    let mut buf = [0u8; 8192];
    loop {
        let n = body.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_chunk(&buf[..n]).await?;
    }
    writer.finish().await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stuffing_round_trips() {
        let samples: &[&[u8]] = &[
            b"hello\r\nworld\r\n",
            b".leading dot\r\nnormal\r\n..double\r\n",
            b"",
            b"no trailing newline",
            b".\r\n",
        ];
        for sample in samples {
            let stuffed = stuff_bytes(sample);
            assert_eq!(unstuff_bytes(&stuffed), *sample);
        }
    }

    #[test]
    fn stuffing_escapes_lone_terminator_line() {
        let stuffed = stuff_bytes(b".\r\n");
        assert_eq!(stuffed, b"..\r\n");
    }

    #[tokio::test]
    async fn read_command_line_accepts_255_rejects_256() {
        // 253 'a's + CRLF = 255 octets total.
        let ok_line = [vec![b'a'; 253], b"\r\n".to_vec()].concat();
        let mut reader = std::io::Cursor::new(ok_line.clone());
        match read_command_line(&mut reader).await.unwrap() {
            LineOutcome::Line(l) => assert_eq!(l.len(), 253),
            other => panic!("expected Line, got {:?}", other),
        }

        // 254 'a's + CRLF = 256 octets total: rejected.
        let too_long = [vec![b'a'; 254], b"\r\n".to_vec()].concat();
        let mut reader = std::io::Cursor::new(too_long);
        match read_command_line(&mut reader).await.unwrap() {
            LineOutcome::Reject => {}
            other => panic!("expected Reject, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn read_command_line_rejects_bare_lf() {
        let mut reader = std::io::Cursor::new(b"STAT\n".to_vec());
        match read_command_line(&mut reader).await.unwrap() {
            LineOutcome::Reject => {}
            other => panic!("expected Reject, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn read_command_line_reports_eof() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            read_command_line(&mut reader).await.unwrap(),
            LineOutcome::Eof
        ));
    }

    #[tokio::test]
    async fn write_stuffed_body_never_emits_bare_terminator_lines() {
        let mut body = std::io::Cursor::new(b"Subject: x\r\n\r\n.\r\nbody\r\n".to_vec());
        let mut out = Vec::new();
        write_stuffed_body(&mut body, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\r\n..\r\n"));
        assert!(text.ends_with(".\r\n"));
    }
}
