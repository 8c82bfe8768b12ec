//! `Content-Length` framing for JSON-RPC over a server's stdio.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by exactly `N` bytes
//! of JSON. Other headers are tolerated and ignored.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body. Verifiers can publish large
/// diagnostic sets, but never this large.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Value of a `Content-Length` header line, or `None` for any other header.
fn content_length_of(header: &str) -> Result<Option<usize>> {
    let Some((key, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    let len = value
        .trim()
        .parse()
        .with_context(|| format!("invalid Content-Length value {:?}", value.trim()))?;
    Ok(Some(len))
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Next message, or `Ok(None)` on a clean EOF between messages.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(len) = self.read_header_block().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            bail!("Content-Length {len} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    async fn read_header_block(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut started = false;
        let mut line = String::new();

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;
            if n == 0 {
                if started {
                    bail!("unexpected EOF while reading headers");
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            if let Some(len) = content_length_of(header)? {
                length = Some(len);
            }
        }

        length
            .map(Some)
            .context("missing Content-Length header")
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(msg).context("serializing JSON-RPC frame")?;
        let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);

        self.writer
            .write_all(&frame)
            .await
            .context("writing frame")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}
