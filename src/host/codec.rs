//! Native-messaging framing: a little-endian `u32` length, then UTF-8 JSON.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Reads one frame body without parsing it. `Ok(None)` on a clean end of input.
///
/// Input that ends inside a length prefix or a body is an error.
pub async fn read_frame_bytes<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let first = reader
        .read(&mut len_buf[..1])
        .await
        .context("failed to read frame length")?;
    if first == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut len_buf[1..])
        .await
        .context("truncated frame length")?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        bail!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("truncated frame body")?;
    Ok(Some(body))
}

/// Reads one frame and parses it as JSON. `Ok(None)` on a clean end of input.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Value>> {
    let Some(body) = read_frame_bytes(reader).await? else {
        return Ok(None);
    };
    let value = serde_json::from_slice(&body).context("frame body is not valid JSON")?;
    Ok(Some(value))
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(message).context("failed to encode frame")?;
    let len = u32::try_from(body.len()).context("frame too large")?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
