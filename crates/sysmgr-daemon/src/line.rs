//! Bounded JSON-line reading shared by every socket adapter.

use sysmgr_core::TransportError;
use sysmgr_core::ipc::MAX_LINE_BYTES;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Reads up to and including the next newline, appending to `buf`.
///
/// Returns the number of bytes read; `0` means end of stream. Cancel safe
/// inside `select!` as long as `buf` is kept between calls: a partial line
/// stays in `buf` and the next call continues it.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let remaining = (MAX_LINE_BYTES + 1).saturating_sub(buf.len());
    let mut limited = (&mut *reader).take(remaining as u64);
    let read = limited.read_until(b'\n', buf).await?;
    if buf.len() > MAX_LINE_BYTES {
        return Err(TransportError::protocol(format!(
            "line exceeds {MAX_LINE_BYTES} bytes"
        )));
    }
    Ok(read)
}
