//! Length-prefixed text frames.
//!
//! The prefix is a 7-bit variable-length unsigned integer (low bits first,
//! high bit set on every byte but the last, at most 5 bytes), followed by
//! that many bytes of UTF-8.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::FrameError;

pub const MAX_FRAME_LEN: usize = 1024 * 1024;
const MAX_PREFIX_BYTES: usize = 5;

/// Client → server: end of session.
pub const DISCONNECT: &str = "dc";
/// Server → client: console server is going away.
pub const SHUTDOWN: &str = "shutdown";

pub fn encode_frame(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + MAX_PREFIX_BYTES);
    let mut len = bytes.len() as u32;
    while len >= 0x80 {
        out.push((len as u8 & 0x7F) | 0x80);
        len >>= 7;
    }
    out.push(len as u8);
    out.extend_from_slice(bytes);
    out
}

pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if text.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(text.len()));
    }
    writer.write_all(&encode_frame(text)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. A clean EOF before the first prefix byte is
/// [`FrameError::Closed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = read_length(reader).await?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| FrameError::InvalidUtf8)
}

async fn read_length<R>(reader: &mut R) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut value: u64 = 0;
    for i in 0..MAX_PREFIX_BYTES {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if i == 0 && e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::Closed);
            }
            Err(e) => return Err(e.into()),
        };
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as usize);
        }
    }
    Err(FrameError::MalformedLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_encoding() {
        assert_eq!(encode_frame(""), vec![0x00]);
        assert_eq!(encode_frame("dc"), vec![0x02, b'd', b'c']);

        let long = "a".repeat(300);
        let encoded = encode_frame(&long);
        // 300 = 0b10_0101100 → 0xAC 0x02
        assert_eq!(&encoded[..2], &[0xAC, 0x02]);
        assert_eq!(encoded.len(), 302);
    }

    #[tokio::test]
    async fn test_read_multiple_frames() {
        let mut data = encode_frame("status");
        data.extend(encode_frame("한글 명령"));
        data.extend(encode_frame(&"x".repeat(200)));

        let mut reader = data.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap(), "status");
        assert_eq!(read_frame(&mut reader).await.unwrap(), "한글 명령");
        assert_eq!(read_frame(&mut reader).await.unwrap().len(), 200);
        assert!(matches!(read_frame(&mut reader).await, Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let data = [0x05, b'a', b'b'];
        let mut reader = &data[..];
        assert!(matches!(read_frame(&mut reader).await, Err(FrameError::Io(_))));
    }

    #[tokio::test]
    async fn test_rejects_bad_frames() {
        let overlong = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut reader = &overlong[..];
        assert!(matches!(read_frame(&mut reader).await, Err(FrameError::MalformedLength)));

        // 2 MiB
        let too_big = [0x80, 0x80, 0x80, 0x01];
        let mut reader = &too_big[..];
        assert!(matches!(read_frame(&mut reader).await, Err(FrameError::TooLarge(_))));

        let bad_utf8 = [0x02, 0xC3, 0x28];
        let mut reader = &bad_utf8[..];
        assert!(matches!(read_frame(&mut reader).await, Err(FrameError::InvalidUtf8)));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, "Welcome to MCA!").await.unwrap();
        assert_eq!(out, encode_frame("Welcome to MCA!"));
    }
}
