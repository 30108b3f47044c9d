//! Length-prefixed framing.
//!
//! A TCP read may return half a frame, three frames, or two and a half.
//! [`FrameBuffer`] accumulates whatever the socket hands over and yields only
//! complete bodies, so a partial read is never mistaken for a message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Size of the big-endian length prefix in front of every frame body.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame body accepted in either direction (16 MiB).
///
/// Checked on the length prefix before any body bytes are buffered, so a
/// hostile peer cannot make us reserve an arbitrary amount of memory.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Prefix `body` with its length and append the frame to `dst`.
///
/// # Errors
///
/// - `ProtocolError::FrameTooLarge` if `body` exceeds [`MAX_FRAME_SIZE`]
pub fn encode_frame(body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }

    dst.reserve(LENGTH_PREFIX_SIZE + body.len());
    dst.put_u32(body.len() as u32);
    dst.put_slice(body);
    Ok(())
}

/// Reassembles frames from an arbitrarily chunked byte stream.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame body, if one is fully buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. That is the normal
    /// "nothing yet" outcome, not an error.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the length prefix exceeds
    ///   [`MAX_FRAME_SIZE`]. The stream cannot be resynchronized after this.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
        }

        if self.buf.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Number of bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True if no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(body: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        encode_frame(body, &mut out).unwrap();
        out
    }

    #[test]
    fn prefix_is_big_endian_length() {
        let out = framed(b"hello");
        assert_eq!(&out[..4], &[0, 0, 0, 5]);
        assert_eq!(&out[4..], b"hello");
    }

    #[test]
    fn partial_prefix_yields_nothing() {
        let mut buf = FrameBuffer::new();
        buf.extend(&[0, 0]);
        assert_eq!(buf.next_frame().unwrap(), None);
        assert_eq!(buf.buffered(), 2);
    }

    #[test]
    fn partial_body_yields_nothing_until_complete() {
        let out = framed(b"hello world");
        let mut buf = FrameBuffer::new();

        buf.extend(&out[..7]);
        assert_eq!(buf.next_frame().unwrap(), None);

        buf.extend(&out[7..]);
        assert_eq!(buf.next_frame().unwrap().as_deref(), Some(&b"hello world"[..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut out = framed(b"one");
        out.extend_from_slice(&framed(b""));
        out.extend_from_slice(&framed(b"three"));

        let mut buf = FrameBuffer::new();
        buf.extend(&out);

        assert_eq!(buf.next_frame().unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(buf.next_frame().unwrap().as_deref(), Some(&b""[..]));
        assert_eq!(buf.next_frame().unwrap().as_deref(), Some(&b"three"[..]));
        assert_eq!(buf.next_frame().unwrap(), None);
    }

    #[test]
    fn oversized_prefix_rejected_before_body_arrives() {
        let mut buf = FrameBuffer::new();
        buf.extend(&u32::MAX.to_be_bytes());

        let result = buf.next_frame();
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn oversized_body_rejected_on_encode() {
        let body = vec![0u8; MAX_FRAME_SIZE + 1];
        let mut out = BytesMut::new();

        let result = encode_frame(&body, &mut out);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
        assert!(out.is_empty());
    }
}
