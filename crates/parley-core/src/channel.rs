//! Framed, encrypted channel.
//!
//! [`FramedChannel`] sits between a byte stream and the rest of the protocol.
//! Received bytes go in through [`FramedChannel::feed`]; complete frames come
//! out of [`FramedChannel::read`] already decrypted and decoded. Outgoing
//! messages are encrypted, length-prefixed, and queued until the runtime
//! drains them with [`FramedChannel::take_outbound`]. Nothing is ever dropped:
//! if the socket is not writable the bytes just stay queued.
//!
//! During the handshake no session key exists yet, so the `*_plain` variants
//! move raw payloads through the same framing without the cipher.

use bytes::{Bytes, BytesMut};
use parley_crypto::CipherState;
use parley_proto::{FrameBuffer, Message, encode_frame};

use crate::error::ChannelError;

/// Length-prefixed framing plus the session cipher for one connection.
#[derive(Debug)]
pub struct FramedChannel {
    inbound: FrameBuffer,
    outbound: BytesMut,
    cipher: CipherState,
}

impl FramedChannel {
    /// Wrap a cipher. The cipher's parity decides which side we are.
    pub fn new(cipher: CipherState) -> Self {
        Self { inbound: FrameBuffer::new(), outbound: BytesMut::new(), cipher }
    }

    /// Buffer bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.inbound.extend(data);
    }

    /// Next complete unencrypted frame body, if one is buffered.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Decode` if the length prefix is oversized
    pub fn read_plain(&mut self) -> Result<Option<Bytes>, ChannelError> {
        Ok(self.inbound.next_frame()?)
    }

    /// Queue an unencrypted frame.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Decode` if `payload` exceeds the frame limit
    pub fn write_plain(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        encode_frame(payload, &mut self.outbound)?;
        Ok(())
    }

    /// Next decrypted message, or `Ok(None)` when no complete frame is
    /// buffered yet.
    ///
    /// # Errors
    ///
    /// Any error means the stream can no longer be trusted and the session
    /// must be torn down:
    ///
    /// - `ChannelError::Crypto` if the frame fails its tag or nonce check
    /// - `ChannelError::Decode` if the plaintext is not a `Message`
    pub fn read(&mut self) -> Result<Option<Message>, ChannelError> {
        let Some(frame) = self.inbound.next_frame()? else {
            return Ok(None);
        };

        let plaintext = self.cipher.decrypt(&frame)?;
        Ok(Some(Message::from_bytes(&plaintext)?))
    }

    /// Encrypt and queue a message.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Crypto` with `ReauthenticationRequired` once the
    ///   transfer ceiling is reached
    /// - `ChannelError::Decode` if the message does not encode
    pub fn write(&mut self, message: &Message) -> Result<(), ChannelError> {
        let plaintext = message.to_bytes()?;
        let sealed = self.cipher.encrypt(&plaintext)?;
        encode_frame(&sealed, &mut self.outbound)?;
        Ok(())
    }

    /// Take everything queued for the socket.
    pub fn take_outbound(&mut self) -> Option<Bytes> {
        if self.outbound.is_empty() {
            return None;
        }
        Some(self.outbound.split().freeze())
    }

    /// True if bytes are waiting to be written.
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Bytes received but not yet consumed as frames.
    pub fn buffered_inbound(&self) -> usize {
        self.inbound.buffered()
    }

    /// Session cipher.
    pub fn cipher(&self) -> &CipherState {
        &self.cipher
    }

    /// Session cipher, mutably. The handshake installs keys through this.
    pub fn cipher_mut(&mut self) -> &mut CipherState {
        &mut self.cipher
    }
}

#[cfg(test)]
mod tests {
    use parley_crypto::{CryptoError, NonceParity};
    use parley_proto::{Action, LENGTH_PREFIX_SIZE};

    use super::*;

    fn established_pair() -> (FramedChannel, FramedChannel) {
        let mut client = CipherState::new(NonceParity::Odd);
        let mut server = CipherState::new(NonceParity::Even);

        client.generate_key_pair(&[3u8; 64]);
        server.import_peer_public_key(&client.export_public_key().unwrap()).unwrap();
        server.generate_symmetric_key([9u8; 32]);
        let sealed = server.export_symmetric_key_for_peer([5u8; 32]).unwrap();
        client.import_symmetric_key_from_peer(&sealed).unwrap();

        (FramedChannel::new(client), FramedChannel::new(server))
    }

    fn pipe(from: &mut FramedChannel, to: &mut FramedChannel) {
        if let Some(bytes) = from.take_outbound() {
            to.feed(&bytes);
        }
    }

    #[test]
    fn message_crosses_channel() {
        let (mut client, mut server) = established_pair();
        let msg = Message::text(7, "hello");

        client.write(&msg).unwrap();
        pipe(&mut client, &mut server);

        assert_eq!(server.read().unwrap(), Some(msg));
        assert_eq!(server.read().unwrap(), None);
    }

    #[test]
    fn partial_frame_yields_none() {
        let (mut client, mut server) = established_pair();
        client.write(&Message::text(1, "split me")).unwrap();
        let bytes = client.take_outbound().unwrap();

        server.feed(&bytes[..LENGTH_PREFIX_SIZE + 3]);
        assert_eq!(server.read().unwrap(), None);

        server.feed(&bytes[LENGTH_PREFIX_SIZE + 3..]);
        assert_eq!(server.read().unwrap().unwrap().data_str(), Some("split me"));
    }

    #[test]
    fn writes_queue_until_taken() {
        let (mut client, mut server) = established_pair();
        client.write(&Message::text(1, "a")).unwrap();
        client.write(&Message::text(1, "b")).unwrap();
        assert!(client.has_outbound());

        pipe(&mut client, &mut server);
        assert!(!client.has_outbound());
        assert_eq!(client.take_outbound(), None);

        assert_eq!(server.read().unwrap().unwrap().data_str(), Some("a"));
        assert_eq!(server.read().unwrap().unwrap().data_str(), Some("b"));
    }

    #[test]
    fn tampered_frame_is_rejected() {
        let (mut client, mut server) = established_pair();
        client.write(&Message::new(Action::Ping, 0, Vec::new())).unwrap();

        let mut bytes = client.take_outbound().unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        server.feed(&bytes);

        assert_eq!(
            server.read(),
            Err(ChannelError::Crypto(CryptoError::AuthenticationFailed))
        );
    }

    #[test]
    fn replayed_frame_is_rejected() {
        let (mut client, mut server) = established_pair();
        client.write(&Message::text(1, "once")).unwrap();
        let bytes = client.take_outbound().unwrap();

        server.feed(&bytes);
        server.feed(&bytes);

        assert!(server.read().unwrap().is_some());
        assert!(matches!(
            server.read(),
            Err(ChannelError::Crypto(CryptoError::ReplayedNonce { .. }))
        ));
    }

    #[test]
    fn plain_frames_bypass_cipher() {
        let mut a = FramedChannel::new(CipherState::new(NonceParity::Odd));
        let mut b = FramedChannel::new(CipherState::new(NonceParity::Even));

        a.write_plain(b"hello").unwrap();
        pipe(&mut a, &mut b);

        assert_eq!(b.read_plain().unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(b.read_plain().unwrap(), None);
    }

    #[test]
    fn write_without_key_fails() {
        let mut channel = FramedChannel::new(CipherState::new(NonceParity::Odd));
        assert_eq!(
            channel.write(&Message::text(1, "x")),
            Err(ChannelError::Crypto(CryptoError::NoLocalKey))
        );
        assert!(!channel.has_outbound());
    }
}
