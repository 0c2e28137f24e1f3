//! Per-session encryption state for a direct channel.
//!
//! Wraps a fresh [SessionKeyPair] together with the peer's announced public
//! key. Frames in and out of the data channel pass through here: outgoing text
//! is sealed into a `msg` frame, incoming frames are opened or, for `pubkey`
//! frames, absorbed into the handshake state.

use std::sync::Mutex;

use crypto_box::PublicKey;
use talka_core::sealed::public_key_from_b64;
use talka_core::sealed::SessionKeyPair;
use talka_core::DirectFrame;

use crate::error::Error;
use crate::error::Result;

/// Encryption state of one peer-to-peer session.
pub struct EncryptedChannel {
    keys: SessionKeyPair,
    remote: Mutex<Option<PublicKey>>,
}

impl EncryptedChannel {
    /// Create a channel with a freshly generated key pair and no peer key yet.
    pub fn new() -> Self {
        Self {
            keys: SessionKeyPair::generate(),
            remote: Mutex::new(None),
        }
    }

    /// The `pubkey` announcement frame for the local key.
    pub fn pubkey_frame(&self) -> DirectFrame {
        DirectFrame::Pubkey {
            data: self.keys.public_key_b64(),
        }
    }

    /// Whether the peer's key has been received.
    pub fn is_ready(&self) -> bool {
        self.remote.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    /// Absorb the peer's announced public key. A repeated announcement with the
    /// same key is a no-op; a different key replaces the old one.
    pub fn accept_pubkey(&self, encoded: &str) -> Result<()> {
        let key = public_key_from_b64(encoded)?;
        if let Ok(mut slot) = self.remote.lock() {
            *slot = Some(key);
        }
        Ok(())
    }

    /// Seal `text` into a `msg` frame for the peer.
    pub fn seal(&self, text: &str) -> Result<DirectFrame> {
        let Some(remote) = self.remote.lock().ok().and_then(|r| r.clone()) else {
            return Err(Error::PeerKeyMissing);
        };
        let data = self.keys.encrypt(text, &remote)?;
        Ok(DirectFrame::Msg {
            data,
            from_public_key: self.keys.public_key_b64(),
        })
    }

    /// Open an incoming frame.
    ///
    /// Returns `Ok(Some(text))` for a decrypted `msg`, `Ok(None)` for a
    /// `pubkey` frame absorbed into the handshake. Tampered or mismatched
    /// ciphertexts error and the frame is discarded.
    pub fn open(&self, frame: DirectFrame) -> Result<Option<String>> {
        match frame {
            DirectFrame::Pubkey { data } => {
                self.accept_pubkey(&data)?;
                Ok(None)
            }
            DirectFrame::Msg {
                data,
                from_public_key,
            } => {
                let sender = public_key_from_b64(&from_public_key)?;
                Ok(Some(self.keys.decrypt(&data, &sender)?))
            }
        }
    }
}

impl Default for EncryptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake() -> (EncryptedChannel, EncryptedChannel) {
        let alice = EncryptedChannel::new();
        let bob = EncryptedChannel::new();
        assert!(alice.open(bob.pubkey_frame()).unwrap().is_none());
        assert!(bob.open(alice.pubkey_frame()).unwrap().is_none());
        (alice, bob)
    }

    #[test]
    fn test_handshake_then_round_trip() {
        let (alice, bob) = handshake();
        assert!(alice.is_ready() && bob.is_ready());

        let frame = alice.seal("hello bob").unwrap();
        assert_eq!(bob.open(frame).unwrap().as_deref(), Some("hello bob"));
    }

    #[test]
    fn test_seal_before_handshake_errors() {
        let alice = EncryptedChannel::new();
        assert!(matches!(alice.seal("too soon"), Err(Error::PeerKeyMissing)));
    }

    #[test]
    fn test_tampered_frame_discarded() {
        let (alice, bob) = handshake();
        let DirectFrame::Msg {
            data,
            from_public_key,
        } = alice.seal("payload").unwrap()
        else {
            panic!("seal produced wrong frame");
        };

        let mut raw = base64::decode(&data).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = DirectFrame::Msg {
            data: base64::encode(raw),
            from_public_key,
        };
        assert!(bob.open(tampered).is_err());
    }

    #[test]
    fn test_bad_pubkey_rejected() {
        let alice = EncryptedChannel::new();
        assert!(alice.accept_pubkey("not base64!!!").is_err());
        assert!(alice.accept_pubkey(&base64::encode([0u8; 8])).is_err());
    }
}
