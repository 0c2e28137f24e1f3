//! Session-scoped sealed-box encryption for peer-to-peer payloads.
//!
//! Once a direct channel is open, each side announces a fresh X25519 public key and
//! every chat payload is an XSalsa20-Poly1305 box bound to the sender's secret key
//! and the recipient's public key. Keys live exactly as long as the session: no
//! persistence, no reuse.
//!
//! Every encryption draws a fresh random 24-byte nonce; the nonce is prepended to
//! the ciphertext and the whole thing is base64-encoded for the JSON frame.
//!
//! Known limitation, kept on purpose to match the deployed wire format: the layer
//! is stateless per message. There is no replay or freshness protection and no
//! forward-secrecy ratchet; a recorded ciphertext decrypts again identically.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::aead::AeadCore;
use crypto_box::aead::OsRng;
use crypto_box::PublicKey;
use crypto_box::SalsaBox;
use crypto_box::SecretKey;

use crate::error::Error;
use crate::error::Result;

/// Length of the XSalsa20 nonce prepended to every ciphertext.
pub const NONCE_LEN: usize = 24;

/// Length of an encoded X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// An ephemeral key pair for one peer-to-peer session.
///
/// The secret half never leaves this struct: it is not serializable and is
/// redacted from debug output. Dropping the pair ends its usefulness; a new
/// session generates a new pair.
pub struct SessionKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl std::fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyPair")
            .field("public", &self.public_key_b64())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SessionKeyPair {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// The shareable public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The public key encoded for the `pubkey` control frame.
    pub fn public_key_b64(&self) -> String {
        base64::encode(self.public.as_bytes())
    }

    /// Seal `plaintext` for `recipient`. Output is `base64(nonce || box)`.
    pub fn encrypt(&self, plaintext: &str, recipient: &PublicKey) -> Result<String> {
        let sealed = SalsaBox::new(recipient, &self.secret);
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = sealed
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Authentication)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(base64::encode(out))
    }

    /// Open a sealed payload from `sender`.
    ///
    /// Fails with [Error::Authentication] on tampering or key mismatch. Callers
    /// must treat failure as "message discarded"; no partial plaintext exists.
    pub fn decrypt(&self, encoded: &str, sender: &PublicKey) -> Result<String> {
        let data = base64::decode(encoded)?;
        if data.len() < NONCE_LEN {
            return Err(Error::CiphertextTooShort);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);

        let sealed = SalsaBox::new(sender, &self.secret);
        let plaintext = sealed
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Authentication)?;

        Ok(String::from_utf8(plaintext)?)
    }
}

/// Decode a peer's announced public key.
pub fn public_key_from_b64(encoded: &str) -> Result<PublicKey> {
    let bytes = base64::decode(encoded)?;
    let arr: [u8; PUBLIC_KEY_LEN] = bytes
        .try_into()
        .map_err(|_| Error::InvalidKey("public key must be 32 bytes".to_string()))?;
    Ok(PublicKey::from(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let alice = SessionKeyPair::generate();
        let bob = SessionKeyPair::generate();

        let ct = alice.encrypt("the quick brown fox", bob.public_key()).unwrap();
        let pt = bob.decrypt(&ct, alice.public_key()).unwrap();
        assert_eq!(pt, "the quick brown fox");
    }

    #[test]
    fn test_tamper_fails_authentication() {
        let alice = SessionKeyPair::generate();
        let bob = SessionKeyPair::generate();

        let ct = alice.encrypt("payload", bob.public_key()).unwrap();
        let mut raw = base64::decode(&ct).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = base64::encode(raw);

        assert!(matches!(
            bob.decrypt(&tampered, alice.public_key()),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_wrong_sender_key_fails() {
        let alice = SessionKeyPair::generate();
        let bob = SessionKeyPair::generate();
        let mallory = SessionKeyPair::generate();

        let ct = alice.encrypt("payload", bob.public_key()).unwrap();
        assert!(bob.decrypt(&ct, mallory.public_key()).is_err());
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let alice = SessionKeyPair::generate();
        let bob = SessionKeyPair::generate();

        let a = alice.encrypt("same text", bob.public_key()).unwrap();
        let b = alice.encrypt("same text", bob.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_public_key_b64_round_trip() {
        let pair = SessionKeyPair::generate();
        let decoded = public_key_from_b64(&pair.public_key_b64()).unwrap();
        assert_eq!(decoded.as_bytes(), pair.public_key().as_bytes());
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let pair = SessionKeyPair::generate();
        let other = SessionKeyPair::generate();
        let short = base64::encode([0u8; 8]);
        assert!(matches!(
            pair.decrypt(&short, other.public_key()),
            Err(Error::CiphertextTooShort)
        ));
    }
}
