//! Opaque encoding for room chat text.
//!
//! Room messages are obfuscated before transmission so the relay never carries
//! plain text on the wire. This is reversible base64, not cryptography; the
//! peer-to-peer path is the only one with real confidentiality (see [crate::sealed]).

/// Encode chat text for the room channel.
pub fn opaque_encode(text: &str) -> String {
    base64::encode(text.as_bytes())
}

/// Decode chat text from the room channel.
///
/// Tolerant: anything that is not valid base64-wrapped UTF-8 is returned as-is,
/// so plain-text messages from older clients still render.
pub fn opaque_decode(encoded: &str) -> String {
    match base64::decode(encoded) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| encoded.to_string()),
        Err(_) => encoded.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for text in ["hello", "", "héllo wörld", "[FILE]:1:a.png:image/png"] {
            assert_eq!(opaque_decode(&opaque_encode(text)), text);
        }
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(opaque_decode("not base64!!"), "not base64!!");
    }
}
