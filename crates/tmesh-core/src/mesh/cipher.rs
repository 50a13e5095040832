//! Frame obfuscation cipher
//!
//! Every frame is enciphered with a byte-wide cipher-feedback chain over a
//! static 19-byte key shared by all nodes of a deployment:
//!
//! ```text
//! P[0] = 0, P[1..19] = frame
//! C[0] = P[0] ^ iv ^ key[0]
//! C[i] = P[i] ^ C[i-1] ^ key[i]        i in 1..19
//! ```
//!
//! The random `iv` only reaches `C[0]`, which the receiver discards, so it
//! varies the ciphertext without affecting the decoded frame.
//!
//! This is an obfuscation layer, not a security boundary. A known or chosen
//! plaintext reveals the key stream directly, and there is no integrity
//! check beyond the validator's garbage heuristic.

use super::frame::{Frame, FRAME_LEN};
use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cipher key length in bytes
pub const KEY_LEN: usize = 19;

/// Wire buffer length in bytes
pub const WIRE_LEN: usize = FRAME_LEN + 1;

/// Shared symmetric key
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    /// Create from raw key bytes
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        CipherKey(key)
    }

    /// Create from a slice, which must be exactly 19 bytes
    pub fn from_slice(key: &[u8]) -> Result<Self, ConfigError> {
        let bytes: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| ConfigError::KeyLength(key.len()))?;
        Ok(CipherKey(bytes))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for CipherKey {
    type Error = ConfigError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_slice(&bytes)
    }
}

impl From<CipherKey> for Vec<u8> {
    fn from(key: CipherKey) -> Self {
        key.0.to_vec()
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CipherKey").field(&"[REDACTED]").finish()
    }
}

/// A 19-byte enciphered radio payload
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WireFrame([u8; WIRE_LEN]);

impl WireFrame {
    /// Wrap raw wire bytes
    pub fn from_bytes(bytes: [u8; WIRE_LEN]) -> Self {
        WireFrame(bytes)
    }

    /// Wrap a received buffer, `None` unless it is exactly 19 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(WireFrame)
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8; WIRE_LEN] {
        &self.0
    }
}

impl fmt::Debug for WireFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireFrame(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Encoder/decoder bound to one deployment key
#[derive(Debug, Clone)]
pub struct FrameCodec {
    key: CipherKey,
}

impl FrameCodec {
    /// Create a codec for `key`
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }

    /// Encipher a frame with a fresh random IV
    pub fn encode<R: Rng + ?Sized>(&self, frame: &Frame, rng: &mut R) -> WireFrame {
        self.encode_with_iv(frame, rng.gen())
    }

    /// Encipher a frame with a caller-chosen IV
    pub fn encode_with_iv(&self, frame: &Frame, iv: u8) -> WireFrame {
        let key = self.key.as_bytes();
        let plain = frame.as_bytes();
        let mut wire = [0u8; WIRE_LEN];

        // Placeholder plaintext byte is zero
        wire[0] = iv ^ key[0];
        for i in 1..WIRE_LEN {
            wire[i] = plain[i - 1] ^ wire[i - 1] ^ key[i];
        }
        WireFrame(wire)
    }

    /// Decipher a wire buffer; the first decrypted byte is dropped
    pub fn decode(&self, wire: &WireFrame) -> Frame {
        let key = self.key.as_bytes();
        let cipher = wire.as_bytes();
        let mut plain = [0u8; FRAME_LEN];

        for i in 1..WIRE_LEN {
            plain[i - 1] = cipher[i] ^ cipher[i - 1] ^ key[i];
        }
        Frame::from_bytes(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::frame::{MsgType, NodeId};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_key(rng: &mut StdRng) -> CipherKey {
        let mut key = [0u8; KEY_LEN];
        rng.fill(&mut key[..]);
        CipherKey::new(key)
    }

    fn random_frame(rng: &mut StdRng) -> Frame {
        let mut bytes = [0u8; FRAME_LEN];
        rng.fill(&mut bytes[..]);
        Frame::from_bytes(bytes)
    }

    #[test]
    fn test_roundtrip_all_ivs() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..64 {
            let codec = FrameCodec::new(random_key(&mut rng));
            let frame = random_frame(&mut rng);
            for iv in 0..=255u8 {
                let wire = codec.encode_with_iv(&frame, iv);
                assert_eq!(codec.decode(&wire), frame);
            }
        }
    }

    #[test]
    fn test_iv_only_changes_first_byte_after_inverse() {
        let codec = FrameCodec::new(CipherKey::new([0x5a; KEY_LEN]));
        let frame = Frame::new(NodeId::new(5).unwrap(), MsgType::TEMPERATURE, 21.5);

        let a = codec.encode_with_iv(&frame, 0x11);
        let b = codec.encode_with_iv(&frame, 0xee);
        assert_ne!(a, b);
        assert_ne!(a.as_bytes()[0], b.as_bytes()[0]);
        assert_eq!(codec.decode(&a), codec.decode(&b));
    }

    #[test]
    fn test_known_vector_zero_key() {
        let codec = FrameCodec::new(CipherKey::default());
        let frame = Frame::from_bytes([1; FRAME_LEN]);
        let wire = codec.encode_with_iv(&frame, 0);

        // Zero key and IV: C[i] = P[i] ^ C[i-1], so bytes alternate 0,1,0,1...
        let expected: Vec<u8> = (0..WIRE_LEN).map(|i| (i % 2) as u8).collect();
        assert_eq!(&wire.as_bytes()[..], &expected[..]);
    }

    #[test]
    fn test_wrong_key_yields_different_frame() {
        let frame = Frame::new(NodeId::new(5).unwrap(), MsgType::TEMPERATURE, 21.5);
        let wire = FrameCodec::new(CipherKey::new([1; KEY_LEN])).encode_with_iv(&frame, 3);
        let decoded = FrameCodec::new(CipherKey::new([2; KEY_LEN])).decode(&wire);
        assert_ne!(decoded, frame);
    }

    #[test]
    fn test_random_iv_roundtrip() {
        let mut rng = StdRng::seed_from_u64(99);
        let codec = FrameCodec::new(random_key(&mut rng));
        let frame = random_frame(&mut rng);
        for _ in 0..32 {
            let wire = codec.encode(&frame, &mut rng);
            assert_eq!(codec.decode(&wire), frame);
        }
    }

    #[test]
    fn test_key_from_slice() {
        assert!(CipherKey::from_slice(&[0; 19]).is_ok());
        assert!(matches!(
            CipherKey::from_slice(&[0; 18]),
            Err(ConfigError::KeyLength(18))
        ));
        assert!(!format!("{:?}", CipherKey::new([9; KEY_LEN])).contains('9'));
    }

    #[test]
    fn test_wire_from_slice() {
        assert!(WireFrame::from_slice(&[0; WIRE_LEN]).is_some());
        assert!(WireFrame::from_slice(&[0; 18]).is_none());
        assert!(WireFrame::from_slice(&[0; 20]).is_none());
    }
}
