// MIT License - Copyright (c) 2026 Peter Wright
// Packet framing, checksum and payload encryption

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use tracing::trace;

use crate::constants::{ACK_CHECKSUM, HEADER_LEN, MAGIC};
use crate::error::{MiioError, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// The fixed 32-byte control-protocol header.
///
/// Wire layout (big-endian):
/// `[magic:2][length:2][unused:4][device_type:2][device_id:2][timestamp:4][checksum:16]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet length, header included.
    pub length: u16,
    pub unused: u32,
    pub device_type: u16,
    pub device_id: u16,
    pub timestamp: u32,
    pub checksum: [u8; 16],
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            length: HEADER_LEN as u16,
            unused: 0,
            device_type: 0,
            device_id: 0,
            timestamp: 0,
            checksum: [0u8; 16],
        }
    }
}

impl PacketHeader {
    /// Serialize the header into its 32-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        out[2..4].copy_from_slice(&self.length.to_be_bytes());
        out[4..8].copy_from_slice(&self.unused.to_be_bytes());
        out[8..10].copy_from_slice(&self.device_type.to_be_bytes());
        out[10..12].copy_from_slice(&self.device_id.to_be_bytes());
        out[12..16].copy_from_slice(&self.timestamp.to_be_bytes());
        out[16..32].copy_from_slice(&self.checksum);
        out
    }

    /// Parse a header from the start of `bytes`, validating the magic.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(MiioError::PacketTooShort { len: bytes.len() });
        }
        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        if magic != MAGIC {
            return Err(MiioError::BadMagic { found: magic });
        }
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&bytes[16..32]);
        Ok(Self {
            length: u16::from_be_bytes([bytes[2], bytes[3]]),
            unused: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            device_type: u16::from_be_bytes([bytes[8], bytes[9]]),
            device_id: u16::from_be_bytes([bytes[10], bytes[11]]),
            timestamp: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            checksum,
        })
    }

    /// Declared payload length (total length minus the header).
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_LEN)
    }

    /// Whether this header is a handshake acknowledgement.
    pub fn is_handshake_ack(&self) -> bool {
        self.payload_len() == 0 && self.checksum == ACK_CHECKSUM
    }
}

/// A decoded inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPacket {
    /// Handshake acknowledgement; carries the negotiated identity and clock.
    HandshakeAck(PacketHeader),
    /// Regular packet with its decrypted payload.
    Message {
        header: PacketHeader,
        payload: Vec<u8>,
    },
}

/// Encoder/decoder for control-protocol packets sharing one device secret.
///
/// key = MD5(secret), iv = MD5(key ‖ secret), payloads are AES-128-CBC
/// with PKCS#7 padding.
#[derive(Clone)]
pub struct PacketCodec {
    secret: Vec<u8>,
    key: [u8; 16],
    iv: [u8; 16],
}

impl std::fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCodec").finish_non_exhaustive()
    }
}

impl PacketCodec {
    /// Create a codec for the given shared secret (the decoded device token).
    pub fn new(secret: &[u8]) -> Self {
        let key = md5_digest(&[secret]);
        let iv = md5_digest(&[&key[..], secret]);
        Self {
            secret: secret.to_vec(),
            key,
            iv,
        }
    }

    /// Create a codec from a hex-encoded token.
    pub fn from_hex_token(token: &str) -> Result<Self> {
        let secret = hex::decode(token.trim()).map_err(|e| MiioError::InvalidToken {
            reason: e.to_string(),
        })?;
        if secret.is_empty() {
            return Err(MiioError::InvalidToken {
                reason: "token is empty".to_string(),
            });
        }
        Ok(Self::new(&secret))
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Encrypt a payload.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt a payload. Bad padding is reported as [`MiioError::Decrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| MiioError::Decrypt)
    }

    /// Build the full wire packet for `header` and `plaintext`.
    ///
    /// The length and checksum fields of `header` are overwritten. Packets
    /// whose length does not fit the 16-bit length field are rejected.
    pub fn encode(&self, mut header: PacketHeader, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = self.encrypt(plaintext);
        header.length = u16::try_from(ciphertext.len() + HEADER_LEN).map_err(|_| {
            MiioError::PayloadTooLarge {
                len: plaintext.len(),
            }
        })?;

        // First pass: the checksum field temporarily carries the secret.
        header.checksum = self.secret_checksum_field();
        let mut packet = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        packet.extend_from_slice(&header.to_bytes());
        packet.extend_from_slice(&ciphertext);

        let digest = md5_digest(&[&packet[..]]);
        packet[16..32].copy_from_slice(&digest);

        trace!("Encoded packet: {} bytes", packet.len());
        Ok(packet)
    }

    /// Decode an inbound datagram.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedPacket> {
        let header = PacketHeader::from_bytes(bytes)?;

        if header.is_handshake_ack() {
            return Ok(DecodedPacket::HandshakeAck(header));
        }

        let encrypted = &bytes[HEADER_LEN..];
        let payload = if encrypted.is_empty() {
            Vec::new()
        } else {
            self.decrypt(encrypted)?
        };

        Ok(DecodedPacket::Message { header, payload })
    }

    /// Compute the checksum a correctly encoded packet must carry.
    pub fn expected_checksum(&self, packet: &[u8]) -> Result<[u8; 16]> {
        let mut header = PacketHeader::from_bytes(packet)?;
        header.checksum = self.secret_checksum_field();
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&packet[HEADER_LEN..]);
        Ok(md5_digest(&[&buf[..]]))
    }

    fn secret_checksum_field(&self) -> [u8; 16] {
        let mut field = [0u8; 16];
        let n = self.secret.len().min(16);
        field[..n].copy_from_slice(&self.secret[..n]);
        field
    }
}

fn md5_digest(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HELLO_PACKET;

    const TOKEN: &str = "00112233445566778899aabbccddeeff";

    fn codec() -> PacketCodec {
        PacketCodec::from_hex_token(TOKEN).unwrap()
    }

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            length: 80,
            unused: 0xdead_beef,
            device_type: 0x1234,
            device_id: 0xabcd,
            timestamp: 0x0102_0304,
            checksum: [7u8; 16],
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..2], &[0x21, 0x31]);
        assert_eq!(PacketHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_field_offsets() {
        let header = PacketHeader {
            length: 0x0040,
            unused: 0,
            device_type: 0x0102,
            device_id: 0x0304,
            timestamp: 0x0506_0708,
            checksum: [0u8; 16],
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[2..4], &[0x00, 0x40]);
        assert_eq!(&bytes[8..12], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[12..16], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = PacketHeader::default().to_bytes();
        bytes[0] = 0x00;
        match PacketHeader::from_bytes(&bytes) {
            Err(MiioError::BadMagic { found }) => assert_eq!(found, 0x0031),
            other => panic!("expected BadMagic, got {:?}", other),
        }
        assert!(matches!(codec().decode(&bytes), Err(MiioError::BadMagic { .. })));
    }

    #[test]
    fn test_short_packet_rejected() {
        assert!(matches!(
            codec().decode(&[0x21, 0x31, 0x00]),
            Err(MiioError::PacketTooShort { len: 3 })
        ));
    }

    #[test]
    fn test_key_and_iv_derivation() {
        let secret = hex::decode(TOKEN).unwrap();
        let c = PacketCodec::new(&secret);
        let key: [u8; 16] = md5_digest(&[&secret[..]]);
        let mut key_then_secret = key.to_vec();
        key_then_secret.extend_from_slice(&secret);
        assert_eq!(c.key(), &key);
        assert_eq!(c.iv(), &md5_digest(&[&key_then_secret[..]]));
    }

    #[test]
    fn test_encryption_roundtrip() {
        let c = codec();
        for payload in [
            &b""[..],
            &b"x"[..],
            &b"0123456789abcdef"[..],
            br#"{"id":123456789,"method":"miIO.info","params":[]}"#,
        ] {
            let ct = c.encrypt(payload);
            assert_eq!(ct.len() % 16, 0);
            assert!(ct.len() > payload.len());
            assert_eq!(c.decrypt(&ct).unwrap(), payload);
        }
    }

    #[test]
    fn test_decrypt_with_wrong_secret_fails_or_differs() {
        let ct = codec().encrypt(b"{\"id\":1}");
        let other = PacketCodec::new(&[0x42u8; 16]);
        match other.decrypt(&ct) {
            Err(MiioError::Decrypt) => {}
            Ok(plain) => assert_ne!(plain, b"{\"id\":1}"),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_decrypt_bad_length_is_error() {
        assert!(matches!(codec().decrypt(&[1, 2, 3]), Err(MiioError::Decrypt)));
    }

    #[test]
    fn test_encode_layout_and_checksum() {
        let c = codec();
        let header = PacketHeader {
            device_type: 0x00aa,
            device_id: 0x00bb,
            timestamp: 1000,
            ..Default::default()
        };
        let payload = br#"{"id":1,"method":"get_prop","params":["power"]}"#;
        let packet = c.encode(header, payload).unwrap();

        let parsed = PacketHeader::from_bytes(&packet).unwrap();
        assert_eq!(parsed.length as usize, packet.len());
        assert_eq!(parsed.payload_len(), packet.len() - HEADER_LEN);
        assert_eq!(parsed.device_type, 0x00aa);
        assert_eq!(parsed.device_id, 0x00bb);
        assert_eq!(parsed.timestamp, 1000);

        // checksum = MD5(header with secret in checksum field ‖ ciphertext)
        let mut first_pass = packet.clone();
        first_pass[16..32].copy_from_slice(&hex::decode(TOKEN).unwrap());
        assert_eq!(parsed.checksum, md5_digest(&[&first_pass[..]]));
        assert_eq!(c.expected_checksum(&packet).unwrap(), parsed.checksum);
    }

    #[test]
    fn test_encode_rejects_oversize_payload() {
        let c = codec();
        // Largest plaintext whose padded ciphertext still fits the length field
        let fits = vec![b'x'; 65_487];
        let packet = c.encode(PacketHeader::default(), &fits).unwrap();
        assert_eq!(packet.len(), 65_520);

        let oversize = vec![b'x'; 65_503];
        assert!(matches!(
            c.encode(PacketHeader::default(), &oversize),
            Err(MiioError::PayloadTooLarge { len: 65_503 })
        ));
    }

    #[test]
    fn test_encode_decode_message() {
        let c = codec();
        let payload = br#"{"id":42,"result":["ok"]}"#;
        let packet = c.encode(PacketHeader::default(), payload).unwrap();
        match c.decode(&packet).unwrap() {
            DecodedPacket::Message { header, payload: p } => {
                assert_eq!(header.payload_len(), packet.len() - HEADER_LEN);
                assert_eq!(p, payload);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_handshake_ack_detected_without_decryption() {
        let ack = PacketHeader {
            length: HEADER_LEN as u16,
            unused: 0,
            device_type: 0x0321,
            device_id: 0x0654,
            timestamp: 0x0001_0000,
            checksum: ACK_CHECKSUM,
        };
        match codec().decode(&ack.to_bytes()).unwrap() {
            DecodedPacket::HandshakeAck(h) => {
                assert_eq!(h.device_type, 0x0321);
                assert_eq!(h.device_id, 0x0654);
                assert_eq!(h.timestamp, 0x0001_0000);
            }
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_without_ack_checksum_is_message() {
        let header = PacketHeader {
            checksum: [0x11; 16],
            ..Default::default()
        };
        match codec().decode(&header.to_bytes()).unwrap() {
            DecodedPacket::Message { payload, .. } => assert!(payload.is_empty()),
            other => panic!("expected empty message, got {:?}", other),
        }
    }

    #[test]
    fn test_hello_packet_shape() {
        let header = PacketHeader::from_bytes(&HELLO_PACKET).unwrap();
        assert_eq!(header.length, 0x0020);
        assert_eq!(header.payload_len(), 0);
        assert!(HELLO_PACKET[4..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_invalid_hex_token() {
        assert!(matches!(
            PacketCodec::from_hex_token("zz"),
            Err(MiioError::InvalidToken { .. })
        ));
        assert!(matches!(
            PacketCodec::from_hex_token(""),
            Err(MiioError::InvalidToken { .. })
        ));
    }
}
