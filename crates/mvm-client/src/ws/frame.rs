//! RFC 6455 framing, client half.
//!
//! Outbound frames are always FIN=1 and masked, as the client side of the
//! protocol requires. Inbound frames are read one at a time; fragmentation
//! (FIN=0 or a continuation opcode) is a protocol violation here because the
//! gateway sends one envelope per text frame, and a violation forces a
//! reconnect rather than a resync attempt.

use tokio::io::{AsyncRead, AsyncReadExt};

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xA => OpCode::Pong,
            _ => return None,
        })
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("fragmented frame")]
    Fragmented,
    #[error("reserved bits set")]
    ReservedBits,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("control frame with {0}-byte payload")]
    OversizedControl(u64),
    #[error("frame payload of {len} bytes exceeds cap of {cap}")]
    TooLarge { len: u64, cap: usize },
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// XOR the payload with the 4-byte mask, per RFC 6455 §5.3.
pub fn apply_mask(mask: [u8; 4], data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encode a complete masked frame.
///
/// Payload length uses the 7-bit form below 126 bytes, the 16-bit form up
/// to 65535, and the 64-bit form beyond.
pub fn encode(opcode: OpCode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    debug_assert!(!opcode.is_control() || payload.len() <= 125);

    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 14);
    frame.push(0x80 | opcode as u8);

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(&mask);
    let start = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(mask, &mut frame[start..]);
    frame
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Read exactly one frame.
///
/// Servers should not mask, but a masked inbound frame is unmasked rather
/// than rejected. Payloads above `max_payload` are a capacity violation.
pub async fn read_frame<R>(reader: &mut R, max_payload: usize) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    if header[0] & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let fin = header[0] & 0x80 != 0;
    let opcode =
        OpCode::from_u8(header[0] & 0x0F).ok_or(FrameError::UnknownOpcode(header[0] & 0x0F))?;
    if !fin || opcode == OpCode::Continuation {
        return Err(FrameError::Fragmented);
    }

    let masked = header[1] & 0x80 != 0;
    let len = match header[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u64::from(u16::from_be_bytes(ext))
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
        small => u64::from(small),
    };

    if opcode.is_control() && len > 125 {
        return Err(FrameError::OversizedControl(len));
    }
    if len > max_payload as u64 {
        return Err(FrameError::TooLarge {
            len,
            cap: max_payload,
        });
    }

    let mask = if masked {
        let mut mask = [0u8; 4];
        reader.read_exact(&mut mask).await?;
        Some(mask)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        apply_mask(mask, &mut payload);
    }

    Ok(Frame { opcode, payload })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    #[test]
    fn encode_small_frame_layout() {
        // 5-byte text frame: 2 header + 4 mask + 5 payload.
        let frame = encode(OpCode::Text, b"hello", MASK);
        assert_eq!(frame.len(), 2 + 4 + 5);
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 0x80 | 5);
        assert_eq!(&frame[2..6], &MASK);
        assert_eq!(frame[6], b'h' ^ MASK[0]);
    }

    #[test]
    fn length_encoding_boundaries() {
        // 125: last 7-bit length.
        let frame = encode(OpCode::Text, &vec![0u8; 125], MASK);
        assert_eq!(frame[1] & 0x7F, 125);
        assert_eq!(frame.len(), 2 + 4 + 125);

        // 126: first 16-bit length.
        let frame = encode(OpCode::Text, &vec![0u8; 126], MASK);
        assert_eq!(frame[1] & 0x7F, 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 126);
        assert_eq!(frame.len(), 4 + 4 + 126);

        // 65535: last 16-bit length.
        let frame = encode(OpCode::Text, &vec![0u8; 65535], MASK);
        assert_eq!(frame[1] & 0x7F, 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 65535);

        // 65536: first 64-bit length.
        let frame = encode(OpCode::Text, &vec![0u8; 65536], MASK);
        assert_eq!(frame[1] & 0x7F, 127);
        let mut ext = [0u8; 8];
        ext.copy_from_slice(&frame[2..10]);
        assert_eq!(u64::from_be_bytes(ext), 65536);
        assert_eq!(frame.len(), 10 + 4 + 65536);
    }

    #[test]
    fn mask_round_trips() {
        let mut data = b"some payload".to_vec();
        let original = data.clone();
        apply_mask(MASK, &mut data);
        assert_ne!(data, original);
        apply_mask(MASK, &mut data);
        assert_eq!(data, original);
    }

    #[tokio::test]
    async fn decode_recovers_masked_payload() {
        let wire = encode(OpCode::Text, b"hello mesh", MASK);
        let mut reader: &[u8] = &wire;
        let frame = read_frame(&mut reader, 8192).await.unwrap();
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"hello mesh");
    }

    #[tokio::test]
    async fn decode_unmasked_server_frame() {
        // Server-style frame: no mask bit.
        let mut wire = vec![0x81, 3];
        wire.extend_from_slice(b"abc");
        let mut reader: &[u8] = &wire;
        let frame = read_frame(&mut reader, 8192).await.unwrap();
        assert_eq!(frame.payload, b"abc");
    }

    #[tokio::test]
    async fn decode_extended_lengths() {
        for len in [126usize, 65535, 65536] {
            let wire = encode(OpCode::Binary, &vec![0xAB; len], MASK);
            let mut reader: &[u8] = &wire;
            let frame = read_frame(&mut reader, len).await.unwrap();
            assert_eq!(frame.payload.len(), len);
            assert!(frame.payload.iter().all(|&b| b == 0xAB));
        }
    }

    #[tokio::test]
    async fn fragmented_frame_is_rejected() {
        // FIN=0 text frame.
        let wire = vec![0x01, 0x00];
        let mut reader: &[u8] = &wire;
        assert!(matches!(
            read_frame(&mut reader, 8192).await,
            Err(FrameError::Fragmented)
        ));

        // Continuation opcode, even with FIN set.
        let wire = vec![0x80, 0x00];
        let mut reader: &[u8] = &wire;
        assert!(matches!(
            read_frame(&mut reader, 8192).await,
            Err(FrameError::Fragmented)
        ));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let wire = encode(OpCode::Text, &vec![0u8; 8193], MASK);
        let mut reader: &[u8] = &wire;
        assert!(matches!(
            read_frame(&mut reader, 8192).await,
            Err(FrameError::TooLarge { len: 8193, cap: 8192 })
        ));
    }

    #[tokio::test]
    async fn reserved_bits_are_rejected() {
        let wire = vec![0xC1, 0x00];
        let mut reader: &[u8] = &wire;
        assert!(matches!(
            read_frame(&mut reader, 8192).await,
            Err(FrameError::ReservedBits)
        ));
    }

    #[tokio::test]
    async fn control_frames_cap_at_125() {
        // Hand-build a ping header claiming a 126-byte payload.
        let wire = vec![0x89, 126, 0x00, 126];
        let mut reader: &[u8] = &wire;
        assert!(matches!(
            read_frame(&mut reader, 8192).await,
            Err(FrameError::OversizedControl(126))
        ));
    }
}
