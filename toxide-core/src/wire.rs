//! Framing: length-prefix (4 bytes LE) + version byte + bincode payload.

use crate::protocol::{Packet, PROTOCOL_VERSION};

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Encode a packet into a single frame.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(packet).map_err(FrameEncodeError::Encode)?;
    let len = (payload.len() + 1) as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + 1 + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode the frame at the front of `bytes`, returning the packet and the bytes used.
pub fn decode_frame(bytes: &[u8]) -> Result<(Packet, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if len == 0 {
        return Err(FrameDecodeError::Empty);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let version = bytes[LEN_SIZE];
    if version != PROTOCOL_VERSION {
        return Err(FrameDecodeError::Version(version));
    }
    let packet: Packet = bincode::deserialize(&bytes[LEN_SIZE + 1..LEN_SIZE + len])
        .map_err(FrameDecodeError::Decode)?;
    Ok((packet, LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("empty frame")]
    Empty,
    #[error("unsupported protocol version {0}")]
    Version(u8),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageKind, UserStatus};

    fn sample_info() -> Packet {
        Packet::Info {
            name: "alice".into(),
            status_message: "around".into(),
            status: UserStatus::Away,
        }
    }

    #[test]
    fn roundtrip_info() {
        let packet = sample_info();
        let frame = encode_frame(&packet).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(&sample_info()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut frame = encode_frame(&Packet::Online).unwrap();
        frame[LEN_SIZE] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::Version(_))
        ));
    }

    #[test]
    fn oversized_and_empty_frames() {
        let big = Packet::FileData {
            file: 0,
            data: vec![0; MAX_FRAME_LEN as usize],
        };
        assert!(matches!(encode_frame(&big), Err(FrameEncodeError::TooLarge)));
        assert!(matches!(
            decode_frame(&[0, 0, 0, 0]),
            Err(FrameDecodeError::Empty)
        ));
        let huge = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(matches!(decode_frame(&huge), Err(FrameDecodeError::TooLarge)));
    }

    #[test]
    fn back_to_back_frames() {
        let message = Packet::Message {
            id: 7,
            kind: MessageKind::Action,
            text: "waves".into(),
        };
        let mut buf = encode_frame(&sample_info()).unwrap();
        buf.extend(encode_frame(&message).unwrap());
        let (first, used) = decode_frame(&buf).unwrap();
        assert_eq!(first, sample_info());
        assert_eq!(decode_frame(&buf[used..]).unwrap(), (message, buf.len() - used));
    }
}
