//! Framing: length-prefix (4 bytes LE) + bincode payload.

use crate::protocol::Message;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024; // 4 MiB

/// Encode a message into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the
/// number of bytes consumed.
///
/// Decoding is total: an unknown discriminator, wrong payload shape, or a
/// truncated/oversized frame comes back as an error for the caller to drop,
/// never a panic. Call with a partial buffer; `NeedMore` means try again
/// after more data.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg: Message =
        bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len]).map_err(FrameDecodeError::Decode)?;
    Ok((msg, LEN_SIZE + len))
}

/// Error decoding a frame (need more bytes, too large, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_request() {
        let msg = Message::Request { key: "x".into() };
        let frame = encode_frame(&msg).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn roundtrip_response_with_value() {
        let msg = Message::Response {
            key: "x".into(),
            value: Some(vec![1, 2, 3]),
        };
        let frame = encode_frame(&msg).unwrap();
        let (decoded, _) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn roundtrip_response_absent_value() {
        let msg = Message::Response {
            key: "x".into(),
            value: None,
        };
        let frame = encode_frame(&msg).unwrap();
        let (decoded, _) = decode_frame(&frame).unwrap();
        match decoded {
            Message::Response { key, value } => {
                assert_eq!(key, "x");
                assert!(value.is_none());
            }
            other => panic!("expected Response, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_insert_preserves_key_order() {
        let msg = Message::Insert {
            keys: vec!["a".into(), "b".into(), "c".into()],
        };
        let frame = encode_frame(&msg).unwrap();
        let (decoded, _) = decode_frame(&frame).unwrap();
        match decoded {
            Message::Insert { keys } => assert_eq!(keys, vec!["a", "b", "c"]),
            other => panic!("expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_delete() {
        let msg = Message::Delete {
            keys: vec!["a".into(), "b".into()],
        };
        let frame = encode_frame(&msg).unwrap();
        let (decoded, _) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn partial_read_need_more() {
        let msg = Message::Request { key: "x".into() };
        let frame = encode_frame(&msg).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..LEN_SIZE]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn multiple_messages() {
        let a = Message::Insert {
            keys: vec!["a".into()],
        };
        let b = Message::Request { key: "a".into() };
        let fa = encode_frame(&a).unwrap();
        let fb = encode_frame(&b).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&fa);
        buf.extend_from_slice(&fb);
        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(n1, fa.len());
        let (m2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(n2, fb.len());
        assert!(matches!(m1, Message::Insert { .. }));
        assert!(matches!(m2, Message::Request { .. }));
    }

    #[test]
    fn garbage_decodes_to_error_not_panic() {
        // Valid length prefix, nonsense payload.
        let mut buf = vec![0u8; LEN_SIZE + 8];
        buf[0] = 8;
        for (i, b) in buf[LEN_SIZE..].iter_mut().enumerate() {
            *b = 0xC0u8.wrapping_add(i as u8);
        }
        assert!(matches!(
            decode_frame(&buf),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = vec![0u8; LEN_SIZE];
        buf[..LEN_SIZE].copy_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        assert!(matches!(
            decode_frame(&buf),
            Err(FrameDecodeError::TooLarge)
        ));
    }
}
