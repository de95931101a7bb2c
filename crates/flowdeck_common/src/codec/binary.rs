use codee::{Decoder, Encoder};

use crate::{error::CodecError, FlowdeckMessage, NetworkPacket};

/// Primary codec for flowdeck transports (multi-message mode).
///
/// Frames are an 8-byte little-endian length prefix followed by a
/// bincode-serialized [`NetworkPacket`]. This is the recommended codec for
/// production transports as it supports multiple message types over a
/// single connection.
///
/// The transport layer is responsible for:
/// - Wrapping messages in NetworkPacket before sending
/// - Unwrapping NetworkPacket after receiving
/// - Routing messages based on NetworkPacket.type_name
pub struct FlowdeckBincodeCodec;

// Multi-message encoder: accepts NetworkPacket directly (already wrapped by the transport)
impl Encoder<NetworkPacket> for FlowdeckBincodeCodec {
    type Error = CodecError;
    type Encoded = Vec<u8>;

    fn encode(val: &NetworkPacket) -> Result<Self::Encoded, Self::Error> {
        let encoded_packet = bincode::serde::encode_to_vec(val, bincode::config::standard())
            .map_err(|_| CodecError::Serialization)?;

        let len = encoded_packet.len() as u64;
        let mut buffer = Vec::with_capacity(8 + encoded_packet.len());
        buffer.extend_from_slice(&len.to_le_bytes());
        buffer.extend_from_slice(&encoded_packet);

        Ok(buffer)
    }
}

// Multi-message decoder: returns NetworkPacket directly (transport handles routing)
impl Decoder<NetworkPacket> for FlowdeckBincodeCodec {
    type Error = CodecError;
    type Encoded = [u8];

    fn decode(val: &Self::Encoded) -> Result<NetworkPacket, Self::Error> {
        if val.len() < 8 {
            return Err(CodecError::Truncated);
        }

        let length_bytes: [u8; 8] = val[..8].try_into().map_err(|_| CodecError::Truncated)?;
        let _length = u64::from_le_bytes(length_bytes);

        bincode::serde::decode_from_slice(&val[8..], bincode::config::standard())
            .map(|(packet, _)| packet)
            .map_err(|_| CodecError::Serialization)
    }
}

/// Wrap a single typed message in a length-prefixed [`NetworkPacket`] frame.
///
/// Convenience for transports that want to send one flowdeck message
/// without assembling the packet themselves.
pub fn encode_message<T: FlowdeckMessage>(message: &T) -> Result<Vec<u8>, CodecError> {
    let packet = NetworkPacket {
        type_name: T::type_name().to_string(),
        schema_hash: T::schema_hash(),
        data: bincode::serde::encode_to_vec(message, bincode::config::standard())
            .map_err(|_| CodecError::Serialization)?,
    };
    FlowdeckBincodeCodec::encode(&packet)
}

/// Decode a length-prefixed frame and extract a typed message from it.
///
/// Fails with [`CodecError::Serialization`] if the payload does not decode
/// as `T`; callers multiplexing several types should inspect
/// `NetworkPacket.type_name` via [`FlowdeckBincodeCodec`] instead.
pub fn decode_message<T: FlowdeckMessage>(frame: &[u8]) -> Result<T, CodecError> {
    let packet = FlowdeckBincodeCodec::decode(frame)?;
    bincode::serde::decode_from_slice(&packet.data, bincode::config::standard())
        .map(|(message, _)| message)
        .map_err(|_| CodecError::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::{Position, PositionState, WatchEvent};

    #[test]
    fn test_packet_codec_round_trip() {
        let packet = NetworkPacket {
            type_name: "TestMessage".to_string(),
            schema_hash: 0x1234567890abcdef,
            data: vec![1, 2, 3, 4, 5],
        };

        let enc = FlowdeckBincodeCodec::encode(&packet).unwrap();

        // Should have 8-byte length prefix + encoded packet
        assert!(enc.len() > 8);

        // First 8 bytes should be the length
        let length_bytes: [u8; 8] = enc[..8].try_into().unwrap();
        let length = u64::from_le_bytes(length_bytes);
        assert_eq!(length as usize, enc.len() - 8);

        let dec: NetworkPacket = FlowdeckBincodeCodec::decode(&enc).unwrap();
        assert_eq!(dec.type_name, packet.type_name);
        assert_eq!(dec.schema_hash, packet.schema_hash);
        assert_eq!(dec.data, packet.data);
    }

    #[test]
    fn test_typed_message_round_trip() {
        let event = WatchEvent {
            additions: vec![Position {
                name: "MN12345".to_string(),
                location: None,
                state: PositionState::Running {
                    rpc_endpoints: vec![8000],
                },
                removable: true,
            }],
            changes: vec![],
            removals: vec!["X2".to_string()],
        };

        let frame = encode_message(&event).unwrap();
        let decoded: WatchEvent = decode_message(&frame).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let result: Result<NetworkPacket, _> = FlowdeckBincodeCodec::decode(&[0u8; 4][..]);
        assert!(matches!(result, Err(CodecError::Truncated)));
    }
}
