//! Framed packet codec for local-socket streams.
//!
//! Wire frame: `[type: 1 byte][length: 4 bytes little-endian][payload]`.
//! The encoder buffers the whole frame — header reserved first, payload
//! written, length patched — so the transport sees exactly one write per
//! packet. The decoder enforces [`MAX_PAYLOAD_BYTES`] and rejects unknown
//! type tags before buffering their payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::packet::{Packet, PacketType};
use crate::{AppError, Result};

/// Frame header size: one type byte plus a four-byte payload length.
pub const HEADER_BYTES: usize = 5;

/// Maximum accepted payload length: 16 MiB.
///
/// Larger declared lengths indicate a corrupt or hostile stream and fail
/// decoding rather than allocating.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Codec implementing the `[type][length][payload]` frame layout.
#[derive(Debug, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = AppError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(packet.packet_type().tag());

        let length_at = dst.len();
        dst.put_u32_le(0); // reserved, patched below
        let payload_at = dst.len();

        packet.encode_payload(dst);

        let payload_len = dst.len() - payload_at;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(AppError::Protocol(format!(
                "outbound payload of {payload_len} bytes exceeds limit"
            )));
        }
        let length = u32::try_from(payload_len)
            .map_err(|_| AppError::Protocol("outbound payload length overflow".into()))?;
        dst[length_at..payload_at].copy_from_slice(&length.to_le_bytes());
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_BYTES {
            return Ok(None);
        }

        let tag = src[0];
        let packet_type = PacketType::from_tag(tag)
            .ok_or_else(|| AppError::Protocol(format!("unknown packet type tag 0x{tag:02x}")))?;

        let mut length_bytes = [0_u8; 4];
        length_bytes.copy_from_slice(&src[1..HEADER_BYTES]);
        let payload_len = usize::try_from(u32::from_le_bytes(length_bytes))
            .map_err(|_| AppError::Protocol("declared payload length overflow".into()))?;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(AppError::Protocol(format!(
                "declared payload of {payload_len} bytes exceeds limit"
            )));
        }

        if src.len() < HEADER_BYTES + payload_len {
            src.reserve(HEADER_BYTES + payload_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_BYTES);
        let payload = src.split_to(payload_len).freeze();
        Packet::decode(packet_type, payload).map(Some)
    }
}
