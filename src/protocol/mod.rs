//! Binary packet protocol spoken between client, worker, and build nodes.
//!
//! Frames are `[type: 1 byte][length: 4 bytes little-endian][payload]`.
//! Payload encoding is hand-rolled little-endian binary ([`wire`]); the
//! framing layer ([`codec`]) treats it as opaque bytes. Every packet type
//! and payload struct lives in [`packet`].

pub mod codec;
pub mod packet;
pub mod wire;

pub use codec::{PacketCodec, HEADER_BYTES, MAX_PAYLOAD_BYTES};
pub use packet::{
    BuildCommandPayload, BuildResultPayload, ConsoleDescriptor, ConsoleStream,
    ConsoleWritePayload, Packet, PacketType, ResolveRequestPayload, ResolveResponsePayload,
};
