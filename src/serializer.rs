//! Packet serializers.
//!
//! The dispatcher and the mapper proxy only ever see [`Packet`] values; how
//! they are laid out on the bus (and whether they are signed or encrypted)
//! belongs to the serializer handed to them.

use crate::packets::Packet;
use crate::types::{Result, SerializerFormat};
use std::fmt::Debug;
use std::sync::Arc;

/// Encode/decode packets to bus payloads.
pub trait Serializer: Send + Sync + Debug {
    /// Encode a packet.
    fn dump(&self, packet: &Packet) -> Result<Vec<u8>>;

    /// Decode a packet.
    fn load(&self, bytes: &[u8]) -> Result<Packet>;
}

/// Plain JSON encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn dump(&self, packet: &Packet) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(packet)?)
    }

    fn load(&self, bytes: &[u8]) -> Result<Packet> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// MessagePack encoding with named fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackSerializer;

impl Serializer for MsgpackSerializer {
    fn dump(&self, packet: &Packet) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(packet)?)
    }

    fn load(&self, bytes: &[u8]) -> Result<Packet> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Build the serializer selected in configuration.
pub fn from_format(format: SerializerFormat) -> Arc<dyn Serializer> {
    match format {
        SerializerFormat::Json => Arc::new(JsonSerializer),
        SerializerFormat::Msgpack => Arc::new(MsgpackSerializer),
    }
}
