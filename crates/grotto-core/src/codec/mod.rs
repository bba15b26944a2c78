//! JSON ⇄ protobuf codec over dynamic messages.
//!
//! Payloads follow the protobuf JSON mapping, including the well-known
//! types (`Timestamp`, `Duration`, wrappers, `Struct`, `Any`, ...). Fields
//! are accepted by JSON name or proto name and unknown fields are rejected.
//! Decoded output uses JSON names and includes zero values of fields
//! without presence.

use crate::schema::{MessageShape, SchemaSet};
use crate::{GrottoError, Result};
use bytes::Bytes;
use prost_reflect::prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::Value;
use std::fmt::Display;

fn descriptor(schema: &SchemaSet, shape: &MessageShape) -> Result<MessageDescriptor> {
    schema
        .pool()
        .get_message_by_name(&shape.full_name)
        .ok_or_else(|| GrottoError::encoding(format!("no descriptor for {}", shape.full_name)))
}

fn invalid(shape: &MessageShape, err: impl Display) -> GrottoError {
    GrottoError::encoding(format!("invalid {} payload: {}", shape.full_name, err))
}

/// Encode a JSON document against `shape`. Blank text encodes the empty message.
pub fn encode_json(schema: &SchemaSet, shape: &MessageShape, text: &str) -> Result<Bytes> {
    let desc = descriptor(schema, shape)?;
    if text.trim().is_empty() {
        return Ok(Bytes::new());
    }

    let options = DeserializeOptions::new();
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let message = DynamicMessage::deserialize_with_options(desc, &mut deserializer, &options)
        .map_err(|e| invalid(shape, e))?;
    deserializer.end().map_err(|e| invalid(shape, e))?;
    Ok(Bytes::from(message.encode_to_vec()))
}

/// Decode protobuf bytes into a JSON value.
pub fn decode_value(schema: &SchemaSet, shape: &MessageShape, bytes: &[u8]) -> Result<Value> {
    let desc = descriptor(schema, shape)?;
    let message = DynamicMessage::decode(desc, bytes).map_err(|e| {
        GrottoError::encoding(format!("malformed {} message: {}", shape.full_name, e))
    })?;
    let options = SerializeOptions::new().skip_default_fields(false);
    message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .map_err(|e| GrottoError::encoding(format!("cannot render {}: {}", shape.full_name, e)))
}

/// Decode protobuf bytes into pretty-printed JSON text.
pub fn decode_to_text(schema: &SchemaSet, shape: &MessageShape, bytes: &[u8]) -> Result<String> {
    let value = decode_value(schema, shape, bytes)?;
    Ok(serde_json::to_string_pretty(&value)?)
}
