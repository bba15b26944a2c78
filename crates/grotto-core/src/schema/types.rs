//! Tagged schema representation.
//!
//! Messages are described as plain field lists (name, number, type,
//! cardinality) for listings, views and payload templates. The descriptor
//! pool the lists were read from travels with them in [`SchemaSet`].

use crate::{GrottoError, Result};
use prost_reflect::DescriptorPool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Streaming shape of an RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

impl StreamingMode {
    pub fn from_flags(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => StreamingMode::Unary,
            (true, false) => StreamingMode::ClientStreaming,
            (false, true) => StreamingMode::ServerStreaming,
            (true, true) => StreamingMode::BidiStreaming,
        }
    }

    /// Whether the client may send more than one message.
    pub fn client_streams(self) -> bool {
        matches!(
            self,
            StreamingMode::ClientStreaming | StreamingMode::BidiStreaming
        )
    }

    pub fn server_streams(self) -> bool {
        matches!(
            self,
            StreamingMode::ServerStreaming | StreamingMode::BidiStreaming
        )
    }
}

impl fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamingMode::Unary => "unary",
            StreamingMode::ClientStreaming => "client-streaming",
            StreamingMode::ServerStreaming => "server-streaming",
            StreamingMode::BidiStreaming => "bidirectional-streaming",
        };
        f.write_str(s)
    }
}

/// Protobuf scalar value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "sint32" => ScalarType::Sint32,
            "sint64" => ScalarType::Sint64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::Sfixed32,
            "sfixed64" => ScalarType::Sfixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::Sfixed32 => "sfixed32",
            ScalarType::Sfixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    /// Length-delimited scalars cannot be packed.
    pub fn is_packable(self) -> bool {
        !matches!(self, ScalarType::String | ScalarType::Bytes)
    }

    /// Types allowed as map keys.
    pub fn is_valid_map_key(self) -> bool {
        !matches!(
            self,
            ScalarType::Double | ScalarType::Float | ScalarType::Bytes
        )
    }
}

/// The type of a message field. Named types are fully qualified without a
/// leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    Scalar { scalar: ScalarType },
    Enum { name: String },
    Message { name: String },
    Map { key: ScalarType, value: Box<FieldType> },
}

impl FieldType {
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldType::Scalar { scalar }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            FieldType::Scalar { scalar } => scalar.keyword(),
            FieldType::Enum { .. } => "enum",
            FieldType::Message { .. } => "message",
            FieldType::Map { .. } => "map",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Implicit presence (proto3 default) or proto2 `required`.
    Singular,
    /// Explicit presence (`optional`).
    Optional,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: String,
    pub json_name: String,
    pub number: u32,
    pub ty: FieldType,
    pub cardinality: Cardinality,
    /// Name of the containing real oneof, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oneof: Option<String>,
    /// Set when `[packed = false]` is declared on a repeated scalar.
    #[serde(default)]
    pub unpacked: bool,
}

impl FieldShape {
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated && !matches!(self.ty, FieldType::Map { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageShape {
    pub full_name: String,
    pub fields: Vec<FieldShape>,
}

impl MessageShape {
    pub fn short_name(&self) -> &str {
        short_name(&self.full_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumShape {
    pub full_name: String,
    pub values: Vec<(String, i32)>,
}

impl EnumShape {
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| *v == number)
            .map(|(n, _)| n.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodShape {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceShape {
    pub full_name: String,
    pub methods: Vec<MethodShape>,
}

/// An indexed, type-resolved collection of schema definitions.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    messages: BTreeMap<String, Arc<MessageShape>>,
    enums: BTreeMap<String, Arc<EnumShape>>,
    services: BTreeMap<String, ServiceShape>,
    pool: DescriptorPool,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_message(&mut self, message: MessageShape) {
        self.messages
            .insert(message.full_name.clone(), Arc::new(message));
    }

    pub fn insert_enum(&mut self, shape: EnumShape) {
        self.enums.insert(shape.full_name.clone(), Arc::new(shape));
    }

    pub fn insert_service(&mut self, service: ServiceShape) {
        self.services.insert(service.full_name.clone(), service);
    }

    pub fn message(&self, full_name: &str) -> Option<&Arc<MessageShape>> {
        self.messages.get(full_name)
    }

    pub fn enum_shape(&self, full_name: &str) -> Option<&Arc<EnumShape>> {
        self.enums.get(full_name)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceShape> {
        self.services.values()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.messages.is_empty()
    }

    /// Descriptors the shapes were read from; the codec works against these.
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub(crate) fn set_pool(&mut self, pool: DescriptorPool) {
        self.pool = pool;
    }

    /// Build a descriptor for `service`/`method` backed by this set.
    pub fn method_descriptor(
        self: &Arc<Self>,
        service: &str,
        method: &str,
    ) -> Result<MethodDescriptor> {
        let not_found = || GrottoError::SchemaNotFound {
            name: format!("{}/{}", service, method),
        };
        let svc = self.services.get(service).ok_or_else(not_found)?;
        let shape = svc
            .methods
            .iter()
            .find(|m| m.name == method)
            .ok_or_else(not_found)?;
        let input = self.message(&shape.input_type).cloned().ok_or_else(not_found)?;
        let output = self
            .message(&shape.output_type)
            .cloned()
            .ok_or_else(not_found)?;

        Ok(MethodDescriptor {
            service: service.to_string(),
            method: method.to_string(),
            mode: StreamingMode::from_flags(shape.client_streaming, shape.server_streaming),
            input,
            output,
            schema: Arc::clone(self),
        })
    }

    /// Services and their methods, both sorted by fully-qualified name.
    pub fn catalogue(&self) -> Vec<ServiceSummary> {
        self.services
            .values()
            .map(|svc| {
                let mut methods: Vec<MethodSummary> = svc
                    .methods
                    .iter()
                    .map(|m| MethodSummary {
                        name: m.name.clone(),
                        full_name: format!("/{}/{}", svc.full_name, m.name),
                        client_stream: m.client_streaming,
                        server_stream: m.server_streaming,
                    })
                    .collect();
                methods.sort_by(|a, b| a.name.cmp(&b.name));
                ServiceSummary {
                    full_name: svc.full_name.clone(),
                    methods,
                }
            })
            .collect()
    }
}

/// A fully resolved RPC method, immutable once built.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub service: String,
    pub method: String,
    pub mode: StreamingMode,
    pub input: Arc<MessageShape>,
    pub output: Arc<MessageShape>,
    /// The set the shapes came from; nested types are looked up here.
    pub schema: Arc<SchemaSet>,
}

impl MethodDescriptor {
    /// gRPC request path, `/package.Service/Method`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    /// Dotted fully-qualified name, `package.Service.Method`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

impl PartialEq for MethodDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.service == other.service
            && self.method == other.method
            && self.mode == other.mode
            && self.input == other.input
            && self.output == other.output
    }
}

/// A parsed method reference: service and method names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub service: String,
    pub method: String,
}

impl MethodRef {
    /// Accepts `/pkg.Service/Method`, `pkg.Service/Method` and `pkg.Service.Method`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_start_matches('/');
        let invalid = || GrottoError::InvalidParams {
            message: format!("invalid method reference: {:?}", input),
        };

        let (service, method) = match trimmed.split_once('/') {
            Some((s, m)) => (s, m),
            None => trimmed.rsplit_once('.').ok_or_else(invalid)?,
        };
        if service.is_empty() || method.is_empty() || method.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            service: service.to_string(),
            method: method.to_string(),
        })
    }

    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.service, self.method)
    }
}

/// Listing entry for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub full_name: String,
    pub methods: Vec<MethodSummary>,
}

/// Listing entry for one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSummary {
    pub name: String,
    pub full_name: String,
    pub client_stream: bool,
    pub server_stream: bool,
}

/// Final path component of a dotted name.
pub fn short_name(full_name: &str) -> &str {
    full_name.rsplit('.').next().unwrap_or(full_name)
}

/// protoc's default JSON name: underscores dropped, following letter upper-cased.
pub fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
