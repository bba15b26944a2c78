//! Method schemas: parsing, reflection conversion, discovery and resolution.
//!
//! Both schema sources load into a protobuf descriptor pool, which
//! [`crate::codec`] encodes and decodes against. Message shapes (see
//! [`types`]) are a tagged view of the same definitions for listings and
//! payload templates.

mod descriptor;
mod discovery;
mod linker;
mod parser;
mod resolver;
mod types;
mod view;

pub use descriptor::{decode_file_descriptors, schema_from_descriptors};
pub use discovery::{fingerprint, ProtoDiscovery};
pub use linker::compile_sources;
pub use parser::{parse_proto, ProtoFile};
pub use resolver::{Catalogue, SchemaResolver};
pub use types::{
    json_name, short_name, Cardinality, EnumShape, FieldShape, FieldType, MessageShape,
    MethodDescriptor, MethodRef, MethodShape, MethodSummary, ScalarType, SchemaSet,
    ServiceShape, ServiceSummary, StreamingMode,
};
pub use view::{template, FieldView, MessageView};
