//! Descriptor pools and the shapes derived from them.
//!
//! Both schema sources end up here: the linker emits `FileDescriptorProto`s
//! for parsed `.proto` files and server reflection answers with serialized
//! ones. They are loaded into a [`DescriptorPool`] next to the
//! `google.protobuf` well-known types, and the tagged shapes used for views
//! and templates are read back from the pool.

use crate::schema::types::{
    Cardinality, EnumShape, FieldShape, FieldType, MessageShape, MethodShape, ScalarType,
    SchemaSet, ServiceShape,
};
use crate::{GrottoError, Result};
use prost_reflect::prost::Message;
use prost_reflect::prost_types::{DescriptorProto, FileDescriptorProto};
use prost_reflect::{Cardinality as Presence, DescriptorPool, FieldDescriptor, Kind, Syntax};
use std::collections::HashSet;

const REFLECTION_ORIGIN: &str = "<reflection>";

/// Decode serialized `FileDescriptorProto` blobs.
pub fn decode_file_descriptors(blobs: &[Vec<u8>]) -> Result<Vec<FileDescriptorProto>> {
    blobs
        .iter()
        .map(|blob| {
            FileDescriptorProto::decode(blob.as_slice()).map_err(|e| {
                GrottoError::SchemaParseError {
                    file: REFLECTION_ORIGIN.to_string(),
                    message: format!("invalid file descriptor: {}", e),
                }
            })
        })
        .collect()
}

/// Build a schema set from file descriptors. Files may arrive in any order.
pub fn schema_from_descriptors(files: Vec<FileDescriptorProto>) -> Result<SchemaSet> {
    schema_from_pool(build_pool(files)?)
}

/// Well-known type files, by file name, with the type names each defines.
pub(crate) fn well_known_files() -> Vec<(String, Vec<String>)> {
    let pool = DescriptorPool::global();
    pool.files()
        .map(|file| {
            let names = pool
                .all_messages()
                .filter(|m| m.parent_file().name() == file.name())
                .map(|m| m.full_name().to_string())
                .chain(
                    pool.all_enums()
                        .filter(|e| e.parent_file().name() == file.name())
                        .map(|e| e.full_name().to_string()),
                )
                .collect();
            (file.name().to_string(), names)
        })
        .collect()
}

/// Well-known files not replaced by the given file names or type names.
///
/// A file is left out when its name is supplied or one of its types is
/// defined elsewhere; files importing a left-out file are left out as well.
pub(crate) fn unshadowed_well_known(
    supplied: &HashSet<&str>,
    defined: &HashSet<String>,
) -> HashSet<String> {
    let global = DescriptorPool::global();
    let mut kept: HashSet<String> = well_known_files()
        .into_iter()
        .filter(|(name, types)| {
            !supplied.contains(name.as_str()) && !types.iter().any(|t| defined.contains(t))
        })
        .map(|(name, _)| name)
        .collect();
    loop {
        let dropped: Vec<String> = global
            .files()
            .filter(|f| kept.contains(f.name()))
            .filter(|f| f.dependencies().any(|d| !kept.contains(d.name())))
            .map(|f| f.name().to_string())
            .collect();
        if dropped.is_empty() {
            return kept;
        }
        for name in dropped {
            kept.remove(&name);
        }
    }
}

/// Fully-qualified names of every message and enum in `files`.
fn defined_names(files: &[FileDescriptorProto]) -> HashSet<String> {
    fn walk(scope: &str, message: &DescriptorProto, out: &mut HashSet<String>) {
        let full_name = format!("{}{}", scope, message.name());
        let nested = format!("{}.", full_name);
        for shape in &message.enum_type {
            out.insert(format!("{}{}", nested, shape.name()));
        }
        for child in &message.nested_type {
            walk(&nested, child, out);
        }
        out.insert(full_name);
    }

    let mut out = HashSet::new();
    for file in files {
        let package = prefix(file.package());
        for message in &file.message_type {
            walk(&package, message, &mut out);
        }
        for shape in &file.enum_type {
            out.insert(format!("{}{}", package, shape.name()));
        }
    }
    out
}

/// Load `files` into a pool on top of the well-known types they do not replace.
fn build_pool(files: Vec<FileDescriptorProto>) -> Result<DescriptorPool> {
    let supplied: HashSet<&str> = files.iter().map(|f| f.name()).collect();
    let kept = unshadowed_well_known(&supplied, &defined_names(&files));
    let mut pool = DescriptorPool::new();
    let well_known = DescriptorPool::global()
        .file_descriptor_protos()
        .filter(|f| kept.contains(f.name()))
        .cloned()
        .collect::<Vec<_>>();
    pool.add_file_descriptor_protos(well_known)
        .map_err(|e| descriptor_error(e, REFLECTION_ORIGIN))?;

    let origin = files
        .first()
        .map(|f| f.name().to_string())
        .unwrap_or_else(|| REFLECTION_ORIGIN.to_string());
    pool.add_file_descriptor_protos(files)
        .map_err(|e| descriptor_error(e, &origin))?;
    Ok(pool)
}

fn descriptor_error(err: prost_reflect::DescriptorError, fallback: &str) -> GrottoError {
    GrottoError::SchemaParseError {
        file: err.file().unwrap_or(fallback).to_string(),
        message: err.to_string(),
    }
}

/// Read shapes for every type and service in `pool`.
fn schema_from_pool(pool: DescriptorPool) -> Result<SchemaSet> {
    let mut set = SchemaSet::new();
    for message in pool.all_messages() {
        if message.is_map_entry() {
            continue;
        }
        let proto3 = message.parent_file().syntax() == Syntax::Proto3;
        let fields = message
            .fields()
            .map(|field| field_shape(&field, proto3))
            .collect::<Result<Vec<_>>>()?;
        set.insert_message(MessageShape {
            full_name: message.full_name().to_string(),
            fields,
        });
    }
    for shape in pool.all_enums() {
        set.insert_enum(EnumShape {
            full_name: shape.full_name().to_string(),
            values: shape
                .values()
                .map(|v| (v.name().to_string(), v.number()))
                .collect(),
        });
    }
    for service in pool.services() {
        let methods = service
            .methods()
            .map(|m| MethodShape {
                name: m.name().to_string(),
                input_type: m.input().full_name().to_string(),
                output_type: m.output().full_name().to_string(),
                client_streaming: m.is_client_streaming(),
                server_streaming: m.is_server_streaming(),
            })
            .collect();
        set.insert_service(ServiceShape {
            full_name: service.full_name().to_string(),
            methods,
        });
    }
    set.set_pool(pool);
    Ok(set)
}

fn field_shape(field: &FieldDescriptor, proto3: bool) -> Result<FieldShape> {
    let ty = field_type(field)?;
    let cardinality = match field.cardinality() {
        Presence::Repeated => Cardinality::Repeated,
        Presence::Required => Cardinality::Singular,
        Presence::Optional if field.field_descriptor_proto().proto3_optional() => {
            Cardinality::Optional
        }
        Presence::Optional if !proto3 => Cardinality::Optional,
        Presence::Optional => Cardinality::Singular,
    };
    let oneof = field
        .containing_oneof()
        .filter(|o| !o.is_synthetic())
        .map(|o| o.name().to_string());
    let packable = matches!(&ty, FieldType::Scalar { scalar } if scalar.is_packable())
        || matches!(ty, FieldType::Enum { .. });
    let unpacked = field.is_list() && packable && !field.is_packed();

    Ok(FieldShape {
        name: field.name().to_string(),
        json_name: field.json_name().to_string(),
        number: field.number(),
        ty,
        cardinality,
        oneof,
        unpacked,
    })
}

fn field_type(field: &FieldDescriptor) -> Result<FieldType> {
    if field.is_map() {
        if let Kind::Message(entry) = field.kind() {
            let key = entry.map_entry_key_field();
            let value = entry.map_entry_value_field();
            let key = scalar_of(&key.kind()).ok_or_else(|| GrottoError::SchemaParseError {
                file: field.parent_file().name().to_string(),
                message: format!("map field {} has an invalid key", field.full_name()),
            })?;
            return Ok(FieldType::Map {
                key,
                value: Box::new(field_type(&value)?),
            });
        }
    }
    Ok(match field.kind() {
        Kind::Message(message) => FieldType::Message {
            name: message.full_name().to_string(),
        },
        Kind::Enum(shape) => FieldType::Enum {
            name: shape.full_name().to_string(),
        },
        other => match scalar_of(&other) {
            Some(scalar) => FieldType::scalar(scalar),
            None => {
                return Err(GrottoError::SchemaParseError {
                    file: field.parent_file().name().to_string(),
                    message: format!("unsupported field type for {}", field.full_name()),
                })
            }
        },
    })
}

fn scalar_of(kind: &Kind) -> Option<ScalarType> {
    Some(match kind {
        Kind::Double => ScalarType::Double,
        Kind::Float => ScalarType::Float,
        Kind::Int32 => ScalarType::Int32,
        Kind::Int64 => ScalarType::Int64,
        Kind::Uint32 => ScalarType::Uint32,
        Kind::Uint64 => ScalarType::Uint64,
        Kind::Sint32 => ScalarType::Sint32,
        Kind::Sint64 => ScalarType::Sint64,
        Kind::Fixed32 => ScalarType::Fixed32,
        Kind::Fixed64 => ScalarType::Fixed64,
        Kind::Sfixed32 => ScalarType::Sfixed32,
        Kind::Sfixed64 => ScalarType::Sfixed64,
        Kind::Bool => ScalarType::Bool,
        Kind::String => ScalarType::String,
        Kind::Bytes => ScalarType::Bytes,
        Kind::Message(_) | Kind::Enum(_) => return None,
    })
}

pub(crate) fn prefix(package: &str) -> String {
    if package.is_empty() {
        String::new()
    } else {
        format!("{}.", package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::StreamingMode;
    use prost_reflect::prost_types::field_descriptor_proto::{Label, Type};
    use prost_reflect::prost_types::{
        EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        FieldOptions, MessageOptions, MethodDescriptorProto, OneofDescriptorProto,
        ServiceDescriptorProto,
    };
    use std::sync::Arc;

    fn field(name: &str, number: i32, ty: Type, label: Label) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(ty as i32),
            label: Some(label as i32),
            ..Default::default()
        }
    }

    fn typed(mut f: FieldDescriptorProto, type_name: &str) -> FieldDescriptorProto {
        f.type_name = Some(type_name.into());
        f
    }

    fn inventory_file() -> FileDescriptorProto {
        let entry = DescriptorProto {
            name: Some("StockEntry".into()),
            field: vec![
                field("key", 1, Type::String, Label::Optional),
                field("value", 2, Type::Int64, Label::Optional),
            ],
            options: Some(MessageOptions {
                map_entry: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut note = field("note", 3, Type::String, Label::Optional);
        note.oneof_index = Some(0);
        let mut counts = field("counts", 4, Type::Int32, Label::Repeated);
        counts.options = Some(FieldOptions {
            packed: Some(false),
            ..Default::default()
        });
        let mut maybe = field("maybe", 6, Type::Int32, Label::Optional);
        maybe.proto3_optional = Some(true);
        maybe.oneof_index = Some(1);

        let query = DescriptorProto {
            name: Some("Query".into()),
            field: vec![
                typed(
                    field("stock", 1, Type::Message, Label::Repeated),
                    ".inv.Query.StockEntry",
                ),
                typed(field("kind", 2, Type::Enum, Label::Optional), ".inv.Kind"),
                note,
                counts,
                field("item_id", 5, Type::Uint64, Label::Optional),
                maybe,
                typed(
                    field("seen", 7, Type::Message, Label::Optional),
                    ".google.protobuf.Timestamp",
                ),
            ],
            nested_type: vec![entry],
            oneof_decl: vec![
                OneofDescriptorProto {
                    name: Some("extra".into()),
                    ..Default::default()
                },
                OneofDescriptorProto {
                    name: Some("_maybe".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        FileDescriptorProto {
            name: Some("inv.proto".into()),
            package: Some("inv".into()),
            syntax: Some("proto3".into()),
            dependency: vec!["google/protobuf/timestamp.proto".into()],
            message_type: vec![query],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Kind".into()),
                value: vec![EnumValueDescriptorProto {
                    name: Some("UNKNOWN".into()),
                    number: Some(0),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: Some("Inventory".into()),
                method: vec![MethodDescriptorProto {
                    name: Some("Watch".into()),
                    input_type: Some(".inv.Query".into()),
                    output_type: Some(".inv.Query".into()),
                    server_streaming: Some(true),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_convert_descriptor() {
        let set = Arc::new(schema_from_descriptors(vec![inventory_file()]).unwrap());

        let query = set.message("inv.Query").unwrap();
        assert!(set.message("inv.Query.StockEntry").is_none());
        assert_eq!(
            query.fields[0].ty,
            FieldType::Map {
                key: ScalarType::String,
                value: Box::new(FieldType::scalar(ScalarType::Int64)),
            }
        );
        assert_eq!(query.fields[1].ty, FieldType::Enum { name: "inv.Kind".into() });
        assert_eq!(query.fields[2].oneof.as_deref(), Some("extra"));
        assert!(query.fields[3].unpacked);
        assert_eq!(query.fields[4].json_name, "itemId");
        assert_eq!(query.fields[5].cardinality, Cardinality::Optional);
        assert_eq!(query.fields[5].oneof, None);

        let md = set.method_descriptor("inv.Inventory", "Watch").unwrap();
        assert_eq!(md.mode, StreamingMode::ServerStreaming);
        assert!(set.pool().get_message_by_name("inv.Query").is_some());
        assert!(set.message("google.protobuf.Timestamp").is_some());
    }

    #[test]
    fn test_decode_round_trip_of_serialized_descriptor() {
        let blob = inventory_file().encode_to_vec();
        let files = decode_file_descriptors(&[blob]).unwrap();
        assert_eq!(files[0].name(), "inv.proto");
    }

    #[test]
    fn test_decode_garbage_is_parse_error() {
        let err = decode_file_descriptors(&[vec![0xff, 0xff, 0xff]]).unwrap_err();
        assert!(matches!(err, GrottoError::SchemaParseError { .. }));
    }

    #[test]
    fn test_missing_import_is_parse_error() {
        let mut file = inventory_file();
        file.dependency.clear();
        let err = schema_from_descriptors(vec![file]).unwrap_err();
        match err {
            GrottoError::SchemaParseError { file, message } => {
                assert_eq!(file, "inv.proto");
                assert!(message.contains("google.protobuf.Timestamp"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_supplied_well_known_file_replaces_builtin() {
        let empty = FileDescriptorProto {
            name: Some("google/protobuf/empty.proto".into()),
            package: Some("google.protobuf".into()),
            syntax: Some("proto3".into()),
            message_type: vec![DescriptorProto {
                name: Some("Empty".into()),
                field: vec![field("marker", 1, Type::String, Label::Optional)],
                ..Default::default()
            }],
            ..Default::default()
        };
        let files = std::slice::from_ref(&empty);
        let supplied = HashSet::from(["google/protobuf/empty.proto"]);
        let kept = unshadowed_well_known(&supplied, &defined_names(files));
        assert!(!kept.contains("google/protobuf/empty.proto"));
        assert!(kept.contains("google/protobuf/timestamp.proto"));

        let set = schema_from_descriptors(vec![empty]).unwrap();
        assert_eq!(set.message("google.protobuf.Empty").unwrap().fields.len(), 1);
        assert!(set.message("google.protobuf.Struct").is_some());
    }
}
