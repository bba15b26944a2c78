//! Links parsed `.proto` files into a [`SchemaSet`].
//!
//! Type references are resolved with protobuf scoping: a relative name is
//! looked up from the innermost enclosing scope outwards, a leading dot makes
//! it absolute. The `google.protobuf` well-known types are always available
//! even when their files are not on disk. Linked files are emitted as
//! `FileDescriptorProto`s and loaded into the set's descriptor pool.

use crate::schema::descriptor::{schema_from_descriptors, unshadowed_well_known, well_known_files};
use crate::schema::parser::{parse_proto, ProtoFile, RawField};
use crate::schema::types::{json_name, Cardinality, FieldShape, FieldType, ScalarType, SchemaSet};
use crate::{GrottoError, Result};
use prost_reflect::prost_types::field_descriptor_proto::{Label, Type};
use prost_reflect::prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumOptions, EnumValueDescriptorProto,
    FieldDescriptorProto, FieldOptions, FileDescriptorProto, MessageOptions,
    MethodDescriptorProto, OneofDescriptorProto, ServiceDescriptorProto,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Message,
    Enum,
}

/// Fully-qualified type name to its kind and defining file.
type Kinds = HashMap<String, (Kind, String)>;

/// Parse and link `(origin, source)` pairs into one schema set.
///
/// Duplicate definitions across files are an error; well-known types are
/// only added where the inputs do not define them.
pub fn compile_sources(sources: &[(String, String)]) -> Result<SchemaSet> {
    let mut files = Vec::with_capacity(sources.len());
    for (origin, source) in sources {
        files.push(parse_proto(origin, source)?);
    }
    link(&files)
}

/// Link already-parsed files.
pub fn link(files: &[ProtoFile]) -> Result<SchemaSet> {
    let mut kinds: Kinds = HashMap::new();
    for file in files {
        for message in &file.messages {
            declare(&mut kinds, &message.full_name, Kind::Message, &file.origin)?;
        }
        for shape in &file.enums {
            declare(&mut kinds, &shape.full_name, Kind::Enum, &file.origin)?;
        }
    }

    let supplied: HashSet<&str> = files.iter().map(|f| f.origin.as_str()).collect();
    let defined: HashSet<String> = kinds.keys().cloned().collect();
    let kept = unshadowed_well_known(&supplied, &defined);
    let global = prost_reflect::DescriptorPool::global();
    for (origin, names) in well_known_files() {
        if !kept.contains(&origin) {
            continue;
        }
        for name in names {
            let kind = if global.get_enum_by_name(&name).is_some() {
                Kind::Enum
            } else {
                Kind::Message
            };
            kinds.entry(name).or_insert((kind, origin.clone()));
        }
    }

    let mut descriptors = Vec::with_capacity(files.len());
    for file in files {
        descriptors.push(file_descriptor(&kinds, file)?);
    }
    let set = schema_from_descriptors(descriptors)?;

    debug!(
        "Linked {} file(s): {} service(s)",
        files.len(),
        set.services().count()
    );
    Ok(set)
}

fn file_descriptor(kinds: &Kinds, file: &ProtoFile) -> Result<FileDescriptorProto> {
    let mut dependencies = BTreeSet::new();
    let mut depend = |name: &str| {
        if let Some((_, origin)) = kinds.get(name) {
            if *origin != file.origin {
                dependencies.insert(origin.clone());
            }
        }
    };

    let mut linked: HashMap<&str, Vec<FieldShape>> = HashMap::new();
    for message in &file.messages {
        let mut fields = Vec::with_capacity(message.fields.len());
        for raw in &message.fields {
            let field = link_field(kinds, file, &message.full_name, raw)?;
            match &field.ty {
                FieldType::Message { name } | FieldType::Enum { name } => depend(name),
                FieldType::Map { value, .. } => {
                    if let FieldType::Message { name } | FieldType::Enum { name } = value.as_ref() {
                        depend(name);
                    }
                }
                FieldType::Scalar { .. } => {}
            }
            fields.push(field);
        }
        linked.insert(message.full_name.as_str(), fields);
    }

    let mut services = Vec::with_capacity(file.services.len());
    for service in &file.services {
        let mut methods = Vec::with_capacity(service.methods.len());
        for method in &service.methods {
            let at = |name: &str| {
                resolve_kind(kinds, &file.package, name, Kind::Message).ok_or_else(|| {
                    GrottoError::SchemaParseError {
                        file: file.origin.clone(),
                        message: format!(
                            "line {}: unknown message type {} in {}.{}",
                            method.line, name, service.full_name, method.name
                        ),
                    }
                })
            };
            let input = at(&method.input_type)?;
            let output = at(&method.output_type)?;
            depend(&input);
            depend(&output);
            methods.push(MethodDescriptorProto {
                name: Some(method.name.clone()),
                input_type: Some(format!(".{}", input)),
                output_type: Some(format!(".{}", output)),
                client_streaming: Some(method.client_streaming),
                server_streaming: Some(method.server_streaming),
                ..Default::default()
            });
        }
        services.push(ServiceDescriptorProto {
            name: Some(local_name(&service.full_name).to_string()),
            method: methods,
            ..Default::default()
        });
    }

    let scope = Scope {
        file,
        linked: &linked,
        messages: file.messages.iter().map(|m| m.full_name.as_str()).collect(),
    };
    let top_messages = file
        .messages
        .iter()
        .filter(|m| scope.parent_of(&m.full_name).is_none())
        .map(|m| scope.message_proto(&m.full_name))
        .collect();
    let top_enums = file
        .enums
        .iter()
        .filter(|e| scope.parent_of(&e.full_name).is_none())
        .map(|e| enum_proto(&e.full_name, &e.values))
        .collect();

    Ok(FileDescriptorProto {
        name: Some(file.origin.clone()),
        package: (!file.package.is_empty()).then(|| file.package.clone()),
        dependency: dependencies.into_iter().collect(),
        message_type: top_messages,
        enum_type: top_enums,
        service: services,
        syntax: Some(if file.proto3 { "proto3" } else { "proto2" }.to_string()),
        ..Default::default()
    })
}

/// One file's messages, for rebuilding nesting from qualified names.
struct Scope<'a> {
    file: &'a ProtoFile,
    linked: &'a HashMap<&'a str, Vec<FieldShape>>,
    messages: HashSet<&'a str>,
}

impl<'a> Scope<'a> {
    /// The enclosing message of `full_name` when it is declared in this file.
    fn parent_of<'n>(&self, full_name: &'n str) -> Option<&'n str> {
        let (parent, _) = full_name.rsplit_once('.')?;
        self.messages.contains(parent).then_some(parent)
    }

    fn message_proto(&self, full_name: &str) -> DescriptorProto {
        let mut nested_type: Vec<DescriptorProto> = self
            .file
            .messages
            .iter()
            .filter(|m| self.parent_of(&m.full_name) == Some(full_name))
            .map(|m| self.message_proto(&m.full_name))
            .collect();
        let enum_type = self
            .file
            .enums
            .iter()
            .filter(|e| self.parent_of(&e.full_name) == Some(full_name))
            .map(|e| enum_proto(&e.full_name, &e.values))
            .collect();

        let fields = self.linked.get(full_name).map(Vec::as_slice).unwrap_or(&[]);
        let mut oneof_decl: Vec<OneofDescriptorProto> = Vec::new();
        let mut real: Vec<&str> = Vec::new();
        for field in fields {
            if let Some(name) = field.oneof.as_deref() {
                if !real.contains(&name) {
                    real.push(name);
                }
            }
        }
        for name in &real {
            oneof_decl.push(OneofDescriptorProto {
                name: Some(name.to_string()),
                ..Default::default()
            });
        }

        let mut field = Vec::with_capacity(fields.len());
        for shape in fields {
            let mut proto = field_proto(full_name, shape, self.file.proto3);
            if let Some(name) = shape.oneof.as_deref() {
                proto.oneof_index = real.iter().position(|r| *r == name).map(|i| i as i32);
            } else if self.file.proto3 && shape.cardinality == Cardinality::Optional {
                proto.proto3_optional = Some(true);
                proto.oneof_index = Some(oneof_decl.len() as i32);
                oneof_decl.push(OneofDescriptorProto {
                    name: Some(format!("_{}", shape.name)),
                    ..Default::default()
                });
            }
            if let FieldType::Map { key, value } = &shape.ty {
                nested_type.push(map_entry(&shape.name, *key, value));
            }
            field.push(proto);
        }

        DescriptorProto {
            name: Some(local_name(full_name).to_string()),
            field,
            nested_type,
            enum_type,
            oneof_decl,
            ..Default::default()
        }
    }
}

fn field_proto(message: &str, shape: &FieldShape, proto3: bool) -> FieldDescriptorProto {
    let label = match shape.cardinality {
        Cardinality::Repeated => Label::Repeated,
        Cardinality::Singular if !proto3 && shape.oneof.is_none() => Label::Required,
        _ => Label::Optional,
    };
    let (ty, type_name) = match &shape.ty {
        FieldType::Map { .. } => (
            Type::Message,
            Some(format!(".{}.{}", message, entry_name(&shape.name))),
        ),
        other => type_of(other),
    };
    let packable = matches!(&shape.ty, FieldType::Scalar { scalar } if scalar.is_packable())
        || matches!(shape.ty, FieldType::Enum { .. });
    let options = (shape.is_repeated() && packable).then(|| FieldOptions {
        packed: Some(!shape.unpacked),
        ..Default::default()
    });

    FieldDescriptorProto {
        name: Some(shape.name.clone()),
        number: Some(shape.number as i32),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        type_name,
        json_name: Some(shape.json_name.clone()),
        options,
        ..Default::default()
    }
}

fn type_of(ty: &FieldType) -> (Type, Option<String>) {
    match ty {
        FieldType::Scalar { scalar } => (scalar_type(*scalar), None),
        FieldType::Enum { name } => (Type::Enum, Some(format!(".{}", name))),
        FieldType::Message { name } => (Type::Message, Some(format!(".{}", name))),
        FieldType::Map { .. } => (Type::Message, None),
    }
}

/// protoc's map entry name: `names_by_id` becomes `NamesByIdEntry`.
fn entry_name(field: &str) -> String {
    let camel = json_name(field);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => format!("{}{}Entry", first.to_uppercase(), chars.as_str()),
        None => "Entry".to_string(),
    }
}

fn map_entry(field: &str, key: ScalarType, value: &FieldType) -> DescriptorProto {
    let entry_field = |name: &str, number: i32, (ty, type_name): (Type, Option<String>)| {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(ty as i32),
            type_name,
            json_name: Some(name.to_string()),
            ..Default::default()
        }
    };
    DescriptorProto {
        name: Some(entry_name(field)),
        field: vec![
            entry_field("key", 1, (scalar_type(key), None)),
            entry_field("value", 2, type_of(value)),
        ],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn enum_proto(full_name: &str, values: &[(String, i32)]) -> EnumDescriptorProto {
    let mut numbers = HashSet::new();
    let aliased = values.iter().any(|(_, n)| !numbers.insert(*n));
    EnumDescriptorProto {
        name: Some(local_name(full_name).to_string()),
        value: values
            .iter()
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some(name.clone()),
                number: Some(*number),
                ..Default::default()
            })
            .collect(),
        options: aliased.then(|| EnumOptions {
            allow_alias: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn scalar_type(scalar: ScalarType) -> Type {
    match scalar {
        ScalarType::Double => Type::Double,
        ScalarType::Float => Type::Float,
        ScalarType::Int32 => Type::Int32,
        ScalarType::Int64 => Type::Int64,
        ScalarType::Uint32 => Type::Uint32,
        ScalarType::Uint64 => Type::Uint64,
        ScalarType::Sint32 => Type::Sint32,
        ScalarType::Sint64 => Type::Sint64,
        ScalarType::Fixed32 => Type::Fixed32,
        ScalarType::Fixed64 => Type::Fixed64,
        ScalarType::Sfixed32 => Type::Sfixed32,
        ScalarType::Sfixed64 => Type::Sfixed64,
        ScalarType::Bool => Type::Bool,
        ScalarType::String => Type::String,
        ScalarType::Bytes => Type::Bytes,
    }
}

fn local_name(full_name: &str) -> &str {
    full_name.rsplit('.').next().unwrap_or(full_name)
}
fn declare(
    kinds: &mut Kinds,
    full_name: &str,
    kind: Kind,
    origin: &str,
) -> Result<()> {
    if let Some((_, previous)) = kinds.get(full_name) {
        return Err(GrottoError::SchemaParseError {
            file: origin.to_string(),
            message: format!("{} is already defined in {}", full_name, previous),
        });
    }
    kinds.insert(full_name.to_string(), (kind, origin.to_string()));
    Ok(())
}

fn link_field(
    kinds: &Kinds,
    file: &ProtoFile,
    scope: &str,
    raw: &RawField,
) -> Result<FieldShape> {
    let unknown = |name: &str| GrottoError::SchemaParseError {
        file: file.origin.clone(),
        message: format!(
            "line {}: unknown type {} for field {}.{}",
            raw.line, name, scope, raw.name
        ),
    };
    let named = |name: &str| -> Result<FieldType> {
        if let Some(scalar) = ScalarType::from_keyword(name) {
            return Ok(FieldType::scalar(scalar));
        }
        let (full, kind) = resolve(kinds, scope, name).ok_or_else(|| unknown(name))?;
        Ok(match kind {
            Kind::Message => FieldType::Message { name: full },
            Kind::Enum => FieldType::Enum { name: full },
        })
    };

    let ty = match &raw.map {
        Some((key, value)) => FieldType::Map {
            key: *key,
            value: Box::new(named(value)?),
        },
        None => named(&raw.type_name)?,
    };

    let packable = matches!(&ty, FieldType::Scalar { scalar } if scalar.is_packable())
        || matches!(ty, FieldType::Enum { .. });
    let unpacked = raw.cardinality == Cardinality::Repeated
        && raw.map.is_none()
        && packable
        && !raw.packed.unwrap_or(file.proto3);

    Ok(FieldShape {
        name: raw.name.clone(),
        json_name: raw.json_name.clone().unwrap_or_else(|| json_name(&raw.name)),
        number: raw.number,
        ty,
        cardinality: raw.cardinality,
        oneof: raw.oneof.clone(),
        unpacked,
    })
}

fn resolve_kind(kinds: &Kinds, scope: &str, name: &str, want: Kind) -> Option<String> {
    resolve(kinds, scope, name).and_then(|(full, kind)| (kind == want).then_some(full))
}

/// Resolve `name` as seen from inside `scope`.
fn resolve(kinds: &Kinds, scope: &str, name: &str) -> Option<(String, Kind)> {
    if let Some(absolute) = name.strip_prefix('.') {
        return kinds.get(absolute).map(|(k, _)| (absolute.to_string(), *k));
    }
    let mut prefix = scope;
    loop {
        let candidate = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        };
        if let Some((kind, _)) = kinds.get(&candidate) {
            return Some((candidate, *kind));
        }
        if prefix.is_empty() {
            return None;
        }
        prefix = prefix.rsplit_once('.').map(|(p, _)| p).unwrap_or("");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::StreamingMode;
    use std::sync::Arc;

    fn compile(files: &[(&str, &str)]) -> Result<SchemaSet> {
        let owned: Vec<(String, String)> = files
            .iter()
            .map(|(o, s)| (o.to_string(), s.to_string()))
            .collect();
        compile_sources(&owned)
    }

    #[test]
    fn test_link_nested_and_cross_package() {
        let common = r#"
            syntax = "proto3";
            package acme.common;
            message Money { string currency = 1; int64 units = 2; }
        "#;
        let shop = r#"
            syntax = "proto3";
            package acme.shop;
            import "common.proto";
            import "google/protobuf/timestamp.proto";
            message Order {
              message Line { string sku = 1; common.Money price = 2; }
              enum Status { NEW = 0; PAID = 1; }
              repeated Line lines = 1;
              Status status = 2;
              map<string, .acme.common.Money> totals = 3;
              google.protobuf.Timestamp created = 4;
              repeated int32 tags = 5;
            }
            service Shop { rpc Place (Order) returns (Order.Line); }
        "#;
        let set = Arc::new(compile(&[("common.proto", common), ("shop.proto", shop)]).unwrap());

        let order = set.message("acme.shop.Order").unwrap();
        assert_eq!(
            order.fields[0].ty,
            FieldType::Message {
                name: "acme.shop.Order.Line".into()
            }
        );
        assert_eq!(
            order.fields[1].ty,
            FieldType::Enum {
                name: "acme.shop.Order.Status".into()
            }
        );
        assert!(matches!(&order.fields[2].ty, FieldType::Map { key: ScalarType::String, .. }));
        assert!(!order.fields[4].unpacked);

        let line = set.message("acme.shop.Order.Line").unwrap();
        assert_eq!(
            line.fields[1].ty,
            FieldType::Message {
                name: "acme.common.Money".into()
            }
        );

        let md = set.method_descriptor("acme.shop.Shop", "Place").unwrap();
        assert_eq!(md.mode, StreamingMode::Unary);
        assert_eq!(md.output.full_name, "acme.shop.Order.Line");
        assert!(set.message("google.protobuf.Timestamp").is_some());

        let shop = set.pool().get_file_by_name("shop.proto").unwrap();
        let imports: Vec<_> = shop.dependencies().map(|f| f.name().to_string()).collect();
        assert_eq!(imports, vec!["common.proto", "google/protobuf/timestamp.proto"]);
        let order = set.pool().get_message_by_name("acme.shop.Order").unwrap();
        assert!(order.get_field_by_name("totals").unwrap().is_map());
    }

    #[test]
    fn test_presence_and_oneofs_survive_linking() {
        let source = r#"
            syntax = "proto3";
            package p;
            message M {
              optional int32 limit = 1;
              oneof pick { string a = 2; int32 b = 3; }
              map<int32, string> names_by_id = 4;
            }
        "#;
        let set = compile(&[("m.proto", source)]).unwrap();
        let m = set.message("p.M").unwrap();
        assert_eq!(m.fields[0].cardinality, Cardinality::Optional);
        assert_eq!(m.fields[0].oneof, None);
        assert_eq!(m.fields[1].oneof.as_deref(), Some("pick"));

        let desc = set.pool().get_message_by_name("p.M").unwrap();
        let limit = desc.get_field_by_name("limit").unwrap();
        assert!(limit.supports_presence());
        assert!(limit.containing_oneof().unwrap().is_synthetic());
        assert!(set.pool().get_message_by_name("p.M.NamesByIdEntry").is_some());
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let source = r#"syntax = "proto3"; message A { Missing m = 1; }"#;
        let err = compile(&[("a.proto", source)]).unwrap_err();
        match err {
            GrottoError::SchemaParseError { file, message } => {
                assert_eq!(file, "a.proto");
                assert!(message.contains("Missing"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let a = "package p; message M {}";
        let err = compile(&[("a.proto", a), ("b.proto", a)]).unwrap_err();
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_proto2_repeated_scalars_unpacked_by_default() {
        let source = r#"
            syntax = "proto2";
            message M {
              repeated int32 plain = 1;
              repeated int32 packed = 2 [packed = true];
              repeated string names = 3;
            }
        "#;
        let set = compile(&[("m.proto", source)]).unwrap();
        let m = set.message("M").unwrap();
        assert!(m.fields[0].unpacked);
        assert!(!m.fields[1].unpacked);
        assert!(!m.fields[2].unpacked);
    }

    #[test]
    fn test_user_definition_shadows_well_known() {
        let source = r#"
            syntax = "proto3";
            package google.protobuf;
            message Empty { string marker = 1; }
        "#;
        let set = compile(&[("empty.proto", source)]).unwrap();
        assert_eq!(set.message("google.protobuf.Empty").unwrap().fields.len(), 1);
        assert!(set.message("google.protobuf.Struct").is_some());
    }

    #[test]
    fn test_method_type_must_be_message() {
        let source = r#"
            syntax = "proto3";
            enum E { A = 0; }
            message M {}
            service S { rpc Call (E) returns (M); }
        "#;
        assert!(compile(&[("s.proto", source)]).is_err());
    }
}
