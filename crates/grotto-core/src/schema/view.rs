//! Field-tree views of message shapes, used to render method inputs.

use crate::config::SchemaConfig;
use crate::schema::types::{
    Cardinality, FieldShape, FieldType, MessageShape, ScalarType, SchemaSet,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub name: String,
    pub full_name: String,
    pub fields: Vec<FieldView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub name: String,
    pub full_name: String,
    /// Scalar keyword, or `enum`, `message`, `map`, `oneof`.
    pub kind: String,
    pub repeated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_key: Option<Box<FieldView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_value: Option<Box<FieldView>>,
    /// Members of a oneof group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oneof: Vec<FieldView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageView>,
    /// The message type already appears on the path from the root; its
    /// fields are not expanded again.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cyclic: bool,
}

impl MessageView {
    pub fn build(schema: &SchemaSet, shape: &MessageShape) -> Self {
        let mut path = Vec::new();
        message_view(schema, shape, &mut path)
    }
}

fn message_view(schema: &SchemaSet, shape: &MessageShape, path: &mut Vec<String>) -> MessageView {
    path.push(shape.full_name.clone());
    let mut fields = Vec::new();
    let mut seen_oneofs: Vec<&str> = Vec::new();

    for field in &shape.fields {
        match field.oneof.as_deref() {
            Some(group) if seen_oneofs.contains(&group) => continue,
            Some(group) => {
                seen_oneofs.push(group);
                let members = shape
                    .fields
                    .iter()
                    .filter(|f| f.oneof.as_deref() == Some(group))
                    .map(|f| field_view(schema, shape, f, path))
                    .collect();
                fields.push(FieldView {
                    name: group.to_string(),
                    full_name: format!("{}.{}", shape.full_name, group),
                    kind: "oneof".into(),
                    repeated: false,
                    enum_values: Vec::new(),
                    map_key: None,
                    map_value: None,
                    oneof: members,
                    message: None,
                    cyclic: false,
                });
            }
            None => fields.push(field_view(schema, shape, field, path)),
        }
    }

    path.pop();
    MessageView {
        name: shape.short_name().to_string(),
        full_name: shape.full_name.clone(),
        fields,
    }
}

fn field_view(
    schema: &SchemaSet,
    parent: &MessageShape,
    field: &FieldShape,
    path: &mut Vec<String>,
) -> FieldView {
    let full_name = format!("{}.{}", parent.full_name, field.name);
    let mut view = typed_view(schema, &field.name, &full_name, &field.ty, path);
    view.repeated = field.is_repeated();
    view
}

fn typed_view(
    schema: &SchemaSet,
    name: &str,
    full_name: &str,
    ty: &FieldType,
    path: &mut Vec<String>,
) -> FieldView {
    let mut view = FieldView {
        name: name.to_string(),
        full_name: full_name.to_string(),
        kind: ty.kind_name().to_string(),
        repeated: false,
        enum_values: Vec::new(),
        map_key: None,
        map_value: None,
        oneof: Vec::new(),
        message: None,
        cyclic: false,
    };

    match ty {
        FieldType::Scalar { .. } => {}
        FieldType::Enum { name } => {
            if let Some(shape) = schema.enum_shape(name) {
                view.enum_values = shape.values.iter().map(|(n, _)| n.clone()).collect();
            }
        }
        FieldType::Message { name } => {
            if path.iter().any(|p| p == name) || path.len() >= SchemaConfig::MAX_VIEW_DEPTH {
                view.cyclic = true;
            } else if let Some(shape) = schema.message(name) {
                view.message = Some(message_view(schema, shape, path));
            }
        }
        FieldType::Map { key, value } => {
            let key_ty = FieldType::scalar(*key);
            view.map_key = Some(Box::new(typed_view(
                schema,
                "key",
                &format!("{}.key", full_name),
                &key_ty,
                path,
            )));
            view.map_value = Some(Box::new(typed_view(
                schema,
                "value",
                &format!("{}.value", full_name),
                value,
                path,
            )));
        }
    }
    view
}

/// A starting payload for `shape`: every non-oneof field at its zero value,
/// nested messages expanded until a type repeats. Well-known types use
/// their JSON forms.
pub fn template(schema: &SchemaSet, shape: &MessageShape) -> Value {
    let mut path = Vec::new();
    template_of(schema, shape, &mut path)
}

fn template_of(schema: &SchemaSet, shape: &MessageShape, path: &mut Vec<String>) -> Value {
    path.push(shape.full_name.clone());
    let mut out = Map::new();
    for field in shape.fields.iter().filter(|f| f.oneof.is_none()) {
        let value = match &field.ty {
            FieldType::Message { name } if !field.is_repeated() => {
                if let Some(zero) = well_known_zero(name) {
                    out.insert(field.name.clone(), zero);
                    continue;
                }
                match schema.message(name) {
                    Some(nested)
                        if !path.iter().any(|p| p == name)
                            && path.len() < SchemaConfig::MAX_VIEW_DEPTH =>
                    {
                        template_of(schema, nested, path)
                    }
                    _ => Value::Null,
                }
            }
            _ => zero_value(schema, field),
        };
        out.insert(field.name.clone(), value);
    }
    path.pop();
    Value::Object(out)
}

fn well_known_zero(full_name: &str) -> Option<Value> {
    let name = full_name.strip_prefix("google.protobuf.")?;
    Some(match name {
        "Timestamp" => Value::String("1970-01-01T00:00:00Z".into()),
        "Duration" => Value::String("0s".into()),
        "FieldMask" => Value::String(String::new()),
        "Struct" | "Empty" => Value::Object(Map::new()),
        "ListValue" => Value::Array(Vec::new()),
        "Value" | "Any" => Value::Null,
        wrapper if wrapper.ends_with("Value") => Value::Null,
        _ => return None,
    })
}

/// JSON zero value for a field.
fn zero_value(schema: &SchemaSet, field: &FieldShape) -> Value {
    if matches!(field.ty, FieldType::Map { .. }) {
        return Value::Object(Map::new());
    }
    if field.cardinality == Cardinality::Repeated {
        return Value::Array(Vec::new());
    }
    match &field.ty {
        FieldType::Scalar { scalar } => match scalar {
            ScalarType::Bool => Value::Bool(false),
            ScalarType::String | ScalarType::Bytes => Value::String(String::new()),
            ScalarType::Int64
            | ScalarType::Uint64
            | ScalarType::Sint64
            | ScalarType::Fixed64
            | ScalarType::Sfixed64 => Value::String("0".into()),
            ScalarType::Double | ScalarType::Float => Value::from(0.0),
            _ => Value::from(0),
        },
        FieldType::Enum { name } => schema
            .enum_shape(name)
            .and_then(|e| e.name_of(0).map(|n| Value::String(n.to_string())))
            .unwrap_or_else(|| Value::from(0)),
        FieldType::Message { .. } => Value::Null,
        FieldType::Map { .. } => Value::Object(Map::new()),
    }
}
