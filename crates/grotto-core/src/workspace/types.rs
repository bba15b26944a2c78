//! Workspace data model.

use crate::{GrottoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A single metadata entry (request header).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub val: String,
}

impl Header {
    pub fn new(key: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            val: val.into(),
        }
    }
}

/// Drop entries whose key is blank.
pub fn non_empty_headers(headers: &[Header]) -> Vec<Header> {
    headers
        .iter()
        .filter(|h| !h.key.trim().is_empty())
        .cloned()
        .collect()
}

/// Where a workspace's method schemas come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaSource {
    /// `.proto` files: explicit files plus everything discovered under `roots`.
    /// With both empty, the engine's configured search roots are used.
    LocalFiles {
        #[serde(default)]
        roots: Vec<PathBuf>,
        #[serde(default)]
        files: Vec<PathBuf>,
    },
    /// Server reflection on the workspace endpoint; `headers` go on
    /// reflection requests only.
    Reflection {
        #[serde(default)]
        headers: Vec<Header>,
    },
}

impl Default for SchemaSource {
    fn default() -> Self {
        SchemaSource::Reflection {
            headers: Vec::new(),
        }
    }
}

impl SchemaSource {
    pub fn is_reflection(&self) -> bool {
        matches!(self, SchemaSource::Reflection { .. })
    }

    pub fn reflection_headers(&self) -> &[Header] {
        match self {
            SchemaSource::Reflection { headers } => headers,
            SchemaSource::LocalFiles { .. } => &[],
        }
    }
}

/// The editable option set of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceOptions {
    pub name: String,
    pub addr: String,
    #[serde(default)]
    pub use_tls: bool,
    /// Accept any server certificate when TLS is on.
    #[serde(default)]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default)]
    pub schema_source: SchemaSource,
    /// Default request metadata.
    #[serde(default)]
    pub metadata: Vec<Header>,
}

impl WorkspaceOptions {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            use_tls: false,
            insecure: false,
            root_ca: None,
            client_cert: None,
            client_key: None,
            schema_source: SchemaSource::default(),
            metadata: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GrottoError::Validation {
                field: "name".into(),
                message: "workspace name must not be empty".into(),
            });
        }
        if self.addr.trim().is_empty() {
            return Err(GrottoError::Validation {
                field: "addr".into(),
                message: "target address must not be empty".into(),
            });
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(GrottoError::Validation {
                field: "client_cert".into(),
                message: "client certificate and key must be given together".into(),
            });
        }
        Ok(())
    }

    /// Copy with blank metadata keys removed.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        out.metadata = non_empty_headers(&self.metadata);
        if let SchemaSource::Reflection { headers } = &mut out.schema_source {
            *headers = non_empty_headers(headers);
        }
        out
    }
}

/// A saved request template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    /// gRPC path form, `/package.Service/Method`.
    pub method: String,
    /// Request payload as JSON text.
    pub payload: String,
    #[serde(default)]
    pub metadata: Vec<Header>,
}

/// A persisted workspace: options, commands and per-method last payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub options: WorkspaceOptions,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub last_messages: BTreeMap<String, String>,
}

impl Workspace {
    pub fn new(options: WorkspaceOptions) -> Self {
        Self {
            options,
            commands: Vec::new(),
            last_messages: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Insert or replace a command by name, keeping the original position.
    pub fn upsert_command(&mut self, command: Command) {
        match self.commands.iter_mut().find(|c| c.name == command.name) {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_name() {
        let err = WorkspaceOptions::new("  ", "localhost:50051")
            .validate()
            .unwrap_err();
        assert!(matches!(err, GrottoError::Validation { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_validate_requires_cert_and_key_together() {
        let mut opts = WorkspaceOptions::new("staging", "localhost:50051");
        opts.client_cert = Some("PEM".into());
        assert!(opts.validate().is_err());
        opts.client_key = Some("KEY".into());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_normalized_drops_blank_keys() {
        let mut opts = WorkspaceOptions::new("staging", "localhost:50051");
        opts.metadata = vec![Header::new("authorization", "x"), Header::new("", "y")];
        opts.schema_source = SchemaSource::Reflection {
            headers: vec![Header::new(" ", "z")],
        };
        let n = opts.normalized();
        assert_eq!(n.metadata, vec![Header::new("authorization", "x")]);
        assert!(n.schema_source.reflection_headers().is_empty());
    }

    #[test]
    fn test_upsert_command_keeps_position() {
        let mut ws = Workspace::new(WorkspaceOptions::new("w", "a:1"));
        for name in ["one", "two"] {
            ws.upsert_command(Command {
                name: name.into(),
                method: "/p.S/M".into(),
                payload: "{}".into(),
                metadata: vec![],
            });
        }
        ws.upsert_command(Command {
            name: "one".into(),
            method: "/p.S/N".into(),
            payload: "{}".into(),
            metadata: vec![],
        });
        assert_eq!(ws.commands[0].method, "/p.S/N");
        assert_eq!(ws.commands.len(), 2);
    }

    #[test]
    fn test_schema_source_serde_tag() {
        let json = serde_json::to_value(SchemaSource::LocalFiles {
            roots: vec![PathBuf::from("protos")],
            files: vec![],
        })
        .unwrap();
        assert_eq!(json["type"], "local_files");
        let back: SchemaSource = serde_json::from_value(serde_json::json!({"type": "reflection"})).unwrap();
        assert!(back.is_reflection());
    }
}
