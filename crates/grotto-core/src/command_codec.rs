//! Portable encodings for saved commands.
//!
//! Two formats are supported:
//! - `json`: a versioned JSON document, exact round-trip of every field
//! - `grpcurl`: a `grpcurl` command line; round-trips method, payload and
//!   request metadata, and names imported commands after the method
//!
//! Neither direction consults the schema; callers validate the method
//! reference before installing an imported command.

use crate::schema::{short_name, MethodRef};
use crate::workspace::{non_empty_headers, Command, Header, WorkspaceOptions};
use crate::{GrottoError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version tag carried by JSON documents.
pub const JSON_FORMAT_TAG: &str = "grotto.command/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandFormat {
    #[default]
    Json,
    Grpcurl,
}

impl FromStr for CommandFormat {
    type Err = GrottoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(CommandFormat::Json),
            "grpcurl" => Ok(CommandFormat::Grpcurl),
            other => Err(GrottoError::InvalidParams {
                message: format!("unsupported command format: {}", other),
            }),
        }
    }
}

impl fmt::Display for CommandFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandFormat::Json => write!(f, "json"),
            CommandFormat::Grpcurl => write!(f, "grpcurl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandDocument {
    format: String,
    name: String,
    method: String,
    payload: String,
    #[serde(default)]
    metadata: Vec<Header>,
}

/// Encode `command` in `format`. `options` supplies the endpoint details
/// a grpcurl line needs.
pub fn export_command(
    command: &Command,
    options: &WorkspaceOptions,
    format: CommandFormat,
) -> Result<String> {
    match format {
        CommandFormat::Json => {
            let doc = CommandDocument {
                format: JSON_FORMAT_TAG.to_string(),
                name: command.name.clone(),
                method: command.method.clone(),
                payload: command.payload.clone(),
                metadata: command.metadata.clone(),
            };
            Ok(serde_json::to_string_pretty(&doc)?)
        }
        CommandFormat::Grpcurl => Ok(to_grpcurl(command, options)),
    }
}

/// Decode a command. With no explicit format, one is detected from the text.
pub fn import_command(text: &str, format: Option<CommandFormat>) -> Result<Command> {
    let format = match format {
        Some(format) => format,
        None => detect_format(text)?,
    };
    match format {
        CommandFormat::Json => from_json(text),
        CommandFormat::Grpcurl => from_grpcurl(text),
    }
}

pub fn detect_format(text: &str) -> Result<CommandFormat> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        Ok(CommandFormat::Json)
    } else if trimmed.starts_with("grpcurl") {
        Ok(CommandFormat::Grpcurl)
    } else {
        Err(GrottoError::InvalidParams {
            message: "unrecognized command encoding".into(),
        })
    }
}

fn from_json(text: &str) -> Result<Command> {
    let doc: CommandDocument = serde_json::from_str(text).map_err(|e| GrottoError::InvalidParams {
        message: format!("invalid command document: {}", e),
    })?;
    if doc.format != JSON_FORMAT_TAG {
        return Err(GrottoError::InvalidParams {
            message: format!("unsupported command document format {:?}", doc.format),
        });
    }
    Ok(Command {
        name: doc.name,
        method: doc.method,
        payload: doc.payload,
        metadata: doc.metadata,
    })
}

fn to_grpcurl(command: &Command, options: &WorkspaceOptions) -> String {
    let mut lines = vec![format!("grpcurl -d {}", shell_quote(&command.payload))];
    for header in non_empty_headers(&command.metadata) {
        lines.push(format!(
            "    -rpc-header {}",
            shell_quote(&format!("{}:{}", header.key, header.val))
        ));
    }
    if !options.use_tls {
        lines.push("    -plaintext".to_string());
    } else if options.insecure {
        lines.push("    -insecure".to_string());
    }
    for header in non_empty_headers(options.schema_source.reflection_headers()) {
        lines.push(format!(
            "    -reflect-header {}",
            shell_quote(&format!("{}:{}", header.key, header.val))
        ));
    }
    let method = command.method.trim_start_matches('/');
    lines.push(format!(
        "    {} {}",
        shell_quote(&options.addr),
        shell_quote(method)
    ));
    lines.join(" \\\n")
}

/// Flags whose value is the next argument and that import ignores.
const VALUE_FLAGS: &[&str] = &[
    "authority",
    "cacert",
    "cert",
    "connect-timeout",
    "format",
    "import-path",
    "keepalive-time",
    "key",
    "max-msg-sz",
    "max-time",
    "proto",
    "protoset",
    "protoset-out",
    "servername",
    "user-agent",
    "unix",
];

fn from_grpcurl(text: &str) -> Result<Command> {
    let words = shell_words(text)?;
    let mut iter = words.into_iter();
    match iter.next().as_deref() {
        Some("grpcurl") => {}
        _ => {
            return Err(GrottoError::InvalidParams {
                message: "grpcurl command must start with `grpcurl`".into(),
            })
        }
    }

    let mut payload = String::new();
    let mut metadata = Vec::new();
    let mut positional = Vec::new();

    while let Some(word) = iter.next() {
        if !word.starts_with('-') || word == "-" {
            positional.push(word);
            continue;
        }
        let flag = word.trim_start_matches('-');
        let (name, inline) = match flag.split_once('=') {
            Some((n, v)) => (n.to_string(), Some(v.to_string())),
            None => (flag.to_string(), None),
        };
        let value = |iter: &mut std::vec::IntoIter<String>| -> Result<String> {
            match inline.clone() {
                Some(v) => Ok(v),
                None => iter.next().ok_or_else(|| GrottoError::InvalidParams {
                    message: format!("flag -{} needs a value", name),
                }),
            }
        };

        match name.as_str() {
            "d" => {
                let data = value(&mut iter)?;
                if data == "@" {
                    return Err(GrottoError::InvalidParams {
                        message: "payload from stdin (-d @) cannot be imported".into(),
                    });
                }
                payload = data;
            }
            "H" | "rpc-header" => metadata.push(parse_header(&value(&mut iter)?)?),
            "reflect-header" => {
                value(&mut iter)?;
            }
            n if VALUE_FLAGS.contains(&n) => {
                value(&mut iter)?;
            }
            // Transport switches belong to the workspace, not the command.
            "plaintext" | "insecure" => {}
            _ => {}
        }
    }

    let method = match positional.as_slice() {
        [_addr, method] => method.clone(),
        [method] => method.clone(),
        _ => {
            return Err(GrottoError::InvalidParams {
                message: format!(
                    "expected `[address] method`, found {} positional argument(s)",
                    positional.len()
                ),
            })
        }
    };
    let method = MethodRef::parse(&method)?;

    Ok(Command {
        name: short_name(&method.method).to_string(),
        method: method.path(),
        payload,
        metadata,
    })
}

fn parse_header(raw: &str) -> Result<Header> {
    let (key, val) = raw.split_once(':').ok_or_else(|| GrottoError::InvalidParams {
        message: format!("header {:?} is not `name: value`", raw),
    })?;
    Ok(Header::new(key.trim(), val.trim_start()))
}

fn shell_quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Split a shell command line into words. CRLF continuations are folded
/// first so pasted Windows text splits like POSIX text.
fn shell_words(input: &str) -> Result<Vec<String>> {
    shlex::split(&input.replace("\r\n", "\n")).ok_or_else(|| GrottoError::InvalidParams {
        message: "malformed command line: unterminated quote or escape".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::SchemaSource;

    fn command() -> Command {
        Command {
            name: "hello".into(),
            method: "/helloworld.Greeter/SayHello".into(),
            payload: "{\n  \"name\": \"it's me\"\n}".into(),
            metadata: vec![
                Header::new("authorization", "Bearer abc"),
                Header::new("x-trace", "1"),
            ],
        }
    }

    fn options() -> WorkspaceOptions {
        let mut options = WorkspaceOptions::new("staging", "localhost:50051");
        options.schema_source = SchemaSource::Reflection {
            headers: vec![Header::new("x-reflect", "yes")],
        };
        options
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let text = export_command(&command(), &options(), CommandFormat::Json).unwrap();
        assert!(text.contains(JSON_FORMAT_TAG));
        assert_eq!(import_command(&text, None).unwrap(), command());
    }

    #[test]
    fn test_grpcurl_export_layout() {
        let text = export_command(&command(), &options(), CommandFormat::Grpcurl).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].starts_with("grpcurl -d "));
        assert!(text.contains("-rpc-header "));
        assert!(text.contains("-plaintext"));
        assert!(text.contains("-reflect-header "));
        assert!(lines
            .last()
            .unwrap()
            .ends_with("helloworld.Greeter/SayHello"));
    }

    #[test]
    fn test_grpcurl_export_marks_unverified_tls() {
        let mut options = options();
        options.use_tls = true;
        options.insecure = true;
        let text = export_command(&command(), &options, CommandFormat::Grpcurl).unwrap();
        assert!(text.contains("    -insecure"));
        assert!(!text.contains("-plaintext"));

        let imported = import_command(&text, None).unwrap();
        assert_eq!(imported.method, command().method);
        assert_eq!(imported.payload, command().payload);

        options.insecure = false;
        let text = export_command(&command(), &options, CommandFormat::Grpcurl).unwrap();
        assert!(!text.contains("-insecure"));
    }

    #[test]
    fn test_grpcurl_import_accepts_insecure_flag() {
        let text = "grpcurl -insecure -d '{}' api.example.com:443 shop.Orders/Get";
        let imported = import_command(text, None).unwrap();
        assert_eq!(imported.method, "/shop.Orders/Get");
        assert_eq!(imported.payload, "{}");
    }

    #[test]
    fn test_grpcurl_round_trip() {
        let text = export_command(&command(), &options(), CommandFormat::Grpcurl).unwrap();
        let imported = import_command(&text, None).unwrap();
        assert_eq!(imported.name, "SayHello");
        assert_eq!(imported.method, command().method);
        assert_eq!(imported.payload, command().payload);
        assert_eq!(imported.metadata, command().metadata);
    }

    #[test]
    fn test_grpcurl_import_handwritten() {
        let text = r#"grpcurl --plaintext -H "x-user: bob" -d='{"id": 1}' \
            -max-time 5 localhost:9000 shop.Orders.Get"#;
        let imported = import_command(text, Some(CommandFormat::Grpcurl)).unwrap();
        assert_eq!(imported.method, "/shop.Orders/Get");
        assert_eq!(imported.payload, r#"{"id": 1}"#);
        assert_eq!(imported.metadata, vec![Header::new("x-user", "bob")]);
    }

    #[test]
    fn test_import_errors() {
        assert!(import_command("curl http://x", None).is_err());
        assert!(import_command("grpcurl -d '{", None).is_err());
        assert!(import_command("grpcurl -d @ host:1 a.B/C", None).is_err());
        let foreign = r#"{"format":"other/v9","name":"a","method":"/a.B/C","payload":""}"#;
        assert!(import_command(foreign, None).is_err());
        assert!("yaml".parse::<CommandFormat>().is_err());
    }
}
