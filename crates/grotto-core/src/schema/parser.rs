//! Parser for `.proto` source files.
//!
//! Produces an unlinked [`ProtoFile`]: definitions carry fully-qualified
//! names, but field and method type references are kept as written together
//! with the scope they appeared in. [`super::linker`] resolves them.
//!
//! Supported: `syntax`/`edition`, `package`, `import`, `option`, nested
//! `message`/`enum`, `oneof`, `map<K, V>`, `optional`/`required`/`repeated`,
//! `reserved`, `extensions`, `service`/`rpc` with `stream`. `extend` blocks
//! are skipped; proto2 `group` fields are rejected.

use crate::schema::types::{Cardinality, ScalarType};
use crate::{GrottoError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(String),
    Float(String),
    Str(String),
    Symbol(char),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn tokenize(mut self) -> std::result::Result<Vec<Spanned>, (usize, String)> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            let line = self.line;
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' {
                self.bump();
                match self.peek() {
                    Some('/') => {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    }
                    Some('*') => {
                        self.bump();
                        let mut prev = '\0';
                        loop {
                            match self.bump() {
                                Some('/') if prev == '*' => break,
                                Some(c) => prev = c,
                                None => return Err((line, "unterminated block comment".into())),
                            }
                        }
                    }
                    _ => tokens.push(Spanned {
                        token: Token::Symbol('/'),
                        line,
                    }),
                }
            } else if c == '"' || c == '\'' {
                self.bump();
                let value = self.string_body(c).map_err(|m| (line, m))?;
                tokens.push(Spanned {
                    token: Token::Str(value),
                    line,
                });
            } else if c.is_ascii_alphabetic() || c == '_' {
                let mut ident = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                tokens.push(Spanned {
                    token: Token::Ident(ident),
                    line,
                });
            } else if c.is_ascii_digit() {
                let mut number = String::new();
                let mut is_float = false;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '.' {
                        if c == '.' || ((c == 'e' || c == 'E') && !number.starts_with("0x")) {
                            is_float = true;
                        }
                        number.push(c);
                        self.bump();
                        if (c == 'e' || c == 'E') && is_float {
                            if let Some(sign @ ('+' | '-')) = self.peek() {
                                number.push(sign);
                                self.bump();
                            }
                        }
                    } else {
                        break;
                    }
                }
                tokens.push(Spanned {
                    token: if is_float {
                        Token::Float(number)
                    } else {
                        Token::Int(number)
                    },
                    line,
                });
            } else {
                self.bump();
                tokens.push(Spanned {
                    token: Token::Symbol(c),
                    line,
                });
            }
        }
        Ok(tokens)
    }

    fn string_body(&mut self, quote: char) -> std::result::Result<String, String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err("unterminated string literal".into()),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c) => out.push(c),
                    None => return Err("unterminated escape".into()),
                },
                Some(c) => out.push(c),
            }
        }
    }
}

/// A field as written in source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    pub name: String,
    pub number: u32,
    /// Scalar keyword or a (possibly dotted, possibly leading-dot) type name.
    pub type_name: String,
    pub cardinality: Cardinality,
    /// `(key, value type name)` for `map<K, V>` fields.
    pub map: Option<(ScalarType, String)>,
    pub oneof: Option<String>,
    pub json_name: Option<String>,
    pub packed: Option<bool>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub full_name: String,
    pub fields: Vec<RawField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEnum {
    pub full_name: String,
    pub values: Vec<(String, i32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMethod {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawService {
    pub full_name: String,
    pub methods: Vec<RawMethod>,
}

/// One parsed, unlinked source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoFile {
    pub origin: String,
    pub proto3: bool,
    pub package: String,
    pub imports: Vec<String>,
    /// All messages, nested ones flattened with their qualified names.
    pub messages: Vec<RawMessage>,
    pub enums: Vec<RawEnum>,
    pub services: Vec<RawService>,
}

/// Parse one `.proto` source. `origin` only labels errors.
pub fn parse_proto(origin: &str, source: &str) -> Result<ProtoFile> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|(line, message)| parse_error(origin, line, message))?;
    Parser {
        origin,
        tokens,
        pos: 0,
        file: ProtoFile {
            origin: origin.to_string(),
            proto3: false,
            package: String::new(),
            imports: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            services: Vec::new(),
        },
    }
    .parse_file()
}

fn parse_error(origin: &str, line: usize, message: impl std::fmt::Display) -> GrottoError {
    GrottoError::SchemaParseError {
        file: origin.to_string(),
        message: format!("line {}: {}", line, message),
    }
}

struct Parser<'a> {
    origin: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    file: ProtoFile,
}

impl Parser<'_> {
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl std::fmt::Display) -> GrottoError {
        parse_error(self.origin, self.line(), message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|t| t.token.clone())
            .ok_or_else(|| self.error("unexpected end of file"))?;
        self.pos += 1;
        Ok(token)
    }

    fn is_symbol(&self, c: char) -> bool {
        self.peek() == Some(&Token::Symbol(c))
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.is_symbol(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.is_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<()> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", c, self.describe())))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(w) => Ok(w),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected identifier, found {}", describe(&other))))
            }
        }
    }

    fn expect_string(&mut self) -> Result<String> {
        match self.next()? {
            Token::Str(s) => {
                let mut s = s;
                // Adjacent string literals concatenate.
                while let Some(Token::Str(more)) = self.peek() {
                    s.push_str(more);
                    self.pos += 1;
                }
                Ok(s)
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected string, found {}", describe(&other))))
            }
        }
    }

    fn describe(&self) -> String {
        self.peek()
            .map(describe)
            .unwrap_or_else(|| "end of file".to_string())
    }

    /// `a.b.C` or `.a.b.C`.
    fn type_name(&mut self) -> Result<String> {
        let mut name = String::new();
        if self.eat_symbol('.') {
            name.push('.');
        }
        name.push_str(&self.expect_ident()?);
        while self.eat_symbol('.') {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    fn int(&mut self) -> Result<i64> {
        let negative = self.eat_symbol('-');
        let text = match self.next()? {
            Token::Int(t) => t,
            other => {
                self.pos -= 1;
                return Err(self.error(format!("expected integer, found {}", describe(&other))));
            }
        };
        let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16)
        } else if text.len() > 1 && text.starts_with('0') {
            i64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<i64>()
        }
        .map_err(|e| self.error(format!("invalid integer {}: {}", text, e)))?;
        Ok(if negative { -value } else { value })
    }

    fn qualify(&self, scope: &str, name: &str) -> String {
        if scope.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", scope, name)
        }
    }

    fn parse_file(mut self) -> Result<ProtoFile> {
        while self.peek().is_some() {
            if self.eat_symbol(';') {
                continue;
            }
            let keyword = self.expect_ident()?;
            match keyword.as_str() {
                "syntax" => {
                    self.expect_symbol('=')?;
                    let syntax = self.expect_string()?;
                    self.file.proto3 = syntax == "proto3";
                    self.expect_symbol(';')?;
                }
                "edition" => {
                    self.expect_symbol('=')?;
                    self.expect_string()?;
                    self.file.proto3 = true;
                    self.expect_symbol(';')?;
                }
                "package" => {
                    self.file.package = self.type_name()?;
                    self.expect_symbol(';')?;
                }
                "import" => {
                    let _ = self.eat_ident("public") || self.eat_ident("weak");
                    let path = self.expect_string()?;
                    self.file.imports.push(path);
                    self.expect_symbol(';')?;
                }
                "option" => self.skip_option_statement()?,
                "message" => {
                    let scope = self.file.package.clone();
                    self.parse_message(&scope)?;
                }
                "enum" => {
                    let scope = self.file.package.clone();
                    self.parse_enum(&scope)?;
                }
                "service" => self.parse_service()?,
                "extend" => {
                    self.type_name()?;
                    self.skip_block()?;
                }
                other => return Err(self.error(format!("unexpected top-level keyword '{}'", other))),
            }
        }
        Ok(self.file)
    }

    /// After `option`: `name = constant ;`
    fn skip_option_statement(&mut self) -> Result<()> {
        self.option_name()?;
        self.expect_symbol('=')?;
        self.skip_constant()?;
        self.expect_symbol(';')
    }

    fn option_name(&mut self) -> Result<String> {
        let mut name = String::new();
        loop {
            if self.eat_symbol('(') {
                name.push('(');
                name.push_str(&self.type_name()?);
                self.expect_symbol(')')?;
                name.push(')');
            } else {
                name.push_str(&self.expect_ident()?);
            }
            if self.eat_symbol('.') {
                name.push('.');
            } else {
                return Ok(name);
            }
        }
    }

    /// Consume a constant and return it as text (aggregates yield `{...}`).
    fn skip_constant(&mut self) -> Result<String> {
        if self.is_symbol('{') {
            self.skip_block()?;
            return Ok("{...}".to_string());
        }
        let mut text = String::new();
        if self.eat_symbol('-') {
            text.push('-');
        } else {
            self.eat_symbol('+');
        }
        match self.next()? {
            Token::Ident(w) | Token::Int(w) | Token::Float(w) => text.push_str(&w),
            Token::Str(s) => {
                text.push_str(&s);
                while let Some(Token::Str(more)) = self.peek() {
                    text.push_str(more);
                    self.pos += 1;
                }
            }
            Token::Symbol(c) => {
                self.pos -= 1;
                return Err(self.error(format!("expected constant, found '{}'", c)));
            }
        }
        Ok(text)
    }

    /// Skip a balanced `{ ... }` block.
    fn skip_block(&mut self) -> Result<()> {
        self.expect_symbol('{')?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()? {
                Token::Symbol('{') => depth += 1,
                Token::Symbol('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn skip_to_semicolon(&mut self) -> Result<()> {
        while !self.eat_symbol(';') {
            self.next()?;
        }
        Ok(())
    }

    fn parse_message(&mut self, scope: &str) -> Result<()> {
        let name = self.expect_ident()?;
        let full_name = self.qualify(scope, &name);
        self.expect_symbol('{')?;
        let mut fields = Vec::new();
        self.parse_message_body(&full_name, &mut fields, None)?;
        self.file.messages.push(RawMessage { full_name, fields });
        Ok(())
    }

    /// Parse until the closing `}` of a message or oneof body.
    fn parse_message_body(
        &mut self,
        full_name: &str,
        fields: &mut Vec<RawField>,
        oneof: Option<&str>,
    ) -> Result<()> {
        loop {
            if self.eat_symbol('}') {
                return Ok(());
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.peek().is_none() {
                return Err(self.error(format!("unterminated body of {}", full_name)));
            }
            let line = self.line();
            match self.peek() {
                Some(Token::Ident(w)) if oneof.is_none() && w == "message" => {
                    self.pos += 1;
                    self.parse_message(full_name)?;
                }
                Some(Token::Ident(w)) if oneof.is_none() && w == "enum" => {
                    self.pos += 1;
                    self.parse_enum(full_name)?;
                }
                Some(Token::Ident(w)) if oneof.is_none() && w == "oneof" => {
                    self.pos += 1;
                    let oneof_name = self.expect_ident()?;
                    self.expect_symbol('{')?;
                    self.parse_message_body(full_name, fields, Some(&oneof_name))?;
                }
                Some(Token::Ident(w)) if w == "option" => {
                    self.pos += 1;
                    self.skip_option_statement()?;
                }
                Some(Token::Ident(w)) if w == "reserved" || w == "extensions" => {
                    self.pos += 1;
                    self.skip_to_semicolon()?;
                }
                Some(Token::Ident(w)) if oneof.is_none() && w == "extend" => {
                    self.pos += 1;
                    self.type_name()?;
                    self.skip_block()?;
                }
                Some(Token::Ident(w)) if w == "map" && self.tokens.get(self.pos + 1).map(|t| &t.token) == Some(&Token::Symbol('<')) => {
                    self.pos += 2;
                    let key_word = self.expect_ident()?;
                    let key = ScalarType::from_keyword(&key_word)
                        .filter(|k| k.is_valid_map_key())
                        .ok_or_else(|| self.error(format!("invalid map key type '{}'", key_word)))?;
                    self.expect_symbol(',')?;
                    let value = self.type_name()?;
                    self.expect_symbol('>')?;
                    let mut field = self.field_tail(String::new(), Cardinality::Repeated, oneof, line)?;
                    field.map = Some((key, value));
                    fields.push(field);
                }
                Some(Token::Ident(_)) | Some(Token::Symbol('.')) => {
                    let cardinality = if self.eat_ident("repeated") {
                        Cardinality::Repeated
                    } else if self.eat_ident("optional") {
                        Cardinality::Optional
                    } else if self.eat_ident("required") {
                        Cardinality::Singular
                    } else {
                        Cardinality::Singular
                    };
                    if self.is_ident("group") {
                        return Err(self.error("proto2 groups are not supported"));
                    }
                    let type_name = self.type_name()?;
                    let field = self.field_tail(type_name, cardinality, oneof, line)?;
                    fields.push(field);
                }
                _ => return Err(self.error(format!("unexpected {} in {}", self.describe(), full_name))),
            }
        }
    }

    /// `name = number [options] ;`
    fn field_tail(
        &mut self,
        type_name: String,
        cardinality: Cardinality,
        oneof: Option<&str>,
        line: usize,
    ) -> Result<RawField> {
        let name = self.expect_ident()?;
        self.expect_symbol('=')?;
        let number = self.int()?;
        if !(1..=536_870_911).contains(&number) {
            return Err(self.error(format!("field number {} out of range", number)));
        }
        let mut json_name = None;
        let mut packed = None;
        if self.eat_symbol('[') {
            loop {
                let option = self.option_name()?;
                self.expect_symbol('=')?;
                let value = self.skip_constant()?;
                match option.as_str() {
                    "json_name" => json_name = Some(value),
                    "packed" => packed = Some(value == "true"),
                    _ => {}
                }
                if self.eat_symbol(']') {
                    break;
                }
                self.expect_symbol(',')?;
            }
        }
        self.expect_symbol(';')?;
        Ok(RawField {
            name,
            number: number as u32,
            type_name,
            cardinality,
            map: None,
            oneof: oneof.map(str::to_string),
            json_name,
            packed,
            line,
        })
    }

    fn parse_enum(&mut self, scope: &str) -> Result<()> {
        let name = self.expect_ident()?;
        let full_name = self.qualify(scope, &name);
        self.expect_symbol('{')?;
        let mut values = Vec::new();
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.eat_ident("option") {
                self.skip_option_statement()?;
                continue;
            }
            if self.eat_ident("reserved") {
                self.skip_to_semicolon()?;
                continue;
            }
            let value_name = self.expect_ident()?;
            self.expect_symbol('=')?;
            let number = self.int()?;
            let number = i32::try_from(number)
                .map_err(|_| self.error(format!("enum value {} out of range", number)))?;
            if self.eat_symbol('[') {
                while !self.eat_symbol(']') {
                    self.next()?;
                }
            }
            self.expect_symbol(';')?;
            values.push((value_name, number));
        }
        if values.is_empty() {
            return Err(self.error(format!("enum {} has no values", full_name)));
        }
        self.file.enums.push(RawEnum { full_name, values });
        Ok(())
    }

    fn parse_service(&mut self) -> Result<()> {
        let name = self.expect_ident()?;
        let full_name = self.qualify(&self.file.package, &name);
        self.expect_symbol('{')?;
        let mut methods = Vec::new();
        loop {
            if self.eat_symbol('}') {
                break;
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.eat_ident("option") {
                self.skip_option_statement()?;
                continue;
            }
            let line = self.line();
            if !self.eat_ident("rpc") {
                return Err(self.error(format!("expected 'rpc', found {}", self.describe())));
            }
            let method_name = self.expect_ident()?;
            self.expect_symbol('(')?;
            let client_streaming = self.stream_marker();
            let input_type = self.type_name()?;
            self.expect_symbol(')')?;
            if !self.eat_ident("returns") {
                return Err(self.error("expected 'returns'"));
            }
            self.expect_symbol('(')?;
            let server_streaming = self.stream_marker();
            let output_type = self.type_name()?;
            self.expect_symbol(')')?;
            if self.is_symbol('{') {
                self.skip_block()?;
            } else {
                self.expect_symbol(';')?;
            }
            methods.push(RawMethod {
                name: method_name,
                input_type,
                output_type,
                client_streaming,
                server_streaming,
                line,
            });
        }
        self.file.services.push(RawService { full_name, methods });
        Ok(())
    }

    /// `stream` is a marker only when followed by a type name.
    fn stream_marker(&mut self) -> bool {
        if self.is_ident("stream") {
            let next = self.tokens.get(self.pos + 1).map(|t| &t.token);
            if matches!(next, Some(Token::Ident(_)) | Some(Token::Symbol('.'))) {
                self.pos += 1;
                return true;
            }
        }
        false
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(w) => format!("'{}'", w),
        Token::Int(n) | Token::Float(n) => format!("number {}", n),
        Token::Str(s) => format!("string {:?}", s),
        Token::Symbol(c) => format!("'{}'", c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREETER: &str = r#"
        // The greeting service definition.
        syntax = "proto3";

        package helloworld;

        option go_package = "example.com/helloworld";

        import "google/protobuf/timestamp.proto";

        service Greeter {
          rpc SayHello (HelloRequest) returns (HelloReply) {}
          rpc Chat (stream HelloRequest) returns (stream HelloReply);
          rpc Watch (HelloRequest) returns (stream HelloReply) {
            option deprecated = true;
          }
        }

        /* Request
           message */
        message HelloRequest {
          string name = 1;
          repeated int32 ids = 2 [packed = false];
          map<string, Detail> details = 3;
          oneof choice {
            string alias = 4;
            int64 code = 5 [json_name = "theCode"];
          }
          message Detail {
            enum Level { LOW = 0; HIGH = -1; }
            Level level = 1;
          }
          reserved 10 to 20;
          google.protobuf.Timestamp at = 6;
        }

        message HelloReply {
          optional string message = 1;
        }
    "#;

    #[test]
    fn test_parse_greeter() {
        let file = parse_proto("greeter.proto", GREETER).unwrap();
        assert!(file.proto3);
        assert_eq!(file.package, "helloworld");
        assert_eq!(file.imports, vec!["google/protobuf/timestamp.proto"]);

        let names: Vec<_> = file.messages.iter().map(|m| m.full_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "helloworld.HelloRequest.Detail",
                "helloworld.HelloRequest",
                "helloworld.HelloReply"
            ]
        );

        let request = &file.messages[1];
        assert_eq!(request.fields.len(), 6);
        assert_eq!(request.fields[1].packed, Some(false));
        assert_eq!(request.fields[1].cardinality, Cardinality::Repeated);
        assert_eq!(
            request.fields[2].map,
            Some((ScalarType::String, "Detail".to_string()))
        );
        assert_eq!(request.fields[3].oneof.as_deref(), Some("choice"));
        assert_eq!(request.fields[4].json_name.as_deref(), Some("theCode"));
        assert_eq!(request.fields[5].type_name, "google.protobuf.Timestamp");

        assert_eq!(file.enums.len(), 1);
        assert_eq!(file.enums[0].full_name, "helloworld.HelloRequest.Detail.Level");
        assert_eq!(file.enums[0].values[1], ("HIGH".to_string(), -1));

        let service = &file.services[0];
        assert_eq!(service.full_name, "helloworld.Greeter");
        let modes: Vec<_> = service
            .methods
            .iter()
            .map(|m| (m.name.as_str(), m.client_streaming, m.server_streaming))
            .collect();
        assert_eq!(
            modes,
            vec![
                ("SayHello", false, false),
                ("Chat", true, true),
                ("Watch", false, true)
            ]
        );
    }

    #[test]
    fn test_optional_cardinality() {
        let file = parse_proto("greeter.proto", GREETER).unwrap();
        assert_eq!(file.messages[2].fields[0].cardinality, Cardinality::Optional);
    }

    #[test]
    fn test_message_named_stream_is_not_a_marker() {
        let source = r#"
            syntax = "proto3";
            message stream { int32 x = 1; }
            service S { rpc M (stream) returns (stream stream); }
        "#;
        let file = parse_proto("s.proto", source).unwrap();
        let m = &file.services[0].methods[0];
        assert!(!m.client_streaming);
        assert!(m.server_streaming);
        assert_eq!(m.input_type, "stream");
    }

    #[test]
    fn test_parse_error_reports_line() {
        let source = "syntax = \"proto3\";\nmessage A {\n  string name = ;\n}\n";
        let err = parse_proto("bad.proto", source).unwrap_err();
        match err {
            GrottoError::SchemaParseError { file, message } => {
                assert_eq!(file, "bad.proto");
                assert!(message.starts_with("line 3"), "{}", message);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_message_is_error() {
        let err = parse_proto("bad.proto", "message A { int32 x = 1;").unwrap_err();
        assert!(matches!(err, GrottoError::SchemaParseError { .. }));
    }

    #[test]
    fn test_groups_rejected() {
        let source = "syntax = \"proto2\"; message A { optional group G = 1 { } }";
        assert!(parse_proto("g.proto", source).is_err());
    }

    #[test]
    fn test_hex_and_octal_field_numbers() {
        let source = "message A { int32 a = 0x10; int32 b = 010; }";
        let file = parse_proto("n.proto", source).unwrap();
        assert!(!file.proto3);
        assert_eq!(file.messages[0].fields[0].number, 16);
        assert_eq!(file.messages[0].fields[1].number, 8);
    }
}
