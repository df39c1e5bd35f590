//! Structured statement builder.
//!
//! Templates name their holes as `{placeholder}`. Each placeholder is bound to a typed
//! [`Binding`]: identifiers and identifier lists are validated and double-quoted, literals
//! are rendered as SQL literals, type expressions are checked against a conservative
//! grammar, and fragments are trusted SQL supplied by the driving algorithm (rendered
//! with the same bindings first, so they may use placeholders too).
//!
//! `{{` and `}}` produce literal braces. Text inside single or double quotes is copied
//! verbatim, so array literals such as `'{1,2}'` need no escaping.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::domain::errors::StatementError;
use crate::domain::models::Value;

const MAX_FRAGMENT_DEPTH: usize = 8;

/// A validated, possibly schema-qualified, relation or column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    parts: Vec<String>,
}

impl Ident {
    /// Parse `name` or `schema.name`. Each part is quoted on output.
    pub fn parse(raw: &str) -> Result<Self, StatementError> {
        let invalid = || StatementError::InvalidIdentifier(raw.to_string());
        if raw.trim().is_empty() {
            return Err(invalid());
        }
        let parts: Vec<String> = raw.split('.').map(str::to_string).collect();
        if parts.len() > 3 {
            return Err(invalid());
        }
        for part in &parts {
            if part.is_empty() || part.trim() != part || part.chars().any(char::is_control) {
                return Err(invalid());
            }
        }
        Ok(Self { parts })
    }

    /// `schema.name` when this name carries no schema of its own, otherwise unchanged.
    pub fn in_schema_if_unqualified(&self, schema: &str) -> Self {
        if self.parts.len() == 1 {
            let mut parts = vec![schema.to_string()];
            parts.extend(self.parts.iter().cloned());
            Self { parts }
        } else {
            self.clone()
        }
    }

    /// Schema part of a qualified name.
    pub fn schema(&self) -> Option<&str> {
        match self.parts.len() {
            1 => None,
            n => Some(self.parts[n - 2].as_str()),
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.parts.len() > 1
    }

    /// Unqualified last part of the name.
    pub fn name(&self) -> &str {
        self.parts.last().map_or("", String::as_str)
    }

    /// SQL rendering, every part double-quoted with embedded quotes doubled.
    pub fn quoted(&self) -> String {
        self.parts
            .iter()
            .map(|p| format!("\"{}\"", p.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.parts.join("."))
    }
}

impl std::str::FromStr for Ident {
    type Err = StatementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// An engine-side type expression such as `REAL` or `NUMERIC(10, 2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr(String);

impl TypeExpr {
    pub fn parse(raw: &str) -> Result<Self, StatementError> {
        let invalid = || StatementError::InvalidTypeExpr(raw.to_string());
        let trimmed = raw.trim();
        if !trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        let mut depth = 0i32;
        for c in trimmed.chars() {
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(invalid());
                    }
                }
                c if c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | ',') => {}
                _ => return Err(invalid()),
            }
        }
        if depth != 0 {
            return Err(invalid());
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a placeholder expands to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Ident(Ident),
    IdentList(Vec<Ident>),
    Literal(Value),
    TypeExpr(TypeExpr),
    /// Trusted SQL text from the driving algorithm.
    Fragment(String),
}

/// Placeholder name to binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: BTreeMap<String, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) -> &mut Self {
        self.entries.insert(name.into(), binding);
        self
    }

    pub fn with(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.insert(name, binding);
        self
    }

    pub fn with_ident(self, name: impl Into<String>, ident: Ident) -> Self {
        self.with(name, Binding::Ident(ident))
    }

    pub fn with_literal(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(name, Binding::Literal(value.into()))
    }

    pub fn with_fragment(self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.with(name, Binding::Fragment(sql.into()))
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` whose name is not bound here yet.
    pub fn fill_from(&mut self, other: &Bindings) -> &mut Self {
        for (name, binding) in &other.entries {
            self.entries
                .entry(name.clone())
                .or_insert_with(|| binding.clone());
        }
        self
    }
}

/// Render a string as a single-quoted SQL literal.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render a value as a SQL literal.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => render_real(*f),
        Value::Text(s) => quote_literal(s),
        Value::Blob(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                let _ = write!(out, "{b:02X}");
            }
            out.push('\'');
            out
        }
    }
}

fn render_real(f: f64) -> String {
    if f.is_nan() {
        return "NULL".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "9e999" } else { "-9e999" }.to_string();
    }
    let text = format!("{f:?}");
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{text}.0")
    }
}

/// Expand every placeholder of `template` from `bindings`.
pub fn render(template: &str, bindings: &Bindings) -> Result<String, StatementError> {
    render_at_depth(template, bindings, 0)
}

fn render_at_depth(
    template: &str,
    bindings: &Bindings,
    depth: usize,
) -> Result<String, StatementError> {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                let end = template[i + 1..]
                    .find(quote as char)
                    .map_or(template.len(), |off| i + 1 + off + 1);
                out.push_str(&template[i..end]);
                i = end;
            }
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                out.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                out.push('}');
                i += 2;
            }
            b'{' => {
                let close = template[i + 1..]
                    .find('}')
                    .map(|off| i + 1 + off)
                    .ok_or(StatementError::UnbalancedBrace(i))?;
                let name = &template[i + 1..close];
                if !is_placeholder_name(name) {
                    return Err(StatementError::UnbalancedBrace(i));
                }
                let binding = bindings
                    .get(name)
                    .ok_or_else(|| StatementError::UnknownPlaceholder(name.to_string()))?;
                out.push_str(&expand(name, binding, bindings, depth)?);
                i = close + 1;
            }
            b'}' => return Err(StatementError::UnbalancedBrace(i)),
            _ => {
                let next = template[i..]
                    .find(['\'', '"', '{', '}'])
                    .map_or(template.len(), |off| i + off);
                out.push_str(&template[i..next]);
                i = next;
            }
        }
    }

    Ok(out)
}

fn expand(
    name: &str,
    binding: &Binding,
    bindings: &Bindings,
    depth: usize,
) -> Result<String, StatementError> {
    Ok(match binding {
        Binding::Ident(ident) => ident.quoted(),
        Binding::IdentList(idents) => idents
            .iter()
            .map(Ident::quoted)
            .collect::<Vec<_>>()
            .join(", "),
        Binding::Literal(value) => render_literal(value),
        Binding::TypeExpr(t) => t.as_str().to_string(),
        Binding::Fragment(sql) => {
            if depth >= MAX_FRAGMENT_DEPTH {
                return Err(StatementError::FragmentTooDeep(name.to_string()));
            }
            render_at_depth(sql, bindings, depth + 1)?
        }
    })
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
