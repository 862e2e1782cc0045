//! # Container & Wire Format
//!
//! `Container` is the core payload carrier: an ordered multimap of named
//! [`Value`]s plus a small routing header (`source`/`target`/`message_type`).
//! This module also owns the deterministic textual wire format described in
//! the design spec — the format a `TcpSocketTransport`-style external
//! collaborator would frame and ship across the wire, though that transport
//! itself is out of this crate's scope.
//!
//! ## Wire format
//!
//! ```text
//! @header={source=<s>;source_sub=<s>;target=<t>;target_sub=<t>;type=<m>;}
//! @data=[<name>,<type_tag>,<encoded_payload>];[<name>,<type_tag>,<payload>];...
//! ```
//!
//! - Header values and `string`/`bytes`/`container` payloads are backslash-escaped
//!   (`]`, `;`, `[`, `\`) so that bracket/semicolon delimiters inside a payload
//!   never get confused with the framing.
//! - `string` and `container` payloads are additionally length-prefixed
//!   (`<unescaped-len>:<escaped-content>`) as a corruption check during parsing.
//! - `bytes` payloads are base64-encoded (this port's documented choice for the
//!   open question in the design spec) and also length-prefixed with the
//!   original byte length.
//! - Scalar numeric/bool payloads need no escaping — their textual form cannot
//!   contain a reserved character — and are written as plain decimal/`true`/
//!   `false` text.
//! - Names and type tags are assumed not to contain `,`, `[`, `]`, or `;`; this
//!   mirrors the source format, which never specifies name escaping either.

use crate::error::BusError;
use crate::value::Value;
use base64::Engine;
use std::collections::HashMap;

/// Default cap on a container's serialized size, per the design spec's
/// configuration table. Bus-level configuration may override this via
/// [`Container::serialize_with_limit`]/[`Container::deserialize_with_limit`].
pub const DEFAULT_MAX_CONTAINER_SIZE: usize = 16 * 1024 * 1024;

/// The 4-byte magic used to frame a textual payload for binary transport.
pub const WIRE_MAGIC: [u8; 4] = *b"MSGC";
/// The wire format version, bumped only on a breaking change to the textual
/// grammar above.
pub const WIRE_VERSION: u16 = 1;

/// Routing header carried by every container: who sent it, who it's for, and
/// what kind of message it is. All fields are plain strings — the header
/// deliberately carries no typed `Value`s, since routing metadata is consumed
/// by infrastructure (the bus, a transport) rather than application logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub source_id: String,
    pub source_sub_id: String,
    pub target_id: String,
    pub target_sub_id: String,
    pub message_type: String,
}

/// An ordered multimap of named [`Value`]s plus a [`Header`].
///
/// Values are stored in a flat `Vec` to preserve insertion order exactly (the
/// design spec pins value order across a serialize/deserialize round trip); a
/// side `HashMap<String, Vec<usize>>` indexes name → positions for O(1)
/// amortized lookup by name. The index is rebuilt on any operation that
/// removes entries (`set_value`) since removal shifts subsequent positions;
/// it is updated incrementally on `add`, which never shifts existing indices.
#[derive(Debug, Clone)]
pub struct Container {
    header: Header,
    values: Vec<(String, Value)>,
    name_index: HashMap<String, Vec<usize>>,
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        // The name index is derived state recomputed from `values`; comparing
        // it would be redundant and would make two semantically-equal
        // containers built through different mutation sequences compare
        // unequal if their indices happened to be laid out differently.
        self.header == other.header && self.values == other.values
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Create an empty container with a default (all-empty-string) header.
    pub fn new() -> Self {
        Self {
            header: Header::default(),
            values: Vec::new(),
            name_index: HashMap::new(),
        }
    }

    // ---- header ----

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn source_id(&self) -> &str {
        &self.header.source_id
    }
    pub fn source_sub_id(&self) -> &str {
        &self.header.source_sub_id
    }
    pub fn target_id(&self) -> &str {
        &self.header.target_id
    }
    pub fn target_sub_id(&self) -> &str {
        &self.header.target_sub_id
    }
    pub fn message_type(&self) -> &str {
        &self.header.message_type
    }

    pub fn set_source_id(&mut self, v: impl Into<String>) {
        self.header.source_id = v.into();
    }
    pub fn set_source_sub_id(&mut self, v: impl Into<String>) {
        self.header.source_sub_id = v.into();
    }
    pub fn set_target_id(&mut self, v: impl Into<String>) {
        self.header.target_id = v.into();
    }
    pub fn set_target_sub_id(&mut self, v: impl Into<String>) {
        self.header.target_sub_id = v.into();
    }
    pub fn set_message_type(&mut self, v: impl Into<String>) {
        self.header.message_type = v.into();
    }

    /// Swap source and target identity, leaving `message_type` and all values
    /// untouched. Used when turning an inbound request into its reply.
    pub fn swap_header(&mut self) {
        std::mem::swap(&mut self.header.source_id, &mut self.header.target_id);
        std::mem::swap(&mut self.header.source_sub_id, &mut self.header.target_sub_id);
    }

    // ---- values ----

    /// Append a named value, preserving insertion order. Multiple values may
    /// share a name.
    pub fn add(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let idx = self.values.len();
        self.name_index.entry(name.clone()).or_default().push(idx);
        self.values.push((name, value));
    }

    /// Replace every value currently stored under `name` with a single new
    /// value. If `name` was absent, this behaves like `add`.
    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.values.retain(|(n, _)| n != &name);
        self.values.push((name, value));
        self.rebuild_index();
    }

    /// Remove every value stored under `name`. No-op if absent.
    pub fn remove(&mut self, name: &str) {
        self.values.retain(|(n, _)| n != name);
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.name_index.clear();
        for (idx, (name, _)) in self.values.iter().enumerate() {
            self.name_index.entry(name.clone()).or_default().push(idx);
        }
    }

    /// Get the first value stored under `name`, or a canonical `Value::Null`
    /// if absent. A missing name behaves as a typed null rather than a null
    /// pointer equivalent, so this never returns `Option`.
    pub fn get_value(&self, name: &str) -> Value {
        self.get_value_at(name, 0)
    }

    /// Get the value at `index` among those stored under `name`, or
    /// `Value::Null` if `name` is absent or `index` is out of range.
    pub fn get_value_at(&self, name: &str, index: usize) -> Value {
        self.name_index
            .get(name)
            .and_then(|positions| positions.get(index))
            .map(|&pos| self.values[pos].1.clone())
            .unwrap_or(Value::Null)
    }

    /// All values stored under `name`, in insertion order. Empty if absent.
    pub fn value_array(&self, name: &str) -> Vec<Value> {
        self.name_index
            .get(name)
            .map(|positions| positions.iter().map(|&pos| self.values[pos].1.clone()).collect())
            .unwrap_or_default()
    }

    /// Total count of stored values (across all names).
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Iterate all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Duplicate this container. `deep = true` duplicates the header and every
    /// value (recursively, for nested containers — an ordinary `Clone` since
    /// `Value::Container` owns its child outright). `deep = false` duplicates
    /// only the header, producing an empty-valued container with the same
    /// routing identity.
    pub fn copy(&self, deep: bool) -> Container {
        if deep {
            self.clone()
        } else {
            Container {
                header: self.header.clone(),
                values: Vec::new(),
                name_index: HashMap::new(),
            }
        }
    }

    // ---- serialization ----

    /// Serialize using [`DEFAULT_MAX_CONTAINER_SIZE`].
    pub fn serialize(&self) -> Result<String, BusError> {
        self.serialize_with_limit(DEFAULT_MAX_CONTAINER_SIZE)
    }

    /// Serialize, failing with [`BusError::SizeLimitExceeded`] if the encoded
    /// text would exceed `max_size` bytes.
    pub fn serialize_with_limit(&self, max_size: usize) -> Result<String, BusError> {
        let mut out = String::with_capacity(64 + self.values.len() * 32);
        out.push_str("@header={");
        write_header_field(&mut out, "source", &self.header.source_id);
        write_header_field(&mut out, "source_sub", &self.header.source_sub_id);
        write_header_field(&mut out, "target", &self.header.target_id);
        write_header_field(&mut out, "target_sub", &self.header.target_sub_id);
        write_header_field(&mut out, "type", &self.header.message_type);
        out.push('}');
        out.push('\n');
        out.push_str("@data=");
        for (name, value) in &self.values {
            out.push('[');
            out.push_str(name);
            out.push(',');
            out.push_str(value.type_tag());
            out.push(',');
            write_payload(&mut out, value)?;
            out.push(']');
            out.push(';');

            if out.len() > max_size {
                return Err(BusError::SizeLimitExceeded {
                    actual: out.len(),
                    limit: max_size,
                });
            }
        }

        if out.len() > max_size {
            return Err(BusError::SizeLimitExceeded {
                actual: out.len(),
                limit: max_size,
            });
        }

        Ok(out)
    }

    /// Frame the textual payload with the 4-byte magic and 2-byte version
    /// prefix described in the module docs, for handoff to a binary-safe
    /// transport.
    pub fn serialize_framed(&self) -> Result<Vec<u8>, BusError> {
        let text = self.serialize()?;
        let mut framed = Vec::with_capacity(6 + text.len());
        framed.extend_from_slice(&WIRE_MAGIC);
        framed.extend_from_slice(&WIRE_VERSION.to_be_bytes());
        framed.extend_from_slice(text.as_bytes());
        Ok(framed)
    }

    /// Deserialize using [`DEFAULT_MAX_CONTAINER_SIZE`].
    pub fn deserialize(blob: &str) -> Result<Container, BusError> {
        Self::deserialize_with_limit(blob, DEFAULT_MAX_CONTAINER_SIZE)
    }

    /// Deserialize, rejecting input larger than `max_size` bytes before any
    /// parsing (and therefore before any allocation proportional to content).
    pub fn deserialize_with_limit(blob: &str, max_size: usize) -> Result<Container, BusError> {
        if blob.len() > max_size {
            return Err(BusError::SizeLimitExceeded {
                actual: blob.len(),
                limit: max_size,
            });
        }
        parse_container(blob)
    }

    /// Parse a framed blob produced by [`Container::serialize_framed`].
    pub fn deserialize_framed(blob: &[u8]) -> Result<Container, BusError> {
        if blob.len() < 6 || blob[0..4] != WIRE_MAGIC {
            return Err(BusError::ParseError {
                position: 0,
                reason: "missing or invalid wire magic".to_string(),
            });
        }
        let version = u16::from_be_bytes([blob[4], blob[5]]);
        if version != WIRE_VERSION {
            return Err(BusError::ParseError {
                position: 4,
                reason: format!("unsupported wire version {version}"),
            });
        }
        let text = std::str::from_utf8(&blob[6..]).map_err(|e| BusError::ParseError {
            position: 6,
            reason: format!("frame payload is not valid UTF-8: {e}"),
        })?;
        Self::deserialize(text)
    }
}

fn write_header_field(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    out.push_str(&escape(value));
    out.push(';');
}

fn write_payload(out: &mut String, value: &Value) -> Result<(), BusError> {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int8(n) => out.push_str(&n.to_string()),
        Value::Int16(n) => out.push_str(&n.to_string()),
        Value::Int32(n) => out.push_str(&n.to_string()),
        Value::Int64(n) => out.push_str(&n.to_string()),
        Value::UInt8(n) => out.push_str(&n.to_string()),
        Value::UInt16(n) => out.push_str(&n.to_string()),
        Value::UInt32(n) => out.push_str(&n.to_string()),
        Value::UInt64(n) => out.push_str(&n.to_string()),
        Value::Float(n) => out.push_str(&n.to_string()),
        Value::Double(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_length_prefixed(out, s),
        Value::Bytes(b) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(b);
            out.push_str(&b.len().to_string());
            out.push(':');
            // base64 output never contains our reserved characters, so no
            // escaping pass is needed for the bytes payload itself.
            out.push_str(&encoded);
        }
        Value::Container(c) => {
            let nested = c.serialize()?;
            write_length_prefixed(out, &nested);
        }
    }
    Ok(())
}

fn write_length_prefixed(out: &mut String, raw: &str) {
    out.push_str(&raw.len().to_string());
    out.push(':');
    out.push_str(&escape(raw));
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ']' | ';' | '[' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Scan `s` starting at `start` for the first unescaped occurrence of
/// `needle`, returning its byte offset. Escaping is `\`-based, matching
/// [`escape`]/[`unescape`] above.
fn find_unescaped(s: &str, start: usize, needle: char) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = start;
    let mut escaped = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == needle {
            return Some(i);
        }
        i += c.len_utf8();
    }
    None
}

fn parse_error(position: usize, reason: impl Into<String>) -> BusError {
    BusError::ParseError {
        position,
        reason: reason.into(),
    }
}

fn parse_container(blob: &str) -> Result<Container, BusError> {
    let header_prefix = "@header={";
    if !blob.starts_with(header_prefix) {
        return Err(parse_error(0, "expected '@header={' prefix"));
    }
    let header_end = blob
        .find('}')
        .ok_or_else(|| parse_error(blob.len(), "unterminated header block"))?;
    let header_body = &blob[header_prefix.len()..header_end];
    let header = parse_header(header_body, header_prefix.len())?;

    let rest = &blob[header_end + 1..];
    let rest = rest.trim_start_matches('\n');
    let data_prefix = "@data=";
    if !rest.starts_with(data_prefix) {
        return Err(parse_error(header_end + 1, "expected '@data=' section"));
    }
    let data = &rest[data_prefix.len()..];

    let mut container = Container {
        header,
        values: Vec::new(),
        name_index: HashMap::new(),
    };

    let mut pos = 0usize;
    let data_bytes = data.as_bytes();
    while pos < data_bytes.len() {
        if data_bytes[pos] as char != '[' {
            return Err(parse_error(pos, "expected '[' at start of value entry"));
        }
        let comma1 = data[pos..]
            .find(',')
            .map(|o| pos + o)
            .ok_or_else(|| parse_error(pos, "missing name/type separator"))?;
        let name = &data[pos + 1..comma1];

        let comma2 = data[comma1 + 1..]
            .find(',')
            .map(|o| comma1 + 1 + o)
            .ok_or_else(|| parse_error(comma1, "missing type/payload separator"))?;
        let type_tag = &data[comma1 + 1..comma2];

        let payload_start = comma2 + 1;
        let (value, payload_end) = parse_value(data, payload_start, type_tag)?;

        if data.as_bytes().get(payload_end) != Some(&b']') {
            return Err(parse_error(payload_end, "unterminated value entry"));
        }
        container.add(name.to_string(), value);

        pos = payload_end + 1;
        if data.as_bytes().get(pos) == Some(&b';') {
            pos += 1;
        }
    }

    Ok(container)
}

fn parse_header(body: &str, base_offset: usize) -> Result<Header, BusError> {
    let mut header = Header::default();
    for field in split_unescaped_fields(body) {
        if field.is_empty() {
            continue;
        }
        let eq = field
            .find('=')
            .ok_or_else(|| parse_error(base_offset, "malformed header field"))?;
        let key = &field[..eq];
        let value = unescape(&field[eq + 1..]);
        match key {
            "source" => header.source_id = value,
            "source_sub" => header.source_sub_id = value,
            "target" => header.target_id = value,
            "target_sub" => header.target_sub_id = value,
            "type" => header.message_type = value,
            other => {
                return Err(parse_error(
                    base_offset,
                    format!("unknown header field '{other}'"),
                ))
            }
        }
    }
    Ok(header)
}

fn split_unescaped_fields(body: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    while let Some(sep) = find_unescaped(body, start, ';') {
        fields.push(&body[start..sep]);
        start = sep + 1;
    }
    if start < body.len() {
        fields.push(&body[start..]);
    }
    fields
}

fn parse_value(data: &str, start: usize, type_tag: &str) -> Result<(Value, usize), BusError> {
    match type_tag {
        "nl" => Ok((Value::Null, start)),
        "b" => {
            let end = bare_scalar_end(data, start)?;
            let text = &data[start..end];
            match text {
                "true" => Ok((Value::Bool(true), end)),
                "false" => Ok((Value::Bool(false), end)),
                other => Err(parse_error(start, format!("invalid bool literal '{other}'"))),
            }
        }
        "i1" => parse_scalar(data, start, "i1").map(|(n, e)| (Value::Int8(n), e)),
        "i2" => parse_scalar(data, start, "i2").map(|(n, e)| (Value::Int16(n), e)),
        "i4" => parse_scalar(data, start, "i4").map(|(n, e)| (Value::Int32(n), e)),
        "i8" => parse_scalar(data, start, "i8").map(|(n, e)| (Value::Int64(n), e)),
        "u1" => parse_scalar(data, start, "u1").map(|(n, e)| (Value::UInt8(n), e)),
        "u2" => parse_scalar(data, start, "u2").map(|(n, e)| (Value::UInt16(n), e)),
        "u4" => parse_scalar(data, start, "u4").map(|(n, e)| (Value::UInt32(n), e)),
        "u8" => parse_scalar(data, start, "u8").map(|(n, e)| (Value::UInt64(n), e)),
        "f4" => parse_scalar(data, start, "f4").map(|(n, e)| (Value::Float(n), e)),
        "f8" => parse_scalar(data, start, "f8").map(|(n, e)| (Value::Double(n), e)),
        "s" => {
            let (text, end) = parse_length_prefixed(data, start)?;
            Ok((Value::String(text), end))
        }
        "by" => {
            let colon = data[start..]
                .find(':')
                .map(|o| start + o)
                .ok_or_else(|| parse_error(start, "missing bytes length prefix"))?;
            let declared_len: usize = data[start..colon]
                .parse()
                .map_err(|_| parse_error(start, "invalid bytes length prefix"))?;
            let end = find_unescaped(data, colon + 1, ']')
                .ok_or_else(|| parse_error(colon + 1, "unterminated bytes payload"))?;
            let encoded = &data[colon + 1..end];
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| parse_error(colon + 1, format!("invalid base64: {e}")))?;
            if decoded.len() != declared_len {
                return Err(parse_error(
                    start,
                    format!(
                        "bytes length mismatch: declared {declared_len}, decoded {}",
                        decoded.len()
                    ),
                ));
            }
            Ok((Value::Bytes(decoded), end))
        }
        "cn" => {
            let (text, end) = parse_length_prefixed(data, start)?;
            let nested = parse_container(&text)?;
            Ok((Value::Container(Box::new(nested)), end))
        }
        other => Err(parse_error(start, format!("unknown type tag '{other}'"))),
    }
}

/// Find the end of a scalar (numeric/bool) payload: the first unescaped `]`,
/// since scalar text never itself contains a reserved character.
fn bare_scalar_end(data: &str, start: usize) -> Result<usize, BusError> {
    find_unescaped(data, start, ']').ok_or_else(|| parse_error(start, "unterminated scalar payload"))
}

fn parse_scalar<T: std::str::FromStr>(data: &str, start: usize, tag: &str) -> Result<(T, usize), BusError> {
    let end = bare_scalar_end(data, start)?;
    data[start..end]
        .parse::<T>()
        .map(|v| (v, end))
        .map_err(|_| parse_error(start, format!("invalid {tag} literal '{}'", &data[start..end])))
}

fn parse_length_prefixed(data: &str, start: usize) -> Result<(String, usize), BusError> {
    let colon = data[start..]
        .find(':')
        .map(|o| start + o)
        .ok_or_else(|| parse_error(start, "missing length prefix"))?;
    let declared_len: usize = data[start..colon]
        .parse()
        .map_err(|_| parse_error(start, "invalid length prefix"))?;
    let end = find_unescaped(data, colon + 1, ']')
        .ok_or_else(|| parse_error(colon + 1, "unterminated payload"))?;
    let text = unescape(&data[colon + 1..end]);
    if text.len() != declared_len {
        return Err(parse_error(
            start,
            format!("length mismatch: declared {declared_len}, actual {}", text.len()),
        ));
    }
    Ok((text, end))
}
