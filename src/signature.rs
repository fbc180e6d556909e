//! Type signatures for message bodies.
//!
//! Signatures use the D-Bus type codes the service has always advertised
//! (`s`, `o`, `x`, `u`, `a{sv}`, `(xx)`, ...). Replies are checked against
//! the declared output signature before they are sent, so a handler that
//! returns the wrong shape produces a marshalling fault instead of a
//! silently coerced reply.

use std::fmt;

use serde_json::Value;

use crate::error::MarshalError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Byte,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    Variant,
    Array(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Struct(Vec<Type>),
}

impl Type {
    fn is_basic(&self) -> bool {
        !matches!(
            self,
            Type::Variant | Type::Array(_) | Type::Dict(..) | Type::Struct(_)
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("b"),
            Type::Byte => f.write_str("y"),
            Type::Int16 => f.write_str("n"),
            Type::Uint16 => f.write_str("q"),
            Type::Int32 => f.write_str("i"),
            Type::Uint32 => f.write_str("u"),
            Type::Int64 => f.write_str("x"),
            Type::Uint64 => f.write_str("t"),
            Type::Double => f.write_str("d"),
            Type::String => f.write_str("s"),
            Type::ObjectPath => f.write_str("o"),
            Type::Signature => f.write_str("g"),
            Type::Variant => f.write_str("v"),
            Type::Array(inner) => write!(f, "a{inner}"),
            Type::Dict(key, value) => write!(f, "a{{{key}{value}}}"),
            Type::Struct(fields) => {
                f.write_str("(")?;
                for field in fields {
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A sequence of complete types describing a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    text: String,
    types: Vec<Type>,
}

impl Signature {
    pub fn parse(text: &str) -> Result<Self, MarshalError> {
        let bytes = text.as_bytes();
        let mut pos = 0;
        let mut types = Vec::new();
        while pos < bytes.len() {
            types.push(parse_type(text, bytes, &mut pos)?);
        }
        Ok(Self {
            text: text.to_string(),
            types,
        })
    }

    pub fn types(&self) -> &[Type] {
        &self.types
    }

    /// Verify that `body` matches this signature exactly, arity included.
    pub fn check(&self, body: &[Value]) -> Result<(), MarshalError> {
        if body.len() != self.types.len() {
            return Err(MarshalError::Arity {
                expected: self.types.len(),
                found: body.len(),
            });
        }
        for (index, (ty, value)) in self.types.iter().zip(body).enumerate() {
            check_value(ty, value, &format!("${index}"))?;
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn invalid(signature: &str, reason: impl Into<String>) -> MarshalError {
    MarshalError::InvalidSignature {
        signature: signature.to_string(),
        reason: reason.into(),
    }
}

fn parse_type(text: &str, bytes: &[u8], pos: &mut usize) -> Result<Type, MarshalError> {
    let Some(&code) = bytes.get(*pos) else {
        return Err(invalid(text, "unexpected end of signature"));
    };
    *pos += 1;

    let ty = match code {
        b'b' => Type::Bool,
        b'y' => Type::Byte,
        b'n' => Type::Int16,
        b'q' => Type::Uint16,
        b'i' => Type::Int32,
        b'u' => Type::Uint32,
        b'x' => Type::Int64,
        b't' => Type::Uint64,
        b'd' => Type::Double,
        b's' => Type::String,
        b'o' => Type::ObjectPath,
        b'g' => Type::Signature,
        b'v' => Type::Variant,
        b'a' if bytes.get(*pos) == Some(&b'{') => {
            *pos += 1;
            let key = parse_type(text, bytes, pos)?;
            if !key.is_basic() {
                return Err(invalid(text, "dictionary keys must be basic types"));
            }
            let value = parse_type(text, bytes, pos)?;
            if bytes.get(*pos) != Some(&b'}') {
                return Err(invalid(text, "unterminated dictionary entry"));
            }
            *pos += 1;
            Type::Dict(Box::new(key), Box::new(value))
        }
        b'a' => Type::Array(Box::new(parse_type(text, bytes, pos)?)),
        b'(' => {
            let mut fields = Vec::new();
            loop {
                match bytes.get(*pos) {
                    Some(b')') => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => fields.push(parse_type(text, bytes, pos)?),
                    None => return Err(invalid(text, "unterminated struct")),
                }
            }
            if fields.is_empty() {
                return Err(invalid(text, "empty struct"));
            }
            Type::Struct(fields)
        }
        other => {
            return Err(invalid(
                text,
                format!("unknown type code `{}`", other as char),
            ))
        }
    };
    Ok(ty)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn in_range(value: &Value, min: i64, max: u64) -> bool {
    if let Some(n) = value.as_i64() {
        return n >= min && (n < 0 || (n as u64) <= max);
    }
    value.as_u64().is_some_and(|n| n <= max)
}

/// Object paths are `/` or `/`-separated non-empty `[A-Za-z0-9_]` elements.
pub fn is_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|element| {
        !element.is_empty()
            && element
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

fn check_value(ty: &Type, value: &Value, at: &str) -> Result<(), MarshalError> {
    let ok = match ty {
        Type::Bool => value.is_boolean(),
        Type::Byte => in_range(value, 0, u8::MAX as u64),
        Type::Int16 => in_range(value, i16::MIN as i64, i16::MAX as u64),
        Type::Uint16 => in_range(value, 0, u16::MAX as u64),
        Type::Int32 => in_range(value, i32::MIN as i64, i32::MAX as u64),
        Type::Uint32 => in_range(value, 0, u32::MAX as u64),
        Type::Int64 => value.is_i64(),
        Type::Uint64 => value.is_u64(),
        Type::Double => value.is_number(),
        Type::String => value.is_string(),
        Type::ObjectPath => value.as_str().is_some_and(is_object_path),
        Type::Signature => value
            .as_str()
            .is_some_and(|s| Signature::parse(s).is_ok()),
        Type::Variant => true,
        Type::Array(inner) => match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    check_value(inner, item, &format!("{at}[{index}]"))?;
                }
                true
            }
            _ => false,
        },
        Type::Dict(key, inner) => match value {
            Value::Object(entries) => {
                if !matches!(**key, Type::String | Type::ObjectPath) {
                    false
                } else {
                    for (name, item) in entries {
                        check_value(inner, item, &format!("{at}.{name}"))?;
                    }
                    true
                }
            }
            _ => false,
        },
        Type::Struct(fields) => match value {
            Value::Array(items) if items.len() == fields.len() => {
                for (index, (field, item)) in fields.iter().zip(items).enumerate() {
                    check_value(field, item, &format!("{at}.{index}"))?;
                }
                true
            }
            _ => false,
        },
    };

    if ok {
        Ok(())
    } else {
        Err(MarshalError::Mismatch {
            expected: ty.to_string(),
            found: kind_of(value),
            at: at.to_string(),
        })
    }
}
