//! Declaration files.
//!
//! A declaration file is a list of documented `name [type] = value` lines:
//!
//! ```text
//! // Address the server binds to.
//! host = "127.0.0.1"
//!
//! // Listening port.
//! port uint32 = 707
//!
//! // Verbose logging.
//! debug = false
//! ```
//!
//! Values must be literals or bare names. Every declaration needs a comment
//! group ending on the line right above it; that text becomes the setting's
//! help in the default language.

mod parser;

use crate::accounts::UserId;
use crate::error::{LoadError, ValueError};
use crate::map::ConfigMap;
use crate::setting::Setting;
use crate::value::{Complex, Kind, Value};
use parser::Expr;
use std::path::Path;
use tracing::debug;

/// A literal as written in the file. Integers keep full precision until a
/// kind is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i128),
    Float(f64),
    Imag(f64),
    Rune(char),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclValue {
    Literal(Literal),
    Ident(String),
}

/// One declared name.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub value: DeclValue,
    pub type_tag: Option<String>,
    pub doc: String,
    pub line: usize,
}

impl Declaration {
    /// The kind this declaration is stored as: its type name, or the
    /// natural kind of the written value. A type name with no counterpart
    /// kind (`float32`, `int8`, `byte`...) is rejected.
    pub fn kind(&self) -> Result<Kind, ValueError> {
        let natural = self.natural_kind();
        match self.type_tag.as_deref() {
            None => Ok(natural),
            Some(tag) => kind_for_type(tag).ok_or_else(|| ValueError::Invalid {
                kind: natural,
                reason: format!("unsupported type {}", tag),
            }),
        }
    }

    fn natural_kind(&self) -> Kind {
        match &self.value {
            DeclValue::Literal(Literal::Int(_)) => Kind::Int64,
            DeclValue::Literal(Literal::Float(_)) => Kind::Float64,
            DeclValue::Literal(Literal::Imag(_)) => Kind::Complex128,
            DeclValue::Literal(Literal::Rune(_)) => Kind::Int32,
            DeclValue::Literal(Literal::Str(_)) => Kind::String,
            DeclValue::Ident(name) if is_bool(name) => Kind::Bool,
            DeclValue::Ident(_) => Kind::String,
        }
    }

    /// Convert the written value to the declaration's kind.
    pub fn to_value(&self) -> Result<Value, ValueError> {
        convert(self.kind()?, &self.value)
    }
}

/// Map a type name to a kind. Only names with an exact counterpart are known.
pub fn kind_for_type(name: &str) -> Option<Kind> {
    let kind = match name {
        "bool" => Kind::Bool,
        "int32" | "rune" => Kind::Int32,
        "int64" | "int" => Kind::Int64,
        "uint32" => Kind::Uint32,
        "uint64" | "uint" => Kind::Uint64,
        "float64" => Kind::Float64,
        "complex128" => Kind::Complex128,
        "string" => Kind::String,
        _ => return None,
    };
    Some(kind)
}

/// Read and parse a declaration file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<Declaration>, LoadError> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let src = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        origin: origin.clone(),
        source,
    })?;
    parse_str(&origin, &src)
}

/// Parse declarations from `src`. `origin` names the source in errors.
pub fn parse_str(origin: &str, src: &str) -> Result<Vec<Declaration>, LoadError> {
    let lines = parser::parse(src).map_err(|e| LoadError::Parse {
        origin: origin.to_string(),
        line: e.line,
        column: e.column,
        message: e.message,
    })?;

    let mut declarations = Vec::new();
    for line in lines {
        for (name, expr) in line.names.into_iter().zip(line.values) {
            let Some(doc) = line.doc.clone() else {
                return Err(LoadError::MissingDoc {
                    origin: origin.to_string(),
                    name,
                });
            };
            let value = match expr {
                Expr::Literal(lit) => DeclValue::Literal(lit),
                Expr::Ident(ident) => DeclValue::Ident(ident),
                Expr::Unsupported => {
                    return Err(LoadError::UnsupportedExpr {
                        origin: origin.to_string(),
                        name,
                    })
                }
            };
            declarations.push(Declaration {
                name,
                value,
                type_tag: line.type_tag.clone(),
                doc,
                line: line.line,
            });
        }
    }
    debug!(origin, count = declarations.len(), "Declarations parsed");
    Ok(declarations)
}

/// Build a program's main map from parsed declarations.
///
/// # Arguments
/// * `origin` - Source name used in errors
/// * `name` - Name of the resulting map
/// * `author` - Recorded as the author of every initial value
/// * `lang` - Language the doc comments are stored under
pub fn build_map(
    origin: &str,
    declarations: &[Declaration],
    name: &str,
    author: UserId,
    lang: &str,
) -> Result<ConfigMap, LoadError> {
    let map = ConfigMap::new(name, true);
    for decl in declarations {
        let value = decl.to_value().map_err(|source| LoadError::Value {
            origin: origin.to_string(),
            name: decl.name.clone(),
            source,
        })?;
        let setting = Setting::with_value(value, author);
        setting.set_help(lang, decl.doc.clone());
        map.set(decl.name.clone(), setting);
    }
    Ok(map)
}

/// [`load_file`] followed by [`build_map`].
pub fn load_map(
    path: impl AsRef<Path>,
    name: &str,
    author: UserId,
    lang: &str,
) -> Result<ConfigMap, LoadError> {
    let path = path.as_ref();
    let declarations = load_file(path)?;
    build_map(&path.display().to_string(), &declarations, name, author, lang)
}

fn is_bool(name: &str) -> bool {
    name == "true" || name == "false"
}

fn convert(kind: Kind, value: &DeclValue) -> Result<Value, ValueError> {
    let invalid = |reason: String| ValueError::Invalid { kind, reason };
    let literal = match value {
        DeclValue::Ident(name) => {
            return match kind {
                Kind::Bool if is_bool(name) => Ok(Value::Bool(name == "true")),
                Kind::String if !is_bool(name) => Ok(Value::String(name.clone())),
                _ => Err(invalid(format!("cannot use {} as {}", name, kind))),
            }
        }
        DeclValue::Literal(lit) => lit,
    };

    // Runes are integers; integral floats may stand for integers.
    let integer = match literal {
        Literal::Int(n) => Some(*n),
        Literal::Rune(c) => Some(i128::from(u32::from(*c))),
        Literal::Float(f) if f.fract() == 0.0 && f.abs() < 1e38 => Some(*f as i128),
        _ => None,
    };
    let out_of_range = |n: i128| invalid(format!("{} out of range", n));

    match kind {
        Kind::Int32 | Kind::Int64 | Kind::Uint32 | Kind::Uint64 => {
            let n = integer.ok_or_else(|| invalid(format!("{:?} is not an integer", literal)))?;
            let value = match kind {
                Kind::Int32 => i32::try_from(n).map(Value::Int32).ok(),
                Kind::Int64 => i64::try_from(n).map(Value::Int64).ok(),
                Kind::Uint32 => u32::try_from(n).map(Value::Uint32).ok(),
                _ => u64::try_from(n).map(Value::Uint64).ok(),
            };
            value.ok_or_else(|| out_of_range(n))
        }
        Kind::Float64 => match literal {
            Literal::Float(f) => Ok(Value::Float64(*f)),
            _ => integer
                .map(|n| Value::Float64(n as f64))
                .ok_or_else(|| invalid(format!("{:?} is not a real number", literal))),
        },
        Kind::Complex128 => match literal {
            Literal::Imag(im) => Ok(Value::Complex128(Complex::new(0.0, *im))),
            Literal::Float(re) => Ok(Value::Complex128(Complex::new(*re, 0.0))),
            _ => integer
                .map(|n| Value::Complex128(Complex::new(n as f64, 0.0)))
                .ok_or_else(|| invalid(format!("{:?} is not a number", literal))),
        },
        Kind::String => match literal {
            Literal::Str(s) => Ok(Value::String(s.clone())),
            other => Err(invalid(format!("{:?} is not a string", other))),
        },
        other => Err(invalid(format!("{} cannot hold {:?}", other, literal))),
    }
}
