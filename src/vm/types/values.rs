//! Runtime value types

use super::super::errors::ErrorInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Three-component vector, the only fixed-size composite scalar
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Runtime value type
///
/// `Str`, `List` and `Map` are heap-resident and tracked by the heap accountant
/// whenever they are stored in a global slot or a local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vector(Vector),
    List(Vec<Val>),
    /// Composite record; ordered so snapshots serialize deterministically
    Map(BTreeMap<String, Val>),
    /// Error value with code and message
    Error(ErrorInfo),
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::Vector(v) => *v != Vector::default(),
            Val::List(items) => !items.is_empty(),
            Val::Map(m) => !m.is_empty(),
            Val::Error(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "string",
            Val::Vector(_) => "vector",
            Val::List(_) => "list",
            Val::Map(_) => "map",
            Val::Error(_) => "error",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Val::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Val::Int(i) => Some(*i as f64),
            Val::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, ""),
            Val::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            Val::Int(i) => write!(f, "{}", i),
            Val::Float(x) => write!(f, "{:.6}", x),
            Val::Str(s) => write!(f, "{}", s),
            Val::Vector(v) => write!(f, "<{:.5}, {:.5}, {:.5}>", v.x, v.y, v.z),
            Val::List(items) => {
                for item in items {
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Val::Map(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Val::Error(e) => write!(f, "{}: {}", e.code, e.message),
        }
    }
}

/// Declared type of a global slot, used to build its default value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Bool,
    Int,
    Float,
    Str,
    Vector,
    List,
    Map,
}

impl SlotType {
    pub fn default_value(self) -> Val {
        match self {
            SlotType::Bool => Val::Bool(false),
            SlotType::Int => Val::Int(0),
            SlotType::Float => Val::Float(0.0),
            SlotType::Str => Val::Str(String::new()),
            SlotType::Vector => Val::Vector(Vector::default()),
            SlotType::List => Val::List(Vec::new()),
            SlotType::Map => Val::Map(BTreeMap::new()),
        }
    }
}
