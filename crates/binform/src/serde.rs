//! JSON-deserializable schema description.
//!
//! These types describe the shape of a binary format in plain data. They are
//! intended to be constructed from JSON (for example a schema file shipped
//! with your application), converted into a [`TypeDef`], and compiled.
//!
//! Closures cannot be expressed in JSON; symbolic references can, spelled
//! `{"ref": "len"}`. The string `"eof"` is recognized as the end-of-stream
//! sentinel for `read_until`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::def::TypeDef;
use crate::expr::Expr;
use crate::value::Value;

/// Description of one schema node. The root of a schema file is one of
/// these; records nest them through `fields`, arrays through `element`,
/// choices through `choices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Registered type name, e.g. `"struct"`, `"uint16le"`, `"stringz"`.
    #[serde(rename = "type")]
    pub ty: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, ParamDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<SchemaDef>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChoiceDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hide: Vec<String>,
}

/// One record field. A missing name declares an anonymous field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub node: SchemaDef,
}

/// One choice alternative under an explicit key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceDef {
    pub key: KeyDef,

    #[serde(flatten)]
    pub node: SchemaDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyDef {
    Int(i64),
    Str(String),
}

/// A parameter value: a scalar literal or a reference to another field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamDef {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ref {
        #[serde(rename = "ref")]
        target: String,
    },
}

impl From<ParamDef> for Expr {
    fn from(p: ParamDef) -> Self {
        match p {
            ParamDef::Bool(b) => Expr::Lit(Value::Bool(b)),
            ParamDef::Int(v) => Expr::Lit(Value::Int(v)),
            ParamDef::Float(v) => Expr::Lit(Value::Float(v)),
            ParamDef::Str(s) => Expr::Lit(Value::Str(s)),
            ParamDef::Ref { target } => Expr::Sym(target),
        }
    }
}

impl From<KeyDef> for Value {
    fn from(k: KeyDef) -> Self {
        match k {
            KeyDef::Int(v) => Value::Int(v),
            KeyDef::Str(s) => Value::Str(s),
        }
    }
}

impl From<SchemaDef> for TypeDef {
    fn from(def: SchemaDef) -> Self {
        TypeDef {
            ty: def.ty,
            params: def
                .params
                .into_iter()
                .map(|(name, p)| (name, Expr::from(p)))
                .collect(),
            fields: def
                .fields
                .into_iter()
                .map(|f| (f.name, TypeDef::from(f.node)))
                .collect(),
            element: def.element.map(|e| Box::new(TypeDef::from(*e))),
            choices: def
                .choices
                .into_iter()
                .map(|c| (Value::from(c.key), TypeDef::from(c.node)))
                .collect(),
            hide: def.hide,
        }
    }
}
