//! Unsanitized type definitions.
//!
//! A [`TypeDef`] names a registered type and carries raw parameters, field
//! declarations, an array element, or choice alternatives. It is the input
//! to [`crate::Schema::compile`], which validates it and produces immutable
//! prototypes.

use crate::expr::Expr;
use crate::proto::Endian;
use crate::value::Value;

/// A declarative description of one schema node, built programmatically or
/// deserialized from a schema file.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub ty: String,
    pub params: Vec<(String, Expr)>,
    /// Record field declarations; `None` names are anonymous.
    pub fields: Vec<(Option<String>, TypeDef)>,
    /// Array element type.
    pub element: Option<Box<TypeDef>>,
    /// Choice alternatives keyed by int or string.
    pub choices: Vec<(Value, TypeDef)>,
    /// Record field names omitted from iteration and snapshot.
    pub hide: Vec<String>,
}

impl TypeDef {
    pub fn new(ty: impl Into<String>) -> Self {
        TypeDef {
            ty: ty.into(),
            params: Vec::new(),
            fields: Vec::new(),
            element: None,
            choices: Vec::new(),
            hide: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, expr: impl Into<Expr>) -> Self {
        self.params.push((name.into(), expr.into()));
        self
    }

    /// Declares a named record field.
    pub fn field(mut self, name: impl Into<String>, def: TypeDef) -> Self {
        self.fields.push((Some(name.into()), def));
        self
    }

    /// Declares an anonymous record field: present in layout, absent from
    /// iteration and snapshots.
    pub fn anon(mut self, def: TypeDef) -> Self {
        self.fields.push((None, def));
        self
    }

    pub fn hide(mut self, names: &[&str]) -> Self {
        self.hide.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Sets the array element type.
    pub fn element(mut self, def: TypeDef) -> Self {
        self.element = Some(Box::new(def));
        self
    }

    /// Adds a choice alternative under an explicit key.
    pub fn choice(mut self, key: impl Into<Value>, def: TypeDef) -> Self {
        self.choices.push((key.into(), def));
        self
    }

    /// Adds a choice alternative keyed by its position.
    pub fn alt(self, def: TypeDef) -> Self {
        let key = Value::UInt(self.choices.len() as u64);
        self.choice(key, def)
    }

    /// Shorthand for the `endian` parameter.
    pub fn endian(self, e: Endian) -> Self {
        let name = match e {
            Endian::Big => "big",
            Endian::Little => "little",
        };
        self.param("endian", name)
    }
}
