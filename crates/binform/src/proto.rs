//! Sanitized schema prototypes.
//!
//! A [`Prototype`] is the immutable, validated form of a type definition.
//! Prototypes are shared between instances via `Arc` and know how to
//! manufacture live nodes; all per-field layout decisions (width, endian,
//! alignment, composite structure) are settled here at compile time.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::expr::Expr;
use crate::stream::BitOrder;
use crate::value::Value;

/// Byte order for multi-byte primitives. For bit-aligned fields it selects
/// the bit consumption order instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    pub(crate) fn bit_order(self) -> BitOrder {
        match self {
            Endian::Big => BitOrder::MsbFirst,
            Endian::Little => BitOrder::LsbFirst,
        }
    }
}

/// One declared field of a record. Anonymous fields have no name: they
/// occupy layout but are absent from iteration and snapshots.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: Option<String>,
    pub proto: Arc<Prototype>,
}

#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub fields: Vec<FieldDecl>,
    /// Names omitted from iteration and snapshot but still addressable.
    pub hide: Vec<String>,
}

/// How an array decides when to stop reading elements.
#[derive(Debug, Clone)]
pub enum Terminal {
    /// Read exactly this many elements; any element failure is fatal.
    Count(Expr),
    /// Read one element, then stop once the expression is truthy.
    Until(Expr),
    /// Read until a read fails; the incomplete element is dropped.
    Eof,
}

#[derive(Debug, Clone)]
pub struct ArraySpec {
    pub element: Arc<Prototype>,
    pub terminal: Terminal,
}

#[derive(Debug, Clone)]
pub struct ChoiceSpec {
    /// Alternatives in declaration order, keyed by int or string.
    pub alternatives: Vec<(Value, Arc<Prototype>)>,
    pub selection: Expr,
}

/// The class tag of a schema node plus its settled layout parameters.
#[derive(Debug, Clone)]
pub enum Kind {
    /// Integer of 1..=64 bits. Byte-aligned when `bits % 8 == 0`, bit-aligned
    /// otherwise (endian then selects the bit order).
    Int {
        bits: u32,
        signed: bool,
        endian: Endian,
    },
    /// IEEE-754 float, 32 or 64 bits, byte-aligned.
    Float { double: bool, endian: Endian },
    /// Fixed-length string; `length` parameter drives the width. Without a
    /// length it is unbounded and sized by its current value.
    Str,
    /// Null-terminated string, optionally capped by `max_length`.
    StrZ,
    /// All bytes remaining in the stream.
    Rest,
    /// Zero-width directive forcing the bit cursor to the next byte boundary.
    ResumeAlignment,
    Record(RecordSpec),
    Array(ArraySpec),
    Choice(ChoiceSpec),
}

/// Named parameter expressions attached to a prototype.
#[derive(Debug, Clone, Default)]
pub struct Params(IndexMap<String, Expr>);

impl Params {
    pub fn new() -> Self {
        Params(IndexMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, expr: Expr) {
        self.0.insert(name.into(), expr);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Expr)> {
        self.0.iter()
    }
}

/// An immutable schema node: class tag, settled layout, and the parameter
/// expressions evaluated lazily against the live tree.
#[derive(Debug, Clone)]
pub struct Prototype {
    pub kind: Kind,
    pub params: Params,
}

impl Prototype {
    pub fn new(kind: Kind, params: Params) -> Self {
        Prototype { kind, params }
    }

    /// The value a primitive holds before any assignment or read, when no
    /// `initial_value` parameter applies.
    pub(crate) fn default_value(&self) -> Value {
        match &self.kind {
            Kind::Int { signed: true, .. } => Value::Int(0),
            Kind::Int { signed: false, .. } => Value::UInt(0),
            Kind::Float { .. } => Value::Float(0.0),
            Kind::Str | Kind::StrZ => Value::Str(String::new()),
            Kind::Rest => Value::Bytes(Vec::new()),
            Kind::ResumeAlignment => Value::Null,
            Kind::Record(_) | Kind::Array(_) | Kind::Choice(_) => Value::Null,
        }
    }

    pub(crate) fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            Kind::Record(_) | Kind::Array(_) | Kind::Choice(_)
        )
    }
}
