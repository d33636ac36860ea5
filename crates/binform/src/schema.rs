//! Schema compilation and the top-level parse/serialize entry points.
//!
//! [`Schema::compile`] sanitizes a [`TypeDef`] tree: every type name is
//! resolved through the registry, record field names are validated, the
//! `endian` parameter concretizes endian-polymorphic children recursively,
//! and array length disciplines are checked for exclusivity. The result is
//! an immutable prototype tree ready to manufacture instances.

use std::collections::HashSet;
use std::sync::Arc;

use crate::def::TypeDef;
use crate::errors::{Result, SchemaError};
use crate::expr::Expr;
use crate::instance::Instance;
use crate::proto::{
    ArraySpec, ChoiceSpec, Endian, FieldDecl, Kind, Params, Prototype, RecordSpec, Terminal,
};
use crate::registry::{Registry, Resolved};
use crate::value::Value;

/// Operations of the record contract; field names must not shadow them.
const RESERVED_NAMES: &[&str] = &[
    "read",
    "write",
    "num_bytes",
    "snapshot",
    "assign",
    "clear",
    "parent",
    "index",
    "element",
    "array",
    "value",
    "field_names",
    "has_field",
];

/// A compiled schema: an immutable prototype tree shared by all instances
/// it manufactures.
#[derive(Debug, Clone)]
pub struct Schema {
    root: Arc<Prototype>,
}

impl Schema {
    /// Compiles a definition against the builtin registry.
    pub fn compile(def: TypeDef) -> std::result::Result<Self, SchemaError> {
        Self::compile_with(&Registry::new(), def)
    }

    /// Compiles a definition, resolving names through the given registry.
    pub fn compile_with(
        registry: &Registry,
        def: TypeDef,
    ) -> std::result::Result<Self, SchemaError> {
        Ok(Schema {
            root: sanitize(registry, &def, None)?,
        })
    }

    pub fn prototype(&self) -> &Arc<Prototype> {
        &self.root
    }

    /// Manufactures a fresh live tree.
    pub fn instantiate(&self) -> Instance {
        Instance::from_proto(&self.root)
    }

    /// Parses `data` and returns the snapshot of the resulting tree.
    pub fn parse(&self, data: &[u8]) -> Result<Value> {
        let mut inst = self.instantiate();
        inst.read(data)?;
        inst.snapshot()
    }

    /// Assigns a value tree and serializes it.
    pub fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        let mut inst = self.instantiate();
        inst.assign(value.clone())?;
        inst.to_bytes()
    }
}

fn endian_param(def: &TypeDef) -> std::result::Result<Option<Endian>, SchemaError> {
    let expr = match def.params.iter().find(|(k, _)| k == "endian") {
        Some((_, e)) => e,
        None => return Ok(None),
    };
    match expr {
        Expr::Lit(Value::Str(s)) if s == "big" => Ok(Some(Endian::Big)),
        Expr::Lit(Value::Str(s)) if s == "little" => Ok(Some(Endian::Little)),
        _ => Err(SchemaError::UnregisteredType(format!(
            "endian {:?}",
            expr
        ))),
    }
}

fn copy_params(def: &TypeDef, skip: &[&str]) -> Params {
    let mut params = Params::new();
    for (name, expr) in &def.params {
        if !skip.contains(&name.as_str()) {
            params.insert(name.clone(), expr.clone());
        }
    }
    params
}

fn sanitize(
    registry: &Registry,
    def: &TypeDef,
    inherited: Option<Endian>,
) -> std::result::Result<Arc<Prototype>, SchemaError> {
    // a record's own endian overrides the inherited one for its subtree
    let endian = endian_param(def)?.or(inherited);

    match registry.lookup(&def.ty, endian)? {
        Resolved::Proto(proto) => Ok(proto),

        Resolved::Prim(kind) => Ok(Arc::new(Prototype::new(kind, copy_params(def, &["endian"])))),

        Resolved::Record => {
            let mut seen = HashSet::new();
            let mut fields = Vec::with_capacity(def.fields.len());
            for (name, field_def) in &def.fields {
                if let Some(n) = name {
                    if RESERVED_NAMES.contains(&n.as_str()) {
                        return Err(SchemaError::ReservedName(n.clone()));
                    }
                    if !seen.insert(n.clone()) {
                        return Err(SchemaError::NameCollision(n.clone()));
                    }
                }
                fields.push(FieldDecl {
                    name: name.clone(),
                    proto: sanitize(registry, field_def, endian)?,
                });
            }
            Ok(Arc::new(Prototype::new(
                Kind::Record(RecordSpec {
                    fields,
                    hide: def.hide.clone(),
                }),
                copy_params(def, &["endian"]),
            )))
        }

        Resolved::Array => {
            let element = def.element.as_deref().ok_or_else(|| {
                SchemaError::MissingParameter {
                    ty: "array".to_string(),
                    param: "type".to_string(),
                }
            })?;

            let length = def.params.iter().find(|(k, _)| k == "initial_length");
            let until = def.params.iter().find(|(k, _)| k == "read_until");
            if length.is_some() && until.is_some() {
                return Err(SchemaError::MutuallyExclusive);
            }

            let terminal = match (length, until) {
                (_, Some((_, expr))) => match expr {
                    Expr::Sym(s) if s == "eof" => Terminal::Eof,
                    Expr::Lit(Value::Str(s)) if s == "eof" => Terminal::Eof,
                    other => Terminal::Until(other.clone()),
                },
                (Some((_, expr)), None) => Terminal::Count(expr.clone()),
                (None, None) => Terminal::Count(Expr::lit(0u64)),
            };

            Ok(Arc::new(Prototype::new(
                Kind::Array(ArraySpec {
                    element: sanitize(registry, element, endian)?,
                    terminal,
                }),
                copy_params(def, &["endian", "initial_length", "read_until"]),
            )))
        }

        Resolved::Choice => {
            let selection = def
                .params
                .iter()
                .find(|(k, _)| k == "selection")
                .map(|(_, e)| e.clone())
                .ok_or_else(|| SchemaError::MissingParameter {
                    ty: "choice".to_string(),
                    param: "selection".to_string(),
                })?;

            let mut alternatives = Vec::with_capacity(def.choices.len());
            for (key, alt_def) in &def.choices {
                alternatives.push((key.clone(), sanitize(registry, alt_def, endian)?));
            }

            Ok(Arc::new(Prototype::new(
                Kind::Choice(ChoiceSpec {
                    alternatives,
                    selection,
                }),
                copy_params(def, &["endian", "selection"]),
            )))
        }
    }
}
