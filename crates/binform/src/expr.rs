//! Parameter expressions and their lazy evaluation against a live tree.
//!
//! A parameter is a literal, a symbolic reference, or a closure. Symbols and
//! closures resolve names at read/write time against the field the parameter
//! hangs off: call-site overrides first, then the field's own parameters,
//! then its named children and built-ins, then the same lookup on each
//! ancestor in turn. A resolution that yields another expression is evaluated
//! in the context where that expression was defined.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::errors::{Error, Result};
use crate::instance::{Instance, NodeId};
use crate::value::Value;

/// Closure form of a parameter. Receives an explicit evaluation context.
pub type EvalFn = Arc<dyn Fn(&Ctx<'_>) -> Result<Value> + Send + Sync>;

/// A parameter expression attached to a schema node.
#[derive(Clone)]
pub enum Expr {
    /// A constant; passes through evaluation unchanged.
    Lit(Value),
    /// A reference by name, resolved like a single-name closure. Dotted
    /// paths (`"parent.len"`, `"header.version"`) navigate the tree.
    Sym(String),
    /// A closure evaluated against a field context.
    Fn(EvalFn),
}

impl Expr {
    pub fn lit(v: impl Into<Value>) -> Self {
        Expr::Lit(v.into())
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Sym(name.into())
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Ctx<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Expr::Fn(Arc::new(f))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(v) => write!(f, "Lit({:?})", v),
            Expr::Sym(s) => write!(f, "Sym({:?})", s),
            Expr::Fn(_) => write!(f, "Fn(<closure>)"),
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Lit(v)
    }
}

macro_rules! expr_from_scalar {
    ($($t:ty),*) => {
        $(impl From<$t> for Expr {
            fn from(v: $t) -> Self {
                Expr::Lit(Value::from(v))
            }
        })*
    };
}

expr_from_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, &str, String);

/// Values injected at a single evaluation call, consulted before anything
/// else. Arrays use this to bind `index`, `element`, and `array` during
/// per-element evaluation.
pub type Overrides = IndexMap<String, Value>;

/// Evaluation context handed to closures: the live tree plus the field the
/// expression is anchored to.
pub struct Ctx<'a> {
    pub(crate) inst: &'a Instance,
    pub(crate) node: NodeId,
    pub(crate) overrides: &'a Overrides,
}

impl<'a> Ctx<'a> {
    /// Resolves a name through the full chain: overrides, parameters, named
    /// children and built-ins, then ancestors.
    pub fn get(&self, name: &str) -> Result<Value> {
        resolve_name(self.inst, self.node, name, self.overrides)
    }

    /// Position of the nearest enclosing array element.
    pub fn index(&self) -> Result<u64> {
        let mut walk = Some(self.node);
        while let Some(n) = walk {
            if let Some(i) = self.inst.array_index_of(n) {
                return Ok(i as u64);
            }
            walk = self.inst.parent_of(n);
        }
        Err(Error::UnresolvedName("index".to_string()))
    }

    /// Context anchored at the parent field, if any.
    pub fn parent(&self) -> Option<Ctx<'a>> {
        self.inst.parent_of(self.node).map(|p| Ctx {
            inst: self.inst,
            node: p,
            overrides: self.overrides,
        })
    }
}

/// Evaluates an expression anchored at `node` with no call-site overrides.
pub(crate) fn eval_plain(inst: &Instance, node: NodeId, expr: &Expr) -> Result<Value> {
    eval(inst, node, expr, &Overrides::new())
}

/// Evaluates an expression anchored at `node`.
pub(crate) fn eval(
    inst: &Instance,
    node: NodeId,
    expr: &Expr,
    overrides: &Overrides,
) -> Result<Value> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Sym(name) => resolve_name(inst, node, name, overrides),
        Expr::Fn(f) => f(&Ctx {
            inst,
            node,
            overrides,
        }),
    }
}

fn resolve_name(
    inst: &Instance,
    node: NodeId,
    name: &str,
    overrides: &Overrides,
) -> Result<Value> {
    if let Some(v) = overrides.get(name) {
        return Ok(v.clone());
    }

    if name.contains('.') {
        return resolve_path(inst, node, name);
    }

    resolve_simple(inst, node, name)
}

/// The ancestor-chain lookup: parameters, then named children and built-ins,
/// repeated on each parent up to the root.
fn resolve_simple(inst: &Instance, node: NodeId, name: &str) -> Result<Value> {
    let mut walk = Some(node);

    while let Some(n) = walk {
        if let Some(expr) = inst.proto(n).params.get(name) {
            // cascade: evaluate in the context where the parameter lives
            return eval_plain(inst, n, expr);
        }

        if let Some(child) = inst.child_by_name(n, name) {
            return inst.value_of(child);
        }

        match name {
            "index" => {
                if let Some(i) = inst.array_index_of(n) {
                    return Ok(Value::UInt(i as u64));
                }
            }
            "parent" => {
                return match inst.parent_of(n) {
                    Some(p) => inst.value_of(p),
                    None => Ok(Value::Null),
                };
            }
            _ => {}
        }

        walk = inst.parent_of(n);
    }

    Err(Error::UnresolvedName(name.to_string()))
}

/// Dotted-path resolution. The first segment anchors like a simple lookup;
/// later segments navigate named children, with `parent` stepping up.
fn resolve_path(inst: &Instance, node: NodeId, path: &str) -> Result<Value> {
    let mut segments = path.split('.').peekable();
    let mut nav = node;

    while let Some(seg) = segments.next() {
        let last = segments.peek().is_none();

        if seg == "parent" {
            nav = inst
                .parent_of(nav)
                .ok_or_else(|| Error::UnresolvedName(path.to_string()))?;
            if last {
                return inst.value_of(nav);
            }
            continue;
        }

        // search up the chain for the first segment, downward after that
        let found = if nav == node {
            find_named(inst, nav, seg)
        } else {
            inst.child_by_name(nav, seg)
        };

        match found {
            Some(child) if last => return inst.value_of(child),
            Some(child) => nav = child,
            None if last => return resolve_simple(inst, nav, seg),
            None => return Err(Error::UnresolvedName(path.to_string())),
        }
    }

    Err(Error::UnresolvedName(path.to_string()))
}

fn find_named(inst: &Instance, node: NodeId, name: &str) -> Option<NodeId> {
    let mut walk = Some(node);
    while let Some(n) = walk {
        if let Some(child) = inst.child_by_name(n, name) {
            return Some(child);
        }
        walk = inst.parent_of(n);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::TypeDef;
    use crate::schema::Schema;

    fn two_field_record() -> Instance {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("len", TypeDef::new("uint8"))
                .field("payload", TypeDef::new("string").param("length", Expr::sym("len"))),
        )
        .unwrap();
        schema.instantiate()
    }

    #[test]
    fn test_literal_passthrough() {
        let inst = two_field_record();
        let v = eval_plain(&inst, inst.root_id(), &Expr::lit(42u8)).unwrap();
        assert_eq!(v, Value::UInt(42));
    }

    #[test]
    fn test_sym_resolves_sibling() {
        let mut inst = two_field_record();
        inst.root_mut().field("len").unwrap().set(3u8).unwrap();

        let payload = inst.root().field("payload").unwrap().id();
        let v = eval_plain(&inst, payload, &Expr::sym("len")).unwrap();
        assert_eq!(v, Value::UInt(3));
    }

    #[test]
    fn test_closure_gets_context() {
        let mut inst = two_field_record();
        inst.root_mut().field("len").unwrap().set(5u8).unwrap();

        let payload = inst.root().field("payload").unwrap().id();
        let expr = Expr::func(|ctx| {
            let len = ctx.get("len")?.as_u64().unwrap_or(0);
            Ok(Value::UInt(len * 2))
        });
        assert_eq!(eval_plain(&inst, payload, &expr).unwrap(), Value::UInt(10));
    }

    #[test]
    fn test_override_wins() {
        let inst = two_field_record();
        let mut ov = Overrides::new();
        ov.insert("len".to_string(), Value::UInt(99));

        let payload = inst.root().field("payload").unwrap().id();
        let v = eval(&inst, payload, &Expr::sym("len"), &ov).unwrap();
        assert_eq!(v, Value::UInt(99));
    }

    #[test]
    fn test_unresolved_name() {
        let inst = two_field_record();
        let err = eval_plain(&inst, inst.root_id(), &Expr::sym("missing")).unwrap_err();
        assert!(matches!(err, Error::UnresolvedName(n) if n == "missing"));
    }

    #[test]
    fn test_cascading_param_resolution() {
        // the record carries a custom parameter that itself refers to a field
        let schema = Schema::compile(
            TypeDef::new("struct")
                .param("total", Expr::sym("count"))
                .field("count", TypeDef::new("uint8"))
                .field("body", TypeDef::new("string").param("length", Expr::sym("total"))),
        )
        .unwrap();
        let mut inst = schema.instantiate();
        inst.root_mut().field("count").unwrap().set(7u8).unwrap();

        let body = inst.root().field("body").unwrap().id();
        assert_eq!(
            eval_plain(&inst, body, &Expr::sym("total")).unwrap(),
            Value::UInt(7)
        );
    }

    #[test]
    fn test_dotted_path() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("header", TypeDef::new("struct").field("version", TypeDef::new("uint8")))
                .field("body", TypeDef::new("uint8")),
        )
        .unwrap();
        let mut inst = schema.instantiate();
        inst.root_mut()
            .field("header")
            .unwrap()
            .field("version")
            .unwrap()
            .set(2u8)
            .unwrap();

        let body = inst.root().field("body").unwrap().id();
        assert_eq!(
            eval_plain(&inst, body, &Expr::sym("header.version")).unwrap(),
            Value::UInt(2)
        );
    }
}
