//! Type registry: resolves type names to kinds or registered prototypes.
//!
//! Builtin names are parsed structurally (`uint16le`, `bit3`, `stringz`,
//! `float64be`, ...). Endian-polymorphic names (`int16`, `float32`) compose
//! with the endian hint inherited from an enclosing record; bit-field names
//! ignore the hint, their order is part of the name. User prototypes are
//! registered under a name and resolved the same way.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::SchemaError;
use crate::proto::{Endian, Kind, Prototype};

/// Outcome of a name lookup.
#[derive(Debug)]
pub enum Resolved {
    /// A fully-formed primitive kind.
    Prim(Kind),
    /// A record; the caller supplies fields and hide set.
    Record,
    /// An array; the caller supplies the element and length discipline.
    Array,
    /// A choice; the caller supplies alternatives and selection.
    Choice,
    /// A user-registered prototype, used as-is.
    Proto(Arc<Prototype>),
}

/// Name resolution service consulted during schema compilation.
#[derive(Default)]
pub struct Registry {
    named: HashMap<String, Arc<Prototype>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a prototype under a name. Spelling is case-insensitive.
    pub fn register(&mut self, name: &str, proto: Arc<Prototype>) {
        self.named.insert(name.to_ascii_lowercase(), proto);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.named.contains_key(&name) || parse_builtin(&name, None).is_ok_and(|r| r.is_some())
    }

    /// Resolves a type name, composing endian-polymorphic names with the
    /// hint. Unknown names fail with [`SchemaError::UnregisteredType`].
    pub fn lookup(&self, name: &str, endian: Option<Endian>) -> Result<Resolved, SchemaError> {
        let lname = name.to_ascii_lowercase();
        if let Some(resolved) = parse_builtin(&lname, endian)? {
            return Ok(resolved);
        }
        if let Some(proto) = self.named.get(&lname) {
            return Ok(Resolved::Proto(Arc::clone(proto)));
        }
        Err(SchemaError::UnregisteredType(name.to_string()))
    }
}

fn check_width(bits: u32) -> Result<u32, SchemaError> {
    if (1..=64).contains(&bits) {
        Ok(bits)
    } else {
        Err(SchemaError::InvalidWidth(bits))
    }
}

fn parse_builtin(name: &str, endian: Option<Endian>) -> Result<Option<Resolved>, SchemaError> {
    match name {
        "struct" | "record" => return Ok(Some(Resolved::Record)),
        "array" => return Ok(Some(Resolved::Array)),
        "choice" => return Ok(Some(Resolved::Choice)),
        "string" => return Ok(Some(Resolved::Prim(Kind::Str))),
        "stringz" => return Ok(Some(Resolved::Prim(Kind::StrZ))),
        "rest" => return Ok(Some(Resolved::Prim(Kind::Rest))),
        "resume_byte_alignment" => return Ok(Some(Resolved::Prim(Kind::ResumeAlignment))),
        _ => {}
    }

    if let Some(float) = parse_float(name, endian)? {
        return Ok(Some(float));
    }

    // bit fields: order is in the name, the endian hint is ignored
    if let Some(rest) = name.strip_prefix("bit") {
        let (digits, little) = match rest.strip_suffix("le") {
            Some(d) => (d, true),
            None => (rest, false),
        };
        if let Ok(bits) = digits.parse::<u32>() {
            let bits = check_width(bits)?;
            return Ok(Some(Resolved::Prim(Kind::Int {
                bits,
                signed: false,
                endian: if little { Endian::Little } else { Endian::Big },
            })));
        }
        return Ok(None);
    }

    let (signed, rest) = if let Some(r) = name.strip_prefix("uint") {
        (false, r)
    } else if let Some(r) = name.strip_prefix("int") {
        (true, r)
    } else {
        return Ok(None);
    };

    let (digits, suffix) = if let Some(d) = rest.strip_suffix("be") {
        (d, Some(Endian::Big))
    } else if let Some(d) = rest.strip_suffix("le") {
        (d, Some(Endian::Little))
    } else {
        (rest, None)
    };

    let bits = match digits.parse::<u32>() {
        Ok(b) => check_width(b)?,
        Err(_) => return Ok(None),
    };

    let endian = if bits <= 8 || bits % 8 != 0 {
        // single bytes have no order; sub-byte widths take it from the
        // suffix alone, like bit fields
        suffix.unwrap_or(Endian::Big)
    } else {
        match suffix.or(endian) {
            Some(e) => e,
            None => return Err(SchemaError::UnregisteredType(name.to_string())),
        }
    };

    Ok(Some(Resolved::Prim(Kind::Int {
        bits,
        signed,
        endian,
    })))
}

fn parse_float(name: &str, endian: Option<Endian>) -> Result<Option<Resolved>, SchemaError> {
    let (rest, double) = if name == "double" {
        ("", true)
    } else if let Some(r) = name.strip_prefix("float64") {
        (r, true)
    } else if let Some(r) = name.strip_prefix("float32") {
        (r, false)
    } else if let Some(r) = name.strip_prefix("float") {
        (r, false)
    } else {
        return Ok(None);
    };

    let endian = match rest {
        "be" => Endian::Big,
        "le" => Endian::Little,
        "" => match endian {
            Some(e) => e,
            None => return Err(SchemaError::UnregisteredType(name.to_string())),
        },
        _ => return Ok(None),
    };

    Ok(Some(Resolved::Prim(Kind::Float { double, endian })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(name: &str, endian: Option<Endian>) -> Kind {
        match Registry::new().lookup(name, endian).unwrap() {
            Resolved::Prim(kind) => kind,
            _ => panic!("expected a primitive for {}", name),
        }
    }

    #[test]
    fn test_int_spellings() {
        assert!(matches!(
            prim("uint16le", None),
            Kind::Int { bits: 16, signed: false, endian: Endian::Little }
        ));
        assert!(matches!(
            prim("int32be", None),
            Kind::Int { bits: 32, signed: true, endian: Endian::Big }
        ));
        assert!(matches!(
            prim("uint8", None),
            Kind::Int { bits: 8, signed: false, .. }
        ));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(matches!(
            prim("UInt16BE", None),
            Kind::Int { bits: 16, signed: false, endian: Endian::Big }
        ));
    }

    #[test]
    fn test_polymorphic_name_needs_endian() {
        let err = Registry::new().lookup("int16", None).unwrap_err();
        assert!(matches!(err, SchemaError::UnregisteredType(_)));

        assert!(matches!(
            prim("int16", Some(Endian::Little)),
            Kind::Int { bits: 16, endian: Endian::Little, .. }
        ));
    }

    #[test]
    fn test_bit_fields_ignore_endian_hint() {
        assert!(matches!(
            prim("bit3", Some(Endian::Little)),
            Kind::Int { bits: 3, signed: false, endian: Endian::Big }
        ));
        assert!(matches!(
            prim("bit3le", None),
            Kind::Int { bits: 3, signed: false, endian: Endian::Little }
        ));
    }

    #[test]
    fn test_sub_byte_int_widths() {
        assert!(matches!(
            prim("int12", Some(Endian::Little)),
            Kind::Int { bits: 12, signed: true, endian: Endian::Little }
        ));
        assert!(matches!(
            prim("uint4", None),
            Kind::Int { bits: 4, signed: false, endian: Endian::Big }
        ));
    }

    #[test]
    fn test_floats() {
        assert!(matches!(
            prim("float32le", None),
            Kind::Float { double: false, endian: Endian::Little }
        ));
        assert!(matches!(
            prim("double", Some(Endian::Big)),
            Kind::Float { double: true, endian: Endian::Big }
        ));
        assert!(matches!(
            prim("float64", Some(Endian::Little)),
            Kind::Float { double: true, endian: Endian::Little }
        ));
    }

    #[test]
    fn test_invalid_widths() {
        assert!(matches!(
            Registry::new().lookup("bit0", None),
            Err(SchemaError::InvalidWidth(0))
        ));
        assert!(matches!(
            Registry::new().lookup("uint65be", None),
            Err(SchemaError::InvalidWidth(65))
        ));
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            Registry::new().lookup("gizmo", None),
            Err(SchemaError::UnregisteredType(_))
        ));
    }

    #[test]
    fn test_user_registration() {
        use crate::proto::{Params, Prototype};

        let mut reg = Registry::new();
        assert!(!reg.is_registered("magic"));

        let proto = Arc::new(Prototype::new(
            Kind::Int {
                bits: 8,
                signed: false,
                endian: Endian::Big,
            },
            Params::new(),
        ));
        reg.register("Magic", proto);

        assert!(reg.is_registered("magic"));
        assert!(matches!(
            reg.lookup("magic", None).unwrap(),
            Resolved::Proto(_)
        ));
    }
}
