//! The serialize driver and size accounting.
//!
//! Writing mirrors the read path field for field; bit runs pack until a
//! byte-aligned field forces zero-padding. Size is computed in bits with the
//! same rounding, so `num_bytes` always matches the serialized length.

use std::io::Write;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::expr::eval_plain;
use crate::instance::{Instance, NodeId};
use crate::proto::{Endian, Kind, Prototype};
use crate::stream::BitWriter;
use crate::value::Value;

fn mask(v: u64, bits: u32) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

/// Splits an unsigned value into `n` bytes per byte order.
fn int_bytes(v: u64, n: usize, endian: Endian) -> Vec<u8> {
    let mut out = Vec::with_capacity(n);
    match endian {
        Endian::Big => {
            for i in (0..n).rev() {
                out.push((v >> (8 * i)) as u8);
            }
        }
        Endian::Little => {
            for i in 0..n {
                out.push((v >> (8 * i)) as u8);
            }
        }
    }
    out
}

fn wrong_type(label: &str, want: &str, v: &Value) -> Error {
    Error::InvalidAssignment(format!("{}: expected {}, got {}", label, want, v))
}

fn eval_len(inst: &Instance, id: NodeId, expr: &crate::expr::Expr, what: &str) -> Result<usize> {
    eval_plain(inst, id, expr)?
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::InvalidAssignment(format!("{} must be a non-negative integer", what)))
}

fn eval_pad_byte(inst: &Instance, id: NodeId, proto: &Prototype) -> Result<u8> {
    match proto.params.get("pad_byte") {
        Some(e) => Ok(eval_len(inst, id, e, "pad_byte")? as u8),
        None => Ok(0),
    }
}

/// Fixed-string payload: the current value's bytes, truncated or padded to
/// the declared length when one is given.
fn string_bytes(inst: &Instance, id: NodeId, proto: &Prototype, label: &str) -> Result<Vec<u8>> {
    let v = inst.current_value(id)?;
    let mut bytes = v
        .as_bytes()
        .ok_or_else(|| wrong_type(label, "text or bytes", &v))?
        .to_vec();

    if let Some(e) = proto.params.get("length") {
        let len = eval_len(inst, id, e, "length")?;
        if bytes.len() > len {
            bytes.truncate(len);
        } else if bytes.len() < len {
            let pad = eval_pad_byte(inst, id, proto)?;
            bytes.resize(len, pad);
        }
    }
    Ok(bytes)
}

/// Null-terminated payload without its terminator, capped below `max_length`.
fn stringz_bytes(inst: &Instance, id: NodeId, proto: &Prototype, label: &str) -> Result<Vec<u8>> {
    let v = inst.current_value(id)?;
    let mut bytes = v
        .as_bytes()
        .ok_or_else(|| wrong_type(label, "text or bytes", &v))?
        .to_vec();

    if let Some(e) = proto.params.get("max_length") {
        let max = eval_len(inst, id, e, "max_length")?;
        bytes.truncate(max.saturating_sub(1));
    }
    Ok(bytes)
}

pub(crate) fn write_node<W: Write>(
    inst: &mut Instance,
    id: NodeId,
    stream: &mut BitWriter<W>,
    label: &str,
) -> Result<()> {
    let proto = Arc::clone(inst.proto(id));

    match &proto.kind {
        Kind::Int {
            bits,
            signed,
            endian,
        } => {
            let v = inst.current_value(id)?;
            let raw = if *signed {
                v.as_i64().ok_or_else(|| wrong_type(label, "integer", &v))? as u64
            } else {
                v.as_u64()
                    .ok_or_else(|| wrong_type(label, "unsigned integer", &v))?
            };
            let raw = mask(raw, *bits);
            if bits % 8 == 0 {
                stream.write_bytes(&int_bytes(raw, (*bits / 8) as usize, *endian))
            } else {
                stream.write_bits(raw, *bits, endian.bit_order())
            }
        }

        Kind::Float { double, endian } => {
            let v = inst.current_value(id)?;
            let f = v.as_f64().ok_or_else(|| wrong_type(label, "number", &v))?;
            if *double {
                stream.write_bytes(&int_bytes(f.to_bits(), 8, *endian))
            } else {
                stream.write_bytes(&int_bytes((f as f32).to_bits() as u64, 4, *endian))
            }
        }

        Kind::Str => {
            let bytes = string_bytes(inst, id, &proto, label)?;
            stream.write_bytes(&bytes)
        }

        Kind::StrZ => {
            let bytes = stringz_bytes(inst, id, &proto, label)?;
            stream.write_bytes(&bytes)?;
            stream.write_bytes(&[0])
        }

        Kind::Rest => {
            let v = inst.current_value(id)?;
            let bytes = v.as_bytes().ok_or_else(|| wrong_type(label, "bytes", &v))?;
            stream.write_bytes(bytes)
        }

        Kind::ResumeAlignment => stream.align_to_byte(),

        Kind::Record(spec) => {
            let children = inst.record_children(id).to_vec();
            for (decl, child) in spec.fields.iter().zip(children) {
                write_node(inst, child, stream, decl.name.as_deref().unwrap_or(label))?;
            }
            Ok(())
        }

        Kind::Array(_) => {
            let children: Vec<NodeId> = (0..inst.array_len(id))
                .filter_map(|i| inst.array_child(id, i))
                .collect();
            for child in children {
                write_node(inst, child, stream, label)?;
            }
            Ok(())
        }

        Kind::Choice(_) => {
            let child = inst.choice_switch(id)?;
            write_node(inst, child, stream, label)
        }
    }
}

fn pad_to_byte(offset: u64) -> u64 {
    (8 - offset % 8) % 8
}

/// Bits this node would occupy when serialized starting at `offset` bits
/// into the stream, including the padding byte-aligned fields force.
pub(crate) fn num_bits_node(inst: &Instance, id: NodeId, offset: u64) -> Result<u64> {
    let proto = Arc::clone(inst.proto(id));

    match &proto.kind {
        Kind::Int { bits, .. } => {
            if bits % 8 == 0 {
                Ok(pad_to_byte(offset) + *bits as u64)
            } else {
                Ok(*bits as u64)
            }
        }

        Kind::Float { double, .. } => {
            Ok(pad_to_byte(offset) + if *double { 64 } else { 32 })
        }

        Kind::Str => {
            let len = match proto.params.get("length") {
                Some(e) => eval_len(inst, id, e, "length")?,
                None => inst
                    .current_value(id)?
                    .as_bytes()
                    .map(|b| b.len())
                    .unwrap_or(0),
            };
            Ok(pad_to_byte(offset) + len as u64 * 8)
        }

        Kind::StrZ => {
            let v = inst.current_value(id)?;
            let mut len = v.as_bytes().map(|b| b.len()).unwrap_or(0);
            if let Some(e) = proto.params.get("max_length") {
                len = len.min(eval_len(inst, id, e, "max_length")?.saturating_sub(1));
            }
            Ok(pad_to_byte(offset) + (len as u64 + 1) * 8)
        }

        Kind::Rest => {
            let len = inst
                .current_value(id)?
                .as_bytes()
                .map(|b| b.len())
                .unwrap_or(0);
            Ok(pad_to_byte(offset) + len as u64 * 8)
        }

        Kind::ResumeAlignment => Ok(pad_to_byte(offset)),

        Kind::Record(_) => {
            let mut total = 0;
            for &child in inst.record_children(id) {
                total += num_bits_node(inst, child, offset + total)?;
            }
            Ok(total)
        }

        Kind::Array(_) => {
            let mut total = 0;
            for i in 0..inst.array_len(id) {
                if let Some(child) = inst.array_child(id, i) {
                    total += num_bits_node(inst, child, offset + total)?;
                }
            }
            Ok(total)
        }

        Kind::Choice(_) => {
            let child = inst.choice_selected(id)?;
            num_bits_node(inst, child, offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::def::TypeDef;
    use crate::errors::Error;
    use crate::expr::Expr;
    use crate::proto::Endian;
    use crate::schema::Schema;
    use crate::value::Value;
    use crate::value_map;

    #[test]
    fn test_bit_fields_pack_into_bytes() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("a", TypeDef::new("bit1le"))
                .field("b", TypeDef::new("bit2le"))
                .field("c", TypeDef::new("uint8"))
                .field("d", TypeDef::new("bit1le")),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        inst.assign(value_map! { "a" => 1u8, "b" => 2u8, "c" => 3u8, "d" => 1u8 })
            .unwrap();

        assert_eq!(inst.num_bytes().unwrap(), 3);
        assert_eq!(inst.to_bytes().unwrap(), vec![0x05, 0x03, 0x01]);

        // and back again
        let parsed = schema.parse(&[0x05, 0x03, 0x01]).unwrap();
        assert_eq!(
            parsed,
            value_map! { "a" => 1u64, "b" => 2u64, "c" => 3u64, "d" => 1u64 }
        );
    }

    #[test]
    fn test_mixed_struct_serialization() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .endian(Endian::Little)
                .field("a", TypeDef::new("uint16"))
                .field("b", TypeDef::new("float32"))
                .field(
                    "c",
                    TypeDef::new("array")
                        .element(TypeDef::new("int8"))
                        .param("initial_length", 2u8),
                )
                .field(
                    "d",
                    TypeDef::new("choice")
                        .param("selection", 1u8)
                        .alt(TypeDef::new("uint16"))
                        .alt(TypeDef::new("uint32")),
                )
                .field(
                    "e",
                    TypeDef::new("struct")
                        .field("f", TypeDef::new("uint16"))
                        .field("g", TypeDef::new("uint32be")),
                )
                .field(
                    "h",
                    TypeDef::new("struct")
                        .field("i", TypeDef::new("struct").field("j", TypeDef::new("uint16"))),
                ),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        inst.assign(value_map! {
            "a" => 1u16,
            "b" => 2.0f64,
            "c" => Value::List(vec![Value::Int(3), Value::Int(4)]),
            "d" => 5u32,
            "e" => value_map! { "f" => 6u16, "g" => 7u32 },
            "h" => value_map! { "i" => value_map! { "j" => 8u16 } },
        })
        .unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.extend_from_slice(&2.0f32.to_le_bytes());
        expected.extend_from_slice(&[3, 4]);
        expected.extend_from_slice(&5u32.to_le_bytes());
        expected.extend_from_slice(&6u16.to_le_bytes());
        expected.extend_from_slice(&7u32.to_be_bytes());
        expected.extend_from_slice(&8u16.to_le_bytes());

        let bytes = inst.to_bytes().unwrap();
        assert_eq!(bytes, expected);
        assert_eq!(inst.num_bytes().unwrap(), expected.len() as u64);
    }

    #[test]
    fn test_resume_alignment_mid_record() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("a", TypeDef::new("bit4"))
                .anon(TypeDef::new("resume_byte_alignment"))
                .field("b", TypeDef::new("bit4")),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        inst.assign(value_map! { "a" => 0xFu8, "b" => 1u8 }).unwrap();

        assert_eq!(inst.to_bytes().unwrap(), vec![0xF0, 0x10]);
        assert_eq!(inst.num_bytes().unwrap(), 2);

        let parsed = schema.parse(&[0xF0, 0x10]).unwrap();
        assert_eq!(parsed, value_map! { "a" => 0xFu64, "b" => 1u64 });
    }

    #[test]
    fn test_computed_length_prefix() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field(
                    "len",
                    TypeDef::new("uint8").param(
                        "value",
                        Expr::func(|ctx| {
                            let n = ctx
                                .get("payload")?
                                .as_bytes()
                                .map(|b| b.len())
                                .unwrap_or(0);
                            Ok(Value::UInt(n as u64))
                        }),
                    ),
                )
                .field("payload", TypeDef::new("string")),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        inst.root_mut()
            .field("payload")
            .unwrap()
            .set("abc")
            .unwrap();

        assert_eq!(inst.to_bytes().unwrap(), b"\x03abc");
        assert!(matches!(
            inst.root_mut().field("len").unwrap().set(9u8),
            Err(Error::InvalidAssignment(_))
        ));
    }

    #[test]
    fn test_string_padded_to_length() {
        let schema = Schema::compile(
            TypeDef::new("string")
                .param("length", 4u8)
                .param("pad_byte", 0x20u8),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        inst.assign(Value::Str("ab".to_string())).unwrap();
        assert_eq!(inst.to_bytes().unwrap(), b"ab  ");

        inst.assign(Value::Str("abcdef".to_string())).unwrap();
        assert_eq!(inst.to_bytes().unwrap(), b"abcd");
    }

    #[test]
    fn test_stringz_writes_terminator() {
        let schema = Schema::compile(TypeDef::new("stringz")).unwrap();
        let mut inst = schema.instantiate();
        inst.assign(Value::Str("hi".to_string())).unwrap();

        assert_eq!(inst.to_bytes().unwrap(), b"hi\0");
        assert_eq!(inst.num_bytes().unwrap(), 3);
    }

    #[test]
    fn test_unbounded_string_writes_current_value() {
        let schema = Schema::compile(TypeDef::new("string")).unwrap();
        let mut inst = schema.instantiate();
        inst.assign(Value::Str("xyz".to_string())).unwrap();

        assert_eq!(inst.to_bytes().unwrap(), b"xyz");
        assert_eq!(inst.num_bytes().unwrap(), 3);
    }

    #[test]
    fn test_write_read_roundtrip_restores_assignment() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .endian(Endian::Big)
                .field("kind", TypeDef::new("uint8"))
                .field("count", TypeDef::new("uint16"))
                .field(
                    "items",
                    TypeDef::new("array")
                        .element(TypeDef::new("uint16"))
                        .param("initial_length", Expr::sym("count")),
                ),
        )
        .unwrap();

        let assigned = value_map! {
            "kind" => 2u8,
            "count" => 3u16,
            "items" => Value::List(vec![Value::UInt(10), Value::UInt(20), Value::UInt(30)]),
        };

        let bytes = schema.serialize(&assigned).unwrap();
        assert_eq!(schema.parse(&bytes).unwrap(), assigned);
    }

    #[test]
    fn test_read_write_roundtrip_reproduces_bytes() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("a", TypeDef::new("uint8"))
                .field("flags", TypeDef::new("bit3"))
                .field("mode", TypeDef::new("bit5"))
                .field("tail", TypeDef::new("uint16be")),
        )
        .unwrap();

        let data = [0x42, 0b101_10011, 0x12, 0x34, 0xFF];
        let mut inst = schema.instantiate();
        inst.read(&data[..]).unwrap();

        let n = inst.num_bytes().unwrap() as usize;
        assert_eq!(inst.to_bytes().unwrap(), &data[..n]);
    }

    #[test]
    fn test_num_bytes_matches_serialized_length_when_clear() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("a", TypeDef::new("uint32be"))
                .field("b", TypeDef::new("bit3"))
                .field("c", TypeDef::new("stringz")),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        let n = inst.num_bytes().unwrap();
        assert_eq!(inst.to_bytes().unwrap().len() as u64, n);
    }

    #[test]
    fn test_choice_writes_selected_alternative_only() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("tag", TypeDef::new("uint8"))
                .field(
                    "body",
                    TypeDef::new("choice")
                        .param("selection", Expr::sym("tag"))
                        .choice(Value::UInt(0), TypeDef::new("uint8"))
                        .choice(Value::UInt(1), TypeDef::new("uint32be")),
                ),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        inst.assign(value_map! { "tag" => 1u8, "body" => 7u32 }).unwrap();
        assert_eq!(inst.to_bytes().unwrap(), vec![1, 0, 0, 0, 7]);

        inst.assign(value_map! { "tag" => 0u8, "body" => 7u32 }).unwrap();
        assert_eq!(inst.to_bytes().unwrap(), vec![0, 7]);
    }

    #[test]
    fn test_switching_selection_drops_state() {
        let schema = Schema::compile(
            TypeDef::new("struct")
                .field("tag", TypeDef::new("uint8"))
                .field(
                    "body",
                    TypeDef::new("choice")
                        .param("selection", Expr::sym("tag"))
                        .choice(Value::UInt(0), TypeDef::new("uint8"))
                        .choice(Value::UInt(1), TypeDef::new("uint8")),
                ),
        )
        .unwrap();

        let mut inst = schema.instantiate();
        inst.assign(value_map! { "tag" => 0u8, "body" => 9u8 }).unwrap();

        // switch away and back; the alternative restarts from its default
        inst.root_mut().field("tag").unwrap().set(1u8).unwrap();
        inst.root_mut().field("body").unwrap().set(5u8).unwrap();
        inst.root_mut().field("tag").unwrap().set(0u8).unwrap();

        assert_eq!(
            inst.root().field("body").unwrap().value().unwrap(),
            Value::UInt(0)
        );
    }

    #[test]
    fn test_signed_negative_write() {
        let schema = Schema::compile(TypeDef::new("int16be")).unwrap();
        let mut inst = schema.instantiate();
        inst.assign(Value::Int(-2)).unwrap();
        assert_eq!(inst.to_bytes().unwrap(), vec![0xFF, 0xFE]);
    }
}
