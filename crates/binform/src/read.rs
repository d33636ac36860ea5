//! The parse driver: walks a live tree in declared order, pulling bytes and
//! bit runs from a [`BitReader`].

use std::io::Read;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::expr::{eval, eval_plain, Overrides};
use crate::instance::{Instance, NodeId};
use crate::proto::{ArraySpec, Endian, Kind, Terminal};
use crate::stream::BitReader;
use crate::value::Value;

/// Sign-extends the low `bits` of `value` to a full `i64`.
pub(crate) fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Assembles whole bytes into an unsigned value per byte order.
pub(crate) fn assemble_bytes(bytes: &[u8], endian: Endian) -> u64 {
    match endian {
        Endian::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        Endian::Little => bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64),
    }
}

fn expect_len(v: Value, what: &str) -> Result<usize> {
    v.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::InvalidAssignment(format!("{} must be a non-negative integer", what)))
}

/// Bytes of text read from the wire become `Str` when valid UTF-8, raw
/// `Bytes` otherwise.
fn text_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Str(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

pub(crate) fn read_node<R: Read>(
    inst: &mut Instance,
    id: NodeId,
    stream: &mut BitReader<R>,
    label: &str,
) -> Result<()> {
    let proto = Arc::clone(inst.proto(id));

    match &proto.kind {
        Kind::Int {
            bits,
            signed,
            endian,
        } => {
            let raw = if bits % 8 == 0 {
                let bytes = stream.read_bytes((bits / 8) as usize)?;
                assemble_bytes(&bytes, *endian)
            } else {
                stream.read_bits(*bits, endian.bit_order())?
            };
            let v = if *signed {
                Value::Int(sign_extend(raw, *bits))
            } else {
                Value::UInt(raw)
            };
            finish_prim(inst, id, v, label)
        }

        Kind::Float { double, endian } => {
            let v = if *double {
                let bytes = stream.read_bytes(8)?;
                Value::Float(f64::from_bits(assemble_bytes(&bytes, *endian)))
            } else {
                let bytes = stream.read_bytes(4)?;
                Value::Float(f32::from_bits(assemble_bytes(&bytes, *endian) as u32) as f64)
            };
            finish_prim(inst, id, v, label)
        }

        Kind::Str => {
            let len = match proto.params.get("length") {
                Some(e) => expect_len(eval_plain(inst, id, e)?, "length")?,
                // unbounded strings consume their current size
                None => inst
                    .current_value(id)?
                    .as_bytes()
                    .map(|b| b.len())
                    .unwrap_or(0),
            };
            let mut bytes = stream.read_bytes(len)?;

            let trim = match proto.params.get("trim_padding") {
                Some(e) => eval_plain(inst, id, e)?.truthy(),
                None => false,
            };
            if trim {
                let pad = pad_byte(inst, id, &proto)?;
                while bytes.last() == Some(&pad) {
                    bytes.pop();
                }
            }
            finish_prim(inst, id, text_value(bytes), label)
        }

        Kind::StrZ => {
            let max = match proto.params.get("max_length") {
                Some(e) => Some(expect_len(eval_plain(inst, id, e)?, "max_length")?),
                None => None,
            };
            let mut bytes = Vec::new();
            loop {
                if max.is_some_and(|m| bytes.len() >= m) {
                    break;
                }
                let b = stream.read_u8()?;
                if b == 0 {
                    break;
                }
                bytes.push(b);
            }
            finish_prim(inst, id, text_value(bytes), label)
        }

        Kind::Rest => {
            let bytes = stream.read_to_end()?;
            finish_prim(inst, id, Value::Bytes(bytes), label)
        }

        Kind::ResumeAlignment => {
            stream.align_to_byte();
            Ok(())
        }

        Kind::Record(spec) => {
            let children = inst.record_children(id).to_vec();
            for (decl, child) in spec.fields.iter().zip(children) {
                read_node(inst, child, stream, decl.name.as_deref().unwrap_or(label))?;
            }
            Ok(())
        }

        Kind::Array(spec) => read_array(inst, id, spec, stream, label),

        Kind::Choice(_) => {
            let child = inst.choice_switch(id)?;
            read_node(inst, child, stream, label)
        }
    }
}

fn pad_byte(inst: &Instance, id: NodeId, proto: &crate::proto::Prototype) -> Result<u8> {
    match proto.params.get("pad_byte") {
        Some(e) => Ok(expect_len(eval_plain(inst, id, e)?, "pad_byte")? as u8),
        None => Ok(0),
    }
}

/// Stores the materialized value, then applies the computed-value equality
/// demand and the `check_value` predicate.
fn finish_prim(inst: &mut Instance, id: NodeId, v: Value, label: &str) -> Result<()> {
    inst.set_prim(id, v.clone());

    let proto = Arc::clone(inst.proto(id));
    if let Some(expr) = proto.params.get("value") {
        let expected = eval_plain(inst, id, expr)?;
        if !v.eq_loose(&expected) {
            return Err(Error::validity(label, expected, &v));
        }
    }

    if let Some(expr) = proto.params.get("check_value") {
        let mut ov = Overrides::new();
        ov.insert("value".to_string(), v.clone());
        let check = eval(inst, id, expr, &ov)?;
        let ok = match &check {
            Value::Bool(b) => *b,
            expected => expected.eq_loose(&v),
        };
        if !ok {
            return Err(Error::validity(label, check, &v));
        }
    }

    Ok(())
}

fn read_array<R: Read>(
    inst: &mut Instance,
    id: NodeId,
    spec: &ArraySpec,
    stream: &mut BitReader<R>,
    label: &str,
) -> Result<()> {
    match &spec.terminal {
        Terminal::Count(e) => {
            let n = expect_len(eval_plain(inst, id, e)?, "initial_length")?;
            inst.array_clear(id);
            for _ in 0..n {
                let el = inst.array_push(id)?;
                read_node(inst, el, stream, label)?;
            }
            Ok(())
        }

        Terminal::Until(e) => {
            inst.array_clear(id);
            loop {
                let el = inst.array_push(id)?;
                read_node(inst, el, stream, label)?;

                let mut ov = Overrides::new();
                ov.insert(
                    "index".to_string(),
                    Value::UInt((inst.array_len(id) - 1) as u64),
                );
                ov.insert("element".to_string(), inst.snapshot_node(el)?);
                ov.insert("array".to_string(), inst.snapshot_node(id)?);

                if eval(inst, id, e, &ov)?.truthy() {
                    return Ok(());
                }
            }
        }

        // any element failure ends the loop; the incomplete element is
        // dropped and the array keeps what it has
        Terminal::Eof => {
            inst.array_clear(id);
            loop {
                let el = inst.array_push(id)?;
                if read_node(inst, el, stream, label).is_err() {
                    inst.array_pop(id);
                    return Ok(());
                }
            }
        }
    }
}
