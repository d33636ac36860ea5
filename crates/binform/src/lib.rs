//! # binform
//!
//! A library for reading and writing structured binary data from declarative
//! schemas.
//!
//! Describe a format as a tree of typed fields: integers of any width and
//! endian, floats, bit fields, strings, records, arrays, and tagged choices.
//! Parameters may be constants, references to sibling fields, or closures
//! resolved lazily against the live tree, so dependent fields (a length
//! prefix sizing a payload, a tag selecting an alternative) are declared,
//! never hand-parsed.
//!
//! ## Example
//!
//! ```
//! use binform::{Expr, Schema, TypeDef};
//!
//! let schema = Schema::compile(
//!     TypeDef::new("struct")
//!         .field("len", TypeDef::new("uint8"))
//!         .field("payload", TypeDef::new("string").param("length", Expr::sym("len"))),
//! )
//! .unwrap();
//!
//! let parsed = schema.parse(&[0x03, b'a', b'b', b'c']).unwrap();
//! assert_eq!(parsed, binform::value_map! { "len" => 3u8, "payload" => "abc" });
//!
//! let bytes = schema.serialize(&parsed).unwrap();
//! assert_eq!(bytes, [0x03, b'a', b'b', b'c']);
//! ```

pub mod def;
pub mod errors;
pub mod expr;
pub mod instance;
pub mod proto;
mod read;
pub mod registry;
pub mod schema;
#[cfg(feature = "serde")]
pub mod serde;
pub mod stream;
pub mod value;
mod write;

pub use def::TypeDef;
pub use errors::{Error, Result, SchemaError};
pub use expr::{Ctx, Expr};
pub use instance::{FieldMut, FieldRef, Instance};
pub use proto::{Endian, Kind, Prototype};
pub use registry::Registry;
pub use schema::Schema;
pub use stream::{BitOrder, BitReader, BitWriter};
pub use value::Value;
