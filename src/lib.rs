//! Descriptor-directed decoding and encoding of JSON-like data.
//!
//! A type descriptor ([`Ty`]) says what shape a piece of loosely typed data
//! ([`Value`]) is expected to have. [`decode`] checks the data against it and
//! builds shaped values (records, enum members, sets, tuples, domain leaves
//! such as UUIDs); [`encode`] lowers shaped values back to plain data.
//!
//! ```
//! use json_pickle::{decode, DecodeOptions, Ty, Value};
//!
//! let ty: Ty = "List[Optional[int]]".parse().unwrap();
//! let value = Value::from(serde_json::json!([1, null]));
//! assert!(decode(&ty, &value, &DecodeOptions::default()).is_ok());
//! ```
pub mod decode;
pub mod encode;
pub mod error;
pub mod ext;
pub mod ir;
pub mod norm;
pub mod path_de;
pub mod schema;
pub mod value;

pub use decode::{decode, DecodeCtx, DecodeOptions, Decoder, TupleArity};
pub use encode::{encode, EncodeCtx, Encoder};
pub use error::{DecodeError, ErrorKind, Locator, ParseError, SchemaError};
pub use ext::{builtin_decoders, builtin_encoders, DecodeRule, EncodeRule};
pub use ir::{EnumDef, FieldDef, Primitive, RecordDef, Ty};
pub use schema::{FieldSpec, Schema, SchemaBuilder, SchemaFile};
pub use value::{Member, Record, Shape, Value};
