//! Pluggable decode and encode rules.
//!
//! A rule is a name, a predicate and a transform. Rule lists are ordered and
//! the first rule whose predicate accepts wins: decode predicates look at the
//! descriptor, encode predicates at the value.
mod id;
mod net;
mod time;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::decode::DecodeCtx;
use crate::encode::EncodeCtx;
use crate::error::DecodeError;
use crate::ir::Ty;
use crate::value::Value;

pub use net::{address_decoder, address_encoder, interface_decoder, interface_encoder};
pub use id::{uuid_decoder, uuid_encoder};
pub use time::{numeric_decoder, numeric_encoder, string_decoder, string_encoder};

type DecodePredicate = dyn Fn(&Ty) -> bool + Send + Sync;
type DecodeTransform = dyn Fn(&Ty, &Value, &DecodeCtx<'_>) -> Result<Value, DecodeError> + Send + Sync;
type EncodePredicate = dyn Fn(&Value) -> bool + Send + Sync;
type EncodeTransform = dyn Fn(&Value, &EncodeCtx<'_>) -> Value + Send + Sync;

/// Domain type names claimed by [`builtin_decoders`].
pub const BUILTIN_TYPES: &[&str] =
    &["uuid", "datetime", "ip_address", "ipv4_address", "ipv6_address", "ip_interface"];

#[derive(Clone)]
pub struct DecodeRule {
    name: Cow<'static, str>,
    predicate: Arc<DecodePredicate>,
    transform: Arc<DecodeTransform>,
}

impl DecodeRule {
    pub fn new<P, T>(name: impl Into<Cow<'static, str>>, predicate: P, transform: T) -> Self
    where
        P: Fn(&Ty) -> bool + Send + Sync + 'static,
        T: Fn(&Ty, &Value, &DecodeCtx<'_>) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        Self { name: name.into(), predicate: Arc::new(predicate), transform: Arc::new(transform) }
    }

    /// Rule claiming the domain types named in `types`.
    pub fn for_named<T>(name: impl Into<Cow<'static, str>>, types: &'static [&'static str], transform: T) -> Self
    where
        T: Fn(&Ty, &Value, &DecodeCtx<'_>) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        let predicate = move |ty: &Ty| matches!(ty, Ty::Named(n) if types.contains(&n.as_str()));
        Self::new(name, predicate, transform)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn claims(&self, ty: &Ty) -> bool {
        (self.predicate)(ty)
    }

    pub fn apply(&self, ty: &Ty, value: &Value, ctx: &DecodeCtx<'_>) -> Result<Value, DecodeError> {
        (self.transform)(ty, value, ctx)
    }
}

impl fmt::Debug for DecodeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DecodeRule").field(&self.name).finish()
    }
}

#[derive(Clone)]
pub struct EncodeRule {
    name: Cow<'static, str>,
    predicate: Arc<EncodePredicate>,
    transform: Arc<EncodeTransform>,
}

impl EncodeRule {
    pub fn new<P, T>(name: impl Into<Cow<'static, str>>, predicate: P, transform: T) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        T: Fn(&Value, &EncodeCtx<'_>) -> Value + Send + Sync + 'static,
    {
        Self { name: name.into(), predicate: Arc::new(predicate), transform: Arc::new(transform) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn claims(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    pub fn apply(&self, value: &Value, ctx: &EncodeCtx<'_>) -> Value {
        (self.transform)(value, ctx)
    }
}

impl fmt::Debug for EncodeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncodeRule").field(&self.name).finish()
    }
}

static DECODERS: Lazy<Vec<DecodeRule>> =
    Lazy::new(|| vec![uuid_decoder(), string_decoder(), address_decoder(), interface_decoder()]);

static ENCODERS: Lazy<Vec<EncodeRule>> =
    Lazy::new(|| vec![uuid_encoder(), string_encoder(), address_encoder(), interface_encoder()]);

/// uuid, RFC 3339 datetime, ip address and ip interface. Numeric timestamps
/// ([`numeric_decoder`]) are opt-in: put them in front of these.
pub fn builtin_decoders() -> &'static [DecodeRule] {
    &DECODERS
}

pub fn builtin_encoders() -> &'static [EncodeRule] {
    &ENCODERS
}

/// `Str` payload of a domain leaf, or a mismatch.
fn text<'v>(value: &'v Value) -> Result<&'v str, DecodeError> {
    value.as_str().ok_or_else(|| DecodeError::mismatch(value))
}
