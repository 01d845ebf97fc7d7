use std::net::IpAddr;

use super::{text, DecodeRule, EncodeRule};
use crate::error::DecodeError;
use crate::ir::Ty;
use crate::value::{IpInterface, Value};

/// `ip_address` takes either family; `ipv4_address` and `ipv6_address`
/// reject the other one.
pub fn address_decoder() -> DecodeRule {
    DecodeRule::for_named(
        "ip_address",
        &["ip_address", "ipv4_address", "ipv6_address"],
        |ty, value, _| {
            let addr: IpAddr = text(value)?
                .parse()
                .map_err(|e| DecodeError::extension("ip_address", e, value))?;
            let family_ok = if ty.is_named("ipv4_address") {
                addr.is_ipv4()
            } else if ty.is_named("ipv6_address") {
                addr.is_ipv6()
            } else {
                true
            };
            if !family_ok {
                return Err(DecodeError::extension("ip_address", format!("not an {ty}"), value));
            }
            Ok(Value::Ip(addr))
        },
    )
}

pub fn address_encoder() -> EncodeRule {
    EncodeRule::new(
        "ip_address",
        |value| matches!(value, Value::Ip(_)),
        |value, _| match value {
            Value::Ip(addr) => Value::Str(addr.to_string()),
            other => other.clone(),
        },
    )
}

pub fn interface_decoder() -> DecodeRule {
    DecodeRule::for_named("ip_interface", &["ip_interface"], |_, value, _| {
        text(value)?
            .parse::<IpInterface>()
            .map(Value::Interface)
            .map_err(|e| DecodeError::extension("ip_interface", e, value))
    })
}

pub fn interface_encoder() -> EncodeRule {
    EncodeRule::new(
        "ip_interface",
        |value| matches!(value, Value::Interface(_)),
        |value, _| match value {
            Value::Interface(iface) => Value::Str(iface.to_string()),
            other => other.clone(),
        },
    )
}
