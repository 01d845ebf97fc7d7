use uuid::Uuid;

use super::{text, DecodeRule, EncodeRule};
use crate::error::DecodeError;
use crate::value::Value;

/// Hyphenated, simple, braced or URN form.
pub fn uuid_decoder() -> DecodeRule {
    DecodeRule::for_named("uuid", &["uuid"], |_, value, _| {
        let s = text(value)?;
        Uuid::parse_str(s)
            .map(Value::Uuid)
            .map_err(|e| DecodeError::extension("uuid", e, value))
    })
}

pub fn uuid_encoder() -> EncodeRule {
    EncodeRule::new(
        "uuid",
        |value| matches!(value, Value::Uuid(_)),
        |value, _| match value {
            Value::Uuid(id) => Value::Str(id.hyphenated().to_string()),
            other => other.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeOptions};
    use crate::ir::Ty;

    #[test]
    fn accepts_simple_form_and_rejects_non_strings() {
        let options = DecodeOptions::default().extension(uuid_decoder());
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        let out = decode(&Ty::named("uuid"), &Value::from(id.simple().to_string()), &options).unwrap();
        assert_eq!(out, Value::Uuid(id));

        let err = decode(&Ty::named("uuid"), &Value::Int(7), &options).unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::Mismatch);
    }
}
