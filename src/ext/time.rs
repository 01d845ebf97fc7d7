use chrono::{DateTime, SecondsFormat, Utc};

use super::{text, DecodeRule, EncodeRule};
use crate::error::DecodeError;
use crate::value::Value;

/// RFC 3339 text; any offset is normalized to UTC.
pub fn string_decoder() -> DecodeRule {
    DecodeRule::for_named("datetime_str", &["datetime"], |_, value, _| {
        let s = text(value)?;
        DateTime::parse_from_rfc3339(s)
            .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
            .map_err(|e| DecodeError::extension("datetime_str", e, value))
    })
}

pub fn string_encoder() -> EncodeRule {
    EncodeRule::new(
        "datetime_str",
        |value| matches!(value, Value::Timestamp(_)),
        |value, _| match value {
            Value::Timestamp(t) => Value::Str(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            other => other.clone(),
        },
    )
}

/// Seconds since the Unix epoch, int or float.
pub fn numeric_decoder() -> DecodeRule {
    DecodeRule::for_named("datetime_num", &["datetime"], |_, value, _| {
        let out_of_range = || DecodeError::extension("datetime_num", "timestamp out of range", value);
        let t = match value {
            Value::Int(secs) => DateTime::from_timestamp(*secs, 0),
            Value::Float(x) if x.0.is_finite() => {
                let secs = x.0.floor();
                let nanos = ((x.0 - secs) * 1e9).round();
                // rounding can carry into the next second
                let (secs, nanos) = if nanos >= 1e9 { (secs + 1.0, 0.0) } else { (secs, nanos) };
                DateTime::from_timestamp(secs as i64, nanos as u32)
            }
            Value::Float(_) => None,
            _ => return Err(DecodeError::mismatch(value)),
        };
        t.map(Value::Timestamp).ok_or_else(out_of_range)
    })
}

pub fn numeric_encoder() -> EncodeRule {
    EncodeRule::new(
        "datetime_num",
        |value| matches!(value, Value::Timestamp(_)),
        |value, _| match value {
            Value::Timestamp(t) => {
                Value::from(t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9)
            }
            other => other.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeOptions};
    use crate::encode::encode;
    use crate::ir::Ty;

    fn datetime() -> Ty {
        Ty::named("datetime")
    }

    #[test]
    fn offsets_normalize_to_utc() {
        let options = DecodeOptions::default().extension(string_decoder());
        let out = decode(&datetime(), &Value::from("2024-01-01T02:00:00+02:00"), &options).unwrap();
        assert_eq!(encode(&out, &[string_encoder()]), Value::from("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn numeric_timestamps() {
        let options = DecodeOptions::default().extension(numeric_decoder());
        let whole = decode(&datetime(), &Value::Int(86_400), &options).unwrap();
        let Value::Timestamp(t) = &whole else { panic!("not a timestamp") };
        assert_eq!(t.to_rfc3339(), "1970-01-02T00:00:00+00:00");
        assert_eq!(encode(&whole, &[numeric_encoder()]), Value::from(86_400.0));

        let half = decode(&datetime(), &Value::from(1.5), &options).unwrap();
        let Value::Timestamp(t) = &half else { panic!("not a timestamp") };
        assert_eq!(t.timestamp_subsec_millis(), 500);

        let err = decode(&datetime(), &Value::from("1970"), &options).unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::Mismatch);
    }

    #[test]
    fn numeric_rule_in_front_wins() {
        let options = DecodeOptions::default()
            .extension(numeric_decoder())
            .extensions(super::super::builtin_decoders().iter().cloned());
        assert!(decode(&datetime(), &Value::Int(0), &options).is_ok());
        assert!(decode(&datetime(), &Value::from("1970-01-01T00:00:00Z"), &options).is_err());
    }
}
