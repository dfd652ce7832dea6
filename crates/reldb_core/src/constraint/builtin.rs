//! Built-in constraints.

use super::{read_span, Constraint, MatchResult, MatchType};
use crate::error::{CoreError, CoreResult};
use crate::schema::TableFieldInfo;
use reldb_codec::{FieldCodec, KeyReader, Value};
use std::cmp::Ordering;

fn bound(codec: &Option<FieldCodec>) -> CoreResult<&FieldCodec> {
    codec
        .as_ref()
        .ok_or_else(|| CoreError::invalid_operation("constraint used before prepare"))
}

fn coerce(field: &TableFieldInfo, value: &Value) -> CoreResult<Value> {
    field
        .codec
        .coerce(value.clone())
        .map_err(|err| CoreError::field_mismatch(format!("field {}: {err}", field.name)))
}

/// Matches fields equal to a value.
#[derive(Debug, Clone)]
pub struct ExactConstraint {
    value: Value,
    codec: Option<FieldCodec>,
    encoded: Vec<u8>,
}

/// Matches fields equal to `value`.
#[must_use]
pub fn exact(value: impl Into<Value>) -> ExactConstraint {
    ExactConstraint {
        value: value.into(),
        codec: None,
        encoded: Vec::new(),
    }
}

impl Constraint for ExactConstraint {
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType> {
        let value = coerce(field, &self.value)?;
        self.encoded = field.codec.encode_to_vec(&value)?;
        self.codec = Some(field.codec.clone());
        Ok(MatchType::Exact)
    }

    fn write_prefix(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.encoded);
    }

    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        let span = read_span(bound(&self.codec)?, reader)?;
        Ok(match span.cmp(self.encoded.as_slice()) {
            Ordering::Equal => MatchResult::Yes,
            Ordering::Less => MatchResult::No,
            Ordering::Greater => MatchResult::NoAfterLast,
        })
    }

    fn match_last(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        if reader.remaining() == self.encoded.as_slice() {
            reader.advance(self.encoded.len())?;
            return Ok(MatchResult::Yes);
        }
        self.match_field(reader)
    }

    fn upper_bound(&self) -> Option<(&[u8], bool)> {
        Some((&self.encoded, true))
    }
}

/// Matches every field value.
#[derive(Debug, Clone, Default)]
pub struct AnyConstraint {
    codec: Option<FieldCodec>,
}

/// Matches every value.
#[must_use]
pub fn any() -> AnyConstraint {
    AnyConstraint::default()
}

impl Constraint for AnyConstraint {
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType> {
        self.codec = Some(field.codec.clone());
        Ok(MatchType::Any)
    }

    fn write_prefix(&self, _out: &mut Vec<u8>) {}

    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        bound(&self.codec)?.skip(reader)?;
        Ok(MatchResult::Yes)
    }

    fn match_last(&self, _reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        Ok(MatchResult::Yes)
    }
}

/// Matches fields up to a bound.
#[derive(Debug, Clone)]
pub struct UpToConstraint {
    value: Value,
    inclusive: bool,
    then_next: bool,
    codec: Option<FieldCodec>,
    encoded: Vec<u8>,
}

/// Matches values below `value`, or equal to it when `inclusive`.
#[must_use]
pub fn up_to(value: impl Into<Value>, inclusive: bool) -> UpToConstraint {
    UpToConstraint {
        value: value.into(),
        inclusive,
        then_next: false,
        codec: None,
        encoded: Vec::new(),
    }
}

/// Lexicographic upper bound over this field and the next one.
///
/// Values below `value` match together with any value of the following
/// field ([`MatchResult::YesSkipNext`]); values equal to `value` match and
/// leave the decision to the following constraint.
#[must_use]
pub fn up_to_then_next(value: impl Into<Value>) -> UpToConstraint {
    UpToConstraint {
        then_next: true,
        ..up_to(value, true)
    }
}

impl Constraint for UpToConstraint {
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType> {
        if !field.codec.is_orderable() {
            return Err(CoreError::field_mismatch(format!(
                "field {} has no order for an upper bound",
                field.name
            )));
        }
        let value = coerce(field, &self.value)?;
        self.encoded = field.codec.encode_to_vec(&value)?;
        self.codec = Some(field.codec.clone());
        Ok(MatchType::NoPrefix)
    }

    fn write_prefix(&self, _out: &mut Vec<u8>) {}

    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        let span = read_span(bound(&self.codec)?, reader)?;
        Ok(match (span.cmp(self.encoded.as_slice()), self.then_next) {
            (Ordering::Less, true) => MatchResult::YesSkipNext,
            (Ordering::Less, false) => MatchResult::Yes,
            (Ordering::Equal, _) if self.then_next || self.inclusive => MatchResult::Yes,
            _ => MatchResult::NoAfterLast,
        })
    }

    fn upper_bound(&self) -> Option<(&[u8], bool)> {
        Some((&self.encoded, self.inclusive || self.then_next))
    }
}

/// Matches fields whose decoded value satisfies a closure.
pub struct PredicateConstraint {
    test: Box<dyn Fn(&Value) -> bool + Send + Sync>,
    codec: Option<FieldCodec>,
}

/// Matches values for which `test` returns `true`.
#[must_use]
pub fn predicate(test: impl Fn(&Value) -> bool + Send + Sync + 'static) -> PredicateConstraint {
    PredicateConstraint {
        test: Box::new(test),
        codec: None,
    }
}

impl std::fmt::Debug for PredicateConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateConstraint")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl Constraint for PredicateConstraint {
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType> {
        self.codec = Some(field.codec.clone());
        Ok(MatchType::NoPrefix)
    }

    fn write_prefix(&self, _out: &mut Vec<u8>) {}

    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        let value = bound(&self.codec)?.decode(reader)?;
        Ok(if (self.test)(&value) {
            MatchResult::Yes
        } else {
            MatchResult::No
        })
    }
}

/// Matches strings or byte strings starting with a prefix.
#[derive(Debug, Clone)]
pub struct StartsWithConstraint {
    value: Value,
    codec: Option<FieldCodec>,
    prefix: Vec<u8>,
}

/// Matches strings (or byte strings) starting with `value`.
#[must_use]
pub fn starts_with(value: impl Into<Value>) -> StartsWithConstraint {
    StartsWithConstraint {
        value: value.into(),
        codec: None,
        prefix: Vec::new(),
    }
}

impl Constraint for StartsWithConstraint {
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType> {
        if !field.codec.supports_prefix() {
            return Err(CoreError::field_mismatch(format!(
                "field {} ({}) does not support prefix matching",
                field.name,
                field.codec.name()
            )));
        }
        let value = coerce(field, &self.value)?;
        let mut prefix = Vec::new();
        field.codec.encode_prefix(&value, &mut prefix)?;
        self.prefix = prefix;
        self.codec = Some(field.codec.clone());
        Ok(MatchType::Prefix)
    }

    fn write_prefix(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.prefix);
    }

    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        let span = read_span(bound(&self.codec)?, reader)?;
        if span.starts_with(&self.prefix) {
            return Ok(MatchResult::Yes);
        }
        Ok(if span < self.prefix.as_slice() {
            MatchResult::No
        } else {
            MatchResult::NoAfterLast
        })
    }
}

fn text_or_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Text(s) => Some(s.as_bytes()),
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

fn needle(field: &TableFieldInfo, value: &Value) -> CoreResult<Vec<u8>> {
    let value = coerce(field, value)?;
    text_or_bytes(&value).map(<[u8]>::to_vec).ok_or_else(|| {
        CoreError::field_mismatch(format!(
            "field {} ({}) is not a string",
            field.name,
            field.codec.name()
        ))
    })
}

/// Matches strings or byte strings containing a substring.
#[derive(Debug, Clone)]
pub struct ContainsConstraint {
    value: Value,
    codec: Option<FieldCodec>,
    needle: Vec<u8>,
}

/// Matches strings (or byte strings) containing `value`.
#[must_use]
pub fn contains(value: impl Into<Value>) -> ContainsConstraint {
    ContainsConstraint {
        value: value.into(),
        codec: None,
        needle: Vec::new(),
    }
}

impl Constraint for ContainsConstraint {
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType> {
        self.needle = needle(field, &self.value)?;
        self.codec = Some(field.codec.clone());
        Ok(MatchType::NoPrefix)
    }

    fn write_prefix(&self, _out: &mut Vec<u8>) {}

    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        let value = bound(&self.codec)?.decode(reader)?;
        let found = text_or_bytes(&value).is_some_and(|haystack| {
            self.needle.is_empty()
                || haystack
                    .windows(self.needle.len())
                    .any(|window| window == self.needle.as_slice())
        });
        Ok(if found { MatchResult::Yes } else { MatchResult::No })
    }
}

/// Matches strings or byte strings ending with a suffix.
#[derive(Debug, Clone)]
pub struct EndsWithConstraint {
    value: Value,
    codec: Option<FieldCodec>,
    suffix: Vec<u8>,
}

/// Matches strings (or byte strings) ending with `value`.
#[must_use]
pub fn ends_with(value: impl Into<Value>) -> EndsWithConstraint {
    EndsWithConstraint {
        value: value.into(),
        codec: None,
        suffix: Vec::new(),
    }
}

impl Constraint for EndsWithConstraint {
    fn prepare(&mut self, field: &TableFieldInfo) -> CoreResult<MatchType> {
        self.suffix = needle(field, &self.value)?;
        self.codec = Some(field.codec.clone());
        Ok(MatchType::NoPrefix)
    }

    fn write_prefix(&self, _out: &mut Vec<u8>) {}

    fn match_field(&self, reader: &mut KeyReader<'_>) -> CoreResult<MatchResult> {
        let value = bound(&self.codec)?.decode(reader)?;
        let found = text_or_bytes(&value).is_some_and(|s| s.ends_with(&self.suffix));
        Ok(if found { MatchResult::Yes } else { MatchResult::No })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(codec: FieldCodec) -> TableFieldInfo {
        TableFieldInfo::new("f", codec)
    }

    fn run(constraint: &mut dyn Constraint, codec: FieldCodec, value: Value) -> MatchResult {
        let field = field(codec.clone());
        constraint.prepare(&field).unwrap();
        let mut bytes = codec.encode_to_vec(&value).unwrap();
        bytes.push(0xAB);
        let mut reader = KeyReader::new(&bytes);
        let result = constraint.match_field(&mut reader).unwrap();
        assert_eq!(reader.remaining(), &[0xAB], "reader must stop after the field");
        result
    }

    #[test]
    fn exact_orders_results() {
        let mut c = exact(10u64);
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 10u64.into()), MatchResult::Yes);
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 3u64.into()), MatchResult::No);
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 300u64.into()), MatchResult::NoAfterLast);

        let mut out = Vec::new();
        c.write_prefix(&mut out);
        assert_eq!(out, FieldCodec::Unsigned.encode_to_vec(&10u64.into()).unwrap());
    }

    #[test]
    fn exact_last_takes_fast_path() {
        let mut c = exact("abc");
        c.prepare(&field(FieldCodec::String)).unwrap();
        let bytes = FieldCodec::String.encode_to_vec(&"abc".into()).unwrap();
        let mut reader = KeyReader::new(&bytes);
        assert_eq!(c.match_last(&mut reader).unwrap(), MatchResult::Yes);
        assert!(reader.is_empty());
    }

    #[test]
    fn exact_rejects_ill_typed_value() {
        let mut c = exact("abc");
        assert!(matches!(
            c.prepare(&field(FieldCodec::Unsigned)),
            Err(CoreError::FieldMismatch { .. })
        ));
    }

    #[test]
    fn up_to_bounds() {
        let mut exclusive = up_to(-5i64, false);
        assert_eq!(run(&mut exclusive, FieldCodec::Signed, (-6i64).into()), MatchResult::Yes);
        assert_eq!(run(&mut exclusive, FieldCodec::Signed, (-5i64).into()), MatchResult::NoAfterLast);
        let mut inclusive = up_to(-5i64, true);
        assert_eq!(run(&mut inclusive, FieldCodec::Signed, (-5i64).into()), MatchResult::Yes);
        assert_eq!(run(&mut inclusive, FieldCodec::Signed, 0i64.into()), MatchResult::NoAfterLast);
    }

    #[test]
    fn up_to_then_next_skips_next_below_bound() {
        let mut c = up_to_then_next(5u64);
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 4u64.into()), MatchResult::YesSkipNext);
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 5u64.into()), MatchResult::Yes);
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 6u64.into()), MatchResult::NoAfterLast);
    }

    #[test]
    fn starts_with_orders_results() {
        let mut c = starts_with("ab");
        assert_eq!(run(&mut c, FieldCodec::String, "abc".into()), MatchResult::Yes);
        assert_eq!(run(&mut c, FieldCodec::String, "ab".into()), MatchResult::Yes);
        assert_eq!(run(&mut c, FieldCodec::String, "a".into()), MatchResult::No);
        assert_eq!(run(&mut c, FieldCodec::String, "b".into()), MatchResult::NoAfterLast);
        assert!(starts_with("a").prepare(&field(FieldCodec::Unsigned)).is_err());
    }

    #[test]
    fn starts_with_on_optional_string() {
        let codec = FieldCodec::optional(FieldCodec::String);
        let mut c = starts_with("x");
        assert_eq!(run(&mut c, codec.clone(), "xy".into()), MatchResult::Yes);
        assert_eq!(run(&mut c, codec, Value::Null), MatchResult::No);
    }

    #[test]
    fn contains_and_ends_with() {
        let mut c = contains("ell");
        assert_eq!(run(&mut c, FieldCodec::String, "hello".into()), MatchResult::Yes);
        assert_eq!(run(&mut c, FieldCodec::String, "help".into()), MatchResult::No);
        let mut e = ends_with("lo");
        assert_eq!(run(&mut e, FieldCodec::String, "hello".into()), MatchResult::Yes);
        assert_eq!(run(&mut e, FieldCodec::String, "hell".into()), MatchResult::No);
        assert!(contains("x").prepare(&field(FieldCodec::Bool)).is_err());
    }

    #[test]
    fn predicate_decodes() {
        let mut c = predicate(|v| v.as_u64().is_some_and(|n| n % 2 == 0));
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 4u64.into()), MatchResult::Yes);
        assert_eq!(run(&mut c, FieldCodec::Unsigned, 5u64.into()), MatchResult::No);
    }

    #[test]
    fn any_matches_everything() {
        let mut c = any();
        assert_eq!(run(&mut c, FieldCodec::Bool, true.into()), MatchResult::Yes);
    }

    #[test]
    fn unprepared_constraint_is_misuse() {
        let c = exact(1u64);
        let bytes = [1u8];
        assert!(matches!(
            c.match_field(&mut KeyReader::new(&bytes)),
            Err(CoreError::InvalidOperation { .. })
        ));
    }
}
