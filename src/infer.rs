//! Type inference and validation
//!
//! Derives the storage type a value needs, checks values against declared
//! types, and resolves the type a property's column must have for a save.

use crate::config::SchemaPolicy;
use crate::error::{MismatchReason, PersistenceError, Result};
use crate::object::PropertyDescriptor;
use crate::types::{ColumnType, MAX_DECIMAL_PRECISION, MAX_DECIMAL_SCALE, TypeDescriptor};
use crate::value::{Timestamp, Value, parse_bool};

/// Smallest descriptor able to hold `value`
///
/// Arrays infer the widened type of their non-NULL elements, which must all
/// share one kind.
pub fn infer(value: &Value) -> Result<TypeDescriptor> {
    infer_named("", value)
}

fn infer_named(property: &str, value: &Value) -> Result<TypeDescriptor> {
    let column_type = match value {
        Value::Null => {
            return Err(PersistenceError::cannot_infer(
                property,
                "value is NULL and no type is declared",
            ));
        }
        Value::String(s) => ColumnType::string(char_count(s)),
        Value::Int(i) => ColumnType::int(int_digits(*i)),
        Value::Double(d) => {
            let (int_digits, scale) = decimal_digits(property, *d)?;
            ColumnType::double((int_digits + scale).max(1), scale)
        }
        Value::Bool(_) => ColumnType::Bool,
        Value::DateTime(ts) => ColumnType::datetime(ts.fraction()),
        Value::Array(items) => return infer_elements(property, items),
    };
    Ok(TypeDescriptor::new(column_type))
}

fn infer_elements(property: &str, items: &[Value]) -> Result<TypeDescriptor> {
    let mut inferred: Option<TypeDescriptor> = None;

    for item in items.iter().filter(|v| !v.is_null()) {
        if matches!(item, Value::Array(_)) {
            return Err(PersistenceError::cannot_infer(
                property,
                "nested arrays are not supported",
            ));
        }
        let next = infer_named(property, item)?;
        inferred = Some(match inferred {
            None => next,
            Some(prev) => prev.widen(&next).ok_or_else(|| {
                PersistenceError::cannot_infer(
                    property,
                    format!("values mix {} and {}", prev.kind(), next.kind()),
                )
            })?,
        });
    }

    inferred.ok_or_else(|| {
        PersistenceError::cannot_infer(property, "array has no non-NULL element to infer from")
    })
}

/// Check `value` against a declared descriptor
///
/// Returns the descriptor the column needs: the declared one, or for strings
/// under resize-on-grow, one widened to fit the value.
pub fn validate(
    property: &str,
    value: &Value,
    declared: &TypeDescriptor,
    policy: &SchemaPolicy,
) -> Result<TypeDescriptor> {
    let incompatible = || {
        PersistenceError::mismatch(
            property,
            MismatchReason::Incompatible,
            format!("{} value does not fit {}", value.type_name(), declared),
        )
    };
    let too_large = |detail: String| {
        PersistenceError::mismatch(property, MismatchReason::SizeExceeded, detail)
    };

    match (&declared.column_type, value) {
        (_, Value::Null) => {
            if declared.nullable {
                Ok(*declared)
            } else {
                Err(incompatible())
            }
        }
        (_, Value::Array(_)) => Err(incompatible()),

        (ColumnType::String { length }, value) => {
            let needed = match value {
                Value::String(s) => char_count(s),
                Value::Int(i) => i.to_string().len() as u32,
                Value::Double(d) => d.to_string().len() as u32,
                Value::Bool(_) => 1,
                Value::DateTime(ts) => ts.to_string().len() as u32,
                _ => return Err(incompatible()),
            };
            if needed <= *length {
                Ok(*declared)
            } else if policy.resize_on_grow {
                Ok(TypeDescriptor {
                    column_type: ColumnType::string(needed),
                    nullable: declared.nullable,
                })
            } else {
                Err(too_large(format!(
                    "{} characters exceed the declared length {}",
                    needed, length
                )))
            }
        }

        (ColumnType::Int { digits }, value) => {
            let number = match value {
                Value::Int(i) => *i,
                Value::String(s) => s.trim().parse::<i64>().map_err(|_| incompatible())?,
                _ => return Err(incompatible()),
            };
            let needed = int_digits(number);
            if needed > *digits {
                return Err(too_large(format!(
                    "{} has {} digits, declared {}",
                    number, needed, digits
                )));
            }
            Ok(*declared)
        }

        (ColumnType::Double { precision, scale }, value) => {
            let number = match value {
                Value::Double(d) => *d,
                Value::Int(i) => *i as f64,
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| incompatible())?,
                _ => return Err(incompatible()),
            };
            let (needed, _) = decimal_digits(property, number)?;
            let allowed = precision.saturating_sub(*scale);
            if needed > allowed {
                return Err(too_large(format!(
                    "{} has {} integer digits, declared {}",
                    number, needed, allowed
                )));
            }
            Ok(*declared)
        }

        (ColumnType::Bool, value) => match value {
            Value::Bool(_) | Value::Int(0 | 1) => Ok(*declared),
            Value::String(s) if parse_bool(s).is_some() => Ok(*declared),
            _ => Err(incompatible()),
        },

        (ColumnType::DateTime { fraction }, value) => {
            let ts = match value {
                Value::DateTime(ts) => *ts,
                Value::String(s) => Timestamp::parse(s).map_err(|(reason, detail)| {
                    PersistenceError::mismatch(property, reason, detail)
                })?,
                _ => return Err(incompatible()),
            };
            if ts.fraction() != *fraction {
                return Err(PersistenceError::mismatch(
                    property,
                    MismatchReason::PrecisionMismatch,
                    format!(
                        "value has {} fractional digits, declared {}",
                        ts.fraction(),
                        fraction
                    ),
                ));
            }
            Ok(*declared)
        }
    }
}

/// The column type a property needs to store `values`
///
/// `values` are the scalar value, the array elements or the locale values of
/// the property. `live` is the descriptor of the existing column, used when
/// nothing can be inferred from the values themselves.
pub fn resolve(
    property: &PropertyDescriptor,
    values: &[&Value],
    live: Option<TypeDescriptor>,
    policy: &SchemaPolicy,
) -> Result<TypeDescriptor> {
    let name = property.name.as_str();

    if let Some(declared) = property.declared {
        let mut effective = declared;
        for value in values {
            effective = validate(name, value, &effective, policy)?;
        }
        return Ok(effective);
    }

    if policy.typing_mandatory {
        return Err(PersistenceError::cannot_infer(
            name,
            "a type declaration is mandatory",
        ));
    }

    let present: Vec<Value> = values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| (*v).clone())
        .collect();
    if present.is_empty() {
        return live.ok_or_else(|| {
            PersistenceError::cannot_infer(name, "no value to infer from and no existing column")
        });
    }
    infer_elements(name, &present)
}

/// Elements of an array property; NULL stands for an empty array
pub fn array_elements<'a>(property: &str, value: &'a Value) -> Result<&'a [Value]> {
    match value {
        Value::Null => Ok(&[]),
        Value::Array(items) => {
            if items.iter().any(|v| matches!(v, Value::Array(_))) {
                return Err(PersistenceError::cannot_infer(
                    property,
                    "nested arrays are not supported",
                ));
            }
            Ok(items)
        }
        other => Err(PersistenceError::mismatch(
            property,
            MismatchReason::Incompatible,
            format!("expected an array, got {}", other.type_name()),
        )),
    }
}

/// Reject arrays assigned to scalar properties
pub fn scalar_value<'a>(property: &str, value: &'a Value) -> Result<&'a Value> {
    match value {
        Value::Array(_) => Err(PersistenceError::mismatch(
            property,
            MismatchReason::Incompatible,
            "arrays need an array property",
        )),
        other => Ok(other),
    }
}

fn char_count(s: &str) -> u32 {
    u32::try_from(s.chars().count()).unwrap_or(u32::MAX)
}

fn int_digits(i: i64) -> u8 {
    i.unsigned_abs().to_string().len() as u8
}

/// Integer and fractional digit counts of the shortest decimal form of `d`
fn decimal_digits(property: &str, d: f64) -> Result<(u8, u8)> {
    if !d.is_finite() {
        return Err(PersistenceError::mismatch(
            property,
            MismatchReason::Incompatible,
            format!("{} cannot be stored", d),
        ));
    }

    let text = d.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let int_digits = int_part.trim_start_matches('0').len();
    let scale = frac_part.len();

    if scale > MAX_DECIMAL_SCALE as usize || int_digits + scale > MAX_DECIMAL_PRECISION as usize {
        return Err(PersistenceError::mismatch(
            property,
            MismatchReason::SizeExceeded,
            format!(
                "{} needs {} integer and {} fractional digits",
                d, int_digits, scale
            ),
        ));
    }

    Ok((int_digits as u8, scale as u8))
}
