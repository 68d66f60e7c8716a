//! Declarative conditions over predicate payloads.
//!
//! A condition names a key path into the predicate, an operator, and an
//! expected value. All conditions of a required attestation must hold; the
//! first one that does not is reported as a [`ConditionError`] naming its key.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use portcullis_attest::predicate::{self, VULN_PREDICATE_TYPE, VulnPredicate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::duration::parse_duration;
use crate::error::{ConditionError, ConfigError};

/// Seconds a timestamp may lie in the future before it is rejected.
const CLOCK_SKEW_SECS: i64 = 300;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Value equals the expected value.
    Equals,
    /// Value differs from the expected value.
    NotEquals,
    /// Value is greater than the expected value.
    GreaterThan,
    /// Value is greater than or equal to the expected value.
    GreaterThanOrEquals,
    /// Value is less than the expected value.
    LessThan,
    /// Value is less than or equal to the expected value.
    LessThanOrEquals,
    /// Value is one of the expected array's elements.
    In,
    /// Value is none of the expected array's elements.
    NotIn,
    /// The key is present (expected value `true`) or absent (`false`).
    Exists,
    /// The key holds an RFC 3339 timestamp no older than the expected duration.
    MaxAge,
}

/// A single check against a predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// Dot-separated key path; numeric segments index arrays.
    pub key: String,
    /// How to compare.
    pub operator: Operator,
    /// What to compare against.
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    /// Check the condition is well-formed for its operator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidCondition {
            key: self.key.clone(),
            reason: reason.to_owned(),
        };

        if self.key.is_empty() || self.key.split('.').any(str::is_empty) {
            return Err(invalid("key path has an empty segment"));
        }
        match self.operator {
            Operator::MaxAge => {
                let text = self
                    .value
                    .as_str()
                    .ok_or_else(|| invalid("MaxAge expects a duration string such as \"24h\""))?;
                parse_duration(text).map_err(|e| invalid(&e))?;
            }
            Operator::In | Operator::NotIn if !self.value.is_array() => {
                return Err(invalid("In/NotIn expect an array value"));
            }
            Operator::Exists if !self.value.is_boolean() && !self.value.is_null() => {
                return Err(invalid("Exists expects true or false"));
            }
            Operator::GreaterThan
            | Operator::GreaterThanOrEquals
            | Operator::LessThan
            | Operator::LessThanOrEquals
                if !(self.value.is_number() || self.value.is_string()) =>
            {
                return Err(invalid("relational operators expect a number or string"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Evaluate against `payload` at time `now`.
    pub fn evaluate(&self, payload: &Value, now: DateTime<Utc>) -> Result<(), ConditionError> {
        let fail = |reason: String| Err(ConditionError::new(&self.key, reason));
        let actual = lookup(payload, &self.key);

        if self.operator == Operator::Exists {
            let want = self.value.as_bool().unwrap_or(true);
            return match (want, actual.is_some()) {
                (true, false) => fail("key is missing".to_owned()),
                (false, true) => fail("key is present".to_owned()),
                _ => Ok(()),
            };
        }

        let Some(actual) = actual else {
            return fail("key is missing".to_owned());
        };

        let holds = match self.operator {
            Operator::Equals => values_equal(actual, &self.value),
            Operator::NotEquals => !values_equal(actual, &self.value),
            Operator::GreaterThan => compare(actual, &self.value) == Some(Ordering::Greater),
            Operator::GreaterThanOrEquals => {
                matches!(compare(actual, &self.value), Some(Ordering::Greater | Ordering::Equal))
            }
            Operator::LessThan => compare(actual, &self.value) == Some(Ordering::Less),
            Operator::LessThanOrEquals => {
                matches!(compare(actual, &self.value), Some(Ordering::Less | Ordering::Equal))
            }
            Operator::In => self
                .value
                .as_array()
                .is_some_and(|items| items.iter().any(|v| values_equal(actual, v))),
            Operator::NotIn => self
                .value
                .as_array()
                .is_some_and(|items| !items.iter().any(|v| values_equal(actual, v))),
            Operator::MaxAge => return self.check_age(actual, now),
            Operator::Exists => true,
        };

        if holds {
            Ok(())
        } else {
            fail(format!("{actual} is not {:?} {}", self.operator, self.value))
        }
    }

    fn check_age(&self, actual: &Value, now: DateTime<Utc>) -> Result<(), ConditionError> {
        let max = self
            .value
            .as_str()
            .ok_or_else(|| ConditionError::new(&self.key, "MaxAge expects a duration string"))
            .and_then(|s| parse_duration(s).map_err(|e| ConditionError::new(&self.key, e)))?;
        let timestamp = actual
            .as_str()
            .and_then(parse_timestamp)
            .ok_or_else(|| ConditionError::new(&self.key, format!("{actual} is not an RFC 3339 timestamp")))?;

        let age = now.signed_duration_since(timestamp);
        if age < -Duration::seconds(CLOCK_SKEW_SECS) {
            return Err(ConditionError::new(
                &self.key,
                format!("timestamp {timestamp} is in the future"),
            ));
        }
        if age > max {
            return Err(ConditionError::new(
                &self.key,
                format!(
                    "timestamp {timestamp} is {} old, exceeding the maximum age of {}",
                    format_duration(age),
                    format_duration(max)
                ),
            ));
        }
        Ok(())
    }
}

/// Evaluate all conditions in order against a predicate.
///
/// Predicate types with a known schema are decoded first; a schema failure
/// is reported on the key `predicate`.
pub fn evaluate_all(
    predicate_type: &str,
    payload: &Value,
    conditions: &[Condition],
    now: DateTime<Utc>,
) -> Result<(), ConditionError> {
    predicate::check_schema(predicate_type, payload)
        .map_err(|e| ConditionError::new("predicate", e.to_string()))?;

    if predicate_type == VULN_PREDICATE_TYPE {
        if let Ok(scan) = VulnPredicate::from_value(payload) {
            tracing::debug!(
                scanner = %scan.scanner.uri,
                scan_age_secs = scan.scan_age(now).num_seconds(),
                "evaluating vulnerability scan predicate"
            );
        }
    }

    conditions.iter().try_for_each(|c| c.evaluate(payload, now))
}

/// Resolve a dot-separated key path.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Order two values: numbers numerically, timestamps chronologically,
/// other strings lexically. Mixed types are unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        _ => None,
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
