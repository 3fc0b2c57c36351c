//! Typed condition expressions.
//!
//! Trigger conditions, step conditions and delta validation rules are all
//! `field / operator / value` triples. They are parsed once into a
//! [`Condition`] and evaluated by [`Condition::evaluate`] against a JSON
//! context, instead of being scanned as strings at dispatch time.
//!
//! ```json
//! { "field": "data.content_type", "operator": "eq", "value": "article" }
//! { "field": "data.title", "operator": "matches", "value": "^Draft" }
//! { "field": "data.tags", "operator": "contains", "value": "urgent" }
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;

/// A dotted path into a JSON value, e.g. `data.author.name` or `items.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
  /// Parse a dotted path. Empty segments are ignored, so `""` is the root.
  pub fn parse(path: &str) -> Self {
    Self(
      path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect(),
    )
  }

  pub fn root() -> Self {
    Self(Vec::new())
  }

  pub fn from_segments(segments: Vec<String>) -> Self {
    Self(segments)
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  /// Walk the path through objects (by key) and arrays (by index).
  pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
    self.0.iter().try_fold(value, |current, segment| match current {
      Value::Object(map) => map.get(segment),
      Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
      _ => None,
    })
  }
}

impl fmt::Display for FieldPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.join("."))
  }
}

impl From<String> for FieldPath {
  fn from(value: String) -> Self {
    Self::parse(&value)
  }
}

impl From<&str> for FieldPath {
  fn from(value: &str) -> Self {
    Self::parse(value)
  }
}

impl From<FieldPath> for String {
  fn from(value: FieldPath) -> Self {
    value.to_string()
  }
}

/// Comparison operators understood by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
  #[serde(alias = "==", alias = "equals")]
  Eq,
  #[serde(alias = "!=", alias = "not_equals")]
  Ne,
  #[serde(alias = ">")]
  Gt,
  #[serde(alias = ">=")]
  Gte,
  #[serde(alias = "<")]
  Lt,
  #[serde(alias = "<=")]
  Lte,
  Contains,
  #[serde(alias = "regex")]
  Matches,
  Exists,
  In,
}

/// A single `field operator value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub field: FieldPath,
  pub operator: Operator,
  #[serde(default)]
  pub value: Value,
  #[serde(skip)]
  pattern: CompiledPattern,
}

/// `matches` regex compiled on first use. `None` caches an invalid pattern.
#[derive(Debug, Clone, Default)]
struct CompiledPattern(OnceLock<Option<Regex>>);

impl PartialEq for CompiledPattern {
  fn eq(&self, _other: &Self) -> bool {
    true
  }
}

impl Condition {
  pub fn new(field: impl Into<FieldPath>, operator: Operator, value: impl Into<Value>) -> Self {
    Self {
      field: field.into(),
      operator,
      value: value.into(),
      pattern: CompiledPattern::default(),
    }
  }

  fn regex(&self) -> Option<&Regex> {
    self
      .pattern
      .0
      .get_or_init(|| self.value.as_str().and_then(|p| Regex::new(p).ok()))
      .as_ref()
  }

  /// Reject conditions that could never evaluate meaningfully.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    let invalid = |message: String| WorkflowError::InvalidCondition {
      field: self.field.to_string(),
      message,
    };

    match self.operator {
      Operator::Matches => {
        let pattern = self
          .value
          .as_str()
          .ok_or_else(|| invalid("regex pattern must be a string".to_string()))?;
        let regex = Regex::new(pattern).map_err(|e| invalid(format!("invalid regex: {}", e)))?;
        let _ = self.pattern.0.set(Some(regex));
      }
      Operator::In if !self.value.is_array() => {
        return Err(invalid("'in' expects an array value".to_string()));
      }
      Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        if !(self.value.is_number() || self.value.is_string()) =>
      {
        return Err(invalid("ordering operators expect a number or string".to_string()));
      }
      _ => {}
    }

    Ok(())
  }

  /// Evaluate against a JSON context. Missing fields never satisfy anything
  /// except `ne` and `exists: false`.
  pub fn evaluate(&self, context: &Value) -> bool {
    let actual = self.field.lookup(context).filter(|v| !v.is_null());

    match self.operator {
      Operator::Exists => actual.is_some() == self.value.as_bool().unwrap_or(true),
      Operator::Eq => actual.is_some_and(|a| values_equal(a, &self.value)),
      Operator::Ne => !actual.is_some_and(|a| values_equal(a, &self.value)),
      Operator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
      Operator::Gte => matches!(
        compare(actual, &self.value),
        Some(Ordering::Greater | Ordering::Equal)
      ),
      Operator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
      Operator::Lte => matches!(
        compare(actual, &self.value),
        Some(Ordering::Less | Ordering::Equal)
      ),
      Operator::Contains => match actual {
        Some(Value::String(s)) => self.value.as_str().is_some_and(|needle| s.contains(needle)),
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, &self.value)),
        Some(Value::Object(map)) => self.value.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
      },
      Operator::Matches => match (actual.and_then(Value::as_str), self.regex()) {
        (Some(text), Some(re)) => re.is_match(text),
        _ => false,
      },
      Operator::In => match (actual, &self.value) {
        (Some(a), Value::Array(options)) => options.iter().any(|option| values_equal(a, option)),
        _ => false,
      },
    }
  }
}

/// AND semantics; an empty list always holds.
pub fn all_hold(conditions: &[Condition], context: &Value) -> bool {
  conditions.iter().all(|condition| condition.evaluate(context))
}

fn values_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
    _ => a == b,
  }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
  match (actual?, expected) {
    (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn context() -> Value {
    json!({
      "event_type": "onCreate",
      "data": {
        "content_type": "article",
        "title": "Draft: release notes",
        "word_count": 1200,
        "tags": ["urgent", "docs"],
        "author": { "name": "sam" },
        "archived": null
      }
    })
  }

  #[test]
  fn test_field_path_lookup() {
    let ctx = context();
    assert_eq!(
      FieldPath::parse("data.author.name").lookup(&ctx),
      Some(&json!("sam"))
    );
    assert_eq!(FieldPath::parse("data.tags.1").lookup(&ctx), Some(&json!("docs")));
    assert_eq!(FieldPath::parse("data.missing.deep").lookup(&ctx), None);
    assert_eq!(FieldPath::root().lookup(&ctx), Some(&ctx));
  }

  #[test]
  fn test_equality() {
    let ctx = context();
    assert!(Condition::new("data.content_type", Operator::Eq, "article").evaluate(&ctx));
    assert!(!Condition::new("data.content_type", Operator::Eq, "video").evaluate(&ctx));
    assert!(Condition::new("data.word_count", Operator::Eq, 1200.0).evaluate(&ctx));
    assert!(Condition::new("data.content_type", Operator::Ne, "video").evaluate(&ctx));
    assert!(Condition::new("data.missing", Operator::Ne, "anything").evaluate(&ctx));
  }

  #[test]
  fn test_ordering() {
    let ctx = context();
    assert!(Condition::new("data.word_count", Operator::Gt, 1000).evaluate(&ctx));
    assert!(Condition::new("data.word_count", Operator::Gte, 1200).evaluate(&ctx));
    assert!(!Condition::new("data.word_count", Operator::Lt, 1200).evaluate(&ctx));
    assert!(Condition::new("data.word_count", Operator::Lte, 1200).evaluate(&ctx));
    assert!(!Condition::new("data.title", Operator::Gt, 5).evaluate(&ctx));
  }

  #[test]
  fn test_contains_matches_in() {
    let ctx = context();
    assert!(Condition::new("data.tags", Operator::Contains, "urgent").evaluate(&ctx));
    assert!(Condition::new("data.title", Operator::Contains, "release").evaluate(&ctx));
    assert!(Condition::new("data.author", Operator::Contains, "name").evaluate(&ctx));
    assert!(Condition::new("data.title", Operator::Matches, "^Draft").evaluate(&ctx));
    assert!(!Condition::new("data.title", Operator::Matches, "^Final").evaluate(&ctx));
    assert!(
      Condition::new("data.content_type", Operator::In, json!(["article", "post"])).evaluate(&ctx)
    );
  }

  #[test]
  fn test_exists_treats_null_as_missing() {
    let ctx = context();
    assert!(Condition::new("data.title", Operator::Exists, true).evaluate(&ctx));
    assert!(!Condition::new("data.archived", Operator::Exists, true).evaluate(&ctx));
    assert!(Condition::new("data.archived", Operator::Exists, false).evaluate(&ctx));
    assert!(Condition::new("data.title", Operator::Exists, Value::Null).evaluate(&ctx));
  }

  #[test]
  fn test_all_hold() {
    let ctx = context();
    assert!(all_hold(&[], &ctx));
    assert!(all_hold(
      &[
        Condition::new("event_type", Operator::Eq, "onCreate"),
        Condition::new("data.word_count", Operator::Gt, 10),
      ],
      &ctx
    ));
    assert!(!all_hold(
      &[
        Condition::new("event_type", Operator::Eq, "onCreate"),
        Condition::new("data.word_count", Operator::Gt, 10_000),
      ],
      &ctx
    ));
  }

  #[test]
  fn test_validate() {
    assert!(Condition::new("x", Operator::Matches, "(unclosed").validate().is_err());
    assert!(Condition::new("x", Operator::Matches, 5).validate().is_err());
    assert!(Condition::new("x", Operator::In, "not-array").validate().is_err());
    assert!(Condition::new("x", Operator::Gt, json!({})).validate().is_err());
    assert!(Condition::new("x", Operator::Eq, json!({})).validate().is_ok());
  }

  #[test]
  fn test_regex_compiled_once_and_kept_across_clones() {
    let condition = Condition::new("data.title", Operator::Matches, "^Draft");
    condition.validate().unwrap();
    assert!(condition.pattern.0.get().is_some_and(Option::is_some));

    let copy = condition.clone();
    assert!(copy.pattern.0.get().is_some());
    assert!(copy.evaluate(&context()));

    let lazy: Condition =
      serde_json::from_value(json!({ "field": "data.title", "operator": "regex", "value": "notes$" }))
        .unwrap();
    assert!(lazy.pattern.0.get().is_none());
    assert!(lazy.evaluate(&context()));
    assert!(lazy.pattern.0.get().is_some());
  }

  #[test]
  fn test_deserialize_with_aliases() {
    let condition: Condition =
      serde_json::from_value(json!({ "field": "data.word_count", "operator": ">=", "value": 3 }))
        .unwrap();
    assert_eq!(condition.operator, Operator::Gte);
    assert_eq!(condition.field, FieldPath::parse("data.word_count"));

    let back = serde_json::to_value(&condition).unwrap();
    assert_eq!(back["field"], "data.word_count");
    assert_eq!(back["operator"], "gte");
  }
}
