// Field validation for request payloads
// Rules are data: a Ruleset lists field paths and the constraints that apply to them,
// and validate() walks the payload once, collecting every violation it finds.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    Required,
    Length,
    Range,
    OneOf,
    Pattern,
    Date,
    DateOrder,
    ExactlyOne,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleKind::Required => "required",
            RuleKind::Length => "length",
            RuleKind::Range => "range",
            RuleKind::OneOf => "oneOf",
            RuleKind::Pattern => "pattern",
            RuleKind::Date => "date",
            RuleKind::DateOrder => "dateOrder",
            RuleKind::ExactlyOne => "exactlyOne",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub rule: RuleKind,
    pub message: String,
}

impl Violation {
    fn new(field: impl Into<String>, rule: RuleKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.field, self.rule, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(violations)
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(violations) => violations,
        }
    }

    /// First violation only, for callers that want fail-fast reporting.
    pub fn first(&self) -> Option<&Violation> {
        self.violations().first()
    }

    pub fn into_result(self) -> Result<(), Vec<Violation>> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(violations) => Err(violations),
        }
    }
}

// Constraints on a single field. Everything except Required passes on an absent value.
#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    // Character count for strings, element count for arrays
    Length { min: usize, max: usize },
    Range { min: f64, max: f64 },
    OneOf(Vec<String>),
    Pattern(Regex),
    // ISO-8601 date or date-time
    Date,
}

impl Rule {
    pub fn length(min: usize, max: usize) -> Self {
        Rule::Length { min, max }
    }

    pub fn range(min: f64, max: f64) -> Self {
        Rule::Range { min, max }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rule::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn pattern(regex: Regex) -> Self {
        Rule::Pattern(regex)
    }

    fn check(&self, field: &str, value: Option<&Value>) -> Option<Violation> {
        let value = match value {
            None | Some(Value::Null) => {
                return matches!(self, Rule::Required)
                    .then(|| Violation::new(field, RuleKind::Required, "field is required"));
            }
            Some(value) => value,
        };

        match self {
            Rule::Required => match value {
                Value::String(s) if s.trim().is_empty() => Some(Violation::new(
                    field,
                    RuleKind::Required,
                    "field must not be empty",
                )),
                _ => None,
            },
            Rule::Length { min, max } => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    _ => {
                        return Some(Violation::new(
                            field,
                            RuleKind::Length,
                            "expected a string or a list",
                        ))
                    }
                };
                (len < *min || len > *max).then(|| {
                    Violation::new(
                        field,
                        RuleKind::Length,
                        format!("length {} is outside {}..={}", len, min, max),
                    )
                })
            }
            Rule::Range { min, max } => match value.as_f64() {
                Some(n) if n >= *min && n <= *max => None,
                Some(n) => Some(Violation::new(
                    field,
                    RuleKind::Range,
                    format!("{} is outside {}..={}", n, min, max),
                )),
                None => Some(Violation::new(field, RuleKind::Range, "expected a number")),
            },
            Rule::OneOf(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => None,
                Some(s) => Some(Violation::new(
                    field,
                    RuleKind::OneOf,
                    format!("'{}' is not one of [{}]", s, allowed.join(", ")),
                )),
                None => Some(Violation::new(field, RuleKind::OneOf, "expected a string")),
            },
            Rule::Pattern(regex) => match value.as_str() {
                Some(s) if regex.is_match(s) => None,
                Some(s) => Some(Violation::new(
                    field,
                    RuleKind::Pattern,
                    format!("'{}' does not match {}", s, regex.as_str()),
                )),
                None => Some(Violation::new(field, RuleKind::Pattern, "expected a string")),
            },
            Rule::Date => match value.as_str().map(parse_date) {
                Some(Some(_)) => None,
                _ => Some(Violation::new(
                    field,
                    RuleKind::Date,
                    "expected an ISO-8601 date",
                )),
            },
        }
    }
}

// Rules spanning several fields. Paths here address single values, not list items.
#[derive(Debug, Clone)]
pub enum CrossRule {
    // `field` must not be earlier than `reference`
    NotBefore { field: String, reference: String },
    ExactlyOne { fields: Vec<String> },
}

impl CrossRule {
    pub fn not_before(field: impl Into<String>, reference: impl Into<String>) -> Self {
        CrossRule::NotBefore {
            field: field.into(),
            reference: reference.into(),
        }
    }

    pub fn exactly_one<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CrossRule::ExactlyOne {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn check(&self, payload: &Value) -> Option<Violation> {
        match self {
            CrossRule::NotBefore { field, reference } => {
                let end = lookup(payload, field).and_then(Value::as_str).and_then(parse_date)?;
                let begin = lookup(payload, reference)
                    .and_then(Value::as_str)
                    .and_then(parse_date)?;
                (end < begin).then(|| {
                    Violation::new(
                        field.as_str(),
                        RuleKind::DateOrder,
                        format!("must not be earlier than {}", reference),
                    )
                })
            }
            CrossRule::ExactlyOne { fields } => {
                let present = fields
                    .iter()
                    .filter(|f| !matches!(lookup(payload, f), None | Some(Value::Null)))
                    .count();
                (present != 1).then(|| {
                    Violation::new(
                        fields.join("|"),
                        RuleKind::ExactlyOne,
                        format!("exactly one of [{}] must be set, found {}", fields.join(", "), present),
                    )
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub path: String,
    pub rule: Rule,
}

#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    fields: Vec<FieldRule>,
    cross: Vec<CrossRule>,
}

impl Ruleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for a field path. Paths are dot separated, and a segment ending
    /// in `[]` applies the rest of the path to every element of that list, e.g.
    /// `comments[].text`.
    pub fn field(mut self, path: impl Into<String>, rule: Rule) -> Self {
        self.fields.push(FieldRule {
            path: path.into(),
            rule,
        });
        self
    }

    pub fn cross(mut self, rule: CrossRule) -> Self {
        self.cross.push(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.cross.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Checks `payload` against every rule in `ruleset` and reports all violations.
pub fn validate(payload: &Value, ruleset: &Ruleset) -> ValidationResult {
    let mut violations = Vec::new();

    for field_rule in &ruleset.fields {
        for (path, value) in resolve(payload, &field_rule.path) {
            if let Some(violation) = field_rule.rule.check(&path, value) {
                violations.push(violation);
            }
        }
    }

    violations.extend(ruleset.cross.iter().filter_map(|rule| rule.check(payload)));

    ValidationResult::from_violations(violations)
}

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |current, segment| current.get(segment))
}

// Expands a path into concrete (path, value) pairs, one per list element for `[]` segments.
fn resolve<'a>(payload: &'a Value, path: &str) -> Vec<(String, Option<&'a Value>)> {
    let mut resolved = vec![(String::new(), Some(payload))];

    for segment in path.split('.') {
        let (key, each) = match segment.strip_suffix("[]") {
            Some(key) => (key, true),
            None => (segment, false),
        };

        let mut next = Vec::with_capacity(resolved.len());
        for (prefix, value) in resolved {
            let joined = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", prefix, key)
            };
            let child = value.and_then(|v| v.get(key));

            if each {
                if let Some(Value::Array(items)) = child {
                    for (idx, item) in items.iter().enumerate() {
                        next.push((format!("{}[{}]", joined, idx), Some(item)));
                    }
                }
            } else {
                next.push((joined, child));
            }
        }
        resolved = next;
    }

    resolved
}
