//! Declarative shape checks for untrusted request input.
//!
//! A [`Schema`] is either a constraint list applied to a scalar (path parameters) or an
//! ordered list of field rules applied to a JSON object (request bodies). Validation is
//! pure: it never mutates the input and reports one message per violated constraint in
//! declaration order.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

const ROOT: &str = "instance";

pub const TITLE_MAX_LENGTH: usize = 100;
pub const DESCRIPTION_MAX_LENGTH: usize = 255;
pub const NAME_MAX_LENGTH: usize = 100;
pub const HOUSE_NUMBER_MAX_LENGTH: usize = 5;

/// JSON value kinds a constraint can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Object,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Integer => value.is_i64() || value.is_u64() || is_whole_float(value),
            ValueKind::Object => value.is_object(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Object => "object",
        }
    }
}

/// JSON numbers such as `1.0` count as integers.
fn is_whole_float(value: &Value) -> bool {
    value
        .as_f64()
        .is_some_and(|number| number.is_finite() && number.fract() == 0.0)
}

/// Single rule checked against a value. A failing `Kind` check short-circuits the
/// remaining constraints of the same value.
#[derive(Debug, Clone)]
pub enum Constraint {
    Kind(ValueKind),
    MinLength(usize),
    MaxLength(usize),
    Minimum(i64),
    Pattern(&'static Regex),
    /// Calendar date written as `YYYY-MM-DD`.
    Date,
}

impl Constraint {
    fn check(&self, value: &Value, path: &str) -> Option<String> {
        match self {
            Constraint::Kind(kind) => (!kind.matches(value))
                .then(|| format!("{path} is not of a type(s) {}", kind.label())),
            Constraint::MinLength(min) => value
                .as_str()
                .filter(|text| text.chars().count() < *min)
                .map(|_| format!("{path} does not meet minimum length of {min}")),
            Constraint::MaxLength(max) => value
                .as_str()
                .filter(|text| text.chars().count() > *max)
                .map(|_| format!("{path} does not meet maximum length of {max}")),
            Constraint::Minimum(min) => value
                .as_f64()
                .filter(|number| *number < *min as f64)
                .map(|_| format!("{path} must be greater than or equal to {min}")),
            Constraint::Pattern(pattern) => value
                .as_str()
                .filter(|text| !pattern.is_match(text))
                .map(|_| format!("{path} does not match pattern \"{}\"", pattern.as_str())),
            Constraint::Date => value
                .as_str()
                .filter(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").is_err())
                .map(|_| format!("{path} does not conform to the \"date\" format")),
        }
    }
}

/// Constraints attached to one property of an object schema.
#[derive(Debug, Clone)]
pub struct FieldRule {
    name: &'static str,
    required: bool,
    constraints: Vec<Constraint>,
}

impl FieldRule {
    pub fn required(name: &'static str, constraints: Vec<Constraint>) -> Self {
        Self {
            name,
            required: true,
            constraints,
        }
    }

    /// Optional fields also accept an explicit `null`.
    pub fn optional(name: &'static str, constraints: Vec<Constraint>) -> Self {
        Self {
            name,
            required: false,
            constraints,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Clone)]
pub enum Schema {
    Scalar(Vec<Constraint>),
    Object(Vec<FieldRule>),
}

/// Violations collected for a rejected input, in constraint declaration order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("input failed validation: {}", .messages.join("; "))]
pub struct ValidationErrors {
    messages: Vec<String>,
}

impl ValidationErrors {
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}

pub fn validate(input: &Value, schema: &Schema) -> Result<(), ValidationErrors> {
    let mut messages = Vec::new();

    match schema {
        Schema::Scalar(constraints) => check_value(input, ROOT, constraints, &mut messages),
        Schema::Object(fields) => {
            let Some(object) = input.as_object() else {
                return Err(ValidationErrors::single(format!(
                    "{ROOT} is not of a type(s) {}",
                    ValueKind::Object.label()
                )));
            };

            for field in fields {
                let path = format!("{ROOT}.{}", field.name);
                match object.get(field.name) {
                    None | Some(Value::Null) if field.required => {
                        messages.push(format!("{ROOT} requires property \"{}\"", field.name));
                    }
                    None | Some(Value::Null) => {}
                    Some(value) => check_value(value, &path, &field.constraints, &mut messages),
                }
            }
        }
    }

    if messages.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors { messages })
    }
}

fn check_value(value: &Value, path: &str, constraints: &[Constraint], messages: &mut Vec<String>) {
    for constraint in constraints {
        if let Some(message) = constraint.check(value, path) {
            messages.push(message);
            if matches!(constraint, Constraint::Kind(_)) {
                return;
            }
        }
    }
}

fn positive_integer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[1-9]\d*$").expect("positive integer pattern compiles"))
}

fn city_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{5}$").expect("postal code pattern compiles"))
}

fn bounded_text_rule(name: &'static str, max: usize) -> FieldRule {
    FieldRule::optional(
        name,
        vec![
            Constraint::Kind(ValueKind::String),
            Constraint::MinLength(1),
            Constraint::MaxLength(max),
        ],
    )
}

fn description_rule() -> FieldRule {
    FieldRule::optional(
        "description",
        vec![
            Constraint::Kind(ValueKind::String),
            Constraint::MaxLength(DESCRIPTION_MAX_LENGTH),
        ],
    )
}

fn positive_integer_rule(name: &'static str) -> FieldRule {
    FieldRule::required(
        name,
        vec![Constraint::Kind(ValueKind::Integer), Constraint::Minimum(1)],
    )
}

/// Body of a permit creation request.
pub fn new_permit_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::Object(vec![
            FieldRule::required(
                "title",
                vec![
                    Constraint::Kind(ValueKind::String),
                    Constraint::MinLength(1),
                    Constraint::MaxLength(TITLE_MAX_LENGTH),
                ],
            ),
            description_rule(),
        ])
    })
}

/// Body of a permit update; same shape as creation.
pub fn update_permit_schema() -> &'static Schema {
    new_permit_schema()
}

/// Identifier taken from a URL path: a positive integer without leading zeroes.
pub fn path_id_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::Scalar(vec![
            Constraint::Kind(ValueKind::String),
            Constraint::Pattern(positive_integer_pattern()),
        ])
    })
}

pub fn new_permit_request_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::Object(vec![
            positive_integer_rule("permit_id"),
            positive_integer_rule("citizen_id"),
            description_rule(),
        ])
    })
}

/// Body of a general citizen request: who is asking, why, and where they live.
pub fn new_citizen_request_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::Object(vec![
            positive_integer_rule("citizen_id"),
            FieldRule::optional(
                "reason",
                vec![
                    Constraint::Kind(ValueKind::String),
                    Constraint::MaxLength(DESCRIPTION_MAX_LENGTH),
                ],
            ),
            bounded_text_rule("firstname", NAME_MAX_LENGTH),
            bounded_text_rule("lastname", NAME_MAX_LENGTH),
            bounded_text_rule("street", NAME_MAX_LENGTH),
            bounded_text_rule("house_number", HOUSE_NUMBER_MAX_LENGTH),
            FieldRule::optional(
                "city_code",
                vec![
                    Constraint::Kind(ValueKind::String),
                    Constraint::MinLength(1),
                    Constraint::Pattern(city_code_pattern()),
                ],
            ),
            bounded_text_rule("city", NAME_MAX_LENGTH),
        ])
    })
}

pub fn approval_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        Schema::Object(vec![FieldRule::optional(
            "valid_until",
            vec![Constraint::Kind(ValueKind::String), Constraint::Date],
        )])
    })
}

/// Validate a raw path segment and convert it into a numeric identifier.
pub fn parse_path_id(raw: &str) -> Result<u64, ValidationErrors> {
    validate(&Value::String(raw.to_string()), path_id_schema())?;
    raw.parse::<u64>()
        .map_err(|_| ValidationErrors::single(format!("{ROOT} is out of range")))
}
