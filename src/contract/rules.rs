use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::Record;
use crate::error::{DataError, Result};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .expect("email pattern compiles")
});

#[derive(Debug, Clone)]
enum Rule {
    Required,
    Nullable,
    String,
    Numeric,
    Integer,
    Boolean,
    Email,
    Min(f64),
    Max(f64),
    In(Vec<String>),
    Regex(Regex),
}

/// Per-field validation rules written in pipe syntax, e.g.
/// `"required|email"` or `"nullable|integer|min:18"`.
///
/// `regex:` takes the rest of the spec as its pattern, so it must come last.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    fields: Vec<(String, Vec<Rule>)>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for `field`. Unknown rule names and bad arguments are
    /// configuration errors.
    pub fn field(mut self, field: impl Into<String>, spec: &str) -> Result<Self> {
        let field = field.into();
        let rules = parse_spec(&field, spec)?;
        self.fields.push((field, rules));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check `record`, returning every failure message in field order.
    pub fn check(&self, record: &Record) -> std::result::Result<(), Vec<String>> {
        let mut failures = Vec::new();
        for (field, rules) in &self.fields {
            let value = record.get(field).unwrap_or(&Value::Null);
            check_field(field, value, rules, &mut failures);
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    /// Like [`Rules::check`], folding failures into a `Validation` error for
    /// data row `row`.
    pub fn validate(&self, record: &Record, row: u64) -> Result<()> {
        self.check(record).map_err(|failures| DataError::Validation {
            row,
            message: failures.join("; "),
        })
    }
}

fn parse_spec(field: &str, spec: &str) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();
    let mut rest = spec.trim();
    while !rest.is_empty() {
        if let Some(pattern) = rest.strip_prefix("regex:") {
            let re = Regex::new(pattern)
                .map_err(|e| DataError::config(format!("bad regex for {field}: {e}")))?;
            rules.push(Rule::Regex(re));
            break;
        }
        let (token, tail) = rest.split_once('|').unwrap_or((rest, ""));
        rest = tail.trim();
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (name, arg) = token.split_once(':').unwrap_or((token, ""));
        let rule = match name {
            "required" => Rule::Required,
            "nullable" => Rule::Nullable,
            "string" => Rule::String,
            "numeric" => Rule::Numeric,
            "integer" => Rule::Integer,
            "boolean" => Rule::Boolean,
            "email" => Rule::Email,
            "min" => Rule::Min(parse_bound(field, name, arg)?),
            "max" => Rule::Max(parse_bound(field, name, arg)?),
            "in" => Rule::In(arg.split(',').map(|s| s.trim().to_string()).collect()),
            other => {
                return Err(DataError::config(format!(
                    "unknown validation rule {other:?} for {field}"
                )))
            }
        };
        rules.push(rule);
    }
    Ok(rules)
}

fn parse_bound(field: &str, rule: &str, arg: &str) -> Result<f64> {
    arg.trim()
        .parse()
        .map_err(|_| DataError::config(format!("{rule} for {field} needs a number, got {arg:?}")))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn check_field(field: &str, value: &Value, rules: &[Rule], failures: &mut Vec<String>) {
    let required = rules.iter().any(|r| matches!(r, Rule::Required));
    if is_blank(value) {
        if required {
            failures.push(format!("The {field} field is required."));
        }
        // optional or nullable fields skip the rest when empty
        return;
    }

    // size rules compare values for numeric fields, lengths otherwise
    let numeric = rules
        .iter()
        .any(|r| matches!(r, Rule::Numeric | Rule::Integer));
    let size = |v: &Value| -> Option<f64> {
        if numeric {
            as_number(v)
        } else {
            match v {
                Value::String(s) => Some(s.chars().count() as f64),
                Value::Array(a) => Some(a.len() as f64),
                other => as_number(other),
            }
        }
    };

    for rule in rules {
        let failed = match rule {
            Rule::Required | Rule::Nullable => None,
            Rule::String => (!value.is_string()).then(|| format!("The {field} field must be a string.")),
            Rule::Numeric => as_number(value)
                .is_none()
                .then(|| format!("The {field} field must be a number.")),
            Rule::Integer => (!is_integer(value)).then(|| format!("The {field} field must be an integer.")),
            Rule::Boolean => {
                let ok = match value {
                    Value::Bool(_) => true,
                    Value::Number(n) => matches!(n.as_i64(), Some(0 | 1)),
                    Value::String(s) => matches!(s.as_str(), "0" | "1" | "true" | "false"),
                    _ => false,
                };
                (!ok).then(|| format!("The {field} field must be true or false."))
            }
            Rule::Email => {
                let ok = value.as_str().map(|s| EMAIL.is_match(s)).unwrap_or(false);
                (!ok).then(|| format!("The {field} field must be a valid email address."))
            }
            Rule::Min(min) => match size(value) {
                Some(n) if n >= *min => None,
                _ => Some(format!("The {field} field must be at least {min}.")),
            },
            Rule::Max(max) => match size(value) {
                Some(n) if n <= *max => None,
                _ => Some(format!("The {field} field must not be greater than {max}.")),
            },
            Rule::In(allowed) => {
                let t = text(value);
                (!allowed.iter().any(|a| *a == t)).then(|| format!("The selected {field} is invalid."))
            }
            Rule::Regex(re) => {
                (!re.is_match(&text(value))).then(|| format!("The {field} field format is invalid."))
            }
        };
        failures.extend(failed);
    }
}
