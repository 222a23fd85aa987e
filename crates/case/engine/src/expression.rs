//! Expression evaluation for sentry if-parts and repetition conditions
//!
//! The engine only needs a boolean predicate over case variables. The
//! [`ExpressionEvaluator`] trait is the seam; [`SimpleExpressionEvaluator`]
//! covers the comparisons case models use in practice. It is a pure
//! function and never mutates variables.

use case_types::ExpressionError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Case variables as seen by an evaluator
pub type Variables = BTreeMap<String, Value>;

/// Boolean predicate evaluator over case variables
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, variables: &Variables) -> Result<bool, ExpressionError>;
}

/// Evaluates `${...}`-wrapped or bare expressions of the form:
///
/// - `flag`, `!flag`, `true`, `false`
/// - `name == value`, `name != value`
/// - `name >= n`, `name <= n`, `name > n`, `name < n` (numeric)
/// - clauses joined by `&&` and `||` (no parentheses, `&&` binds tighter)
///
/// Missing variables are falsy; `!=` against a missing variable holds.
#[derive(Clone, Debug)]
pub struct SimpleExpressionEvaluator;

impl SimpleExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn unwrap_expression(expression: &str) -> Result<&str, ExpressionError> {
        let trimmed = expression.trim();
        let inner = if let Some(rest) = trimmed.strip_prefix("${") {
            rest.strip_suffix('}').ok_or_else(|| ExpressionError::Syntax {
                expression: expression.to_string(),
                reason: "unterminated '${'".into(),
            })?
        } else {
            trimmed
        };
        let inner = inner.trim();
        if inner.is_empty() {
            return Err(ExpressionError::Empty);
        }
        Ok(inner)
    }

    fn evaluate_clause(&self, clause: &str, variables: &Variables) -> Result<bool, ExpressionError> {
        let clause = clause.trim();
        if clause.is_empty() {
            return Err(ExpressionError::Syntax {
                expression: clause.to_string(),
                reason: "empty clause".into(),
            });
        }

        if let Some((key, value)) = clause.split_once("==") {
            let key = Self::identifier(key, clause)?;
            return Ok(match variables.get(key) {
                Some(actual) => Self::equals(actual, value.trim()),
                None => false,
            });
        }

        if let Some((key, value)) = clause.split_once("!=") {
            let key = Self::identifier(key, clause)?;
            return Ok(match variables.get(key) {
                Some(actual) => !Self::equals(actual, value.trim()),
                // Variable not found: inequality is trivially true
                None => true,
            });
        }

        for op in [">=", "<=", ">", "<"] {
            if let Some((key, value)) = clause.split_once(op) {
                let key = Self::identifier(key, clause)?;
                let threshold = value.trim().parse::<f64>().map_err(|_| ExpressionError::Syntax {
                    expression: clause.to_string(),
                    reason: format!("'{}' is not a number", value.trim()),
                })?;
                let Some(actual) = variables.get(key) else {
                    return Ok(false);
                };
                let actual = Self::as_number(actual).ok_or_else(|| ExpressionError::TypeMismatch {
                    expression: clause.to_string(),
                    variable: key.to_string(),
                })?;
                return Ok(match op {
                    ">=" => actual >= threshold,
                    "<=" => actual <= threshold,
                    ">" => actual > threshold,
                    _ => actual < threshold,
                });
            }
        }

        match clause {
            "true" => return Ok(true),
            "false" => return Ok(false),
            _ => {}
        }

        if let Some(negated) = clause.strip_prefix('!') {
            return Ok(!self.evaluate_clause(negated, variables)?);
        }

        let key = Self::identifier(clause, clause)?;
        match variables.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => Ok(s == "true" || s == "1"),
            Some(Value::Number(n)) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
            Some(_) => Err(ExpressionError::TypeMismatch {
                expression: clause.to_string(),
                variable: key.to_string(),
            }),
        }
    }

    fn identifier<'a>(raw: &'a str, clause: &str) -> Result<&'a str, ExpressionError> {
        let name = raw.trim();
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
            Ok(name)
        } else {
            Err(ExpressionError::Syntax {
                expression: clause.to_string(),
                reason: format!("'{}' is not a variable name", name),
            })
        }
    }

    fn equals(actual: &Value, literal: &str) -> bool {
        let literal = literal.trim_matches('"').trim_matches('\'');
        let actual_text = match actual {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if actual_text == literal {
            return true;
        }
        match (actual_text.parse::<f64>(), literal.parse::<f64>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }
}

impl ExpressionEvaluator for SimpleExpressionEvaluator {
    fn evaluate(&self, expression: &str, variables: &Variables) -> Result<bool, ExpressionError> {
        let inner = Self::unwrap_expression(expression)?;
        for alternative in inner.split("||") {
            let mut all = true;
            for clause in alternative.split("&&") {
                if !self.evaluate_clause(clause, variables)? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Default for SimpleExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
