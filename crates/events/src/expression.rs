//! A small expression language for failure filters and acknowledgement values.
//!
//! Expressions are written either bare (`exception-type:`) or enclosed in `#[...]`.
//! Supported terms:
//!
//! | term | value |
//! |---|---|
//! | `exception-type:` | `true` when the event carries an exception payload |
//! | `exception-type:NAME` | `true` when the attached exception type is `NAME` |
//! | `payload` | the payload as text |
//! | `id` / `flow` | the event id / owning flow |
//! | `attempt-count` | the process attempt count (absent counts as 1) |
//! | `property:NAME` | an extension property, `null` when missing |
//! | `string:TEXT` | the literal `TEXT` |
//!
//! Any term can be compared with a quoted literal: `payload == 'ok'`,
//! `property:status != 'done'`.
//!
//! Evaluation never fails: a missing value is `null`, and `null` is falsy.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ExpressionError;
use crate::event::MessageEvent;
use crate::payload::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    HasException(Option<String>),
    Payload,
    Id,
    Flow,
    AttemptCount,
    Property(String),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
}

type Predicate = Arc<dyn Fn(&MessageEvent) -> bool + Send + Sync>;

#[derive(Clone)]
enum Kind {
    Term(Term),
    Compare(Term, Comparison, String),
    Custom(Predicate),
}

/// A parsed expression.
#[derive(Clone)]
pub struct Expression {
    source: String,
    kind: Kind,
}

impl Expression {
    /// Parse an expression written bare or enclosed in `#[...]`.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let trimmed = text.trim();
        let body = unwrap_delimiters(trimmed).unwrap_or(trimmed);
        Ok(Self {
            source: trimmed.to_string(),
            kind: parse_body(body)?,
        })
    }

    /// Parse an expression that must be enclosed in `#[...]`.
    pub fn parse_wrapped(text: &str) -> Result<Self, ExpressionError> {
        let trimmed = text.trim();
        let body = unwrap_delimiters(trimmed)
            .ok_or_else(|| ExpressionError::NotWrapped(trimmed.to_string()))?;
        Ok(Self {
            source: trimmed.to_string(),
            kind: parse_body(body)?,
        })
    }

    /// Expression backed by Rust code instead of text.
    pub fn predicate<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MessageEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            source: name.into(),
            kind: Kind::Custom(Arc::new(predicate)),
        }
    }

    /// "The event carries an exception payload". The default failure condition.
    pub fn has_exception() -> Self {
        Self {
            source: "exception-type:".to_string(),
            kind: Kind::Term(Term::HasException(None)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, event: &MessageEvent) -> Value {
        match &self.kind {
            Kind::Term(term) => term.evaluate(event),
            Kind::Compare(term, op, literal) => {
                let equal = as_comparable(&term.evaluate(event)) == *literal;
                Value::Bool(match op {
                    Comparison::Eq => equal,
                    Comparison::Ne => !equal,
                })
            }
            Kind::Custom(predicate) => Value::Bool(predicate(event)),
        }
    }

    /// Evaluate as a boolean filter.
    pub fn matches(&self, event: &MessageEvent) -> bool {
        is_truthy(&self.evaluate(event))
    }

    /// Evaluate into a payload, e.g. for an acknowledgement message.
    pub fn evaluate_payload(&self, event: &MessageEvent) -> Payload {
        match self.evaluate(event) {
            Value::Null => Payload::Empty,
            Value::String(s) => Payload::Text(s),
            other => Payload::Json(other),
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Term {
    fn parse(text: &str) -> Result<Self, ExpressionError> {
        let text = text.trim();
        if let Some(name) = text.strip_prefix("exception-type:") {
            let name = name.trim();
            return Ok(Self::HasException(
                (!name.is_empty()).then(|| name.to_string()),
            ));
        }
        if let Some(name) = text.strip_prefix("property:") {
            let name = name.trim();
            if name.is_empty() {
                return Err(ExpressionError::UnknownTerm(text.to_string()));
            }
            return Ok(Self::Property(name.to_string()));
        }
        if let Some(literal) = text.strip_prefix("string:") {
            return Ok(Self::Literal(literal.to_string()));
        }
        match text {
            "payload" => Ok(Self::Payload),
            "id" => Ok(Self::Id),
            "flow" => Ok(Self::Flow),
            "attempt-count" => Ok(Self::AttemptCount),
            _ => Err(ExpressionError::UnknownTerm(text.to_string())),
        }
    }

    fn evaluate(&self, event: &MessageEvent) -> Value {
        match self {
            Self::HasException(None) => Value::Bool(event.exception_payload().is_some()),
            Self::HasException(Some(name)) => Value::Bool(
                event
                    .exception_payload()
                    .is_some_and(|e| &e.exception_type == name),
            ),
            Self::Payload => event
                .payload()
                .as_text()
                .map(|text| Value::String(text.into_owned()))
                .unwrap_or(Value::Null),
            Self::Id => Value::String(event.id().to_string()),
            Self::Flow => Value::String(event.flow().to_string()),
            Self::AttemptCount => Value::from(event.process_attempt_count().unwrap_or(1)),
            Self::Property(name) => event.property(name).cloned().unwrap_or(Value::Null),
            Self::Literal(text) => Value::String(text.clone()),
        }
    }
}

fn unwrap_delimiters(text: &str) -> Option<&str> {
    text.strip_prefix("#[")?.strip_suffix(']')
}

fn parse_body(body: &str) -> Result<Kind, ExpressionError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ExpressionError::Empty);
    }

    // `string:` literals may contain operators themselves.
    if body.starts_with("string:") {
        return Ok(Kind::Term(Term::parse(body)?));
    }

    if let Some((at, op)) = find_operator(body) {
        let (lhs, rhs) = (&body[..at], &body[at + 2..]);
        let literal = parse_quoted(rhs)
            .ok_or_else(|| ExpressionError::MalformedComparison(body.to_string()))?;
        return Ok(Kind::Compare(Term::parse(lhs)?, op, literal));
    }

    Ok(Kind::Term(Term::parse(body)?))
}

/// Byte offset of the first `==` or `!=` outside a quoted literal.
fn find_operator(body: &str) -> Option<(usize, Comparison)> {
    let bytes = body.as_bytes();
    let mut quoted = false;
    for (i, pair) in bytes.windows(2).enumerate() {
        match pair {
            [b'\'', _] => quoted = !quoted,
            [b'=', b'='] if !quoted => return Some((i, Comparison::Eq)),
            [b'!', b'='] if !quoted => return Some((i, Comparison::Ne)),
            _ => {}
        }
    }
    None
}

fn parse_quoted(text: &str) -> Option<String> {
    let text = text.trim();
    text.strip_prefix('\'')?
        .strip_suffix('\'')
        .map(str::to_string)
}

fn as_comparable(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ExceptionPayload;
    use relaybus_core::{EventId, FlowName};

    fn event(payload: &str) -> MessageEvent {
        MessageEvent::with_id(
            EventId::parse("evt-1").unwrap(),
            FlowName::parse("orders").unwrap(),
            payload,
        )
    }

    #[test]
    fn has_exception_is_the_default_failure_condition() {
        let expr = Expression::has_exception();
        assert!(!expr.matches(&event("ok")));
        assert!(expr.matches(
            &event("ok").with_exception_payload(ExceptionPayload::new("Timeout", "slow"))
        ));
    }

    #[test]
    fn exception_type_can_be_narrowed() {
        let expr = Expression::parse("#[exception-type:Timeout]").unwrap();
        let timeout = event("x").with_exception_payload(ExceptionPayload::new("Timeout", ""));
        let refused = event("x").with_exception_payload(ExceptionPayload::new("Refused", ""));

        assert!(expr.matches(&timeout));
        assert!(!expr.matches(&refused));
        assert!(!expr.matches(&event("x")));
    }

    #[test]
    fn comparisons_against_literals() {
        let eq = Expression::parse("payload == 'retry'").unwrap();
        let ne = Expression::parse("#[property:status != 'done']").unwrap();

        assert!(eq.matches(&event("retry")));
        assert!(!eq.matches(&event("fine")));

        assert!(ne.matches(&event("x")));
        assert!(!ne.matches(&event("x").with_property("status", "done")));
    }

    #[test]
    fn operators_inside_literals_are_not_split() {
        let ne = Expression::parse("payload != 'a==b'").unwrap();
        assert!(ne.matches(&event("x")));
        assert!(!ne.matches(&event("a==b")));

        let eq = Expression::parse("#[payload == 'x != y']").unwrap();
        assert!(eq.matches(&event("x != y")));
    }

    #[test]
    fn ack_values() {
        let literal = Expression::parse_wrapped("#[string:accepted]").unwrap();
        assert_eq!(literal.evaluate_payload(&event("x")), Payload::text("accepted"));

        let id = Expression::parse_wrapped("#[id]").unwrap();
        assert_eq!(id.evaluate_payload(&event("x")), Payload::text("evt-1"));

        let count = Expression::parse_wrapped("#[attempt-count]").unwrap();
        assert_eq!(
            count.evaluate_payload(&event("x")),
            Payload::Json(serde_json::json!(1))
        );
    }

    #[test]
    fn wrapped_form_is_enforced_when_requested() {
        assert_eq!(
            Expression::parse_wrapped("payload").unwrap_err(),
            ExpressionError::NotWrapped("payload".to_string())
        );
        assert!(Expression::parse("payload").is_ok());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert_eq!(Expression::parse("#[]").unwrap_err(), ExpressionError::Empty);
        assert!(matches!(
            Expression::parse("#[nonsense]"),
            Err(ExpressionError::UnknownTerm(_))
        ));
        assert!(matches!(
            Expression::parse("payload == unquoted"),
            Err(ExpressionError::MalformedComparison(_))
        ));
    }

    #[test]
    fn custom_predicates() {
        let expr = Expression::predicate("long-payload", |ev| {
            ev.payload().as_text().is_some_and(|t| t.len() > 3)
        });
        assert!(expr.matches(&event("longer")));
        assert!(!expr.matches(&event("no")));
        assert_eq!(expr.source(), "long-payload");
    }
}
