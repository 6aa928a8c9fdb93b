use std::fmt;

use serde_json::Value;

use super::expression::{Expression, ExpressionContext, ExpressionError};

const SEPARATOR: &str = "::";

/// A resolved destination and optional partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: String,
    pub key: Option<String>,
}

/// `<destination>::<key-expression>`, both parts being expressions.
///
/// The split happens at the first `::` outside a placeholder. A missing or
/// empty key segment means no partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTarget {
    destination: Expression,
    key: Option<Expression>,
}

impl RoutingTarget {
    pub fn parse(target: &str) -> Result<Self, ExpressionError> {
        let (destination, key) = match split_outside_placeholders(target) {
            Some(at) => (&target[..at], Some(&target[at + SEPARATOR.len()..])),
            None => (target, None),
        };

        let destination = destination.trim();
        if destination.is_empty() {
            return Err(ExpressionError::EmptyDestination(target.to_string()));
        }

        let key = key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(Expression::parse)
            .transpose()?;

        Ok(RoutingTarget {
            destination: Expression::parse(destination)?,
            key,
        })
    }

    pub fn destination(&self) -> &Expression {
        &self.destination
    }

    pub fn key(&self) -> Option<&Expression> {
        self.key.as_ref()
    }

    pub fn resolve(&self, event: &Value, context: &ExpressionContext) -> Result<Route, ExpressionError> {
        let destination = self.destination.evaluate(event, context)?;
        if destination.trim().is_empty() {
            return Err(ExpressionError::EmptyDestination(self.to_string()));
        }
        let key = self
            .key
            .as_ref()
            .map(|key| key.evaluate(event, context))
            .transpose()?;
        Ok(Route { destination, key })
    }
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}{SEPARATOR}{}", self.destination, key),
            None => write!(f, "{}", self.destination),
        }
    }
}

fn split_outside_placeholders(target: &str) -> Option<usize> {
    let bytes = target.as_bytes();
    let mut in_placeholder = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' if !in_placeholder && bytes.get(i + 1) == Some(&b'{') => {
                in_placeholder = true;
                i += 2;
                continue;
            }
            b'}' if in_placeholder => in_placeholder = false,
            b':' if !in_placeholder && bytes.get(i + 1) == Some(&b':') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}
