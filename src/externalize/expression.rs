use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

const OPEN: &str = "#{";
const CLOSE: char = '}';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("unterminated placeholder in `{0}`")]
    Unterminated(String),
    #[error("empty placeholder in `{0}`")]
    EmptyPlaceholder(String),
    /// Placeholders must start with `event` or `@component`.
    #[error("placeholder `{0}` must reference `event` or an `@component`")]
    UnknownRoot(String),
    #[error("no component named `{0}`")]
    UnknownComponent(String),
    #[error("`{0}` resolved to nothing")]
    Missing(String),
    #[error("`{0}` did not resolve to a scalar value")]
    NotScalar(String),
    #[error("routing target `{0}` has no destination")]
    EmptyDestination(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Root {
    Event,
    Component(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    text: String,
    root: Root,
    path: Vec<String>,
}

impl Reference {
    fn parse(text: &str) -> Result<Self, ExpressionError> {
        let mut parts = text.split('.').map(str::trim);
        let head = parts.next().unwrap_or_default();
        let path: Vec<String> = parts.map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(ExpressionError::EmptyPlaceholder(text.to_string()));
        }

        let root = match head.strip_prefix('@') {
            Some(name) if !name.is_empty() => Root::Component(name.to_string()),
            Some(_) => return Err(ExpressionError::UnknownRoot(text.to_string())),
            None if head == "event" => Root::Event,
            None => return Err(ExpressionError::UnknownRoot(text.to_string())),
        };

        Ok(Reference {
            text: text.to_string(),
            root,
            path,
        })
    }

    fn render(&self, event: &Value, context: &ExpressionContext) -> Result<String, ExpressionError> {
        let computed;
        let base = match &self.root {
            Root::Event => event,
            Root::Component(name) => {
                let component = context
                    .components
                    .get(name)
                    .ok_or_else(|| ExpressionError::UnknownComponent(name.clone()))?;
                computed = component(event);
                &computed
            }
        };

        let value = self
            .path
            .iter()
            .try_fold(base, |value, segment| step(value, segment))
            .ok_or_else(|| ExpressionError::Missing(self.text.clone()))?;

        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Err(ExpressionError::Missing(self.text.clone())),
            Value::Array(_) | Value::Object(_) => Err(ExpressionError::NotScalar(self.text.clone())),
        }
    }
}

fn step<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Reference),
}

/// A template of literal text and `#{...}` placeholders.
///
/// `#{event.customer.id}` walks the event's JSON form. `#{@tenant}` calls the
/// ambient component named `tenant`, and `#{@tenant.region}` walks into its
/// result. Array elements are addressed by index (`#{event.lines.0.sku}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    segments: Vec<Segment>,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + OPEN.len()..];
            let end = after
                .find(CLOSE)
                .ok_or_else(|| ExpressionError::Unterminated(source.to_string()))?;
            let inner = after[..end].trim();
            if inner.is_empty() {
                return Err(ExpressionError::EmptyPlaceholder(source.to_string()));
            }
            segments.push(Segment::Placeholder(Reference::parse(inner)?));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Expression {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    pub fn evaluate(&self, event: &Value, context: &ExpressionContext) -> Result<String, ExpressionError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(reference) => out.push_str(&reference.render(event, context)?),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

type Component = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Named ambient components available to `#{@name}` placeholders.
#[derive(Clone, Default)]
pub struct ExpressionContext {
    components: HashMap<String, Component>,
}

impl ExpressionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component computed from the event's JSON form.
    pub fn with_component<F>(mut self, name: impl Into<String>, component: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.components.insert(name.into(), Arc::new(component));
        self
    }

    /// Register a component that always yields `value`.
    pub fn with_value(self, name: impl Into<String>, value: Value) -> Self {
        self.with_component(name, move |_| value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }
}

impl fmt::Debug for ExpressionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionContext")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish()
    }
}
