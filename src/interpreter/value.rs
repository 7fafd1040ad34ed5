use std::cmp::Ordering;
use std::fmt;

use serde_json::Value as JsonValue;

/// Argument and property value produced by the call-chain parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String literal or bare identifier (`"Piano"`, `kick`, `tracks`).
    String(String),
    /// Numeric literal; integers are represented exactly.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// Ordered array of values.
    Array(Vec<Value>),
    /// Function reference or nested call (`@name`, `pattern(..)`, `track.set_mute(..)`).
    Function(FunctionRef),
    /// Structured comparison (`track.muted == true`).
    Predicate(Predicate),
    /// Explicit absence (`none` / `null`).
    None,
}

impl Value {
    /// Short name of the value kind, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Array(_) => "array",
            Value::Function(_) => "function",
            Value::Predicate(_) => "predicate",
            Value::None => "none",
        }
    }

    /// Borrow the string contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric contents.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(num) => Some(*num),
            _ => None,
        }
    }

    /// Boolean contents.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Convert into JSON for action fields. Function and predicate values
    /// render as their source text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::String(text) => JsonValue::String(text.clone()),
            Value::Number(num) => number_to_json(*num),
            Value::Bool(flag) => JsonValue::Bool(*flag),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Function(func) => JsonValue::String(func.to_string()),
            Value::Predicate(pred) => JsonValue::String(pred.to_string()),
            Value::None => JsonValue::Null,
        }
    }

    /// Convert a JSON value from a snapshot into an entity property.
    /// Objects have no property representation and become [`Value::None`].
    pub fn from_json(value: &JsonValue) -> Value {
        match value {
            JsonValue::Null | JsonValue::Object(_) => Value::None,
            JsonValue::Bool(flag) => Value::Bool(*flag),
            JsonValue::Number(num) => num.as_f64().map(Value::Number).unwrap_or(Value::None),
            JsonValue::String(text) => Value::String(text.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
        }
    }
}

/// Integral numbers serialize as JSON integers so executors see `3`, not `3.0`.
pub(crate) fn number_to_json(num: f64) -> JsonValue {
    if num.fract() == 0.0 && num.is_finite() && num.abs() < 9.0e15 {
        JsonValue::from(num as i64)
    } else {
        serde_json::Number::from_f64(num)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Value::Number(num)
    }
}

impl From<usize> for Value {
    fn from(num: usize) -> Self {
        Value::Number(num as f64)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

/// Parameter key of a call argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKey {
    /// `name=value`
    Named(String),
    /// Unnamed argument; its position among the positional arguments is its identity.
    Positional,
}

/// Ordered argument list of a call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
    entries: Vec<(ParamKey, Value)>,
}

impl Args {
    /// Empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named argument.
    pub fn push_named(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((ParamKey::Named(name.into()), value));
    }

    /// Append a positional argument.
    pub fn push_positional(&mut self, value: Value) {
        self.entries.push((ParamKey::Positional, value));
    }

    /// Builder-style named argument.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_named(name, value.into());
        self
    }

    /// Look up a named argument.
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find_map(|(key, value)| match key {
            ParamKey::Named(key) if key == name => Some(value),
            _ => None,
        })
    }

    /// Look up the `n`th positional argument.
    pub fn positional(&self, n: usize) -> Option<&Value> {
        self.entries
            .iter()
            .filter(|(key, _)| *key == ParamKey::Positional)
            .map(|(_, value)| value)
            .nth(n)
    }

    /// Iterate over all entries in source order.
    pub fn iter(&self) -> impl Iterator<Item = &(ParamKey, Value)> {
        self.entries.iter()
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            if let ParamKey::Named(name) = key {
                write!(f, "{name}=")?;
            }
            write!(f, "{}", value.to_json())?;
        }
        Ok(())
    }
}

/// Reference to a callable: `@name`, a nested call `name(..)`, or a
/// receiver call `item.name(..)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRef {
    /// Method name.
    pub name: String,
    /// Receiver variable for `item.method(..)` forms.
    pub receiver: Option<String>,
    /// Bound arguments; `None` for a bare `@name` reference.
    pub args: Option<Args>,
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.receiver, &self.args) {
            (_, None) => write!(f, "@{}", self.name),
            (Some(receiver), Some(args)) => write!(f, "{receiver}.{}({args})", self.name),
            (None, Some(args)) => write!(f, "{}({args})", self.name),
        }
    }
}

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Source token of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        }
    }

    /// Whether the operator needs an ordering rather than equality.
    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Scalar right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// String literal.
    String(String),
    /// Number literal.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(text) => write!(f, "{text:?}"),
            Literal::Number(num) => write!(f, "{}", number_to_json(*num)),
            Literal::Bool(flag) => write!(f, "{flag}"),
        }
    }
}

/// Property path on the left-hand side of a predicate (`track.fx[0]`).
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPath {
    /// Iteration variable the path is rooted at; `None` for a bare property.
    pub variable: Option<String>,
    /// Property name.
    pub property: String,
    /// Optional element index into an array property.
    pub index: Option<usize>,
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(variable) = &self.variable {
            write!(f, "{variable}.")?;
        }
        f.write_str(&self.property)?;
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

/// Structured predicate `{property, operator, literal}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Property being tested.
    pub path: PropertyPath,
    /// Comparison operator.
    pub op: CompareOp,
    /// Literal compared against.
    pub literal: Literal,
}

impl Predicate {
    /// Compare an entity property against the literal.
    ///
    /// Strings compare lexicographically and numbers numerically. Booleans
    /// only support equality. A property whose kind differs from the
    /// literal's never matches.
    pub fn test(&self, property: &Value) -> bool {
        let ordering = match (property, &self.literal) {
            (Value::String(left), Literal::String(right)) => left.as_str().cmp(right.as_str()),
            (Value::Number(left), Literal::Number(right)) => match left.partial_cmp(right) {
                Some(ordering) => ordering,
                None => return false,
            },
            (Value::Bool(left), Literal::Bool(right)) => {
                if self.op.is_ordering() {
                    return false;
                }
                left.cmp(right)
            }
            _ => return false,
        };
        self.op.holds(ordering)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.op.symbol(), self.literal)
    }
}
