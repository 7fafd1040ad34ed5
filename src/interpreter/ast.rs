use std::fmt;

use super::value::{Args, FunctionRef, Predicate, Value};
use super::{InterpreterError, Result};

/// Largest integer accepted for counts and indices.
pub const MAX_COUNT: usize = u32::MAX as usize;

/// A single method-style call, `name(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Method name.
    pub name: String,
    /// Ordered arguments.
    pub args: Args,
}

/// Parameter addressed by name, optionally also by position.
///
/// `"volume_db"` only matches `volume_db=..`; `("symbol", 0)` matches
/// `symbol=..` or the first positional argument.
pub trait ParamSpec: Copy {
    /// Parameter name used in errors and for named lookup.
    fn name(&self) -> &str;
    /// Positional slot that may carry the parameter.
    fn position(&self) -> Option<usize>;
}

impl ParamSpec for &str {
    fn name(&self) -> &str {
        self
    }

    fn position(&self) -> Option<usize> {
        None
    }
}

impl ParamSpec for (&str, usize) {
    fn name(&self) -> &str {
        self.0
    }

    fn position(&self) -> Option<usize> {
        Some(self.1)
    }
}

impl Call {
    /// Construct a call.
    pub fn new(name: impl Into<String>, args: Args) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Raw lookup: named first, then the positional slot if the parameter has one.
    /// An explicit `none` counts as absent.
    pub fn param<P: ParamSpec>(&self, param: P) -> Option<&Value> {
        self.args
            .named(param.name())
            .or_else(|| param.position().and_then(|pos| self.args.positional(pos)))
            .filter(|value| !matches!(value, Value::None))
    }

    /// Whether a parameter was supplied.
    pub fn has<P: ParamSpec>(&self, param: P) -> bool {
        self.param(param).is_some()
    }

    fn typed<'a, P, T>(
        &'a self,
        param: P,
        expected: &'static str,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<Option<T>>
    where
        P: ParamSpec,
    {
        let Some(value) = self.param(param) else {
            return Ok(None);
        };
        let found = value.kind();
        extract(value)
            .map(Some)
            .ok_or_else(|| InterpreterError::TypeMismatch {
                call: self.name.clone(),
                param: param.name().to_string(),
                expected,
                found,
            })
    }

    fn required<P: ParamSpec, T>(&self, param: P, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| InterpreterError::MissingArgument {
            call: self.name.clone(),
            param: param.name().to_string(),
        })
    }

    /// Optional string parameter.
    pub fn opt_string<P: ParamSpec>(&self, param: P) -> Result<Option<&str>> {
        self.typed(param, "string", Value::as_str)
    }

    /// Required string parameter.
    pub fn string<P: ParamSpec>(&self, param: P) -> Result<&str> {
        let value = self.opt_string(param)?;
        self.required(param, value)
    }

    /// Optional number parameter.
    pub fn opt_number<P: ParamSpec>(&self, param: P) -> Result<Option<f64>> {
        self.typed(param, "number", Value::as_number)
    }

    /// Required number parameter.
    pub fn number<P: ParamSpec>(&self, param: P) -> Result<f64> {
        let value = self.opt_number(param)?;
        self.required(param, value)
    }

    /// Optional boolean parameter.
    pub fn opt_bool<P: ParamSpec>(&self, param: P) -> Result<Option<bool>> {
        self.typed(param, "bool", Value::as_bool)
    }

    /// Required boolean parameter.
    pub fn bool<P: ParamSpec>(&self, param: P) -> Result<bool> {
        let value = self.opt_bool(param)?;
        self.required(param, value)
    }

    /// Optional array parameter.
    pub fn opt_array<P: ParamSpec>(&self, param: P) -> Result<Option<&[Value]>> {
        self.typed(param, "array", |value| match value {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        })
    }

    /// Required array parameter.
    pub fn array<P: ParamSpec>(&self, param: P) -> Result<&[Value]> {
        let value = self.opt_array(param)?;
        self.required(param, value)
    }

    /// Required function-reference parameter.
    pub fn function<P: ParamSpec>(&self, param: P) -> Result<&FunctionRef> {
        let value = self.typed(param, "function", |value| match value {
            Value::Function(func) => Some(func),
            _ => None,
        })?;
        self.required(param, value)
    }

    /// Required predicate parameter.
    pub fn predicate<P: ParamSpec>(&self, param: P) -> Result<&Predicate> {
        let value = self.typed(param, "predicate", |value| match value {
            Value::Predicate(pred) => Some(pred),
            _ => None,
        })?;
        self.required(param, value)
    }

    /// Optional non-negative integer parameter (indices, counts, bars).
    pub fn opt_count<P: ParamSpec>(&self, param: P) -> Result<Option<usize>> {
        let Some(num) = self.opt_number(param)? else {
            return Ok(None);
        };
        if num < 0.0 || num.fract() != 0.0 {
            return Err(self.invalid(param.name(), format!("expected a non-negative integer, got {num}")));
        }
        if num > MAX_COUNT as f64 {
            return Err(self.invalid(param.name(), format!("{num} is above {MAX_COUNT}")));
        }
        Ok(Some(num as usize))
    }

    /// Required non-negative integer parameter.
    pub fn count<P: ParamSpec>(&self, param: P) -> Result<usize> {
        let value = self.opt_count(param)?;
        self.required(param, value)
    }

    /// Build an [`InterpreterError::InvalidArgument`] for this call.
    pub fn invalid(&self, param: &str, reason: impl Into<String>) -> InterpreterError {
        InterpreterError::InvalidArgument {
            call: self.name.clone(),
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args)
    }
}

impl FunctionRef {
    /// View the reference as a call; a bare `@name` becomes a call with no arguments.
    pub fn to_call(&self) -> Call {
        Call::new(self.name.clone(), self.args.clone().unwrap_or_default())
    }
}

/// One top-level statement: a non-empty chain of calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Calls in chain order.
    pub calls: Vec<Call>,
}

/// A parsed DSL program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Statements in source order.
    pub statements: Vec<Statement>,
}

impl Program {
    /// Total number of calls across all statements.
    pub fn call_count(&self) -> usize {
        self.statements.iter().map(|stmt| stmt.calls.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Args) -> Call {
        Call::new("set_volume", args)
    }

    #[test]
    fn named_parameter_wins_over_positional() {
        let mut args = Args::new();
        args.push_positional(Value::from("Am"));
        args.push_named("symbol", Value::from("Em"));
        let call = Call::new("arpeggio", args);
        assert_eq!(call.string(("symbol", 0)).expect("symbol"), "Em");
    }

    #[test]
    fn wrong_kind_is_a_type_mismatch() {
        let call = call(Args::new().with("volume_db", "loud"));
        match call.number("volume_db") {
            Err(InterpreterError::TypeMismatch {
                param,
                expected,
                found,
                ..
            }) => {
                assert_eq!(param, "volume_db");
                assert_eq!(expected, "number");
                assert_eq!(found, "string");
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_parameter() {
        let call = call(Args::new());
        assert!(matches!(
            call.number("volume_db"),
            Err(InterpreterError::MissingArgument { .. })
        ));
    }

    #[test]
    fn counts_reject_fractions() {
        let call = Call::new("new_clip", Args::new().with("bar", 2.5));
        assert!(matches!(
            call.count("bar"),
            Err(InterpreterError::InvalidArgument { .. })
        ));
    }
}
