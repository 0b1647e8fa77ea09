use crate::config::ExecuteConfig;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("user expression `{name}` must be a string, got {found}")]
    NonStringExpression { name: String, found: String },
}

/// Content of an `execute_request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    code: String,
    silent: bool,
    store_history: bool,
    user_expressions: BTreeMap<String, String>,
    allow_stdin: bool,
    stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self::with_defaults(code, &ExecuteConfig::default())
    }

    pub fn with_defaults(code: impl Into<String>, defaults: &ExecuteConfig) -> Self {
        Self {
            code: code.into(),
            silent: defaults.silent,
            store_history: defaults.store_history,
            user_expressions: BTreeMap::new(),
            allow_stdin: defaults.allow_stdin,
            stop_on_error: defaults.stop_on_error,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    #[must_use]
    pub fn store_history(mut self, store_history: bool) -> Self {
        self.store_history = store_history;
        self
    }

    #[must_use]
    pub fn allow_stdin(mut self, allow_stdin: bool) -> Self {
        self.allow_stdin = allow_stdin;
        self
    }

    #[must_use]
    pub fn stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    #[must_use]
    pub fn user_expression(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.user_expressions.insert(name.into(), expression.into());
        self
    }

    /// Replace the user expressions with an untyped map. Every value must be
    /// a string; the first one that is not fails the whole call.
    pub fn user_expressions(mut self, expressions: &Map<String, Value>) -> Result<Self, RequestError> {
        let mut validated = BTreeMap::new();
        for (name, expression) in expressions {
            let Value::String(expression) = expression else {
                return Err(RequestError::NonStringExpression {
                    name: name.clone(),
                    found: json_kind(expression).to_string(),
                });
            };
            validated.insert(name.clone(), expression.clone());
        }
        self.user_expressions = validated;
        Ok(self)
    }

    pub fn to_content(&self) -> Map<String, Value> {
        let user_expressions = self
            .user_expressions
            .iter()
            .map(|(name, expression)| (name.clone(), Value::String(expression.clone())))
            .collect::<Map<_, _>>();

        let mut content = Map::new();
        content.insert("code".into(), Value::String(self.code.clone()));
        content.insert("silent".into(), Value::Bool(self.silent));
        // Silent executions never touch history.
        content.insert("store_history".into(), Value::Bool(self.store_history && !self.silent));
        content.insert("user_expressions".into(), Value::Object(user_expressions));
        content.insert("allow_stdin".into(), Value::Bool(self.allow_stdin));
        content.insert("stop_on_error".into(), Value::Bool(self.stop_on_error));
        content
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
