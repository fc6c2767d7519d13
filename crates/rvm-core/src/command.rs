//! Command parser: normalizes raw peer text into a name and parameter map.
//!
//! Accepted shapes, tried in order:
//! 1. JSON object with a string `command` field. The parameter is taken
//!    from the first of `param`, `container_type`, `type` that is present
//!    and stored under `param`. Other fields are kept as-is.
//! 2. `"name:param"` (split on the first colon).
//! 3. Bare `"name"`.

use serde_json::{Map, Value};

/// Keys that may carry the command parameter, in priority order.
const PARAM_KEYS: [&str; 3] = ["param", "container_type", "type"];

/// Normalized key the parameter is stored under.
pub const PARAM: &str = "param";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Command {
    pub name: Option<String>,
    pub params: Map<String, Value>,
}

impl Command {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            params: Map::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params
            .insert(PARAM.to_owned(), Value::String(param.into()));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn param(&self) -> Option<&str> {
        self.params.get(PARAM).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }
}

/// Parse raw peer text. Empty or whitespace-only input yields an empty
/// command (no name, no parameters).
pub fn parse_command(raw: &str) -> Command {
    let raw = raw.trim();
    if raw.is_empty() {
        return Command::default();
    }

    if let Some(cmd) = parse_structured(raw) {
        return cmd;
    }

    match raw.split_once(':') {
        Some((name, param)) => {
            let name = name.trim();
            if name.is_empty() {
                return Command::default();
            }
            let cmd = Command::named(name);
            let param = param.trim();
            if param.is_empty() {
                cmd
            } else {
                cmd.with_param(param)
            }
        }
        None => Command::named(raw),
    }
}

fn parse_structured(raw: &str) -> Option<Command> {
    if !raw.starts_with('{') {
        return None;
    }
    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };
    let name = match fields.remove("command") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_owned(),
        _ => return None,
    };

    let param = PARAM_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(param_text));
    for key in PARAM_KEYS {
        fields.remove(key);
    }
    if let Some(param) = param {
        fields.insert(PARAM.to_owned(), Value::String(param));
    }

    Some(Command {
        name: Some(name),
        params: fields,
    })
}

fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_owned()),
        other => Some(other.to_string()),
    }
}
