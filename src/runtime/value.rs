// Runtime values for variables and results.

use std::collections::HashMap;
use std::fmt;

use crate::executor::future::TaskFuture;
use crate::output::errors::TachyonError;

/// A variable payload. Futures are first-class payloads: reading one blocks
/// until the background task that produces it has finished.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Map(HashMap<String, Value>),
    List(Vec<Value>),
    Future(TaskFuture),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Map(_) => "mapping",
            Value::List(_) => "sequence",
            Value::Future(_) => "future",
        }
    }

    /// Resolve the payload, waiting for a future to complete.
    pub async fn read(&self) -> Value {
        match self {
            Value::Future(f) => f.value().await.to_value(),
            other => other.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn expect_list(&self) -> Result<&[Value], TachyonError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(TachyonError::UnexpectedValueKind {
                expected: "sequence",
                found: other.kind(),
            }),
        }
    }

    pub fn expect_map(&self) -> Result<&HashMap<String, Value>, TachyonError> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(TachyonError::UnexpectedValueKind {
                expected: "mapping",
                found: other.kind(),
            }),
        }
    }

    /// Coerce to a boolean the way task options do: real booleans pass
    /// through, everything else goes by its printed form.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !matches!(s.as_str(), "" | "false" | "no"),
            Value::Int(i) => *i != 0,
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Future(_) => true,
        }
    }

    /// Yaml rendering, for handing values back to record-shaped consumers.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Value::Str(s) => serde_yaml::Value::String(s.clone()),
            Value::Int(i) => serde_yaml::Value::Number((*i).into()),
            Value::Bool(b) => serde_yaml::Value::Bool(*b),
            Value::List(items) => {
                serde_yaml::Value::Sequence(items.iter().map(Value::to_yaml).collect())
            }
            Value::Map(m) => {
                let mut out = serde_yaml::Mapping::new();
                for (k, v) in m {
                    out.insert(serde_yaml::Value::String(k.clone()), v.to_yaml());
                }
                serde_yaml::Value::Mapping(out)
            }
            Value::Future(_) => serde_yaml::Value::String(self.to_string()),
        }
    }

    /// JSON rendering used by the result contract and the framed progress
    /// stream. A future that has resolved contributes its result; one still
    /// pending renders as a placeholder rather than blocking the reporter.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(m) => {
                let mut out = serde_json::Map::new();
                for (k, v) in m {
                    out.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(out)
            }
            Value::Future(f) => match f.try_value() {
                Some(res) => res.to_value().to_json(),
                None => serde_json::Value::String("<pending>".to_string()),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Future(a), Value::Future(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Future(fut) => match fut.try_value() {
                Some(res) => write!(f, "{}", res.to_value()),
                None => write!(f, "<future>"),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&serde_yaml::Value> for Value {
    fn from(v: &serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Value::Str(String::new()),
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Str(n.to_string())
                }
            }
            serde_yaml::Value::String(s) => Value::Str(s.clone()),
            serde_yaml::Value::Sequence(seq) => {
                Value::List(seq.iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(m) => {
                let mut out = HashMap::new();
                for (k, v) in m {
                    out.insert(yaml_key(k), Value::from(v));
                }
                Value::Map(out)
            }
            serde_yaml::Value::Tagged(t) => Value::from(&t.value),
        }
    }
}

/// Mapping keys are almost always strings; anything else goes by its
/// printed form.
pub fn yaml_key(k: &serde_yaml::Value) -> String {
    match k {
        serde_yaml::Value::String(s) => s.clone(),
        other => Value::from(other).to_string(),
    }
}
