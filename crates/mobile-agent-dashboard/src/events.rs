//! Update events carried by the task stream, one JSON object per line.

use serde::Deserialize;
use serde_json::Value;

use crate::log::LogLevel;
use crate::stats::StatsPatch;

pub const KNOWN_EVENT_TYPES: [&str; 9] = [
    "log",
    "screenshot",
    "status",
    "progress",
    "stats",
    "subtask",
    "action",
    "model_call",
    "completion",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

impl Progress {
    #[must_use]
    pub fn label(self) -> String {
        format!("{}/{}", self.current, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    Log {
        #[serde(default, deserialize_with = "lenient_text")]
        message: String,
        #[serde(default)]
        level: Option<LogLevel>,
    },
    Screenshot {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Status {
        #[serde(default, deserialize_with = "lenient_text")]
        status: String,
        #[serde(default)]
        progress: Option<Progress>,
    },
    Progress {
        #[serde(default)]
        current: u64,
        #[serde(default)]
        total: u64,
    },
    Stats {
        #[serde(default)]
        stats: StatsPatch,
    },
    Subtask {
        #[serde(default)]
        current: u64,
        #[serde(default)]
        total: u64,
    },
    Action {
        #[serde(default, deserialize_with = "lenient_text")]
        action_type: String,
        #[serde(default)]
        action_inputs: Value,
        #[serde(default, deserialize_with = "truthy")]
        success: bool,
    },
    ModelCall {
        #[serde(default, deserialize_with = "lenient_text")]
        model_name: String,
        #[serde(default, deserialize_with = "lenient_text")]
        call_type: String,
    },
    Completion {
        #[serde(default)]
        completed: u64,
        #[serde(default)]
        failed: u64,
        #[serde(default)]
        total: u64,
    },
    /// Any `type` outside [`KNOWN_EVENT_TYPES`], or none at all.
    #[serde(skip)]
    Unrecognized { kind: Option<String> },
}

impl UpdateEvent {
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Log { .. } => "log",
            Self::Screenshot { .. } => "screenshot",
            Self::Status { .. } => "status",
            Self::Progress { .. } => "progress",
            Self::Stats { .. } => "stats",
            Self::Subtask { .. } => "subtask",
            Self::Action { .. } => "action",
            Self::ModelCall { .. } => "model_call",
            Self::Completion { .. } => "completion",
            Self::Unrecognized { kind } => kind.as_deref().unwrap_or("<missing>"),
        }
    }
}

/// Text fields accept any JSON: `null` is empty, strings are taken as-is and
/// anything else is kept as its JSON text.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

/// Flags follow JSON truthiness: `null`, `false`, zero and `""` are false.
/// Arrays and objects are true.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|number| number.abs() > 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

/// One non-blank line of the task stream after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    Event(UpdateEvent),
    /// The line was not a usable event; shown verbatim.
    Text(String),
}

/// Decodes one stream line. Blank lines yield `None`.
#[must_use]
pub fn decode_line(line: &str) -> Option<DecodedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return Some(DecodedLine::Text(trimmed.to_string())),
    };

    let kind = match value.get("type") {
        None | Some(Value::Null) => None,
        Some(Value::String(kind)) => Some(kind.clone()),
        Some(other) => Some(other.to_string()),
    };

    match kind.as_deref() {
        Some(tag) if KNOWN_EVENT_TYPES.contains(&tag) => {
            match serde_json::from_value::<UpdateEvent>(value) {
                Ok(event) => Some(DecodedLine::Event(event)),
                Err(error) => {
                    tracing::debug!(error = %error, kind = tag, "event payload rejected");
                    Some(DecodedLine::Text(trimmed.to_string()))
                }
            }
        }
        _ => Some(DecodedLine::Event(UpdateEvent::Unrecognized { kind })),
    }
}
