// ── Kea command wire types ──
//
// Kea Control Agents accept `{command, service, arguments}` and answer with
// a list of `{result, text, arguments}` elements, one per addressed
// service. Some daemons reached directly answer with a bare object; both
// shapes are accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::Error;

/// Service addressed by a Kea command.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum KeaService {
    Dhcp4,
    Dhcp6,
    Ca,
    D2,
}

/// A single command sent to a Kea Control Agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeaCommand {
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<KeaService>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl KeaCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            service: Vec::new(),
            arguments: None,
        }
    }

    pub fn for_service(mut self, service: KeaService) -> Self {
        self.service.push(service);
        self
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// Kea result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ResultCode {
    Success,
    Error,
    Unsupported,
    Empty,
    /// Codes outside the documented range.
    Other(i64),
}

impl From<i64> for ResultCode {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Error,
            2 => Self::Unsupported,
            3 => Self::Empty,
            other => Self::Other(other),
        }
    }
}

/// One element of a Kea response list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeaResponse {
    pub result: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl KeaResponse {
    pub fn code(&self) -> ResultCode {
        ResultCode::from(self.result)
    }

    pub fn is_success(&self) -> bool {
        self.code() == ResultCode::Success
    }

    pub fn is_unsupported(&self) -> bool {
        self.code() == ResultCode::Unsupported
    }

    pub fn is_empty(&self) -> bool {
        self.code() == ResultCode::Empty
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Parse a raw response body into the list of response elements.
pub fn parse_responses(body: &str) -> Result<Vec<KeaResponse>, Error> {
    let value: Value = serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: truncate(body),
    })?;

    let elements = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(Error::Deserialization {
                message: format!("expected a list or an object, got {}", kind_of(&other)),
                body: truncate(body),
            });
        }
    };

    elements
        .into_iter()
        .map(|element| {
            serde_json::from_value::<KeaResponse>(element).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: truncate(body),
            })
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}
