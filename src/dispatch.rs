//! Remote command dispatch
//!
//! Builds the request for a command in the shape the resolved service variant
//! expects, sends it and decodes the response in the representation the
//! caller asked for.
//!
//! | Variant    | Topic                                                   | Body                                          |
//! |------------|---------------------------------------------------------|-----------------------------------------------|
//! | `commands` | `/mcafee/service/epo/command/<id>/remote/<cmd/as/path>` | parameters object                             |
//! | `remote`   | `/mcafee/service/epo/remote/<id>`                       | `{"command", "output": "json", "params"}`     |

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::fabric::{Fabric, Request, Response, codec};
use crate::registry::{REMOTE_REQUEST_PREFIX, ServiceVariant};
use crate::resolver::ResolvedTarget;

/// Request topic prefix of the ePO `commands` service
pub const COMMANDS_REQUEST_PREFIX: &str = "/mcafee/service/epo/command/";

/// Separates the server identifier from the command path
pub const COMMANDS_COMMAND_INFIX: &str = "/remote/";

/// Output format always requested from the legacy `remote` service
const REMOTE_OUTPUT_FORMAT: &str = "json";

/// Command parameters
pub type Params = serde_json::Map<String, Value>;

/// How a command response is handed back to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Raw payload bytes
    Binary,
    /// Payload decoded as UTF-8 text
    Text,
    /// Payload parsed as JSON
    #[default]
    Structured,
}

impl OutputFormat {
    /// Canonical name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Text => "text",
            Self::Structured => "structured",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "raw" => Ok(Self::Binary),
            "text" | "string" => Ok(Self::Text),
            "structured" | "object" | "json" => Ok(Self::Structured),
            _ => Err(Error::InvalidArgument(format!(
                "unknown output format '{s}' (expected binary, text or structured)"
            ))),
        }
    }
}

/// A decoded command response
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// Raw payload bytes
    Binary(Vec<u8>),
    /// Payload as text
    Text(String),
    /// Payload parsed as JSON
    Structured(Value),
}

impl CommandOutput {
    /// Decode `response` according to `format`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `format` is [`OutputFormat::Structured`]
    /// and the payload is not valid JSON
    pub fn decode(response: Response, format: OutputFormat) -> Result<Self> {
        match format {
            OutputFormat::Binary => Ok(Self::Binary(response.payload)),
            OutputFormat::Text => Ok(Self::Text(codec::decode_text(&response.payload))),
            OutputFormat::Structured => codec::decode_json(&response.payload)
                .map(Self::Structured)
                .map_err(Error::Decode),
        }
    }

    /// The structured value, if this output is structured
    #[must_use]
    pub fn into_structured(self) -> Option<Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Binary(_) | Self::Text(_) => None,
        }
    }

    /// The text, if this output is text
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) | Self::Structured(_) => None,
        }
    }

    /// Raw bytes of the output, re-encoding structured values as JSON
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Binary(bytes) => bytes,
            Self::Text(text) => text.into_bytes(),
            Self::Structured(value) => value.to_string().into_bytes(),
        }
    }
}

/// Per-invocation options for a remote command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Command parameters
    pub params: Params,
    /// Response representation
    pub output_format: OutputFormat,
}

impl RunOptions {
    /// Options with no parameters and structured output
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single parameter
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replace all parameters
    #[must_use]
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set the response representation
    #[must_use]
    pub const fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set the response representation from its name
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an unrecognized name
    pub fn output_format_name(self, name: &str) -> Result<Self> {
        Ok(self.output_format(name.parse()?))
    }
}

impl TryFrom<&Value> for RunOptions {
    type Error = Error;

    /// Read `{"params": {...}, "outputFormat": "..."}`; both keys are optional
    fn try_from(options: &Value) -> Result<Self> {
        let Some(options) = options.as_object() else {
            return Err(Error::InvalidArgument(
                "command options must be an object".to_string(),
            ));
        };

        let mut run_options = Self::new();
        match options.get("params") {
            None | Some(Value::Null) => {}
            Some(Value::Object(params)) => run_options.params = params.clone(),
            Some(_) => {
                return Err(Error::InvalidArgument(
                    "params must be an object".to_string(),
                ));
            }
        }
        match options.get("outputFormat") {
            None | Some(Value::Null) => {}
            Some(Value::String(name)) => run_options = run_options.output_format_name(name)?,
            Some(other) => {
                return Err(Error::InvalidArgument(format!(
                    "outputFormat must be a string, got {other}"
                )));
            }
        }
        Ok(run_options)
    }
}

/// Body sent to the legacy `remote` service
#[derive(Debug, Serialize)]
struct RemoteEnvelope<'a> {
    command: &'a str,
    output: &'static str,
    params: &'a Params,
}

/// Request topic for `command` on `target`
#[must_use]
pub fn request_topic(target: &ResolvedTarget, command: &str) -> String {
    match target.variant {
        ServiceVariant::Commands => format!(
            "{COMMANDS_REQUEST_PREFIX}{}{COMMANDS_COMMAND_INFIX}{}",
            target.unique_id,
            command.replace('.', "/")
        ),
        ServiceVariant::Remote => format!("{REMOTE_REQUEST_PREFIX}{}", target.unique_id),
    }
}

/// Build the request invoking `command` with `params` on `target`
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the payload cannot be encoded
pub fn build_request(target: &ResolvedTarget, command: &str, params: &Params) -> Result<Request> {
    let request = Request::new(request_topic(target, command));
    let request = match target.variant {
        ServiceVariant::Commands => request.with_json(params)?,
        ServiceVariant::Remote => request.with_json(&RemoteEnvelope {
            command,
            output: REMOTE_OUTPUT_FORMAT,
            params,
        })?,
    };
    Ok(request)
}

/// Invoke `command` on `target` and decode the response
///
/// # Errors
///
/// Returns [`Error::Transport`] if the request fails and [`Error::Decode`]
/// if the response cannot be decoded as `format`
pub async fn invoke<F: Fabric + ?Sized>(
    fabric: &F,
    target: &ResolvedTarget,
    command: &str,
    params: &Params,
    format: OutputFormat,
) -> Result<CommandOutput> {
    let request = build_request(target, command, params)?;
    tracing::debug!(
        command,
        topic = %request.topic,
        variant = %target.variant,
        "invoking ePO command"
    );

    let response = fabric.request(request).await?;
    tracing::trace!(command, bytes = response.payload.len(), "ePO command answered");
    CommandOutput::decode(response, format)
}
