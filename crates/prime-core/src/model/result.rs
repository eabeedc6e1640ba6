use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Action-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    UnknownHandler,
    ExecTimeout,
    ExecFailure,
    CacheWriteFailed,
    IndexWriteFailed,
    ReplayMissingEntry,
    InternalFault,
    GuardrailBlocked,
    PlanLimitExceeded,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::UnknownHandler => "UNKNOWN_HANDLER",
            ErrorCode::ExecTimeout => "EXEC_TIMEOUT",
            ErrorCode::ExecFailure => "EXEC_FAILURE",
            ErrorCode::CacheWriteFailed => "CACHE_WRITE_FAILED",
            ErrorCode::IndexWriteFailed => "INDEX_WRITE_FAILED",
            ErrorCode::ReplayMissingEntry => "REPLAY_MISSING_ENTRY",
            ErrorCode::InternalFault => "INTERNAL_FAULT",
            ErrorCode::GuardrailBlocked => "GUARDRAIL_BLOCKED",
            ErrorCode::PlanLimitExceeded => "PLAN_LIMIT_EXCEEDED",
        }
    }

    /// Warning line for codes that degrade a result without failing it.
    pub fn warning(&self, message: impl std::fmt::Display) -> String {
        format!("{}: {message}", self.as_str())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

/// The `result` emitted for every non-`result` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(rename = "for")]
    pub for_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub cache_key: String,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ActionResult {
    pub fn ok(for_id: impl Into<String>, data: Value) -> Self {
        Self {
            for_id: for_id.into(),
            status: Status::Ok,
            data: Some(data),
            error: None,
            cache_key: String::new(),
            cache_hit: false,
            warnings: Vec::new(),
        }
    }

    pub fn error(for_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            for_id: for_id.into(),
            status: Status::Error,
            data: None,
            error: Some(ErrorInfo {
                code,
                message: message.into(),
            }),
            cache_key: String::new(),
            cache_hit: false,
            warnings: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// The same outcome re-addressed to another action and flagged as a hit.
    pub fn replayed_for(&self, for_id: &str) -> Self {
        let mut replayed = self.clone();
        replayed.for_id = for_id.to_string();
        replayed.cache_hit = true;
        replayed
    }

    /// Body JSON of the result fence: every field except `for`, which the
    /// header carries.
    pub fn payload_json(&self) -> Result<String, CoreError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("for");
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Render as a fence:
    ///
    /// ````text
    /// ```result#r1 for="r1"
    /// {"status":"ok",...}
    /// ```
    /// ````
    pub fn to_fence(&self) -> Result<String, CoreError> {
        Ok(format!(
            "```result#{id} for=\"{id}\"\n{}\n```\n",
            self.payload_json()?,
            id = self.for_id
        ))
    }

    /// Rebuild a result from a fence payload and the `for` attribute.
    pub fn from_payload(for_id: &str, payload: &Value) -> Result<Self, CoreError> {
        let mut value = payload.clone();
        match &mut value {
            Value::Object(map) => {
                map.insert("for".into(), Value::String(for_id.to_string()));
            }
            _ => {
                return Err(CoreError::Parse {
                    line: 0,
                    message: "result payload is not a JSON object".into(),
                })
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}
