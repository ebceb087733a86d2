//! Classification of tool path failures into model-consumable errors.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::MalformedCall;

/// The closed set of tool failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The call named an unknown tool or had bad arguments.
    MalformedCall,
    /// The host did not answer within the invocation deadline.
    HostTimeout,
    /// The host answered with a failure.
    HostFault,
    /// The connection to the host is gone.
    TransportLost,
}

impl ErrorKind {
    /// Recoverable kinds go back to the model; the rest end the run.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::TransportLost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedCall => "malformed_call",
            Self::HostTimeout => "host_timeout",
            Self::HostFault => "host_fault",
            Self::TransportLost => "transport_lost",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified tool failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Anything that can go wrong between the model's request and the host's reply.
#[derive(Debug)]
pub enum Fault {
    /// Rejected before reaching the host.
    Malformed(MalformedCall),
    /// The invocation deadline elapsed, including time spent waiting for a
    /// busy session.
    Deadline { tool: String, after: Duration },
    /// The host ran the tool and reported `status: "error"`.
    HostReported { tool: String, message: String },
    /// The wire client failed.
    Host(toolhost::Error),
}

impl From<MalformedCall> for Fault {
    fn from(err: MalformedCall) -> Self {
        Self::Malformed(err)
    }
}

impl From<toolhost::Error> for Fault {
    fn from(err: toolhost::Error) -> Self {
        Self::Host(err)
    }
}

/// Map a fault to its error kind and a message the model can act on.
pub fn classify(fault: Fault) -> ToolError {
    match fault {
        Fault::Malformed(err) => ToolError::new(ErrorKind::MalformedCall, err.to_string()),
        Fault::Deadline { tool, after } => ToolError::new(
            ErrorKind::HostTimeout,
            format!("`{tool}` did not complete within {after:?}"),
        ),
        Fault::HostReported { tool, message } => {
            ToolError::new(ErrorKind::HostFault, format!("`{tool}` failed: {message}"))
        }
        Fault::Host(err) if err.is_transport() => {
            ToolError::new(ErrorKind::TransportLost, err.to_string())
        }
        Fault::Host(toolhost::Error::Timeout) => {
            ToolError::new(ErrorKind::HostTimeout, toolhost::Error::Timeout.to_string())
        }
        Fault::Host(err) => ToolError::new(ErrorKind::HostFault, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolhost::JsonRpcError;

    #[test]
    fn malformed_call_is_recoverable() {
        let err = classify(MalformedCall::UnknownTool("unknown_tool".into()).into());
        assert_eq!(err.kind, ErrorKind::MalformedCall);
        assert!(err.kind.is_recoverable());
        assert!(err.message.contains("unknown_tool"));
    }

    #[test]
    fn deadline_is_host_timeout() {
        let err = classify(Fault::Deadline {
            tool: "drag_workout_to_calendar".into(),
            after: Duration::from_secs(60),
        });
        assert_eq!(err.kind, ErrorKind::HostTimeout);
        assert_eq!(err.message, "`drag_workout_to_calendar` did not complete within 60s");
    }

    #[test]
    fn reported_failure_is_host_fault() {
        let err = classify(Fault::HostReported {
            tool: "create_workout".into(),
            message: "element not found".into(),
        });
        assert_eq!(err.kind, ErrorKind::HostFault);
        assert!(err.kind.is_recoverable());
    }

    #[test]
    fn wire_errors_split_on_transport() {
        assert_eq!(
            classify(toolhost::Error::ServerExited.into()).kind,
            ErrorKind::TransportLost
        );
        assert_eq!(
            classify(toolhost::Error::Closed.into()).kind,
            ErrorKind::TransportLost
        );
        assert_eq!(
            classify(toolhost::Error::Timeout.into()).kind,
            ErrorKind::HostTimeout
        );
        assert_eq!(
            classify(toolhost::Error::InvalidResponse("id mismatch".into()).into()).kind,
            ErrorKind::HostFault
        );
        let rpc = JsonRpcError {
            code: -32602,
            message: "invalid params".into(),
            data: None,
        };
        assert_eq!(classify(toolhost::Error::from(rpc).into()).kind, ErrorKind::HostFault);
    }

    #[test]
    fn only_transport_lost_is_fatal() {
        assert!(!ErrorKind::TransportLost.is_recoverable());
        for kind in [
            ErrorKind::MalformedCall,
            ErrorKind::HostTimeout,
            ErrorKind::HostFault,
        ] {
            assert!(kind.is_recoverable(), "{kind} should be recoverable");
        }
    }

    #[test]
    fn error_serializes_as_payload() {
        let err = ToolError::new(ErrorKind::HostFault, "boom");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({"kind": "host_fault", "message": "boom"})
        );
    }
}
