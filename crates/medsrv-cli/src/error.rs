use std::path::PathBuf;

use medsrv_services::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("gateway did not report readiness within {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    #[error("gateway exited before reporting readiness (exit code {code:?})")]
    ChildExitedEarly { code: Option<i32> },

    #[error("gateway already running (pid {pid}, port {port:?})")]
    AlreadyRunning { pid: u32, port: Option<u16> },

    #[error("no running gateway recorded in {}", path.display())]
    NoState { path: PathBuf },

    #[error("gateway executable not found: {0}")]
    GatewayNotFound(String),

    #[error("request to gateway {path} failed: {reason}")]
    Gateway { path: String, reason: String },

    #[error("upgrade check failed: {0}")]
    Upgrade(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Process exit code for this failure; an early gateway exit propagates its own code
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorError::ChildExitedEarly { code: Some(code) } => {
                u8::try_from(*code).ok().filter(|code| *code != 0).unwrap_or(1)
            }
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(3), 3)]
    #[case(Some(0), 1)]
    #[case(Some(-1), 1)]
    #[case(Some(300), 1)]
    #[case(None, 1)]
    fn early_exit_code_is_propagated(#[case] code: Option<i32>, #[case] expected: u8) {
        assert_eq!(SupervisorError::ChildExitedEarly { code }.exit_code(), expected);
    }

    #[test]
    fn other_failures_exit_with_one() {
        let err = SupervisorError::HandshakeTimeout { timeout_ms: 15000 };
        assert_eq!(err.exit_code(), 1);
    }
}
