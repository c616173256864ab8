//! Error taxonomy for the orchestration engine.
//!
//! The split matters for callers: a transport-level failure (host not
//! reachable, auth rejected) aborts the run before any step is attempted,
//! while a command-level failure is an ordinary non-zero exit surfaced
//! through `CmdOutput`. Resolution errors are reported before execution.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The execution channel itself could not be established.
    #[error("cannot reach {target}: {message}")]
    Unreachable { target: String, message: String },

    /// The local process (or ssh client) could not be spawned at all.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A selection flag named a step not present in the registry.
    #[error("no step matches '{name}'")]
    Resolution { name: String },
}

impl EngineError {
    /// Whether this error means the target was never reached.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Spawn { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let err = EngineError::Unreachable {
            target: "pod:22".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_transport());

        let err = EngineError::Resolution {
            name: "99".to_string(),
        };
        assert!(!err.is_transport());
    }
}
