use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

/// Boxed error type returned by work units and carried as the source of
/// execution failures.
pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn pool_closed() -> Error {
        Error(ErrorKind::PoolClosed.into())
    }

    pub fn execution_failed(seq: u64, source: StdErrorBoxed) -> Error {
        Error(ErrorKind::ExecutionFailed { seq, source }.into())
    }

    pub fn unit_panicked(seq: u64, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::UnitPanicked {
                seq,
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn unit_abandoned(seq: u64) -> Error {
        Error(ErrorKind::UnitAbandoned { seq }.into())
    }

    pub fn thread_spawn(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::ThreadSpawn {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn thread_panicked(name: impl Into<String>) -> Error {
        Error(ErrorKind::ThreadPanicked { name: name.into() }.into())
    }

    /// Returns `true` if this error describes a failed work unit (either an
    /// error returned from its action, a panic, or an abandoned execution).
    pub fn is_unit_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ExecutionFailed { .. }
                | ErrorKind::UnitPanicked { .. }
                | ErrorKind::UnitAbandoned { .. }
        )
    }

    /// Sequence number of the failed unit, if this error is a unit failure.
    pub fn unit_seq(&self) -> Option<u64> {
        match self.kind() {
            ErrorKind::ExecutionFailed { seq, .. }
            | ErrorKind::UnitPanicked { seq, .. }
            | ErrorKind::UnitAbandoned { seq } => Some(*seq),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("pool is closed and no longer accepts work")]
    PoolClosed,

    #[error("work unit #{seq} failed: {source}")]
    ExecutionFailed { seq: u64, source: StdErrorBoxed },

    #[error("work unit #{seq} panicked: {message}")]
    UnitPanicked { seq: u64, message: String },

    #[error("work unit #{seq} was abandoned before completion")]
    UnitAbandoned { seq: u64 },

    #[error("failed to spawn thread for '{context}': {source}")]
    ThreadSpawn {
        context: String,
        source: std::io::Error,
    },

    #[error("thread '{name}' panicked")]
    ThreadPanicked { name: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(Box::new(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_size() {
        assert_eq!(std::mem::size_of::<Error>(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_unit_failure_classification() {
        let err = Error::execution_failed(3, "boom".into());
        assert!(err.is_unit_failure());
        assert_eq!(err.unit_seq(), Some(3));
        assert_eq!(err.to_string(), "work unit #3 failed: boom");

        let err = Error::unit_panicked(7, "oops");
        assert!(err.is_unit_failure());
        assert_eq!(err.unit_seq(), Some(7));

        let err = Error::pool_closed();
        assert!(!err.is_unit_failure());
        assert_eq!(err.unit_seq(), None);
        assert!(matches!(err.into_kind(), ErrorKind::PoolClosed));
    }
}
