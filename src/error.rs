/// Errors returned synchronously by [`Guard::limit`](crate::Guard::limit).
///
/// None of these leave partial state behind: a failed activation never
/// launches a limiter task and never touches the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    /// The ceiling passed to `limit` was zero.
    InvalidLimit,
    /// The guard was built without a process to supervise.
    MissingProcess,
    /// `limit` already succeeded once on this guard.
    AlreadyStarted,
    /// `limit` was called outside of a Tokio runtime.
    NoRuntime,
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::InvalidLimit => {
                write!(f, "memory limit must be greater than zero bytes")
            }
            GuardError::MissingProcess => {
                write!(f, "no process has been assigned to this guard")
            }
            GuardError::AlreadyStarted => write!(f, "limit already set on this guard"),
            GuardError::NoRuntime => {
                write!(f, "limit must be called from within a Tokio runtime")
            }
        }
    }
}

impl std::error::Error for GuardError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_distinct() {
        let all = [
            GuardError::InvalidLimit,
            GuardError::MissingProcess,
            GuardError::AlreadyStarted,
            GuardError::NoRuntime,
        ];
        let mut messages: Vec<String> = all.iter().map(|e| e.to_string()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), all.len());
    }

    #[test]
    fn test_already_started_message() {
        assert!(GuardError::AlreadyStarted
            .to_string()
            .contains("already set"));
    }
}
