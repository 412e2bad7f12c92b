use std::io;

use crate::scripting::ScriptId;

/// Errors returned by [`ScriptHandler`](crate::scripting::ScriptHandler) operations.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// No slot is occupied by the given id.
    #[error("no script is running in slot {0}")]
    NotFound(ScriptId),

    /// A self-targeting operation was called from a thread that is not a
    /// registered script worker. This is a programming error on the caller's side.
    #[error("thread '{thread}' is not a managed script worker")]
    OffRoster { thread: String },

    /// The script was already initialized by an earlier admission. A script
    /// instance runs at most once; build a fresh one to run it again.
    #[error("script '{0}' has already been admitted")]
    AlreadyAdmitted(&'static str),

    /// `pause` was called for a slot from inside that slot's own pause
    /// notification.
    #[error("slot {0} is already being paused or resumed on this thread")]
    ReentrantPause(ScriptId),

    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

impl HandlerError {
    /// Build an off-roster error describing the calling thread.
    pub(crate) fn off_roster() -> Self {
        let current = std::thread::current();
        let thread = match current.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", current.id()),
        };
        HandlerError::OffRoster { thread }
    }

    /// Whether this error signals a caller bug rather than a runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HandlerError::OffRoster { .. } | HandlerError::ReentrantPause(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_off_roster_names_current_thread() {
        let err = std::thread::Builder::new()
            .name("not-a-worker".to_string())
            .spawn(HandlerError::off_roster)
            .unwrap()
            .join()
            .unwrap();

        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "thread 'not-a-worker' is not a managed script worker"
        );
    }

    #[test]
    fn test_not_found_is_not_fatal() {
        let err = HandlerError::NotFound(ScriptId::new(3));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "no script is running in slot 3");
    }

    #[test]
    fn test_already_admitted_names_script() {
        let err = HandlerError::AlreadyAdmitted("Counter");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "script 'Counter' has already been admitted");
    }
}
