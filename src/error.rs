//! Error taxonomy for the synchronization engine
//!
//! Discovery failures abort a single run, per-image failures are logged and skipped,
//! pool-management failures are surfaced to the caller. Cancellation is carried as a
//! variant so call sites can tell a pause apart from a genuine failure.

use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The discovery script could not be run or exited non-zero
    #[error("syncer script {script} failed: {message}")]
    Discovery { script: String, message: String },

    #[error("credentials for {hostname} are improperly formatted, expected format is 'username:password'")]
    InvalidCredentials { hostname: String },

    #[error("pushAuthConfig for {hostname} is invalid")]
    Unauthorized { hostname: String },

    #[error("registry {hostname} returned an error response: {body}")]
    MalformedResponse { hostname: String, body: String },

    #[error("error encountered making HTTP request to {hostname}: {source}")]
    Http {
        hostname: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("repository does not exist: {image}")]
    ImageNotFound { image: String },

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("registry client unavailable: {0}")]
    ClientUnavailable(String),

    #[error("invalid cron expression '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    #[error("could not find provided registry by hostname: {0}")]
    RegistryNotFound(String),

    #[error("no active syncer for {0}")]
    SyncerNotFound(String),

    #[error("duplicate registry found ({0}), each registry hostname may only be configured once")]
    DuplicateRegistry(String),

    #[error("no scheduled job tagged {0}")]
    JobNotFound(String),

    #[error("encountered an empty image name")]
    EmptyImage,

    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// True for lookups of a hostname the caller named but nobody knows about
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::RegistryNotFound(_) | SyncError::SyncerNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinguished() {
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(!SyncError::EmptyImage.is_cancelled());
    }

    #[test]
    fn test_not_found_variants() {
        assert!(SyncError::RegistryNotFound("a".into()).is_not_found());
        assert!(SyncError::SyncerNotFound("a".into()).is_not_found());
        assert!(!SyncError::DuplicateRegistry("a".into()).is_not_found());
    }

    #[test]
    fn test_duplicate_message_names_host() {
        let err = SyncError::DuplicateRegistry("my-registry.space".into());
        assert!(err.to_string().contains("my-registry.space"));
    }
}
