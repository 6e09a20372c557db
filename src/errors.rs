use thiserror::Error;

use crate::tunnel::NAME_MAX_LENGTH;

/// Errors surfaced by tunnel operations and their manager.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The candidate name fails the tunnel name grammar.
    #[error(
        "invalid tunnel name {name:?}: must be 1-{NAME_MAX_LENGTH} characters from [a-zA-Z0-9_=+.-]"
    )]
    InvalidName { name: String },

    /// A live tunnel with this name already exists in the manager.
    #[error("a tunnel named {0:?} already exists")]
    AlreadyExists(String),

    /// The manager no longer tracks a tunnel under this name.
    #[error("no tunnel named {0:?}")]
    NotFound(String),

    /// The owning manager has been dropped; the record is unusable.
    #[error("tunnel is no longer attached to its manager")]
    Detached,

    /// The manager refused the operation because it has shut down.
    #[error("operation was cancelled")]
    Cancelled,

    /// Opaque backend failure (I/O, permission, kernel).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_name_mentions_grammar() {
        let err = TunnelError::InvalidName {
            name: "bad name".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("bad name"));
        assert!(text.contains("1-16"));
    }

    #[test]
    fn backend_errors_keep_their_message() {
        let err = TunnelError::from(anyhow::anyhow!("netlink: permission denied"));
        assert!(err.to_string().contains("permission denied"));
    }
}
