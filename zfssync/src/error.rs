use common::CommandError;

/// Failures of resolution, planning and transfer
///
/// Every variant is recoverable at the orchestrator level: with
/// `--continue` the failing source or dataset is skipped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or conflicting dataset specification
    #[error("invalid dataset specification \"{spec}\": {reason}")]
    Specification { spec: String, reason: String },
    /// A non-glob source names a dataset that does not exist
    #[error("can't add \"{host}:{dataset}\": no such dataset")]
    NotFound { host: String, dataset: String },
    /// The source has no snapshot to send
    #[error("need at least one snapshot for source \"{dataset}\"")]
    Precondition { dataset: String },
    /// The destination's latest snapshot is unknown to the source
    #[error("latest destination snapshot \"{snapshot}\" is not in source \"{source_dataset}\"")]
    Divergence {
        snapshot: String,
        source_dataset: String,
    },
    /// A listing or snapshot command failed
    #[error(transparent)]
    Transport(#[from] CommandError),
    /// The send or receive side of a transfer failed
    #[error("transfer {source_dataset} -> {destination} failed: {error}")]
    Transfer {
        source_dataset: String,
        destination: String,
        #[source]
        error: CommandError,
    },
}

impl Error {
    pub(crate) fn specification(spec: &str, reason: impl Into<String>) -> Self {
        Error::Specification {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
