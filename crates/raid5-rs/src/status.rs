//! Error kinds surfaced to the framework per host-I/O part.

/// The outcome reported for one completed (or failed) host I/O part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaidStatus {
    /// All child I/Os succeeded and any parity/reconstruction math is done.
    Success,
    /// The request pool or stripe cache is transiently exhausted; the
    /// framework should retry. The core has also registered a waitq entry
    /// so it will retry the request itself once space frees up.
    NoMem,
    /// A child reported failure, an iovec mapping failed, or more children
    /// are degraded than this geometry tolerates.
    Failed,
}

/// Internal error type for fallible planning steps (iovec mapping, etc).
/// Every variant maps directly to [`RaidStatus::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum RaidError {
    #[error("host buffer mapping failed: {0}")]
    Mapping(#[from] crate::gather::ShortBuffer),
    #[error("too many degraded children in stripe: {degraded} > {max_degraded}")]
    TooManyDegraded { degraded: usize, max_degraded: usize },
    #[error("child device reported failure on child {child}")]
    ChildFailed { child: usize },
}

impl From<&RaidError> for RaidStatus {
    fn from(_: &RaidError) -> Self {
        Self::Failed
    }
}
