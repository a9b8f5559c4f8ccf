use reskin_hook::DetourError;
use thiserror::Error;

use crate::scan::SignatureError;

/// Failures the engine distinguishes when deciding whether to degrade or abort.
///
/// # Error Categories
///
/// - [`EngineError::ScanNotFound`] - signature absent, the dependent feature is disabled
/// - [`EngineError::AmbiguousMatch`] - patch site verification failed, that patch is skipped
/// - [`EngineError::TransactionFailure`] - hook install failed, fatal for the always-on group
/// - [`EngineError::AlreadyIntercepted`] - address or slot already hooked, nothing was bound
/// - [`EngineError::ResourceAllocationFailure`] - graphics setup failed, window stays unmanaged
/// - [`EngineError::ConfigurationMissing`] - value absent or malformed, default is used
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("signature `{0}` not found in image")]
    ScanNotFound(&'static str),

    #[error("expected {expected} patch site(s) for `{site}`, found {found}")]
    AmbiguousMatch {
        site: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("hook transaction failed for `{target}`: {source}")]
    TransactionFailure {
        target: &'static str,
        #[source]
        source: DetourError,
    },

    #[error("`{target}` not installed, {address:#x} is already intercepted")]
    AlreadyIntercepted { target: &'static str, address: usize },

    #[error("graphics resource allocation failed: {0}")]
    ResourceAllocationFailure(String),

    #[error("configuration value `{0}` missing or malformed")]
    ConfigurationMissing(&'static str),

    #[error("cannot patch {len} byte(s) at {address:#x}: {reason}")]
    Patch {
        address: usize,
        len: usize,
        reason: &'static str,
    },

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, EngineError>;
