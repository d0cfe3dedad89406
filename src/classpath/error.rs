use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::dex::DexError;

/// Failures raised while opening containers and assembling a classpath.
///
/// `Resolution` is the wrapping variant: it carries a human readable context
/// and, usually, the failure that caused it. Walk the chain with
/// [`std::error::Error::source`] or [`ClassPathError::root_cause`].
#[derive(Debug, Error)]
pub enum ClassPathError {
    #[error("{} is not a recognized dex container: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("{} does not contain any dex entries", path.display())]
    NoDexEntries { path: PathBuf },

    #[error("cannot find dependency {name} in {location}")]
    DependencyNotFound { name: String, location: String },

    #[error("{message}")]
    Resolution {
        message: String,
        #[source]
        cause: Option<Box<ClassPathError>>,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed container {}: {source}", path.display())]
    Dex {
        path: PathBuf,
        #[source]
        source: DexError,
    },
}

impl ClassPathError {
    pub fn resolution(message: impl Into<String>, cause: ClassPathError) -> Self {
        ClassPathError::Resolution {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn resolution_msg(message: impl Into<String>) -> Self {
        ClassPathError::Resolution {
            message: message.into(),
            cause: None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ClassPathError::Io { path: path.into(), source }
    }

    pub(crate) fn dex(path: impl Into<PathBuf>, source: DexError) -> Self {
        ClassPathError::Dex { path: path.into(), source }
    }

    /// The innermost error of a `Resolution` chain.
    pub fn root_cause(&self) -> &ClassPathError {
        let mut current = self;
        while let ClassPathError::Resolution { cause: Some(inner), .. } = current {
            current = inner;
        }
        current
    }

    pub fn is_no_dex_entries(&self) -> bool {
        matches!(self, ClassPathError::NoDexEntries { .. })
    }
}
