// src/error.rs
//! Error handling for the whole viewer.
//!
//! - **Taxonomy**: load failures (retryable), unsupported assets (not retried), GPU resource
//!   exhaustion (viewer degrades instead of crashing the host), caller misuse.
//! - **Cheap**: plain enum, allocations only on error paths, `Clone` so an error can be both
//!   logged and handed to host observers.
//! - **Chaining**: `.context()` wraps any error with a message, like anyhow.

use std::fmt;
use thiserror::Error;

/// Main error type. `Send + Sync + 'static + Clone`.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ViewerError {
    /// Network, I/O or decode failure while fetching a model. Retry with a fresh request.
    #[error("failed to load `{uri}`: {reason}")]
    Load { uri: String, reason: String },

    /// The asset decoded but cannot be displayed (bad topology, missing scene, ...).
    #[error("unsupported asset `{uri}`: {reason}")]
    UnsupportedAsset { uri: String, reason: String },

    /// GPU allocation failed.
    #[error("GPU resource exhausted: {0}")]
    ResourceExhaustion(String),

    /// Caller broke an API contract (e.g. started a second scheduler).
    #[error("invalid viewer state: {0}")]
    InvalidState(String),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<ViewerError>,
    },
}

impl ViewerError {
    #[inline]
    pub fn load<U: Into<String>, R: fmt::Display>(uri: U, reason: R) -> Self {
        Self::Load { uri: uri.into(), reason: reason.to_string() }
    }

    #[inline]
    pub fn unsupported<U: Into<String>, R: fmt::Display>(uri: U, reason: R) -> Self {
        Self::UnsupportedAsset { uri: uri.into(), reason: reason.to_string() }
    }

    #[inline]
    pub fn exhausted<S: Into<String>>(what: S) -> Self {
        Self::ResourceExhaustion(what.into())
    }

    #[inline]
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Formatted custom error, used by `bail!`.
    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    /// Wrap with a context message.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext { message: context.into(), source: Box::new(self) }
    }

    /// Innermost error, skipping context layers.
    pub fn root(&self) -> &ViewerError {
        let mut cur = self;
        while let ViewerError::WithContext { source, .. } = cur {
            cur = source;
        }
        cur
    }

    #[inline]
    pub fn is_load(&self) -> bool {
        matches!(self.root(), ViewerError::Load { .. })
    }

    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), ViewerError::UnsupportedAsset { .. })
    }

    #[inline]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self.root(), ViewerError::ResourceExhaustion(_))
    }

    /// Whether the host may retry the same request (only plain load failures).
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.is_load()
    }
}

impl From<std::io::Error> for ViewerError {
    fn from(err: std::io::Error) -> Self {
        ViewerError::Custom(format!("I/O error: {err}"))
    }
}

impl From<serde_json::Error> for ViewerError {
    fn from(err: serde_json::Error) -> Self {
        ViewerError::Custom(format!("JSON error: {err}"))
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, ViewerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_root_kind() {
        let err = ViewerError::exhausted("vertex buffer").context("attaching model");
        assert!(err.is_exhaustion());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "attaching model: GPU resource exhausted: vertex buffer"
        );
    }

    #[test]
    fn load_errors_are_retryable() {
        let err = ViewerError::load("models/gtb.glb", "connection reset");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "failed to load `models/gtb.glb`: connection reset");
    }
}
