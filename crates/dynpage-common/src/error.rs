//! Error types for dynpage.
//!
//! This module defines the error hierarchy using `thiserror`:
//! - [`PageError`]: Top-level errors for the page runtime
//!
//! Note that a script whose source cannot be found is *not* represented
//! here: "no such script" is a routing outcome (fall through to the next
//! handler), not an error. See the bytecode cache's resolution type.

use std::io;

use thiserror::Error;

/// Top-level page runtime errors.
///
/// These errors represent failures across the lifecycle of serving a
/// scripted page, from instance bootstrap to bytecode execution.
#[derive(Error, Debug)]
pub enum PageError {
    /// Script compilation failed. The diagnostic is the compiler's own
    /// error text and ends up verbatim (escaped) on the error page.
    #[error("Compilation failed: {diagnostic}")]
    CompileFailed {
        /// The compiler's diagnostic message.
        diagnostic: String,
    },

    /// One of the fixed bootstrap programs failed to compile or run.
    ///
    /// This is fatal: a broken bootstrap invalidates every instance the
    /// producer would ever create.
    #[error("Bootstrap failed ({program}): {reason}")]
    BootstrapFailed {
        /// Which bootstrap program failed ("main" or "route").
        program: String,
        /// Description of the failure.
        reason: String,
    },

    /// The preload pool (or a reuse ring) has been shut down.
    #[error("Instance pool closed")]
    PoolClosed,

    /// Loading previously compiled bytecode into an instance failed.
    #[error("Bytecode load failed: {reason}")]
    LoadFailed {
        /// Description of the load failure.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PageError {
    /// Create a new `CompileFailed` error.
    pub fn compile_failed(diagnostic: impl Into<String>) -> Self {
        Self::CompileFailed {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a new `BootstrapFailed` error.
    pub fn bootstrap_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BootstrapFailed {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `LoadFailed` error.
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is fatal for the whole process.
    ///
    /// Bootstrap failures poison every future instance, so the producer
    /// must not continue past one.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BootstrapFailed { .. })
    }
}
