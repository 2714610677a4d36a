//! Error types for the server binary.
//!
//! [`StartupError`] covers everything that stops the server from coming
//! up. Once running, failures are absorbed by the pipeline and never reach
//! `main`.

/// Top-level startup error.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ropt_core::ConfigError,
    },

    /// A backing service stayed unreachable through every retry.
    #[error("{service} unavailable after {attempts} attempts: {message}")]
    Unavailable {
        /// Service name (`postgres`, `dragonfly`, `nats`).
        service: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        message: String,
    },

    /// A core setup step failed.
    #[error("core error: {source}")]
    Core {
        /// The underlying core error.
        #[from]
        source: ropt_core::CoreError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: ropt_observer::ServerError,
    },
}
