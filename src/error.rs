//! Crate-wide error type.
//!
//! Input errors and safety violations (SSRF, redirect, forbidden header)
//! always surface. I/O and credential-related absence prefer "not
//! available" over a distinguishable failure, so the vault's `retrieve`
//! path (`src/vault.rs`) returns `None` rather than an `Error` on decrypt
//! failure.

/// The error type for every `skillcap` operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied input was invalid (bad URL, bad domain, unknown
    /// endpoint id, ...). Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A domain name failed the path-safety check before becoming a
    /// filesystem path.
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// No endpoint with the given id exists in the skill file.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    /// A URL or redirect target failed SSRF classification, or a redirect
    /// chain exceeded the one-hop limit. A security property, never
    /// masked.
    #[error("unsafe URL rejected: {0}")]
    Ssrf(String),

    /// Authentication data was malformed or incomplete.
    #[error("invalid auth: {0}")]
    InvalidAuth(String),

    /// The origin server returned a non-2xx response or an in-band error
    /// payload.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// A skill-file signature failed to verify, or a foreign signature
    /// could not be validated on import.
    #[error("signature error: {0}")]
    Signature(String),

    /// Vault encryption/decryption or key-derivation failed. Never
    /// surfaced from `retrieve`, only used where a caller can act on
    /// the distinction (e.g. `store`).
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// A specialized `Result` for `skillcap` operations.
pub type Result<T> = std::result::Result<T, Error>;
