//! # skillcap
//!
//! Turns an agent's live browsing of a web application into a reusable,
//! replayable description of that application's JSON APIs. Drive an
//! instrumented browser through a site, feed every HTTP exchange to a
//! [`SkillGenerator`], and at session end write a signed [`SkillFile`]
//! per domain. Later, replay any recorded endpoint directly against the
//! origin with [`replay()`], bypassing the DOM, while the replay layer
//! transparently refreshes expired OAuth tokens and validates every
//! outbound URL against SSRF and redirect attacks.
//!
//! ## Supported Operations
//!
//! - Capture filtering: [`should_capture`]
//! - Endpoint inference: [`SkillGenerator::add_exchange`]
//! - Path parameterization and pagination detection: [`parameterize_path`],
//!   [`detect_pagination`]
//! - Token/JWT analysis and PII scrubbing: [`is_likely_token`], [`scrub_pii`]
//! - GraphQL and OAuth detection: [`is_graphql`], [`detect_oauth_token_request`]
//! - Skill-file signing and storage: [`SkillStore`]
//! - Credential vault: [`Vault`]
//! - OAuth token refresh: [`refresh_oauth`]
//! - At-most-once refresh coordination: [`RefreshDispatcher`]
//! - Endpoint replay: [`replay()`], [`replay_multiple`]
//! - Contract drift detection: [`diff_contract`]
//! - "Browse this URL" orchestration: [`Orchestrator::browse`]
//!
//! ## Installation
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! skillcap = "0.1"
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use skillcap::{CaptureCandidate, SkillGenerator, SkillStore, Config, should_capture};
//!
//! # fn main() -> skillcap::Result<()> {
//! let config = Config::from_env();
//! let store = SkillStore::new(config);
//!
//! let mut generator = SkillGenerator::new("api.example.com", "https://api.example.com");
//! let candidate = CaptureCandidate {
//!     url: "https://api.example.com/items?limit=10",
//!     status: 200,
//!     content_type: Some("application/json"),
//! };
//! assert!(should_capture(&candidate));
//!
//! let skill = generator.to_skill_file("api.example.com");
//! store.store(skill)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Behavior
//!
//! All fallible APIs return [`Result`](crate::Result), backed by
//! [`Error`](crate::Error).
//!
//! - Input errors (bad URL, bad domain, unknown endpoint id) surface as
//!   [`Error::InvalidInput`], [`Error::InvalidDomain`], or
//!   [`Error::EndpointNotFound`] and are never retried.
//! - Safety violations (SSRF rejection, redirect-policy violation,
//!   forbidden header) surface as [`Error::Ssrf`] and are never masked.
//! - Auth/refresh failures surface as [`Error::InvalidAuth`] or
//!   [`Error::Server`]; a replay that requested a refresh falls back to
//!   the original 401 with no further retry.
//! - I/O failures (fetch, timeout, decrypt) surface as [`Error::Http`]
//!   or [`Error::Io`], except [`Vault::retrieve`], which returns `None`
//!   on decrypt failure rather than an error, so a caller can never
//!   distinguish a wrong key from a missing credential.
//! - Contract drift is never an error: it is always a set of warnings
//!   attached to a successful [`ReplayResult`].
//!
//! **Non-goals:** this crate does not proxy traffic, does not modify
//! responses, does not schedule background refresh, and does not offer
//! a UI for editing skill files. The instrumented-browser driver, CLI
//! surface, third-party content-site decoders, generic HTML→markdown
//! extraction, MCP tool server, and discovery probes are collaborators
//! outside this crate.

mod capture_filter;
mod config;
mod contract_diff;
mod detectors;
mod dispatcher;
mod error;
mod generator;
mod model;
mod oauth_refresh;
mod orchestrator;
mod path_infer;
mod replay;
mod skill_store;
mod token_analyzer;
mod url_safety;
mod vault;

pub use capture_filter::{is_domain_match, should_capture, CaptureCandidate};
pub use config::Config;
pub use contract_diff::{diff as diff_contract, DiffEntry, Severity};
pub use detectors::{detect_oauth_token_request, graphql_dynamic_variables, graphql_operation_name, is_graphql, OAuthTokenRequest};
pub use dispatcher::{DispatchResult, RefreshDispatcher};
pub use error::{Error, Result};
pub use generator::SkillGenerator;
pub use model::*;
pub use oauth_refresh::{refresh_oauth, RefreshResult};
pub use orchestrator::{BrowseGuidance, BrowseOptions, BrowseOutcome, BrowseSuccess, Orchestrator};
pub use path_infer::{clean_framework_path, detect_pagination, parameterize_path, PaginationMatch};
pub use replay::{replay, replay_multiple, BatchRequest, BatchResult, ReplayBatchOptions, ReplayOptions, ReplayResult};
pub use skill_store::SkillStore;
pub use token_analyzer::{
    detect_body_variables, detect_refreshable_tokens, is_likely_token, is_refreshable_token, parse_jwt_claims,
    scrub_pii, shannon_entropy, Confidence, JwtClaims, TokenFormat, TokenVerdict,
};
pub use url_safety::{resolve_and_validate, validate, validate_redirect, ResolvedVerdict, Verdict};
pub use vault::Vault;
