//! Data model shared by every component: captured exchanges, learned
//! endpoints, skill files, and stored credentials.

mod credential;
mod endpoint;
mod exchange;
mod skill_file;

pub use credential::{AuthKind, StoredAuth, StoredSession, StoredToken};
pub use endpoint::{
    BodyTemplate, Endpoint, PaginationDescriptor, PaginationKind, QueryParam, ReplayTier,
    ReplayabilityTier, ResponseShape, ResponseShapeKind, SchemaNode, SchemaNodeKind,
};
pub use exchange::CapturedExchange;
pub use skill_file::{
    AuthDescriptor, BrowserCost, OAuthConfig, Provenance, SkillFile, SkillMetadata, CURRENT_VERSION,
};
