use serde::{Deserialize, Serialize};

/// The learned description of a family of exchanges, keyed by
/// `(method, parameterized path)` or, for GraphQL, by
/// `(method, path, operation name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable identifier, slugified from method and path (or
    /// `post-graphql-<Operation>` for GraphQL operations).
    pub id: String,
    /// HTTP method, upper-cased.
    pub method: String,
    /// Parameterized path, e.g. `/users/:id`.
    pub path: String,
    /// GraphQL operation name, when this endpoint is a GraphQL operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Observed query parameters with an example value and inferred type.
    #[serde(default)]
    pub query_params: Vec<QueryParam>,
    /// Filtered header template; credential values are replaced by
    /// `"[stored]"`.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Summary of the response shape.
    pub response_shape: ResponseShape,
    /// Full recursive response schema, captured only when schema
    /// snapshotting is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<SchemaNode>,
    /// Request-body template, for POST/PUT/PATCH endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<BodyTemplate>,
    /// Pagination style, if detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationDescriptor>,
    /// Replayability classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayability: Option<ReplayabilityTier>,
    /// Response size in bytes, from the example exchange.
    pub response_size_bytes: usize,
    /// A single example request URL.
    pub example_url: String,
    /// Optional response preview (disabled by default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    /// Number of times this endpoint's key was observed.
    #[serde(default)]
    pub observation_count: u64,
}

/// An observed query parameter, with an example value and inferred type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub example: String,
}

/// Top-level shape summary of a response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseShape {
    #[serde(rename = "type")]
    pub kind: ResponseShapeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// Coarse response-body type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShapeKind {
    Array,
    Object,
    String,
    Number,
    Bool,
    Null,
}

/// Recursive response schema tree, capped at depth 5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaNode {
    #[serde(rename = "type")]
    pub kind: SchemaNodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<std::collections::BTreeMap<String, SchemaNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,
    #[serde(default)]
    pub nullable: bool,
}

/// Coarse JSON type tag used by [`SchemaNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaNodeKind {
    Array,
    Object,
    String,
    Number,
    Bool,
    Null,
}

/// Request-body template for POST/PUT/PATCH endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyTemplate {
    pub content_type: String,
    /// The captured body with credential/session values cleared, or (for
    /// GraphQL) the query text verbatim.
    pub template: serde_json::Value,
    /// Dotted JSON paths of values that vary per-call (timestamps,
    /// pagination cursors, identifiers, ...).
    #[serde(default)]
    pub variables: Vec<String>,
    /// Dotted JSON paths of refreshable session tokens (CSRF, nonce, ...).
    #[serde(default)]
    pub refreshable_tokens: Vec<String>,
}

/// Detected pagination style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationDescriptor {
    #[serde(rename = "type")]
    pub kind: PaginationKind,
    pub param_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_param: Option<String>,
}

/// Pagination family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationKind {
    Offset,
    Cursor,
    Page,
}

/// A replayability classification plus the evidence behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayabilityTier {
    pub tier: ReplayTier,
    pub verified: bool,
    #[serde(default)]
    pub signals: Vec<String>,
}

/// Replayability classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayTier {
    /// Verified 2xx replay with matching shape.
    Green,
    /// Auth required.
    Yellow,
    /// CSRF or other non-2xx but recoverable.
    Orange,
    /// Unreachable.
    Red,
    /// Not classified.
    Unknown,
}

impl Default for ReplayTier {
    fn default() -> Self {
        ReplayTier::Unknown
    }
}
