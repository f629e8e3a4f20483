// Fields read only through #[error] format strings trip unused_assignments
#![allow(unused_assignments)]

//! attrgraph Error Types with Error Codes
//!
//! Error code ranges:
//! - AG-010-019: Planning diagnostics
//! - AG-020-029: Resolver execution errors
//! - AG-030-039: Batch errors
//! - AG-040-049: Nested processing errors
//! - AG-050-059: Mutation errors
//! - AG-060-069: Graph validation errors
//! - AG-090-099: Config/IO/parse errors
//!
//! Resolver, batch and nested errors are captured per node by the runner and
//! never abort a run. Only configuration and document loading surface as
//! `Err` to callers.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
#[diagnostic(url(docsrs))]
pub enum GraphError {
    // ═══════════════════════════════════════════
    // PLANNING (010-019)
    // ═══════════════════════════════════════════
    #[error("[AG-010] No resolver path reaches attribute '{attr}'")]
    #[diagnostic(
        code(attrgraph::unreachable),
        help("Register a resolver that outputs this attribute or provide it as initial data")
    )]
    Unreachable { attr: String },

    // ═══════════════════════════════════════════
    // RESOLVER EXECUTION (020-029)
    // ═══════════════════════════════════════════
    #[error("[AG-020] Resolver '{resolver}' failed: {reason}")]
    #[diagnostic(code(attrgraph::resolver_failed))]
    ResolverFailed { resolver: String, reason: String },

    #[error("[AG-021] Resolver '{resolver}' returned invalid output: {reason}")]
    #[diagnostic(
        code(attrgraph::invalid_output),
        help("Resolvers must return a JSON object keyed by attribute")
    )]
    InvalidOutput { resolver: String, reason: String },

    #[error("[AG-022] Resolver '{resolver}' is missing required input '{attr}'")]
    #[diagnostic(code(attrgraph::missing_input))]
    MissingInput { resolver: String, attr: String },

    // ═══════════════════════════════════════════
    // BATCH (030-039)
    // ═══════════════════════════════════════════
    #[error("[AG-030] Batch resolver '{resolver}' returned {actual} results for {expected} inputs")]
    #[diagnostic(
        code(attrgraph::batch_mismatch),
        help("Batch resolvers must return one output per input, in input order")
    )]
    BatchMismatch {
        resolver: String,
        expected: usize,
        actual: usize,
    },

    #[error("[AG-031] Batch resolver '{resolver}' output cannot be correlated on '{key}': {reason}")]
    #[diagnostic(
        code(attrgraph::batch_correlation),
        help("Every keyed batch output must carry the correlation key of exactly one input")
    )]
    BatchCorrelation {
        resolver: String,
        key: String,
        reason: String,
    },

    #[error("[AG-032] Collection at '{path}' cannot receive positional batch results")]
    #[diagnostic(code(attrgraph::unsupported_batch_target), severity(Warning))]
    UnsupportedBatchTarget { path: String },

    // ═══════════════════════════════════════════
    // NESTED PROCESSING (040-049)
    // ═══════════════════════════════════════════
    #[error("[AG-040] Nested value for '{attr}' cannot satisfy required attributes: {missing}")]
    #[diagnostic(code(attrgraph::nested_unsatisfied))]
    NestedUnsatisfied { attr: String, missing: String },

    #[error("[AG-041] Nested processing exceeded depth {max_depth} at '{attr}'")]
    #[diagnostic(
        code(attrgraph::nested_depth),
        help("Raise max_nested_depth in settings or check for recursive joins")
    )]
    NestedDepthExceeded { attr: String, max_depth: usize },

    // ═══════════════════════════════════════════
    // MUTATIONS (050-059)
    // ═══════════════════════════════════════════
    #[error("[AG-050] Mutation '{mutation}' failed: {reason}")]
    #[diagnostic(code(attrgraph::mutation_failed))]
    MutationFailed { mutation: String, reason: String },

    #[error("[AG-051] Mutation '{mutation}' is not registered")]
    #[diagnostic(code(attrgraph::unknown_mutation))]
    UnknownMutation { mutation: String },

    // ═══════════════════════════════════════════
    // GRAPH VALIDATION (060-069)
    // ═══════════════════════════════════════════
    #[error("[AG-060] Cycle detected in execution graph: {cycle}")]
    #[diagnostic(code(attrgraph::cycle_detected))]
    CycleDetected { cycle: String },

    #[error("[AG-061] Node {node} has no path to the graph root")]
    #[diagnostic(code(attrgraph::dangling_node))]
    DanglingNode { node: u32 },

    // ═══════════════════════════════════════════
    // CONFIG / IO / PARSE (090-099)
    // ═══════════════════════════════════════════
    #[error("[AG-090] Configuration error: {reason}")]
    #[diagnostic(code(attrgraph::config_error))]
    ConfigError { reason: String },

    #[error("[AG-091] Failed to parse document: {details}")]
    #[diagnostic(
        code(attrgraph::parse_error),
        help("Check YAML syntax: indentation and quoting")
    )]
    ParseError { details: String },

    #[error("[AG-092] IO error: {0}")]
    #[diagnostic(code(attrgraph::io_error))]
    Io(String),

    #[error("[AG-093] JSON error: {0}")]
    #[diagnostic(code(attrgraph::json_error))]
    Json(String),

    #[error("[AG-094] YAML error: {0}")]
    #[diagnostic(code(attrgraph::yaml_error))]
    Yaml(String),
}

impl GraphError {
    /// Convenience constructor used by resolver bodies
    pub fn resolver(resolver: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResolverFailed {
            resolver: resolver.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor used by mutation bodies
    pub fn mutation(mutation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MutationFailed {
            mutation: mutation.into(),
            reason: reason.into(),
        }
    }

    /// Get the error code (e.g., "AG-020")
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "AG-010",
            Self::ResolverFailed { .. } => "AG-020",
            Self::InvalidOutput { .. } => "AG-021",
            Self::MissingInput { .. } => "AG-022",
            Self::BatchMismatch { .. } => "AG-030",
            Self::BatchCorrelation { .. } => "AG-031",
            Self::UnsupportedBatchTarget { .. } => "AG-032",
            Self::NestedUnsatisfied { .. } => "AG-040",
            Self::NestedDepthExceeded { .. } => "AG-041",
            Self::MutationFailed { .. } => "AG-050",
            Self::UnknownMutation { .. } => "AG-051",
            Self::CycleDetected { .. } => "AG-060",
            Self::DanglingNode { .. } => "AG-061",
            Self::ConfigError { .. } => "AG-090",
            Self::ParseError { .. } => "AG-091",
            Self::Io(_) => "AG-092",
            Self::Json(_) => "AG-093",
            Self::Yaml(_) => "AG-094",
        }
    }

    /// Errors the runner captures on a node instead of propagating
    pub fn is_node_local(&self) -> bool {
        matches!(
            self,
            Self::ResolverFailed { .. }
                | Self::InvalidOutput { .. }
                | Self::MissingInput { .. }
                | Self::BatchMismatch { .. }
                | Self::BatchCorrelation { .. }
                | Self::NestedUnsatisfied { .. }
                | Self::NestedDepthExceeded { .. }
                | Self::MutationFailed { .. }
                | Self::UnknownMutation { .. }
        )
    }
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for GraphError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl FixSuggestion for GraphError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            GraphError::Unreachable { .. } => {
                Some("Register a resolver for the attribute or include it in the initial data")
            }
            GraphError::ResolverFailed { .. } => Some("Check the resolver inputs in the run stats"),
            GraphError::InvalidOutput { .. } => {
                Some("Return a JSON object keyed by the declared output attributes")
            }
            GraphError::MissingInput { .. } => {
                Some("Declare the attribute in the resolver input so the planner provides it")
            }
            GraphError::BatchMismatch { .. } => {
                Some("Return exactly one output per input, in input order")
            }
            GraphError::BatchCorrelation { .. } => {
                Some("Include the correlation key attribute in every batch output")
            }
            GraphError::UnsupportedBatchTarget { .. } => {
                Some("Use an ordered collection to enable batching")
            }
            GraphError::NestedUnsatisfied { .. } => {
                Some("Mark the nested attribute optional or register a resolver for it")
            }
            GraphError::NestedDepthExceeded { .. } => {
                Some("Raise max_nested_depth or break the recursive join")
            }
            GraphError::MutationFailed { .. } => Some("Check the mutation parameters"),
            GraphError::UnknownMutation { .. } => Some("Register the mutation in the index"),
            GraphError::CycleDetected { .. } => {
                Some("Planner output must be acyclic; report this as a bug")
            }
            GraphError::DanglingNode { .. } => {
                Some("Planner output must be single-rooted; report this as a bug")
            }
            GraphError::ConfigError { .. } => Some("Check ~/.config/attrgraph/config.toml"),
            GraphError::ParseError { .. } => Some("Check YAML syntax: indentation and quoting"),
            GraphError::Io(_) => Some("Check file path and permissions"),
            GraphError::Json(_) => Some("Ensure the value is valid JSON"),
            GraphError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
        }
    }
}
