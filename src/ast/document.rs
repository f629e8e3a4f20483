//! Document - YAML registry files for the CLI
//!
//! A document declares static resolvers (constant outputs, input echoes,
//! numeric products, forced failures), mutations, a request, and initial data.
//!
//! ```yaml
//! schema: attrgraph/registry@0.1
//! resolvers:
//!   - id: pi
//!     output: [pi]
//!     value: {pi: 3.14159}
//!   - id: tau
//!     input: [pi]
//!     output: [tau]
//!     product: {tau: [pi, 2]}
//! request: [tau]
//! ```

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::attr::{Attr, ResolverId};
use super::request::Request;
use super::resolver::{unknown_value, Entity, Mutate, Mutation, Resolve, ResolveContext, Resolver};
use super::shape::Shape;
use crate::error::{GraphError, Result};
use crate::index::Index;

/// Expected schema version for registry documents
pub const SCHEMA_V01: &str = "attrgraph/registry@0.1";

fn default_schema() -> String {
    SCHEMA_V01.to_string()
}

/// Registry document parsed from YAML
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub resolvers: Vec<ResolverSpec>,
    #[serde(default)]
    pub mutations: Vec<MutationSpec>,
    #[serde(default)]
    pub request: Request,
    #[serde(default)]
    pub data: Entity,
}

/// Static resolver declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverSpec {
    pub id: ResolverId,
    #[serde(default)]
    pub input: Shape,
    #[serde(default)]
    pub optional: Shape,
    pub output: Shape,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub batch: bool,
    /// Constant output values
    #[serde(default)]
    pub value: Entity,
    /// output attr → input attr copied verbatim
    #[serde(default)]
    pub echo: FxHashMap<Attr, Attr>,
    /// output attr → factors (input attr names or numbers)
    #[serde(default)]
    pub product: FxHashMap<Attr, Vec<Value>>,
    /// Outputs returned as the "not produced" sentinel
    #[serde(default)]
    pub unknown: Vec<Attr>,
    /// Always fail with this reason
    #[serde(default)]
    pub fail: Option<String>,
    /// Suspend for this long before answering
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// Static mutation declaration: output is `value` merged with the call params
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutationSpec {
    pub id: ResolverId,
    pub output: Shape,
    #[serde(default)]
    pub value: Entity,
    #[serde(default)]
    pub fail: Option<String>,
}

impl Document {
    /// Parse a document from YAML text
    pub fn parse(yaml: &str) -> Result<Self> {
        let doc: Document = serde_yaml::from_str(yaml).map_err(|e| GraphError::ParseError {
            details: e.to_string(),
        })?;
        doc.validate_schema()?;
        Ok(doc)
    }

    /// Read and parse a document file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn validate_schema(&self) -> Result<()> {
        if self.schema != SCHEMA_V01 {
            return Err(GraphError::ParseError {
                details: format!(
                    "unsupported schema '{}' (expected '{}')",
                    self.schema, SCHEMA_V01
                ),
            });
        }
        Ok(())
    }

    /// Build the index described by this document
    pub fn index(&self) -> Index {
        let index = Index::from_resolvers(self.resolvers.iter().map(ResolverSpec::build));
        self.mutations
            .iter()
            .fold(index, |index, spec| index.register_mutation(spec.build()))
    }
}

impl ResolverSpec {
    pub fn build(&self) -> Resolver {
        let builder = Resolver::builder(&self.id)
            .input_shape(self.input.clone())
            .output_shape(self.output.clone())
            .priority(self.priority);
        let builder = self
            .optional
            .attrs()
            .fold(builder, |b, attr| b.optional([attr]));
        builder.with(std::sync::Arc::new(StaticBody(self.clone())), self.batch)
    }
}

impl MutationSpec {
    pub fn build(&self) -> Mutation {
        Mutation::with(&self.id, self.output.clone(), std::sync::Arc::new(self.clone()))
    }
}

struct StaticBody(ResolverSpec);

impl StaticBody {
    fn compute(&self, input: &Entity) -> Result<Entity> {
        let spec = &self.0;
        if let Some(reason) = &spec.fail {
            return Err(GraphError::resolver(spec.id.as_str(), reason.clone()));
        }

        let mut out = spec.value.clone();
        for (target, source) in &spec.echo {
            if let Some(value) = input.get(source.as_str()) {
                out.insert(target.to_string(), value.clone());
            }
        }
        for (target, factors) in &spec.product {
            let mut acc = 1.0_f64;
            for factor in factors {
                acc *= factor_value(spec, input, factor)?;
            }
            out.insert(target.to_string(), Value::from(acc));
        }
        for attr in &spec.unknown {
            out.insert(attr.to_string(), unknown_value());
        }
        Ok(out)
    }
}

fn factor_value(spec: &ResolverSpec, input: &Entity, factor: &Value) -> Result<f64> {
    let numeric = match factor {
        Value::String(attr) => match input.get(attr) {
            Some(value) => value.as_f64(),
            None => {
                return Err(GraphError::MissingInput {
                    resolver: spec.id.to_string(),
                    attr: attr.clone(),
                })
            }
        },
        other => other.as_f64(),
    };
    numeric.ok_or_else(|| {
        GraphError::resolver(
            spec.id.as_str(),
            match factor {
                Value::String(attr) => format!("'{}' is not numeric", attr),
                other => format!("factor {} is not numeric", other),
            },
        )
    })
}

#[async_trait]
impl Resolve for StaticBody {
    async fn resolve(&self, _ctx: &ResolveContext, input: Entity) -> Result<Entity> {
        if let Some(ms) = self.0.delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        self.compute(&input)
    }
}

#[async_trait]
impl Mutate for MutationSpec {
    async fn mutate(&self, _ctx: &ResolveContext, params: Value) -> Result<Entity> {
        if let Some(reason) = &self.fail {
            return Err(GraphError::mutation(self.id.as_str(), reason.clone()));
        }
        let mut out = self.value.clone();
        if let Value::Object(params) = params {
            out.extend(params);
        }
        Ok(out)
    }
}

/// Entity helper for callers building data by hand
pub fn entity<I, K>(pairs: I) -> Entity
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v))
        .collect::<Map<String, Value>>()
}
