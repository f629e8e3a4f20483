//! Request - parsed tree of desired attributes
//!
//! Produced by an external parser (or the YAML document loader). Each entry
//! may carry opaque parameters, an optional flag, and a nested query for
//! joins. Mutation calls are kept alongside attribute entries in request
//! order.

use serde::Deserialize;
use serde_json::Value;

use super::attr::{Attr, ResolverId};
use super::shape::Shape;
use crate::util::Fingerprinter;

/// One requested attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttrRequest {
    pub attr: Attr,
    /// Passed verbatim to the resolver that sources this attribute
    pub params: Option<Value>,
    /// Unreachable optional entries never block their parent
    pub optional: bool,
    /// Nested query when the attribute is a join
    pub query: Option<Request>,
}

impl AttrRequest {
    pub fn new(attr: impl Into<Attr>) -> Self {
        Self {
            attr: attr.into(),
            params: None,
            optional: false,
            query: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_query(mut self, query: Request) -> Self {
        self.query = Some(query);
        self
    }
}

/// A mutation invocation with its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct MutationCall {
    pub mutation: ResolverId,
    pub params: Value,
    /// Query processed against the mutation output
    pub query: Option<Request>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestItem {
    Attr(AttrRequest),
    Mutation(MutationCall),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Request {
    items: Vec<RequestItem>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat request for the given attributes
    pub fn from_attrs<I, A>(attrs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Attr>,
    {
        attrs
            .into_iter()
            .fold(Self::new(), |req, attr| req.attr(attr))
    }

    pub fn attr(self, attr: impl Into<Attr>) -> Self {
        self.item(AttrRequest::new(attr))
    }

    pub fn optional(self, attr: impl Into<Attr>) -> Self {
        self.item(AttrRequest::new(attr).optional())
    }

    pub fn join(self, attr: impl Into<Attr>, query: Request) -> Self {
        self.item(AttrRequest::new(attr).with_query(query))
    }

    /// Add an entry; later duplicates of the same attribute are ignored
    pub fn item(mut self, item: AttrRequest) -> Self {
        if self.get(item.attr.as_str()).is_none() {
            self.items.push(RequestItem::Attr(item));
        }
        self
    }

    pub fn mutation(mut self, mutation: impl Into<ResolverId>, params: Value) -> Self {
        self.items.push(RequestItem::Mutation(MutationCall {
            mutation: mutation.into(),
            params,
            query: None,
        }));
        self
    }

    pub fn mutation_with_query(
        mut self,
        mutation: impl Into<ResolverId>,
        params: Value,
        query: Request,
    ) -> Self {
        self.items.push(RequestItem::Mutation(MutationCall {
            mutation: mutation.into(),
            params,
            query: Some(query),
        }));
        self
    }

    pub fn items(&self) -> &[RequestItem] {
        &self.items
    }

    /// Attribute entries in request order
    pub fn attrs(&self) -> impl Iterator<Item = &AttrRequest> {
        self.items.iter().filter_map(|item| match item {
            RequestItem::Attr(a) => Some(a),
            RequestItem::Mutation(_) => None,
        })
    }

    pub fn mutations(&self) -> impl Iterator<Item = &MutationCall> {
        self.items.iter().filter_map(|item| match item {
            RequestItem::Mutation(m) => Some(m),
            RequestItem::Attr(_) => None,
        })
    }

    pub fn get(&self, attr: &str) -> Option<&AttrRequest> {
        self.attrs().find(|a| a.attr.as_str() == attr)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Request every attribute of `shape`, nested shapes becoming joins
    pub fn from_shape(shape: &Shape) -> Self {
        shape.iter().fold(Self::new(), |req, (attr, nested)| {
            if nested.is_empty() {
                req.attr(attr.clone())
            } else {
                req.join(attr.clone(), Self::from_shape(nested))
            }
        })
    }

    /// Shape of every requested attribute (nested queries included)
    pub fn to_shape(&self) -> Shape {
        self.shape_filtered(true)
    }

    /// Shape of the non-optional attributes only
    pub fn required_shape(&self) -> Shape {
        self.shape_filtered(false)
    }

    fn shape_filtered(&self, include_optional: bool) -> Shape {
        let mut shape = Shape::new();
        for entry in self.attrs() {
            if entry.optional && !include_optional {
                continue;
            }
            let nested = entry
                .query
                .as_ref()
                .map(|q| q.shape_filtered(include_optional))
                .unwrap_or_default();
            shape.insert(entry.attr.clone(), nested);
        }
        shape
    }

    /// Feed the attribute part of this request into a fingerprint
    ///
    /// Params take part: they reach resolver nodes, so two requests that
    /// differ only in params must not share a cached plan.
    pub fn fingerprint_into(&self, fp: &mut Fingerprinter) {
        fp.tag(b'[');
        for entry in self.attrs() {
            fp.str(entry.attr.as_str());
            fp.tag(u8::from(entry.optional));
            if let Some(params) = &entry.params {
                fp.str(&params.to_string());
            }
            if let Some(query) = &entry.query {
                query.fingerprint_into(fp);
            }
        }
        fp.tag(b']');
    }
}

// ═══════════════════════════════════════════════════════════════
// Serde representation
// ═══════════════════════════════════════════════════════════════
//
//   - tau                                  # plain attribute
//   - attr: user/friends                   # full form
//     optional: true
//     params: {limit: 2}
//     query: [user/name]
//   - mutation: user/rename                # mutation call
//     params: {name: "x"}
//   - user/address: [address/city]         # join shorthand

#[derive(Deserialize)]
#[serde(untagged)]
enum ItemRepr {
    Name(Attr),
    Full {
        attr: Attr,
        #[serde(default)]
        params: Option<Value>,
        #[serde(default)]
        optional: bool,
        #[serde(default)]
        query: Option<Request>,
    },
    Mutation {
        mutation: ResolverId,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        query: Option<Request>,
    },
    Join(std::collections::BTreeMap<Attr, Request>),
}

impl<'de> Deserialize<'de> for RequestItem {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ItemRepr::deserialize(deserializer)?;
        Ok(match repr {
            ItemRepr::Name(attr) => RequestItem::Attr(AttrRequest::new(attr)),
            ItemRepr::Full {
                attr,
                params,
                optional,
                query,
            } => RequestItem::Attr(AttrRequest {
                attr,
                params,
                optional,
                query,
            }),
            ItemRepr::Mutation {
                mutation,
                params,
                query,
            } => RequestItem::Mutation(MutationCall {
                mutation,
                params,
                query,
            }),
            ItemRepr::Join(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((attr, query)), None) => {
                        RequestItem::Attr(AttrRequest::new(attr).with_query(query))
                    }
                    _ => {
                        return Err(serde::de::Error::custom(
                            "join shorthand takes exactly one attribute",
                        ))
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_keeps_order_and_ignores_duplicates() {
        let req = Request::new().attr("b").attr("a").attr("b");
        let names: Vec<&str> = req.attrs().map(|a| a.attr.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn required_shape_skips_optional() {
        let req = Request::new()
            .attr("a")
            .optional("b")
            .join("user", Request::new().attr("user/id").optional("user/nick"));
        let required = req.required_shape();
        assert!(required.contains("a"));
        assert!(!required.contains("b"));
        let user = required.get("user").unwrap();
        assert!(user.contains("user/id"));
        assert!(!user.contains("user/nick"));
        assert!(req.to_shape().contains("b"));
    }

    #[test]
    fn from_shape_turns_nesting_into_joins() {
        let shape = Shape::new()
            .with("id", Shape::new())
            .with("friends", Shape::leaf(["name"]));
        let req = Request::from_shape(&shape);
        assert!(req.get("id").unwrap().query.is_none());
        let friends = req.get("friends").unwrap().query.as_ref().unwrap();
        assert!(friends.get("name").is_some());
        assert_eq!(req.required_shape(), shape);
    }

    #[test]
    fn parses_all_yaml_forms() {
        let yaml = r#"
- tau
- attr: user/friends
  optional: true
  params: {limit: 2}
  query: [user/name]
- mutation: user/rename
  params: {name: "x"}
- user/address: [address/city]
"#;
        let req: Request = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(req.items().len(), 4);

        let friends = req.get("user/friends").unwrap();
        assert!(friends.optional);
        assert_eq!(friends.params, Some(json!({"limit": 2})));
        assert!(friends.query.as_ref().unwrap().get("user/name").is_some());

        let mutation = req.mutations().next().unwrap();
        assert_eq!(mutation.mutation.as_str(), "user/rename");
        assert_eq!(mutation.params, json!({"name": "x"}));

        let address = req.get("user/address").unwrap();
        assert!(address.query.as_ref().unwrap().get("address/city").is_some());
    }

    #[test]
    fn params_change_fingerprint() {
        let plain = Request::new().attr("a");
        let with_params = Request::new().item(AttrRequest::new("a").with_params(json!({"x": 1})));
        let mut fa = Fingerprinter::new();
        plain.fingerprint_into(&mut fa);
        let mut fb = Fingerprinter::new();
        with_params.fingerprint_into(&mut fb);
        assert_ne!(fa.finish(), fb.finish());
    }
}
