//! Shape - nested attribute requirement trees
//!
//! A shape maps each attribute to the nested shape required under it; a leaf
//! attribute maps to the empty shape. BTreeMap keeps iteration sorted so plans
//! and fingerprints are deterministic.
//!
//! YAML/JSON accept two forms:
//! - list: `[a, b, {user: [user/name]}]`
//! - map: `{a: {}, user: {user/name: {}}}`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::attr::Attr;
use crate::util::Fingerprinter;

/// Key marking an unordered collection value: `{"@set": [...]}`
pub const SET_KEY: &str = "@set";

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "ShapeRepr", into = "ShapeRepr")]
pub struct Shape(BTreeMap<Attr, Shape>);

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat shape from attribute names
    pub fn leaf<I, A>(attrs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Attr>,
    {
        Self(
            attrs
                .into_iter()
                .map(|a| (a.into(), Shape::new()))
                .collect(),
        )
    }

    /// Builder: add an attribute with a nested shape
    pub fn with(mut self, attr: impl Into<Attr>, nested: Shape) -> Self {
        self.insert(attr.into(), nested);
        self
    }

    /// Insert, deep-merging into an existing entry
    pub fn insert(&mut self, attr: Attr, nested: Shape) {
        self.0.entry(attr).or_default().merge(&nested);
    }

    pub fn get(&self, attr: &str) -> Option<&Shape> {
        self.0.get(attr)
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.0.contains_key(attr)
    }

    pub fn attrs(&self) -> impl Iterator<Item = &Attr> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Attr, &Shape)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deep union with another shape
    pub fn merge(&mut self, other: &Shape) {
        for (attr, nested) in &other.0 {
            self.0.entry(attr.clone()).or_default().merge(nested);
        }
    }

    /// Top-level attributes of `self` absent from `known`
    pub fn missing_from(&self, known: &Shape) -> Shape {
        Self(
            self.0
                .iter()
                .filter(|(attr, _)| !known.contains(attr.as_str()))
                .map(|(attr, nested)| (attr.clone(), nested.clone()))
                .collect(),
        )
    }

    /// Derive the shape of a data tree
    ///
    /// Collections contribute the union of their element shapes.
    pub fn from_data(data: &Map<String, Value>) -> Self {
        let mut shape = Shape::new();
        for (key, value) in data {
            shape.insert(Attr::new(key), Self::from_value(value));
        }
        shape
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => match map.get(SET_KEY) {
                Some(Value::Array(items)) if map.len() == 1 => Self::from_items(items),
                _ => Self::from_data(map),
            },
            Value::Array(items) => Self::from_items(items),
            _ => Self::new(),
        }
    }

    fn from_items(items: &[Value]) -> Self {
        let mut shape = Shape::new();
        for item in items {
            shape.merge(&Self::from_value(item));
        }
        shape
    }

    /// Project `data` onto this shape, keeping only declared attributes
    pub fn project(&self, data: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for (attr, nested) in &self.0 {
            if let Some(value) = data.get(attr.as_str()) {
                out.insert(attr.to_string(), nested.project_value(value));
            }
        }
        out
    }

    fn project_value(&self, value: &Value) -> Value {
        if self.is_empty() {
            return value.clone();
        }
        match value {
            Value::Object(map) => match map.get(SET_KEY) {
                Some(Value::Array(items)) if map.len() == 1 => {
                    let mut set = Map::new();
                    set.insert(
                        SET_KEY.to_string(),
                        Value::Array(items.iter().map(|i| self.project_value(i)).collect()),
                    );
                    Value::Object(set)
                }
                _ => Value::Object(self.project(map)),
            },
            Value::Array(items) => {
                Value::Array(items.iter().map(|i| self.project_value(i)).collect())
            }
            other => other.clone(),
        }
    }

    /// Feed this shape into a fingerprint
    pub fn fingerprint_into(&self, fp: &mut Fingerprinter) {
        fp.tag(b'{');
        for (attr, nested) in &self.0 {
            fp.str(attr.as_str());
            nested.fingerprint_into(fp);
        }
        fp.tag(b'}');
    }

    /// Nested JSON object view (leaves are `{}`)
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(attr, nested)| (attr.to_string(), nested.to_json()))
                .collect(),
        )
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl<A: Into<Attr>> FromIterator<A> for Shape {
    fn from_iter<T: IntoIterator<Item = A>>(iter: T) -> Self {
        Self::leaf(iter)
    }
}

// ═══════════════════════════════════════════════════════════════
// Serde representation
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ShapeRepr {
    List(Vec<ShapeItem>),
    Map(BTreeMap<Attr, ShapeRepr>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ShapeItem {
    Name(Attr),
    Nested(BTreeMap<Attr, ShapeRepr>),
}

impl From<ShapeRepr> for Shape {
    fn from(repr: ShapeRepr) -> Self {
        let mut shape = Shape::new();
        match repr {
            ShapeRepr::List(items) => {
                for item in items {
                    match item {
                        ShapeItem::Name(attr) => shape.insert(attr, Shape::new()),
                        ShapeItem::Nested(map) => {
                            for (attr, nested) in map {
                                shape.insert(attr, nested.into());
                            }
                        }
                    }
                }
            }
            ShapeRepr::Map(map) => {
                for (attr, nested) in map {
                    shape.insert(attr, nested.into());
                }
            }
        }
        shape
    }
}

impl From<Shape> for ShapeRepr {
    fn from(shape: Shape) -> Self {
        ShapeRepr::List(
            shape
                .0
                .into_iter()
                .map(|(attr, nested)| {
                    if nested.is_empty() {
                        ShapeItem::Name(attr)
                    } else {
                        ShapeItem::Nested(BTreeMap::from([(attr, nested.into())]))
                    }
                })
                .collect(),
        )
    }
}
