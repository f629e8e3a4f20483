//! Attribute and resolver names (interned Arc<str>)
//!
//! Both are opaque, comparable identifiers. A `/` separates an optional
//! namespace from the local name: `user/email`.

use std::borrow::Borrow;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GraphError, Result};
use crate::util::intern;

/// Allowed characters for names: `ns/local` or `local`
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_@][A-Za-z0-9_.\-?!*+]*(/[A-Za-z0-9_.\-?!*+@]+)?$").unwrap()
});

macro_rules! interned_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Intern a name without validation
            pub fn new(name: &str) -> Self {
                Self(intern(name))
            }

            /// Intern a name after checking its syntax
            pub fn parse(name: &str) -> Result<Self> {
                if NAME_RE.is_match(name) {
                    Ok(Self::new(name))
                } else {
                    Err(GraphError::ParseError {
                        details: format!("invalid name '{}'", name),
                    })
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Namespace part (`user` in `user/email`)
            pub fn namespace(&self) -> Option<&str> {
                self.0.split_once('/').map(|(ns, _)| ns)
            }

            /// Local part (`email` in `user/email`)
            pub fn local(&self) -> &str {
                self.0.split_once('/').map_or(&*self.0, |(_, local)| local)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self::new(&name)
            }
        }

        impl From<&$name> for $name {
            fn from(name: &$name) -> Self {
                name.clone()
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

interned_name!(
    /// Opaque, namespaced identifier for a unit of data
    Attr
);

interned_name!(
    /// Identifier of a registered resolver or mutation
    ResolverId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_and_local_parts() {
        let attr = Attr::new("user/email");
        assert_eq!(attr.namespace(), Some("user"));
        assert_eq!(attr.local(), "email");

        let bare = Attr::new("tau");
        assert_eq!(bare.namespace(), None);
        assert_eq!(bare.local(), "tau");
    }

    #[test]
    fn parse_rejects_bad_names() {
        assert!(Attr::parse("user/email").is_ok());
        assert!(Attr::parse("valid?").is_ok());
        assert!(Attr::parse("").is_err());
        assert!(Attr::parse("has space").is_err());
        assert!(Attr::parse("a/b/c").is_err());
    }

    #[test]
    fn interned_names_share_storage() {
        let a = Attr::new("shared/name");
        let b = Attr::from("shared/name");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn ordering_is_lexical() {
        let mut names = vec![Attr::new("b"), Attr::new("a/z"), Attr::new("a")];
        names.sort();
        let ordered: Vec<&str> = names.iter().map(Attr::as_str).collect();
        assert_eq!(ordered, vec!["a", "a/z", "b"]);
    }

    #[test]
    fn serde_round_trips_as_string() {
        let attr: Attr = serde_json::from_str("\"user/id\"").unwrap();
        assert_eq!(attr.as_str(), "user/id");
        assert_eq!(serde_json::to_string(&attr).unwrap(), "\"user/id\"");
        assert!(serde_json::from_str::<Attr>("\"bad name\"").is_err());
    }
}
