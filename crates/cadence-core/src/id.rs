use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a model (atomic or coupled) in the model tree.
    pub struct ModelId;

    /// Identifies a port declared on a model.
    pub struct PortId;
}

/// Symbolic identifier for models and ports.
///
/// Plain string wrapper with value equality, ordering and hashing, so it can
/// key maps and appear in error messages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    pub fn new(s: impl Into<String>) -> Self {
        Name(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_owned())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name(s)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == **other
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_equality() {
        let a = Name::from("gen");
        let b = Name::new("gen");
        let c = Name::from("recv");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, "gen");
    }

    #[test]
    fn names_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(Name::from("in"), 1);
        map.insert(Name::from("out"), 2);
        assert_eq!(map[&Name::from("out")], 2);
    }

    #[test]
    fn name_display() {
        assert_eq!(format!("{}", Name::from("cpu")), "cpu");
    }
}
