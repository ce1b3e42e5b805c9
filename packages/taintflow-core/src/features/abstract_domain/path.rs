//! Access paths
//!
//! A location within a value: a sequence of labels descending through
//! fields, dictionary keys, or the wildcard index. Paths key the domain
//! tree and appear verbatim in model declarations (`AppliesTo[0, ...]`,
//! `foo.bar`).

use serde::{Deserialize, Serialize};

/// One step of an access path.
///
/// `AnyIndex` (`[*]`) abstracts every `Field` not otherwise present in a
/// tree. `DictionaryKeys` (`[**keys]`) tracks taint on the keys themselves
/// and is deliberately disjoint from `AnyIndex`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathLabel {
    Field(String),
    DictionaryKeys,
    AnyIndex,
}

impl PathLabel {
    pub fn field(name: impl Into<String>) -> Self {
        PathLabel::Field(name.into())
    }
}

impl std::fmt::Display for PathLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathLabel::Field(name) => write!(f, "[{name}]"),
            PathLabel::DictionaryKeys => write!(f, "[**keys]"),
            PathLabel::AnyIndex => write!(f, "[*]"),
        }
    }
}

/// A sequence of labels from a value root to a location within it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessPath(Vec<PathLabel>);

impl AccessPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(labels: Vec<PathLabel>) -> Self {
        Self(labels)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[PathLabel] {
        &self.0
    }

    pub fn push(&mut self, label: PathLabel) {
        self.0.push(label);
    }

    /// `self` extended by one label, leaving `self` untouched
    pub fn child(&self, label: PathLabel) -> AccessPath {
        let mut labels = self.0.clone();
        labels.push(label);
        AccessPath(labels)
    }

    /// Split into first label and remainder
    pub fn split_first(&self) -> Option<(&PathLabel, AccessPath)> {
        self.0
            .split_first()
            .map(|(head, rest)| (head, AccessPath(rest.to_vec())))
    }

    /// Truncate to at most `depth` labels
    pub fn truncated(&self, depth: usize) -> AccessPath {
        AccessPath(self.0.iter().take(depth).cloned().collect())
    }
}

impl From<Vec<PathLabel>> for AccessPath {
    fn from(labels: Vec<PathLabel>) -> Self {
        AccessPath(labels)
    }
}

impl FromIterator<PathLabel> for AccessPath {
    fn from_iter<I: IntoIterator<Item = PathLabel>>(iter: I) -> Self {
        AccessPath(iter.into_iter().collect())
    }
}

impl std::fmt::Display for AccessPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for label in &self.0 {
            write!(f, "{label}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip_shape() {
        let path = AccessPath::new(vec![
            PathLabel::field("request"),
            PathLabel::AnyIndex,
            PathLabel::DictionaryKeys,
        ]);
        assert_eq!(path.to_string(), "[request][*][**keys]");
    }

    #[test]
    fn test_split_first() {
        let path = AccessPath::new(vec![PathLabel::field("a"), PathLabel::field("b")]);
        let (head, rest) = path.split_first().unwrap();

        assert_eq!(head, &PathLabel::field("a"));
        assert_eq!(rest, AccessPath::new(vec![PathLabel::field("b")]));
        assert!(AccessPath::root().split_first().is_none());
    }
}
