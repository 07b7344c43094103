use std::collections::btree_set;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt::{self, Display};
use std::str::FromStr;

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
/// The unique name/address a node is known by within the cluster.
///
/// Identities commonly take the `name@host` shape, but any string is
/// accepted. Ordering is lexicographic.
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host part of a `name@host` identity.
    ///
    /// Identities without an `@` are returned as-is.
    pub fn host(&self) -> &str {
        match self.0.split_once('@') {
            Some((_, host)) => host,
            None => &self.0,
        }
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
/// A deduplicated set of node identities.
///
/// Iteration is in lexicographic order of the identities, which makes
/// "the first node" of a set well defined.
pub struct NodeSet(BTreeSet<NodeId>);

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: impl Into<NodeId>) -> bool {
        self.0.insert(node.into())
    }

    #[inline]
    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains(node)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first node in enumeration order.
    pub fn first(&self) -> Option<&NodeId> {
        self.0.iter().next()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, NodeId> {
        self.0.iter()
    }

    /// Returns a copy of the set with `node` removed.
    pub fn without(&self, node: &NodeId) -> NodeSet {
        self.0.iter().filter(|n| *n != node).cloned().collect()
    }
}

impl Display for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, node) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", node)?;
        }
        f.write_str("]")
    }
}

impl<N: Into<NodeId>> FromIterator<N> for NodeSet {
    fn from_iter<T: IntoIterator<Item = N>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for NodeSet {
    type Item = NodeId;
    type IntoIter = btree_set::IntoIter<NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = &'a NodeId;
    type IntoIter = btree_set::Iter<'a, NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
/// How the membership store should keep its copy of the data once joined.
///
/// This is handed to the membership store untouched.
pub enum NodeType {
    #[default]
    Disc,
    Ram,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Disc => "disc",
            NodeType::Ram => "ram",
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
