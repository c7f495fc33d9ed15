//! Tree addresses
//!
//! Every entity in the store is named by an [`Address`]: a path of up to four
//! components `repository/model/object/field`. Addresses double as lock
//! identifiers, so the containment tests here are what conflict detection is
//! built on.
//!
//! # Containment
//!
//! - `a.is_ancestor_of(b)` holds when `a` is a prefix of `b` (including equal)
//! - `a.overlaps(b)` holds when either is an ancestor of the other
//!
//! Two lock sets conflict iff some pair of their addresses overlaps.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of components in an address
pub const MAX_DEPTH: usize = 4;

/// The level of the entity an address names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressLevel {
    /// The empty address (no components)
    Root,
    /// `repository`
    Repository,
    /// `repository/model`
    Model,
    /// `repository/model/object`
    Object,
    /// `repository/model/object/field`
    Field,
}

impl AddressLevel {
    fn from_depth(depth: usize) -> Self {
        match depth {
            0 => AddressLevel::Root,
            1 => AddressLevel::Repository,
            2 => AddressLevel::Model,
            3 => AddressLevel::Object,
            _ => AddressLevel::Field,
        }
    }
}

impl fmt::Display for AddressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressLevel::Root => "root",
            AddressLevel::Repository => "repository",
            AddressLevel::Model => "model",
            AddressLevel::Object => "object",
            AddressLevel::Field => "field",
        };
        f.write_str(name)
    }
}

/// Path of 0 to 4 components naming an entity in the tree
///
/// Ordering is lexicographic by component, so a parent always sorts before its
/// children. That property is relied on when lock sets are minimized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    segments: Vec<String>,
}

impl Address {
    /// The empty address
    pub fn root() -> Self {
        Address {
            segments: Vec::new(),
        }
    }

    /// Build an address from components, validating depth and ids
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.len() > MAX_DEPTH {
            return Err(Error::InvalidAddress(format!(
                "address has {} components, at most {} allowed",
                segments.len(),
                MAX_DEPTH
            )));
        }
        for segment in &segments {
            validate_id(segment)?;
        }
        Ok(Address { segments })
    }

    /// Address of a repository
    pub fn repository(repository: &str) -> Result<Self> {
        Self::from_segments([repository])
    }

    /// Address of a model inside a repository
    pub fn model(repository: &str, model: &str) -> Result<Self> {
        Self::from_segments([repository, model])
    }

    /// Address of an object inside a model
    pub fn object(repository: &str, model: &str, object: &str) -> Result<Self> {
        Self::from_segments([repository, model, object])
    }

    /// Address of a field inside an object
    pub fn field(repository: &str, model: &str, object: &str, field: &str) -> Result<Self> {
        Self::from_segments([repository, model, object, field])
    }

    /// Append one component, e.g. turn a model address into an object address
    pub fn child(&self, id: &str) -> Result<Self> {
        if self.segments.len() >= MAX_DEPTH {
            return Err(Error::InvalidAddress(format!(
                "cannot add '{}' below field address {}",
                id, self
            )));
        }
        validate_id(id)?;
        let mut segments = self.segments.clone();
        segments.push(id.to_string());
        Ok(Address { segments })
    }

    /// Parent address (None for the root)
    pub fn parent(&self) -> Option<Address> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Address {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Level of the named entity
    pub fn level(&self) -> AddressLevel {
        AddressLevel::from_depth(self.segments.len())
    }

    /// Number of components
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Components in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last component, i.e. the id of the named entity
    pub fn id(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Repository id
    pub fn repository_id(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Model id
    pub fn model_id(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    /// Object id
    pub fn object_id(&self) -> Option<&str> {
        self.segments.get(2).map(String::as_str)
    }

    /// Field id
    pub fn field_id(&self) -> Option<&str> {
        self.segments.get(3).map(String::as_str)
    }

    /// Truncate to the model level (None if this address is above it)
    pub fn model_address(&self) -> Option<Address> {
        self.truncated(2)
    }

    /// Truncate to the object level (None if this address is above it)
    pub fn object_address(&self) -> Option<Address> {
        self.truncated(3)
    }

    fn truncated(&self, depth: usize) -> Option<Address> {
        if self.segments.len() < depth {
            return None;
        }
        Some(Address {
            segments: self.segments[..depth].to_vec(),
        })
    }

    /// True if `self` is a prefix of `other` (an address is its own ancestor)
    pub fn is_ancestor_of(&self, other: &Address) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// True if `self` is a proper prefix of `other`
    pub fn is_strict_ancestor_of(&self, other: &Address) -> bool {
        self.segments.len() < other.segments.len() && self.is_ancestor_of(other)
    }

    /// True if `other` is a prefix of `self` (an address is its own descendant)
    pub fn is_descendant_of(&self, other: &Address) -> bool {
        other.is_ancestor_of(self)
    }

    /// True if `other` is a proper prefix of `self`
    pub fn is_strict_descendant_of(&self, other: &Address) -> bool {
        other.is_strict_ancestor_of(self)
    }

    /// Alias of [`Address::is_ancestor_of`] that reads better at call sites
    pub fn contains(&self, other: &Address) -> bool {
        self.is_ancestor_of(other)
    }

    /// Tree containment in either direction
    pub fn overlaps(&self, other: &Address) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidAddress("empty id".to_string()));
    }
    if id.contains('/') {
        return Err(Error::InvalidAddress(format!(
            "id '{}' must not contain '/'",
            id
        )));
    }
    Ok(())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse `/repo/model/object/field` (leading slash optional)
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix('/').unwrap_or(s);
        if trimmed.is_empty() {
            return Ok(Address::root());
        }
        Address::from_segments(trimmed.split('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_levels() {
        assert_eq!(Address::root().level(), AddressLevel::Root);
        assert_eq!(addr("/r").level(), AddressLevel::Repository);
        assert_eq!(addr("/r/m").level(), AddressLevel::Model);
        assert_eq!(addr("/r/m/o").level(), AddressLevel::Object);
        assert_eq!(addr("/r/m/o/f").level(), AddressLevel::Field);
    }

    #[test]
    fn test_parse_and_display() {
        let a = Address::field("repo", "model", "obj", "f").unwrap();
        assert_eq!(a.to_string(), "/repo/model/obj/f");
        assert_eq!(addr("repo/model/obj/f"), a);
        assert_eq!(addr("/"), Address::root());
    }

    #[test]
    fn test_rejects_bad_addresses() {
        assert!("/a/b/c/d/e".parse::<Address>().is_err());
        assert!("/a//c".parse::<Address>().is_err());
        assert!(addr("/a/b/c/d").child("x").is_err());
        assert!(addr("/a").child("x/y").is_err());
    }

    #[test]
    fn test_ancestor_and_descendant() {
        let model = addr("/r/m");
        let object = addr("/r/m/o");
        let field = addr("/r/m/o/f");

        assert!(model.is_ancestor_of(&field));
        assert!(model.is_strict_ancestor_of(&object));
        assert!(object.is_ancestor_of(&object));
        assert!(!object.is_strict_ancestor_of(&object));
        assert!(field.is_descendant_of(&model));
        assert!(field.is_strict_descendant_of(&object));
        assert!(!field.is_ancestor_of(&object));
    }

    #[test]
    fn test_overlaps() {
        assert!(addr("/r/m/a").overlaps(&addr("/r/m/a/x")));
        assert!(addr("/r/m/a/x").overlaps(&addr("/r/m/a")));
        assert!(!addr("/r/m/a").overlaps(&addr("/r/m/b")));
        assert!(!addr("/r/m/a/x").overlaps(&addr("/r/m/a/y")));
    }

    #[test]
    fn test_truncation_and_ids() {
        let a = addr("/r/m/o/f");
        assert_eq!(a.model_address(), Some(addr("/r/m")));
        assert_eq!(a.object_address(), Some(addr("/r/m/o")));
        assert_eq!(a.parent(), Some(addr("/r/m/o")));
        assert_eq!(a.field_id(), Some("f"));
        assert_eq!(a.id(), Some("f"));
        assert_eq!(addr("/r").model_address(), None);
        assert_eq!(Address::root().parent(), None);
    }

    #[test]
    fn test_parent_sorts_before_child() {
        assert!(addr("/r/m") < addr("/r/m/a"));
        assert!(addr("/r/m/a") < addr("/r/m/a/f"));
    }

    fn arb_address() -> impl Strategy<Value = Address> {
        prop::collection::vec("[a-c]", 0..=MAX_DEPTH)
            .prop_map(|segs| Address::from_segments(segs).unwrap())
    }

    proptest! {
        #[test]
        fn prop_overlap_is_symmetric(a in arb_address(), b in arb_address()) {
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        #[test]
        fn prop_ancestor_is_antisymmetric(a in arb_address(), b in arb_address()) {
            if a.is_ancestor_of(&b) && b.is_ancestor_of(&a) {
                prop_assert_eq!(a, b);
            }
        }

        #[test]
        fn prop_parent_is_strict_ancestor(a in arb_address()) {
            if let Some(parent) = a.parent() {
                prop_assert!(parent.is_strict_ancestor_of(&a));
            }
        }

        #[test]
        fn prop_display_roundtrip(a in arb_address()) {
            prop_assert_eq!(a.to_string().parse::<Address>().unwrap(), a);
        }
    }
}
