//! Search-expression tree and its reverse-Polish wire encoding (spec §6
//! "Search expressions").
//!
//! Grounded on `original_source/src/packet_struct.cpp`'s
//! `search_request_entry::save` (per-entry wire layout: type byte, then a
//! type-specific payload). The flatten order below (root, then left, then
//! right) reproduces the worked example in the distilled specification
//! rather than `original_source/src/search.cpp`'s actual `item_append`
//! algorithm, which scans tokens in reverse with an explicit operator
//! stack and produces a different grouping for mixed AND/OR/NOT chains.
//! Parsing a user-typed query string is out of scope here; callers build
//! the tree directly.

use ed2k_core::primitives::Writer;

use crate::error::{SearchError, SearchResult};

/// Maximum number of entries a single search expression may serialize to,
/// matching the real client's `SEARCH_REQ_ELEM_COUNT`.
pub const MAX_SEARCH_ELEMENTS: usize = 30;

const TYPE_BOOL: u8 = 0x00;
const TYPE_STR: u8 = 0x01;
const TYPE_STR_TAG: u8 = 0x02;
const TYPE_UINT32: u8 = 0x03;
const TYPE_UINT64: u8 = 0x08;

const OP_AND: u8 = 0;
const OP_OR: u8 = 1;
const OP_NOT: u8 = 2;

/// A comparison operator for a [`Node::Ranged`] term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Equal,
    /// `>`
    Greater,
    /// `<`
    Less,
    /// `>=`
    GreaterEqual,
    /// `<=`
    LessEqual,
    /// `!=`
    NotEqual,
}

impl CompareOp {
    fn wire(self) -> u8 {
        match self {
            CompareOp::Equal => 0,
            CompareOp::Greater => 1,
            CompareOp::Less => 2,
            CompareOp::GreaterEqual => 3,
            CompareOp::LessEqual => 4,
            CompareOp::NotEqual => 5,
        }
    }
}

/// How a typed/ranged term identifies its meta-tag (spec §6 "a meta-tag name
/// or id").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaTag {
    /// A well-known single-byte tag id (e.g. `FT_FILETYPE`).
    Id(u8),
    /// A free-form tag name, for server-specific meta-tags.
    Name(String),
}

impl MetaTag {
    fn write(&self, w: &mut Writer) {
        match self {
            MetaTag::Id(id) => {
                w.write_u16(1);
                w.write_u8(*id);
            }
            MetaTag::Name(name) => {
                w.write_u16(name.len() as u16);
                w.write_bytes(name.as_bytes());
            }
        }
    }
}

/// An integer value carried by a [`Node::Ranged`] term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntValue {
    /// 32-bit value, wire type `0x03`.
    U32(u32),
    /// 64-bit value, wire type `0x08`.
    U64(u64),
}

/// A node in a search-expression tree (spec §6 "tree of nodes").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Both operands must match.
    And(Box<Node>, Box<Node>),
    /// Either operand must match.
    Or(Box<Node>, Box<Node>),
    /// Left operand must match and right operand must not (binary exclusion,
    /// matching the real protocol's `SRE_NOT`).
    Not(Box<Node>, Box<Node>),
    /// A bare keyword/phrase term.
    Str(String),
    /// A string term scoped to a specific meta-tag (e.g. file type).
    TypedStr {
        /// Which meta-tag this term matches against.
        meta: MetaTag,
        /// The string value to match.
        value: String,
    },
    /// A numeric comparison against a meta-tag (e.g. filesize, bitrate).
    Ranged {
        /// Which meta-tag this term compares against.
        meta: MetaTag,
        /// The comparison operator.
        op: CompareOp,
        /// The value being compared against.
        value: IntValue,
    },
}

impl Node {
    /// Convenience constructor for an `AND` node.
    #[must_use]
    pub fn and(left: Node, right: Node) -> Self {
        Node::And(Box::new(left), Box::new(right))
    }

    /// Convenience constructor for an `OR` node.
    #[must_use]
    pub fn or(left: Node, right: Node) -> Self {
        Node::Or(Box::new(left), Box::new(right))
    }

    /// Convenience constructor for a `NOT` (binary exclusion) node.
    #[must_use]
    pub fn not(left: Node, right: Node) -> Self {
        Node::Not(Box::new(left), Box::new(right))
    }

    /// Flatten this tree into wire order: the node itself first, then its
    /// operands left-to-right, recursively. Matches the literal ordering
    /// the real client produces for `X1 AND X2 OR X3 NOT X4`:
    /// `[OR, AND, X1, X2, NOT, X3, X4]`.
    fn flatten<'a>(&'a self, out: &mut Vec<&'a Node>) {
        out.push(self);
        match self {
            Node::And(l, r) | Node::Or(l, r) | Node::Not(l, r) => {
                l.flatten(out);
                r.flatten(out);
            }
            Node::Str(_) | Node::TypedStr { .. } | Node::Ranged { .. } => {}
        }
    }

    fn write_entry(&self, w: &mut Writer) {
        match self {
            Node::And(..) => {
                w.write_u8(TYPE_BOOL);
                w.write_u8(OP_AND);
            }
            Node::Or(..) => {
                w.write_u8(TYPE_BOOL);
                w.write_u8(OP_OR);
            }
            Node::Not(..) => {
                w.write_u8(TYPE_BOOL);
                w.write_u8(OP_NOT);
            }
            Node::Str(s) => {
                w.write_u8(TYPE_STR);
                w.write_u16(s.len() as u16);
                w.write_bytes(s.as_bytes());
            }
            Node::TypedStr { meta, value } => {
                w.write_u8(TYPE_STR_TAG);
                w.write_u16(value.len() as u16);
                w.write_bytes(value.as_bytes());
                meta.write(w);
            }
            Node::Ranged { meta, op, value } => {
                match value {
                    IntValue::U32(v) => {
                        w.write_u8(TYPE_UINT32);
                        w.write_u32(*v);
                    }
                    IntValue::U64(v) => {
                        w.write_u8(TYPE_UINT64);
                        w.write_u64(*v);
                    }
                }
                w.write_u8(op.wire());
                meta.write(w);
            }
        }
    }
}

/// Encode a search-expression tree as a `SEARCH_REQUEST` body.
///
/// # Errors
/// Returns [`SearchError::TooComplex`] if the tree flattens to more than
/// [`MAX_SEARCH_ELEMENTS`] entries.
pub fn encode(root: &Node) -> SearchResult<Vec<u8>> {
    let mut flat = Vec::new();
    root.flatten(&mut flat);
    if flat.len() > MAX_SEARCH_ELEMENTS {
        return Err(SearchError::TooComplex(flat.len()));
    }
    let mut w = Writer::new();
    for node in flat {
        node.write_entry(&mut w);
    }
    Ok(w.into_vec())
}

/// `related::<hash>` search, used to find files related to one already
/// known by hash (spec §6, `generateSearchRequest(hash)` in the original).
#[must_use]
pub fn related_to_hash(hash: &ed2k_core::hash::Hash) -> Node {
    Node::Str(format!("related::{hash}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_matches_real_client_ordering() {
        let tree = Node::or(
            Node::and(Node::Str("X1".into()), Node::Str("X2".into())),
            Node::not(Node::Str("X3".into()), Node::Str("X4".into())),
        );
        let mut flat = Vec::new();
        tree.flatten(&mut flat);
        let kinds: Vec<&str> = flat
            .iter()
            .map(|n| match n {
                Node::Or(..) => "OR",
                Node::And(..) => "AND",
                Node::Not(..) => "NOT",
                Node::Str(s) => s.as_str(),
                _ => "?",
            })
            .collect();
        assert_eq!(kinds, vec!["OR", "AND", "X1", "X2", "NOT", "X3", "X4"]);
    }

    #[test]
    fn encode_bare_string_term() {
        let body = encode(&Node::Str("avi".into())).unwrap();
        assert_eq!(body[0], TYPE_STR);
        assert_eq!(u16::from_le_bytes([body[1], body[2]]), 3);
        assert_eq!(&body[3..6], b"avi");
    }

    #[test]
    fn encode_rejects_oversized_tree() {
        let mut tree = Node::Str("x0".into());
        for i in 1..=MAX_SEARCH_ELEMENTS {
            tree = Node::and(tree, Node::Str(format!("x{i}")));
        }
        assert!(matches!(encode(&tree), Err(SearchError::TooComplex(_))));
    }

    #[test]
    fn encode_ranged_term_includes_operator_and_meta() {
        let node = Node::Ranged {
            meta: MetaTag::Id(ed2k_core::tag::names::FT_FILESIZE),
            op: CompareOp::Greater,
            value: IntValue::U64(1_000_000),
        };
        let body = encode(&node).unwrap();
        assert_eq!(body[0], TYPE_UINT64);
        let value = u64::from_le_bytes(body[1..9].try_into().unwrap());
        assert_eq!(value, 1_000_000);
        assert_eq!(body[9], CompareOp::Greater.wire());
    }

    #[test]
    fn related_to_hash_uses_related_prefix() {
        let hash = ed2k_core::hash::Hash::of(b"f");
        let node = related_to_hash(&hash);
        match node {
            Node::Str(s) => assert!(s.starts_with("related::")),
            _ => panic!("expected Str node"),
        }
    }
}
