//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, VecDeque};
use std::net::IpAddr;

use bitflags::bitflags;
use sable_utils::bgp::{Comm, Origin};
use serde::{Deserialize, Serialize};

// A canonicalized BGP path attribute list.
//
// The pipeline operates on already-parsed attributes; the wire codec lives
// with the per-peer session handling. Because attributes are stored in
// typed fields (and the unknown attributes sorted), two lists that differ
// only in attribute order compare equal.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Attrs {
    pub base: BaseAttrs,
    pub comm: Option<Comms>,
    pub unknown: Vec<UnknownAttr>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct BaseAttrs {
    pub origin: Origin,
    pub as_path: AsPath,
    pub nexthop: IpAddr,
    pub med: Option<u32>,
    // Present iff the route is iBGP-derived or inserted by an incoming
    // filter.
    pub local_pref: Option<u32>,
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: VecDeque<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsPathSegmentType,
    pub members: VecDeque<u32>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AsPathSegmentType {
    Set = 1,
    Sequence = 2,
    ConfedSequence = 3,
    ConfedSet = 4,
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Comms(pub BTreeSet<Comm>);

// A path attribute this implementation doesn't interpret, passed through
// according to its flags.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct UnknownAttr {
    pub attr_type: u8,
    pub flags: AttrFlags,
    pub value: Vec<u8>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct AttrFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXTENDED = 0x10;
    }
}

// ===== impl Attrs =====

impl Attrs {
    pub fn new(origin: Origin, as_path: AsPath, nexthop: IpAddr) -> Attrs {
        Attrs {
            base: BaseAttrs {
                origin,
                as_path,
                nexthop,
                med: None,
                local_pref: None,
            },
            comm: None,
            unknown: vec![],
        }
    }
}

// ===== impl AsPath =====

impl AsPath {
    // Path length as used by the decision process: each member of a
    // sequence counts 1, a whole set counts 1, confederation segments
    // count 0.
    pub fn path_length(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment.seg_type {
                AsPathSegmentType::Sequence => segment.members.len(),
                AsPathSegmentType::Set => 1,
                AsPathSegmentType::ConfedSequence
                | AsPathSegmentType::ConfedSet => 0,
            })
            .sum()
    }

    // First AS of the path, i.e. the neighbor AS the route was learned
    // from. An empty path yields `None`, which the MED comparison treats
    // as a sentinel AS of its own.
    pub fn first(&self) -> Option<u32> {
        self.segments
            .front()
            .and_then(|segment| segment.members.front())
            .copied()
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.members.contains(&asn))
    }

    // Prepend an AS to the path, extending the leading sequence segment
    // or creating one.
    pub fn prepend(&mut self, asn: u32) {
        match self.segments.front_mut() {
            Some(segment)
                if segment.seg_type == AsPathSegmentType::Sequence =>
            {
                segment.members.push_front(asn);
            }
            _ => {
                self.segments.push_front(AsPathSegment {
                    seg_type: AsPathSegmentType::Sequence,
                    members: [asn].into(),
                });
            }
        }
    }

    // Build a path from a plain AS sequence.
    pub fn from_sequence(
        members: impl IntoIterator<Item = u32>,
    ) -> AsPath {
        let members = members.into_iter().collect::<VecDeque<_>>();
        let mut segments = VecDeque::new();
        if !members.is_empty() {
            segments.push_back(AsPathSegment {
                seg_type: AsPathSegmentType::Sequence,
                members,
            });
        }
        AsPath { segments }
    }
}

impl std::fmt::Display for AsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            match segment.seg_type {
                AsPathSegmentType::Sequence => {
                    let mut sep = "";
                    for asn in &segment.members {
                        write!(f, "{}{}", sep, asn)?;
                        sep = " ";
                    }
                }
                AsPathSegmentType::Set
                | AsPathSegmentType::ConfedSequence
                | AsPathSegmentType::ConfedSet => {
                    write!(f, "{{")?;
                    let mut sep = "";
                    for asn in &segment.members {
                        write!(f, "{}{}", sep, asn)?;
                        sep = ",";
                    }
                    write!(f, "}}")?;
                }
            }
        }
        Ok(())
    }
}

// ===== impl UnknownAttr =====

impl UnknownAttr {
    pub fn is_transitive(&self) -> bool {
        self.flags.contains(AttrFlags::TRANSITIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_length_counts_sets_once() {
        let mut path = AsPath::from_sequence([65001, 65002]);
        path.segments.push_back(AsPathSegment {
            seg_type: AsPathSegmentType::Set,
            members: [65003, 65004, 65005].into(),
        });
        path.segments.push_back(AsPathSegment {
            seg_type: AsPathSegmentType::ConfedSequence,
            members: [65100].into(),
        });
        // Two from the sequence, one for the whole set, none for the
        // confederation segment.
        assert_eq!(path.path_length(), 3);
    }

    #[test]
    fn prepend_extends_leading_sequence() {
        let mut path = AsPath::from_sequence([65002]);
        path.prepend(65001);
        assert_eq!(path.first(), Some(65001));
        assert_eq!(path.path_length(), 2);
        assert_eq!(path.segments.len(), 1);

        // Prepending to a set-led path creates a new sequence segment.
        let mut path = AsPath {
            segments: [AsPathSegment {
                seg_type: AsPathSegmentType::Set,
                members: [65003].into(),
            }]
            .into(),
        };
        path.prepend(65001);
        assert_eq!(path.first(), Some(65001));
        assert_eq!(path.segments.len(), 2);
    }

    #[test]
    fn empty_path_has_no_first_as() {
        let path = AsPath::default();
        assert_eq!(path.first(), None);
        assert_eq!(path.path_length(), 0);
        assert!(!path.contains(65001));
    }
}
