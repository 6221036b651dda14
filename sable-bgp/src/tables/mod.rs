//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! The route tables making up one family's pipeline.
//!
//! Every table speaks the same protocol: `add_route`, `replace_route`,
//! `delete_route`, `push`, `lookup_route`, `route_dump`, plus the peering
//! state events. A table never reorders messages from the same parent; it
//! may drop, modify, or duplicate them, and a table that substitutes a
//! modified attribute list owns the new list. The graph itself lives in
//! [`crate::plumbing`], which connects per-peer ingress chains
//! (RibIn -> Filter -> Cache -> NhLookup) to the single Decision node and
//! fans the results out to the egress chains
//! (Filter -> Cache -> RibOut) and to the local-RIB queue.

pub mod cache;
pub mod decision;
pub mod fanout;
pub mod filter;
pub mod nhlookup;
pub mod rib_in;
pub mod rib_out;
