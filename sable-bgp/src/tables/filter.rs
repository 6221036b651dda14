//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::af::AddressFamily;
use crate::nexthop::NextHopResolver;
use crate::packet::attribute::{AttrFlags, Attrs};
use crate::rib::{AttrSetsCxt, InternalMessage};

// A single filter within a filter bank.
//
// Filters either pass a message unchanged, substitute a message carrying a
// modified attribute list, or drop the message.
#[derive(Clone, Debug)]
pub enum RouteFilter<A: AddressFamily> {
    // Drops routes whose AS path contains the given AS. Used for loop
    // prevention on ingress from eBGP peers.
    SimpleAs { asn: u32 },
    // Prepends the given AS to the AS path. Used on egress to eBGP peers.
    AsPrepend { asn: u32 },
    // Replaces the next hop. Used on egress to eBGP peers.
    NexthopRewrite { nexthop: A::IpAddr },
    // Drops routes learned from iBGP peers. Used on egress toward other
    // iBGP peers. Locally-originated routes pass.
    IbgpLoop,
    // Adds a LocalPref if absent. Used on ingress from eBGP peers.
    LocalPrefInsert { default: u32 },
    // Removes LocalPref. Used on egress to eBGP peers.
    LocalPrefRemove,
    // Inserts the next hop's IGP metric as the MED. Used on egress to
    // eBGP peers.
    MedInsert,
    // Removes any MED. Used on egress to eBGP peers, before MedInsert.
    MedRemove,
    // Drops non-transitive unknown attributes; marks transitive unknowns
    // as partial.
    UnknownAttrs,
    // Prepends the local AS on locally-originated routes. Installed on
    // egress toward iBGP peers, where AsPrepend doesn't run.
    OriginateRoute { asn: u32 },
}

#[derive(Debug)]
pub enum FilterOutcome<A: AddressFamily> {
    // Message passed the bank; `modified` says whether any filter
    // substituted the attribute list.
    Pass(InternalMessage<A>, bool),
    Drop,
}

// A bank of sequentially applied filters.
#[derive(Clone, Debug, Default)]
pub struct FilterBank<A: AddressFamily> {
    filters: Vec<RouteFilter<A>>,
}

// ===== impl FilterBank =====

impl<A> FilterBank<A>
where
    A: AddressFamily,
{
    pub fn new() -> FilterBank<A> {
        FilterBank { filters: vec![] }
    }

    pub fn add_simple_as_filter(&mut self, asn: u32) {
        self.filters.push(RouteFilter::SimpleAs { asn });
    }

    pub fn add_as_prepend_filter(&mut self, asn: u32) {
        self.filters.push(RouteFilter::AsPrepend { asn });
    }

    pub fn add_nexthop_rewrite_filter(&mut self, nexthop: A::IpAddr) {
        self.filters.push(RouteFilter::NexthopRewrite { nexthop });
    }

    pub fn add_ibgp_loop_filter(&mut self) {
        self.filters.push(RouteFilter::IbgpLoop);
    }

    pub fn add_localpref_insertion_filter(&mut self, default: u32) {
        self.filters.push(RouteFilter::LocalPrefInsert { default });
    }

    pub fn add_localpref_removal_filter(&mut self) {
        self.filters.push(RouteFilter::LocalPrefRemove);
    }

    pub fn add_med_insertion_filter(&mut self) {
        self.filters.push(RouteFilter::MedInsert);
    }

    pub fn add_med_removal_filter(&mut self) {
        self.filters.push(RouteFilter::MedRemove);
    }

    pub fn add_unknown_filter(&mut self) {
        self.filters.push(RouteFilter::UnknownAttrs);
    }

    pub fn add_originate_route_filter(&mut self, asn: u32) {
        self.filters.push(RouteFilter::OriginateRoute { asn });
    }

    // Run the bank over a message. The original attribute list is never
    // touched; the first modification clones it and later filters keep
    // working on the clone.
    pub fn apply(
        &self,
        mut msg: InternalMessage<A>,
        attr_sets: &mut AttrSetsCxt,
        resolver: &NextHopResolver<A>,
    ) -> FilterOutcome<A> {
        let mut attrs: Option<Attrs> = None;
        for filter in &self.filters {
            let current = attrs.as_ref().unwrap_or(&msg.attrs.value);
            match filter.filter(current, &msg, resolver) {
                FilterResult::Pass => (),
                FilterResult::Modified(new_attrs) => attrs = Some(new_attrs),
                FilterResult::Drop => return FilterOutcome::Drop,
            }
        }

        match attrs {
            Some(attrs) => {
                msg.attrs = attr_sets.get(&attrs);
                FilterOutcome::Pass(msg, true)
            }
            None => FilterOutcome::Pass(msg, false),
        }
    }
}

enum FilterResult {
    Pass,
    Modified(Attrs),
    Drop,
}

// ===== impl RouteFilter =====

impl<A> RouteFilter<A>
where
    A: AddressFamily,
{
    fn filter(
        &self,
        attrs: &Attrs,
        msg: &InternalMessage<A>,
        resolver: &NextHopResolver<A>,
    ) -> FilterResult {
        match self {
            RouteFilter::SimpleAs { asn } => {
                if attrs.base.as_path.contains(*asn) {
                    FilterResult::Drop
                } else {
                    FilterResult::Pass
                }
            }
            RouteFilter::AsPrepend { asn } => {
                let mut attrs = attrs.clone();
                attrs.base.as_path.prepend(*asn);
                FilterResult::Modified(attrs)
            }
            RouteFilter::NexthopRewrite { nexthop } => {
                let mut attrs = attrs.clone();
                attrs.base.nexthop = (*nexthop).into();
                FilterResult::Modified(attrs)
            }
            RouteFilter::IbgpLoop => {
                if msg.peer.ibgp && !msg.peer.is_local() {
                    FilterResult::Drop
                } else {
                    FilterResult::Pass
                }
            }
            RouteFilter::LocalPrefInsert { default } => {
                if attrs.base.local_pref.is_none() {
                    let mut attrs = attrs.clone();
                    attrs.base.local_pref = Some(*default);
                    FilterResult::Modified(attrs)
                } else {
                    FilterResult::Pass
                }
            }
            RouteFilter::LocalPrefRemove => {
                if attrs.base.local_pref.is_some() {
                    let mut attrs = attrs.clone();
                    attrs.base.local_pref = None;
                    FilterResult::Modified(attrs)
                } else {
                    FilterResult::Pass
                }
            }
            RouteFilter::MedInsert => {
                // Insert the IGP distance to the next hop as the MED.
                // Unresolved routes keep whatever MED they carry.
                let nexthop = A::nexthop(&attrs.base);
                match resolver.lookup(nexthop) {
                    Some((true, metric)) => {
                        let mut attrs = attrs.clone();
                        attrs.base.med = Some(metric);
                        FilterResult::Modified(attrs)
                    }
                    _ => FilterResult::Pass,
                }
            }
            RouteFilter::MedRemove => {
                if attrs.base.med.is_some() {
                    let mut attrs = attrs.clone();
                    attrs.base.med = None;
                    FilterResult::Modified(attrs)
                } else {
                    FilterResult::Pass
                }
            }
            RouteFilter::UnknownAttrs => {
                let needs_work = attrs.unknown.iter().any(|attr| {
                    !attr.is_transitive()
                        || !attr.flags.contains(AttrFlags::PARTIAL)
                });
                if !needs_work {
                    return FilterResult::Pass;
                }
                let mut attrs = attrs.clone();
                attrs.unknown.retain(|attr| attr.is_transitive());
                for attr in &mut attrs.unknown {
                    attr.flags.insert(AttrFlags::PARTIAL);
                }
                FilterResult::Modified(attrs)
            }
            RouteFilter::OriginateRoute { asn } => {
                if msg.peer.is_local() {
                    let mut attrs = attrs.clone();
                    attrs.base.as_path.prepend(*asn);
                    FilterResult::Modified(attrs)
                } else {
                    FilterResult::Pass
                }
            }
        }
    }
}
