//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! The FIB-to-MRIB node: mirrors kernel forwarding-table changes into the
//! RIB table used for multicast reverse-path-forwarding lookups.
//!
//! Routes are stored in a multimap because the same prefix may exist once
//! per interface (IPv6 link-local prefixes). Each stored route remembers
//! whether its last transmission was accepted, so that interface-tree and
//! filter-configuration changes can emit differential updates.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use sable_utils::ip::AddressFamily;
use sable_utils::policy::{PolicyFilterId, PolicyFilters, PolicyProgram};
use sable_utils::rib::RpcError;
use sable_utils::service::ServiceStatus;
use sable_utils::southbound::IfTree;
use tracing::warn;

use crate::debug::Debug;
use crate::error::Error;
use crate::rib_queue::InformRibQueue;
use crate::route::Fib2mribRoute;
use crate::tasks::InformRibIo;
use crate::varrw::Fib2mribVarRW;

#[derive(Debug)]
pub struct Fib2mribNode {
    enabled: bool,
    log_trace: bool,
    routes: BTreeMap<IpNetwork, Vec<Fib2mribRoute>>,
    // Local copy of the interface tree, i.e. the previous snapshot that
    // incoming snapshots are diffed against.
    iftree: IfTree,
    have_iftree: bool,
    policy_filters: PolicyFilters,
    queue: InformRibQueue,
    status: ServiceStatus,
    startup_requests: usize,
    shutdown_requests: usize,
}

enum PendingUpdate {
    Add,
    Replace,
    Delete,
}

// ===== impl Fib2mribNode =====

impl Fib2mribNode {
    pub fn new(io: InformRibIo) -> Fib2mribNode {
        Fib2mribNode {
            enabled: true,
            log_trace: false,
            routes: Default::default(),
            iftree: Default::default(),
            have_iftree: false,
            policy_filters: Default::default(),
            queue: InformRibQueue::new(io),
            status: ServiceStatus::Disabled,
            startup_requests: 0,
            shutdown_requests: 0,
        }
    }

    // ===== lifecycle =====

    pub fn startup(&mut self) {
        if matches!(
            self.status,
            ServiceStatus::Starting | ServiceStatus::Running
        ) {
            return;
        }
        Debug::NodeStart.log();
        self.status = ServiceStatus::Starting;
        // The interface tree snapshot is the one external registration
        // awaited before the node is operational.
        self.startup_requests = usize::from(!self.have_iftree);
        self.update_status();
    }

    pub fn shutdown(&mut self) {
        if matches!(
            self.status,
            ServiceStatus::ShuttingDown | ServiceStatus::Shutdown
        ) {
            return;
        }
        Debug::NodeStop.log();
        self.status = ServiceStatus::ShuttingDown;
        // Withdraw everything that was offered to the RIB.
        self.push_pull_rib_routes(false);
        self.status = ServiceStatus::Shutdown;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // Enabling replays all accepted routes into the RIB; disabling
    // withdraws them.
    pub fn set_enabled(&mut self, enable: bool) {
        if enable == self.enabled {
            return;
        }
        if enable {
            self.enabled = true;
            self.push_pull_rib_routes(true);
        } else {
            self.push_pull_rib_routes(false);
            self.enabled = false;
        }
    }

    pub fn set_log_trace(&mut self, enable: bool) {
        self.log_trace = enable;
    }

    pub fn is_log_trace(&self) -> bool {
        self.log_trace
    }

    pub fn node_status(&self) -> (ServiceStatus, String) {
        let mut reasons = vec![];
        if self.startup_requests > 0 {
            reasons
                .push(format!("{} pending startup requests", self.startup_requests));
        }
        if self.shutdown_requests > 0 {
            reasons.push(format!(
                "{} pending shutdown requests",
                self.shutdown_requests
            ));
        }
        if self.queue.has_pending() {
            reasons.push("pending RIB route changes".to_owned());
        }
        if self.queue.failed() {
            reasons.push("RIB interface failed".to_owned());
        }
        (self.status, reasons.join("; "))
    }

    fn update_status(&mut self) {
        if self.status == ServiceStatus::Starting && self.startup_requests == 0
        {
            self.status = ServiceStatus::Running;
        }
    }

    // ===== interface tree =====

    // A new snapshot of the interface tree arrived. The first one marks
    // the tree complete; every snapshot is diffed against the local copy
    // and differential updates are sent to the RIB.
    pub fn tree_update(&mut self, new_tree: &IfTree) {
        if !self.have_iftree {
            self.have_iftree = true;
            Debug::TreeComplete.log();
            self.startup_requests = self.startup_requests.saturating_sub(1);
        }
        self.updates_made(new_tree);
        self.update_status();
    }

    fn updates_made(&mut self, new_tree: &IfTree) {
        let mut pending: Vec<(IpNetwork, usize, PendingUpdate)> = vec![];

        for (net, entries) in &mut self.routes {
            for (index, route) in entries.iter_mut().enumerate() {
                update_route(new_tree, route);

                let mut old_up = false;
                let mut new_up = false;
                let mut old_names = None;
                let mut new_names = None;
                if route.is_interface_route() {
                    old_up =
                        self.iftree.is_vif_up(&route.ifname, &route.vifname);
                    new_up = new_tree.is_vif_up(&route.ifname, &route.vifname);
                } else {
                    // For gateway routes, track whether (and through
                    // which vif) the next hop is directly connected.
                    if let Some(names) =
                        self.iftree.is_directly_connected(route.nexthop)
                    {
                        old_up = true;
                        old_names = Some(names);
                    }
                    if let Some(names) =
                        new_tree.is_directly_connected(route.nexthop)
                    {
                        new_up = true;
                        new_names = Some(names);
                    }
                }

                if old_up == new_up && old_names == new_names {
                    continue;
                }
                if !old_up && !new_up {
                    continue;
                }
                let kind = if !old_up {
                    PendingUpdate::Add
                } else if !new_up {
                    PendingUpdate::Delete
                } else {
                    // Still reachable, but the interface or vif name
                    // changed; refresh the RIB's view.
                    PendingUpdate::Replace
                };
                pending.push((*net, index, kind));
            }
        }

        self.iftree = new_tree.clone();

        for (net, index, kind) in pending {
            let Some(entries) = self.routes.get_mut(&net) else {
                continue;
            };
            let Some(orig) = entries.get_mut(index) else {
                continue;
            };
            match kind {
                PendingUpdate::Add => {
                    let mut copy = prepare_route(
                        &self.policy_filters,
                        &self.iftree,
                        orig,
                    );
                    copy.set_add_route();
                    self.inform_rib(copy);
                }
                PendingUpdate::Replace => {
                    let mut delete_copy = prepare_route(
                        &self.policy_filters,
                        &self.iftree,
                        orig,
                    );
                    delete_copy.set_delete_route();
                    let mut add_copy = prepare_route(
                        &self.policy_filters,
                        &self.iftree,
                        orig,
                    );
                    add_copy.set_add_route();
                    self.inform_rib(delete_copy);
                    self.inform_rib(add_copy);
                }
                PendingUpdate::Delete => {
                    // The interface went away: cancel anything still
                    // pending for this route and withdraw it.
                    let mut copy = prepare_route(
                        &self.policy_filters,
                        &self.iftree,
                        orig,
                    );
                    copy.set_delete_route();
                    let cancel = orig.clone();
                    self.queue.cancel(&cancel);
                    self.inform_rib(copy);
                }
            }
        }
    }

    // ===== route events =====

    pub fn add_route(&mut self, mut route: Fib2mribRoute) -> Result<(), Error> {
        if self.log_trace {
            Debug::RouteAdd(&route.net).log();
        }
        update_route(&self.iftree, &mut route);
        route
            .validate()
            .map_err(|reason| Error::InvalidRoute(route.net, reason))?;

        // Ideally an add for a known prefix would have been preceded by a
        // delete. Some kernels silently drop all routes through an
        // address when the address is deleted, so a re-add has to be
        // treated as a replace.
        if self
            .routes
            .get(&route.net)
            .is_some_and(|entries| !entries.is_empty())
        {
            route.set_replace_route();
            return self.replace_route_updated(route);
        }

        let copy = {
            let entries = self.routes.entry(route.net).or_default();
            entries.push(route);
            let orig = entries.last_mut().unwrap();
            prepare_route(&self.policy_filters, &self.iftree, orig)
        };
        self.inform_rib(copy);
        Ok(())
    }

    pub fn replace_route(
        &mut self,
        mut route: Fib2mribRoute,
    ) -> Result<(), Error> {
        if self.log_trace {
            Debug::RouteReplace(&route.net).log();
        }
        update_route(&self.iftree, &mut route);
        route
            .validate()
            .map_err(|reason| Error::InvalidRoute(route.net, reason))?;
        self.replace_route_updated(route)
    }

    fn replace_route_updated(
        &mut self,
        route: Fib2mribRoute,
    ) -> Result<(), Error> {
        let net = route.net;
        let Some(entries) = self.routes.get_mut(&net) else {
            return Err(Error::NoSuchRoute(net));
        };

        // Prefer the entry with the same interface and vif; fall back to
        // the first entry for the prefix.
        let index = entries
            .iter()
            .position(|orig| {
                orig.ifname == route.ifname && orig.vifname == route.vifname
            })
            .or(if entries.is_empty() { None } else { Some(0) })
            .ok_or(Error::NoSuchRoute(net))?;

        let (was_accepted, mut copy) = {
            let orig = &mut entries[index];
            let was_accepted = orig.is_accepted_by_rib();
            *orig = route;
            let copy =
                prepare_route(&self.policy_filters, &self.iftree, orig);
            (was_accepted, copy)
        };

        // The acceptance state may have changed: a replace toward the RIB
        // may become an add or a delete.
        if copy.is_accepted_by_rib() {
            if was_accepted {
                copy.set_replace_route();
            } else {
                copy.set_add_route();
            }
        } else if was_accepted {
            copy.set_delete_route();
        } else {
            return Ok(());
        }

        self.inform_rib(copy);
        Ok(())
    }

    pub fn delete_route(
        &mut self,
        mut route: Fib2mribRoute,
    ) -> Result<(), Error> {
        if self.log_trace {
            Debug::RouteDelete(&route.net).log();
        }
        update_route(&self.iftree, &mut route);
        route
            .validate()
            .map_err(|reason| Error::InvalidRoute(route.net, reason))?;

        let net = route.net;
        let Some(entries) = self.routes.get_mut(&net) else {
            return Err(Error::NoSuchRoute(net));
        };

        // Prefer the entry with the same interface and vif. A delete that
        // isn't interface-specific may take the first entry for the
        // prefix.
        let index = entries
            .iter()
            .position(|orig| {
                orig.ifname == route.ifname && orig.vifname == route.vifname
            })
            .or_else(|| {
                (!route.is_interface_route() && !entries.is_empty())
                    .then_some(0)
            })
            .ok_or(Error::NoSuchRoute(net))?;

        let mut orig = entries.remove(index);
        if entries.is_empty() {
            self.routes.remove(&net);
        }

        let was_accepted = orig.is_accepted_by_rib();
        let mut copy =
            prepare_route(&self.policy_filters, &self.iftree, &mut orig);
        copy.set_delete_route();

        // If the route was never transmitted, the RIB doesn't know about
        // it.
        if was_accepted {
            self.inform_rib(copy);
        }
        Ok(())
    }

    // Withdraw every stored route of the given family (or all), e.g. for
    // a transactional delete-all.
    pub fn delete_all(&mut self, af: Option<AddressFamily>) {
        let nets = self
            .routes
            .keys()
            .filter(|net| match af {
                None => true,
                Some(AddressFamily::Ipv4) => {
                    matches!(net, IpNetwork::V4(_))
                }
                Some(AddressFamily::Ipv6) => {
                    matches!(net, IpNetwork::V6(_))
                }
            })
            .copied()
            .collect::<Vec<_>>();

        for net in nets {
            let Some(entries) = self.routes.remove(&net) else {
                continue;
            };
            for mut orig in entries {
                let was_accepted = orig.is_accepted_by_rib();
                let mut copy = prepare_route(
                    &self.policy_filters,
                    &self.iftree,
                    &mut orig,
                );
                copy.set_delete_route();
                if was_accepted {
                    self.inform_rib(copy);
                }
            }
        }
    }

    // ===== policy =====

    pub fn configure_filter(
        &mut self,
        filter_id: PolicyFilterId,
        program: PolicyProgram,
    ) -> Result<(), Error> {
        Debug::FilterConfigure(filter_id).log();
        self.policy_filters.configure(filter_id, program)?;
        Ok(())
    }

    pub fn reset_filter(&mut self, filter_id: PolicyFilterId) {
        Debug::FilterReset(filter_id).log();
        self.policy_filters.reset(filter_id);
    }

    // Re-run the policy filters over every stored route and emit
    // differential updates based on the stored acceptance bits.
    pub fn push_routes(&mut self) {
        Debug::PushRoutes.log();

        let mut informs = vec![];
        for entries in self.routes.values_mut() {
            for orig in entries.iter_mut() {
                let was_accepted = orig.is_accepted_by_rib();
                let mut copy = prepare_route(
                    &self.policy_filters,
                    &self.iftree,
                    orig,
                );
                if copy.is_accepted_by_rib() {
                    if was_accepted {
                        copy.set_replace_route();
                    } else {
                        copy.set_add_route();
                    }
                } else if was_accepted {
                    copy.set_delete_route();
                } else {
                    continue;
                }
                informs.push(copy);
            }
        }
        for copy in informs {
            self.inform_rib(copy);
        }
    }

    fn push_pull_rib_routes(&mut self, is_push: bool) {
        let mut informs = vec![];
        for entries in self.routes.values_mut() {
            for orig in entries.iter_mut() {
                let mut copy = prepare_route(
                    &self.policy_filters,
                    &self.iftree,
                    orig,
                );
                // Only routes the RIB would accept are pushed or pulled.
                if !copy.is_accepted_by_rib() {
                    continue;
                }
                if is_push {
                    copy.set_add_route();
                } else {
                    copy.set_delete_route();
                }
                informs.push(copy);
            }
        }
        for copy in informs {
            self.inform_rib(copy);
        }
    }

    // ===== RIB interface =====

    pub fn rib_response(&mut self, result: Result<(), RpcError>) {
        self.queue.response(result);
        if self.queue.failed() {
            self.status = ServiceStatus::Failed;
        }
    }

    pub fn rib_retry(&mut self) {
        self.queue.retry();
    }

    pub fn rib_queue_has_pending(&self) -> bool {
        self.queue.has_pending()
    }

    fn inform_rib(&mut self, route: Fib2mribRoute) {
        if !self.enabled {
            return;
        }
        if route.is_add_route() || route.is_replace_route() {
            if route.is_accepted_by_rib() {
                self.queue.enqueue(route);
            }
        } else if route.is_delete_route() {
            self.queue.enqueue(route);
        }
    }

    // ===== transactional batch bracketing =====

    pub fn start_configuration(&mut self) {
        // Nothing to snapshot; the bracket exists so batched operations
        // are applied without interleaving.
    }

    pub fn end_configuration(&mut self) {}

    // ===== introspection (used by tests and status reporting) =====

    pub fn route_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn routes_for(&self, net: &IpNetwork) -> &[Fib2mribRoute] {
        self.routes.get(net).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ===== helper functions =====

// Enrich a route received from the FIB observer with interface-related
// information:
//
// - If the next hop is one of our own addresses, point the route at the
//   corresponding interface.
// - If the route is for a directly-connected subnet, fill in the
//   interface, and a zero next hop becomes the local address.
// - If the next hop lies in a directly-connected subnet, point the route
//   at that subnet's interface.
pub(crate) fn update_route(iftree: &IfTree, route: &mut Fib2mribRoute) -> bool {
    if route.is_interface_route() {
        return false;
    }

    if let Some((ifname, vifname)) = iftree.is_my_addr(route.nexthop) {
        route.ifname = ifname;
        route.vifname = vifname;
        return true;
    }

    for iface in iftree.interfaces.values() {
        for vif in iface.vifs.values() {
            match route.net {
                IpNetwork::V4(net) => {
                    for addr in vif.ipv4_addrs.values() {
                        let Some(subnet) = addr.to_network() else {
                            continue;
                        };
                        if update_route_from_subnet(
                            route,
                            net == subnet,
                            subnet_contains(&subnet, route.nexthop),
                            IpAddr::V4(addr.addr),
                            iface.name.clone(),
                            vif.name.clone(),
                        ) {
                            return true;
                        }
                    }
                }
                IpNetwork::V6(net) => {
                    for addr in vif.ipv6_addrs.values() {
                        let Some(subnet) = addr.to_network() else {
                            continue;
                        };
                        if update_route_from_subnet(
                            route,
                            net == subnet,
                            subnet6_contains(&subnet, route.nexthop),
                            IpAddr::V6(addr.addr),
                            iface.name.clone(),
                            vif.name.clone(),
                        ) {
                            return true;
                        }
                    }
                }
            }
        }
    }

    false
}

fn update_route_from_subnet(
    route: &mut Fib2mribRoute,
    is_connected_net: bool,
    contains_nexthop: bool,
    local_addr: IpAddr,
    ifname: String,
    vifname: String,
) -> bool {
    // The route is for the directly-connected subnet itself.
    if is_connected_net {
        route.ifname = ifname;
        route.vifname = vifname;
        if route.nexthop.is_unspecified() {
            route.nexthop = local_addr;
        }
        return true;
    }

    // The next hop lies within the directly-connected subnet.
    if contains_nexthop && !route.nexthop.is_unspecified() {
        route.ifname = ifname;
        route.vifname = vifname;
        return true;
    }

    false
}

fn subnet_contains(subnet: &Ipv4Network, addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(addr) => subnet.contains(addr),
        IpAddr::V6(_) => false,
    }
}

fn subnet6_contains(subnet: &Ipv6Network, addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(_) => false,
        IpAddr::V6(addr) => subnet.contains(addr),
    }
}

// Prepare a copy of a route for transmission to the RIB: run the policy
// filters and the next-hop acceptance test, tagging both the copy and
// the original so a later reconfiguration can diff against this state.
fn prepare_route(
    policy_filters: &PolicyFilters,
    iftree: &IfTree,
    orig: &mut Fib2mribRoute,
) -> Fib2mribRoute {
    let mut copy = orig.clone();

    let filtered = !do_filtering(policy_filters, &mut copy);
    let accepted_by_nexthop = is_accepted_by_nexthop(iftree, &copy);
    copy.set_filtered(filtered);
    copy.set_accepted_by_nexthop(accepted_by_nexthop);

    orig.set_filtered(filtered);
    orig.set_accepted_by_nexthop(accepted_by_nexthop);

    copy
}

// Run the import filter (which may reject) and the source-match filter
// (which only tags).
fn do_filtering(policy_filters: &PolicyFilters, route: &mut Fib2mribRoute) -> bool {
    let mut varrw = Fib2mribVarRW::new(route);
    let accepted = match policy_filters
        .run_filter(PolicyFilterId::Import, &mut varrw)
    {
        Ok(accepted) => accepted,
        Err(error) => {
            warn!(%error, "import filter failed; accepting route");
            true
        }
    };
    if !accepted {
        return false;
    }

    let mut varrw = Fib2mribVarRW::new(route);
    if let Err(error) = policy_filters
        .run_filter(PolicyFilterId::ExportSourceMatch, &mut varrw)
    {
        warn!(%error, "source-match filter failed");
    }
    true
}

// A route is acceptable when its interface is up, or (for gateway
// routes) when the next hop is directly connected.
fn is_accepted_by_nexthop(iftree: &IfTree, route: &Fib2mribRoute) -> bool {
    if route.is_interface_route() {
        iftree.is_vif_up(&route.ifname, &route.vifname)
    } else {
        iftree.is_directly_connected(route.nexthop).is_some()
    }
}
