//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! Next-hop resolvability and IGP distances.
//!
//! Answers are obtained from the RIB and cached here; the retrieval
//! implicitly registers interest so the RIB notifies us when a next hop's
//! reachability or metric changes. The RIB answers with a covering
//! `base/prefix_len` range, so one cache entry serves every next hop that
//! falls inside the range.
//!
//! Three interfaces are exposed upward: an asynchronous one used by the
//! next-hop lookup table before the decision process (registration with a
//! callback), a synchronous one used by the decision process itself (which
//! must always hit), and deregistration.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use prefix_trie::PrefixMap;
use sable_utils::ip::{IpAddrKind, IpNetworkKind};
use sable_utils::rib::{ErrorClass, NexthopInterest, RpcError};
use sable_utils::task::{Task, TimeoutTask};
use tracing::{error, info, warn};

use crate::af::AddressFamily;
use crate::peer::PeerId;
use crate::tasks::{self, ResolverIo};

// A cached answer from the RIB, valid for every next hop covered by
// `base_addr/prefix_len`. `refs` maps each next hop registered against
// this entry to the number of routes holding it; an entry whose `refs`
// drains empty is deregistered with the RIB.
#[derive(Debug)]
struct NextHopEntry<A: AddressFamily> {
    base_addr: A::IpAddr,
    prefix_len: u8,
    real_prefix_len: u8,
    resolvable: bool,
    metric: u32,
    refs: BTreeMap<A::IpAddr, u32>,
}

// The two indices over the cache entries. `by_prefix` answers
// longest-match lookups by next hop; `by_real_prefix` receives RIB
// invalidations, which arrive at the more specific `real_prefix_len`.
// Both must be kept in sync.
#[derive(Debug)]
pub struct NextHopCache<A: AddressFamily> {
    by_prefix: PrefixMap<A::IpNetwork, NextHopEntry<A>>,
    by_real_prefix: BTreeMap<A::IpNetwork, A::IpNetwork>,
}

#[derive(Debug)]
enum DeregisterOutcome<A: AddressFamily> {
    NotFound,
    Kept,
    // The last reference went away and the entry was erased.
    Last { base_addr: A::IpAddr, prefix_len: u8 },
}

// The set of (requester, net) pairs waiting on one next hop.
#[derive(Debug)]
struct NhRequest<A: AddressFamily> {
    total: u32,
    requests: BTreeMap<PeerId, BTreeSet<A::IpNetwork>>,
}

// An entry in the serialized request queue to the RIB. A single entry can
// represent both a pending Register (downcall from the lookup table) and
// a pending Reregister (upcall from the RIB invalidated the previous
// answer); the reregister side saves the old answer so lookups can be
// satisfied while the new one is in flight.
#[derive(Debug)]
enum RibRequestEntry<A: AddressFamily> {
    Register(RegisterEntry<A>),
    Deregister {
        base_addr: A::IpAddr,
        prefix_len: u8,
    },
}

#[derive(Debug)]
struct RegisterEntry<A: AddressFamily> {
    nexthop: A::IpAddr,
    register: bool,
    requests: NhRequest<A>,
    reregister: bool,
    ref_cnt: u32,
    resolvable: bool,
    metric: u32,
}

// The serialized request queue. At most one request is outstanding with
// the RIB at any time.
#[derive(Debug)]
pub struct NextHopRibRequest<A: AddressFamily> {
    queue: VecDeque<RibRequestEntry<A>>,
    busy: bool,
    previously_successful: bool,
    interface_failed: bool,
    io: ResolverIo,
    response_task: Option<Task<()>>,
    retry_task: Option<TimeoutTask>,
}

#[derive(Debug)]
pub struct NextHopResolver<A: AddressFamily> {
    cache: NextHopCache<A>,
    rib_request: NextHopRibRequest<A>,
}

// A completed registration to report back to a lookup table.
#[derive(Debug)]
pub struct LookupDone<A: AddressFamily> {
    pub nexthop: A::IpAddr,
    pub requester: PeerId,
    pub nets: BTreeSet<A::IpNetwork>,
    pub resolved: bool,
}

// What a RIB response produced: completed registrations, next hops whose
// answers changed (the decision process must re-run for them), and
// whether the interface failed fatally.
#[derive(Debug)]
pub struct ResponseOutcome<A: AddressFamily> {
    pub done: Vec<LookupDone<A>>,
    pub changed: Vec<A::IpAddr>,
    pub fatal: bool,
}

// ===== impl NextHopCache =====

impl<A> NextHopCache<A>
where
    A: AddressFamily,
{
    fn new() -> NextHopCache<A> {
        NextHopCache {
            by_prefix: PrefixMap::new(),
            by_real_prefix: Default::default(),
        }
    }

    // Add an entry with no next-hop references yet; a register_nexthop is
    // expected to follow.
    fn add_entry(
        &mut self,
        base_addr: A::IpAddr,
        prefix_len: u8,
        real_prefix_len: u8,
        resolvable: bool,
        metric: u32,
    ) {
        let Ok(net) = A::IpNetwork::new(base_addr, prefix_len) else {
            error!(addr = %base_addr, %prefix_len, "invalid covering range");
            return;
        };
        let Ok(real_net) = A::IpNetwork::new(base_addr, real_prefix_len)
        else {
            error!(addr = %base_addr, %real_prefix_len, "invalid real range");
            return;
        };
        let entry = NextHopEntry {
            base_addr,
            prefix_len,
            real_prefix_len,
            resolvable,
            metric,
            refs: Default::default(),
        };
        if self.by_prefix.insert(net, entry).is_some() {
            error!(%net, "duplicate next-hop cache entry");
        }
        self.by_real_prefix.insert(real_net, net);
    }

    // An entry created by add_entry may never have been referenced if all
    // interested parties deregistered while the request was in flight.
    // Erase it in that case.
    fn validate_entry(&mut self, base_addr: A::IpAddr, prefix_len: u8) -> bool {
        let Ok(net) = A::IpNetwork::new(base_addr, prefix_len) else {
            return false;
        };
        let Some(entry) = self.by_prefix.get(&net) else {
            return false;
        };
        if entry.refs.is_empty() {
            self.delete_entry(base_addr, prefix_len);
            return false;
        }
        true
    }

    // Update the metric of the entry covering `base_addr/real_prefix_len`.
    // Returns the next hops (with reference counts) the entry covers.
    fn change_entry(
        &mut self,
        base_addr: A::IpAddr,
        real_prefix_len: u8,
        metric: u32,
    ) -> Option<BTreeMap<A::IpAddr, u32>> {
        let real_net = A::IpNetwork::new(base_addr, real_prefix_len).ok()?;
        let net = *self.by_real_prefix.get(&real_net)?;
        let entry = self.by_prefix.get_mut(&net)?;
        entry.metric = metric;
        Some(entry.refs.clone())
    }

    // Erase the entry for `base_addr/prefix_len` from both indices,
    // returning the next hops it covered.
    fn delete_entry(
        &mut self,
        base_addr: A::IpAddr,
        prefix_len: u8,
    ) -> Option<BTreeMap<A::IpAddr, u32>> {
        let net = A::IpNetwork::new(base_addr, prefix_len).ok()?;
        let entry = self.by_prefix.remove(&net)?;
        let real_net =
            A::IpNetwork::new(entry.base_addr, entry.real_prefix_len).ok()?;
        self.by_real_prefix.remove(&real_net);
        Some(entry.refs)
    }

    // Erase the entry as identified by a RIB invalidation, returning the
    // saved answer and the covered next hops.
    fn take_entry_by_real(
        &mut self,
        base_addr: A::IpAddr,
        real_prefix_len: u8,
    ) -> Option<(bool, u32, BTreeMap<A::IpAddr, u32>)> {
        let real_net = A::IpNetwork::new(base_addr, real_prefix_len).ok()?;
        let net = *self.by_real_prefix.get(&real_net)?;
        let entry = self.by_prefix.get(&net)?;
        let resolvable = entry.resolvable;
        let metric = entry.metric;
        let refs =
            self.delete_entry(net.ip(), IpNetworkKind::prefix(&net))?;
        Some((resolvable, metric, refs))
    }

    fn lookup_by_addr(
        &self,
        base_addr: A::IpAddr,
        prefix_len: u8,
    ) -> Option<(bool, u32)> {
        let net = A::IpNetwork::new(base_addr, prefix_len).ok()?;
        let entry = self.by_prefix.get(&net)?;
        Some((entry.resolvable, entry.metric))
    }

    // Answer for a next hop that has been registered against an entry.
    fn lookup_by_nexthop(&self, nexthop: A::IpAddr) -> Option<(bool, u32)> {
        let host = A::IpNetwork::host_prefix(nexthop);
        let (_, entry) = self.by_prefix.get_lpm(&host)?;
        if !entry.refs.contains_key(&nexthop) {
            return None;
        }
        Some((entry.resolvable, entry.metric))
    }

    // Answer for any covered next hop, registered or not.
    fn lookup_by_nexthop_without_entry(
        &self,
        nexthop: A::IpAddr,
    ) -> Option<(bool, u32)> {
        let host = A::IpNetwork::host_prefix(nexthop);
        let (_, entry) = self.by_prefix.get_lpm(&host)?;
        Some((entry.resolvable, entry.metric))
    }

    // Record interest in a next hop if a covering entry exists.
    fn register_nexthop(&mut self, nexthop: A::IpAddr, ref_cnt_incr: u32) -> bool {
        let host = A::IpNetwork::host_prefix(nexthop);
        let Some((net, _)) = self.by_prefix.get_lpm(&host) else {
            return false;
        };
        let net = *net;
        let entry = self.by_prefix.get_mut(&net).unwrap();
        *entry.refs.entry(nexthop).or_insert(0) += ref_cnt_incr;
        true
    }

    fn deregister_nexthop(&mut self, nexthop: A::IpAddr) -> DeregisterOutcome<A> {
        let host = A::IpNetwork::host_prefix(nexthop);
        let Some((net, entry)) = self.by_prefix.get_lpm(&host) else {
            return DeregisterOutcome::NotFound;
        };
        if !entry.refs.contains_key(&nexthop) {
            return DeregisterOutcome::NotFound;
        }
        let net = *net;
        let entry = self.by_prefix.get_mut(&net).unwrap();
        let count = entry.refs.get_mut(&nexthop).unwrap();
        *count -= 1;
        if *count == 0 {
            entry.refs.remove(&nexthop);
            if entry.refs.is_empty() {
                let base_addr = entry.base_addr;
                let prefix_len = entry.prefix_len;
                self.delete_entry(base_addr, prefix_len);
                return DeregisterOutcome::Last {
                    base_addr,
                    prefix_len,
                };
            }
        }
        DeregisterOutcome::Kept
    }
}

// ===== impl NhRequest =====

impl<A> NhRequest<A>
where
    A: AddressFamily,
{
    fn new(net: A::IpNetwork, requester: PeerId) -> NhRequest<A> {
        let mut request = NhRequest {
            total: 0,
            requests: Default::default(),
        };
        request.add_request(net, requester);
        request
    }

    fn add_request(&mut self, net: A::IpNetwork, requester: PeerId) {
        self.total += 1;
        self.requests.entry(requester).or_default().insert(net);
    }

    fn remove_request(&mut self, net: A::IpNetwork, requester: PeerId) -> bool {
        let Some(nets) = self.requests.get_mut(&requester) else {
            return false;
        };
        if !nets.remove(&net) {
            return false;
        }
        if nets.is_empty() {
            self.requests.remove(&requester);
        }
        self.total -= 1;
        true
    }

    fn total(&self) -> u32 {
        self.total
    }
}

// ===== impl RegisterEntry =====

impl<A> RegisterEntry<A>
where
    A: AddressFamily,
{
    fn new_register(
        nexthop: A::IpAddr,
        net: A::IpNetwork,
        requester: PeerId,
    ) -> RegisterEntry<A> {
        RegisterEntry {
            nexthop,
            register: true,
            requests: NhRequest::new(net, requester),
            reregister: false,
            ref_cnt: 0,
            resolvable: false,
            metric: 0,
        }
    }

    fn new_reregister(
        nexthop: A::IpAddr,
        ref_cnt: u32,
        resolvable: bool,
        metric: u32,
    ) -> RegisterEntry<A> {
        RegisterEntry {
            nexthop,
            register: false,
            requests: NhRequest {
                total: 0,
                requests: Default::default(),
            },
            reregister: true,
            ref_cnt,
            resolvable,
            metric,
        }
    }

    fn register_nexthop(&mut self, net: A::IpNetwork, requester: PeerId) {
        self.register = true;
        self.requests.add_request(net, requester);
    }

    fn deregister_nexthop(
        &mut self,
        net: A::IpNetwork,
        requester: PeerId,
    ) -> bool {
        if self.register && self.requests.remove_request(net, requester) {
            return true;
        }
        if self.reregister && self.ref_cnt > 0 {
            self.ref_cnt -= 1;
            return true;
        }
        false
    }

    fn reregister_nexthop(&mut self, ref_cnt: u32, resolvable: bool, metric: u32) {
        self.reregister = true;
        self.ref_cnt = ref_cnt;
        self.resolvable = resolvable;
        self.metric = metric;
    }
}

// ===== impl NextHopRibRequest =====

impl<A> NextHopRibRequest<A>
where
    A: AddressFamily,
{
    fn new(io: ResolverIo) -> NextHopRibRequest<A> {
        NextHopRibRequest {
            queue: VecDeque::new(),
            busy: false,
            previously_successful: false,
            interface_failed: false,
            io,
            response_task: None,
            retry_task: None,
        }
    }

    fn register_nexthop(
        &mut self,
        nexthop: A::IpAddr,
        net: A::IpNetwork,
        requester: PeerId,
    ) {
        if self.interface_failed {
            return;
        }

        // Merge into a pending request for the same next hop, if any.
        for entry in &mut self.queue {
            if let RibRequestEntry::Register(entry) = entry
                && entry.nexthop == nexthop
            {
                entry.register_nexthop(net, requester);
                return;
            }
        }

        self.queue.push_back(RibRequestEntry::Register(
            RegisterEntry::new_register(nexthop, net, requester),
        ));
        if !self.busy {
            self.send_next_request();
        }
    }

    // A deregister may not cancel a queued register outright: a request to
    // the RIB might already be in flight for it. The response handler
    // notices unreferenced entries and backs out a deregister then.
    fn deregister_nexthop(
        &mut self,
        nexthop: A::IpAddr,
        net: A::IpNetwork,
        requester: PeerId,
    ) -> bool {
        for entry in &mut self.queue {
            if let RibRequestEntry::Register(entry) = entry
                && entry.nexthop == nexthop
            {
                return entry.deregister_nexthop(net, requester);
            }
        }
        false
    }

    fn reregister_nexthop(
        &mut self,
        nexthop: A::IpAddr,
        ref_cnt: u32,
        resolvable: bool,
        metric: u32,
    ) {
        for entry in &mut self.queue {
            if let RibRequestEntry::Register(entry) = entry
                && entry.nexthop == nexthop
            {
                entry.reregister_nexthop(ref_cnt, resolvable, metric);
                return;
            }
        }

        self.queue.push_back(RibRequestEntry::Register(
            RegisterEntry::new_reregister(nexthop, ref_cnt, resolvable, metric),
        ));
        if !self.busy {
            self.send_next_request();
        }
    }

    fn deregister_from_rib(&mut self, base_addr: A::IpAddr, prefix_len: u8) {
        if self.interface_failed {
            return;
        }
        self.queue.push_back(RibRequestEntry::Deregister {
            base_addr,
            prefix_len,
        });
        if !self.busy {
            self.send_next_request();
        }
    }

    // Answer lookups from the saved state of an in-flight reregistration.
    fn lookup(&self, nexthop: A::IpAddr) -> Option<(bool, u32)> {
        self.queue.iter().find_map(|entry| match entry {
            RibRequestEntry::Register(entry)
                if entry.reregister && entry.nexthop == nexthop =>
            {
                Some((entry.resolvable, entry.metric))
            }
            _ => None,
        })
    }

    fn send_next_request(&mut self) {
        let Some(front) = self.queue.front() else {
            self.busy = false;
            return;
        };
        self.busy = true;
        self.response_task = Some(match front {
            RibRequestEntry::Register(entry) => {
                tasks::nht_register_interest::<A>(&self.io, entry.nexthop)
            }
            RibRequestEntry::Deregister {
                base_addr,
                prefix_len,
            } => tasks::nht_deregister_interest::<A>(
                &self.io,
                *base_addr,
                *prefix_len,
            ),
        });
    }

    fn schedule_retry(&mut self) {
        self.retry_task = Some(tasks::nht_retry_timer::<A>(&self.io));
    }

    fn fail(&mut self) {
        self.interface_failed = true;
        self.queue.clear();
        self.busy = false;
        self.response_task = None;
        self.retry_task = None;
    }
}

// ===== impl NextHopResolver =====

impl<A> NextHopResolver<A>
where
    A: AddressFamily,
{
    pub fn new(io: ResolverIo) -> NextHopResolver<A> {
        NextHopResolver {
            cache: NextHopCache::new(),
            rib_request: NextHopRibRequest::new(io),
        }
    }

    // Register interest in a next hop on behalf of `net`.
    //
    // Returns true when the answer is already cached and the registration
    // is complete. Otherwise a request to the RIB is pending and the
    // requester will be notified through `rib_lookup_done` exactly once.
    pub fn register_nexthop(
        &mut self,
        nexthop: A::IpAddr,
        net: A::IpNetwork,
        requester: PeerId,
    ) -> bool {
        if self.cache.register_nexthop(nexthop, 1) {
            return true;
        }
        self.rib_request.register_nexthop(nexthop, net, requester);
        false
    }

    // Drop one reference on a next hop. When the covering entry's last
    // reference goes away, interest is deregistered with the RIB.
    pub fn deregister_nexthop(
        &mut self,
        nexthop: A::IpAddr,
        net: A::IpNetwork,
        requester: PeerId,
    ) {
        match self.cache.deregister_nexthop(nexthop) {
            DeregisterOutcome::Last {
                base_addr,
                prefix_len,
            } => {
                self.rib_request.deregister_from_rib(base_addr, prefix_len);
            }
            DeregisterOutcome::Kept => (),
            DeregisterOutcome::NotFound => {
                if !self.rib_request.deregister_nexthop(nexthop, net, requester)
                {
                    error!(%nexthop, "deregister of unknown next hop");
                }
            }
        }
    }

    // Synchronous lookup used by the decision process. Guaranteed to
    // succeed for any next hop whose registration has completed. While a
    // re-registration is in flight the saved previous answer is returned.
    pub fn lookup(&self, nexthop: A::IpAddr) -> Option<(bool, u32)> {
        if let Some(answer) = self.cache.lookup_by_nexthop(nexthop) {
            return Some(answer);
        }
        if let Some(answer) = self.rib_request.lookup(nexthop) {
            info!(%nexthop, "stale next-hop metrics supplied");
            return Some(answer);
        }
        None
    }

    // The RIB reports a metric change for a covering entry. Returns the
    // next hops whose answers changed; the decision process must re-run
    // for each.
    pub fn route_info_changed(
        &mut self,
        addr: A::IpAddr,
        real_prefix_len: u8,
        metric: u32,
    ) -> Vec<A::IpAddr> {
        match self.cache.change_entry(addr, real_prefix_len, metric) {
            Some(refs) => refs.keys().copied().collect(),
            None => {
                warn!(%addr, %real_prefix_len,
                    "metric change for unknown next-hop entry");
                vec![]
            }
        }
    }

    // The RIB reports that registrations covered by this entry are no
    // longer valid. The entry is erased and interest re-requested for
    // every next hop it covered, saving the old answer for stale reads.
    // Returns the next hops whose answers are already known to have
    // changed (because another cached entry covers them).
    pub fn route_info_invalid(
        &mut self,
        addr: A::IpAddr,
        real_prefix_len: u8,
    ) -> Vec<A::IpAddr> {
        let Some((resolvable, metric, refs)) =
            self.cache.take_entry_by_real(addr, real_prefix_len)
        else {
            warn!(%addr, %real_prefix_len,
                "invalidation for unknown next-hop entry");
            return vec![];
        };

        let mut changed = vec![];
        for (nexthop, ref_cnt) in refs {
            if let Some(nexthop_changed) =
                self.reregister_nexthop(nexthop, ref_cnt, resolvable, metric)
            {
                changed.push(nexthop_changed);
            }
        }
        changed
    }

    // Handle the response to a register_interest request.
    pub fn register_interest_response(
        &mut self,
        result: Result<NexthopInterest, RpcError>,
    ) -> ResponseOutcome<A> {
        let mut outcome = ResponseOutcome {
            done: vec![],
            changed: vec![],
            fatal: false,
        };
        self.rib_request.response_task = None;

        let interest = match result {
            Ok(interest) => interest,
            Err(error) => {
                match error.classify(self.rib_request.previously_successful) {
                    ErrorClass::Transient => {
                        warn!(%error, "register interest failed, will retry");
                        self.rib_request.schedule_retry();
                    }
                    ErrorClass::Fatal | ErrorClass::AppLevel => {
                        // An application-level rejection of a registration
                        // leaves the cache unusable, so it is fatal too.
                        error!(%error, "register interest failed");
                        self.rib_request.fail();
                        outcome.fatal = true;
                    }
                }
                return outcome;
            }
        };

        self.rib_request.previously_successful = true;

        let Some(base_addr) = A::IpAddr::get(interest.base_addr) else {
            error!(addr = %interest.base_addr,
                "register interest response for wrong address family");
            return outcome;
        };

        // The head of the queue must be the register this answers; the
        // returned base address is the covering range, so the comparison
        // is masked.
        debug_assert!(matches!(
            self.rib_request.queue.front(),
            Some(RibRequestEntry::Register(entry))
                if covers::<A>(base_addr, interest.prefix_len, entry.nexthop)
        ));

        // Insert the answer, then walk the queue: every register satisfied
        // by the cache is completed, stopping at the first one that isn't.
        // Deregisters for other ranges are skipped over; a deregister for
        // this very range became moot and is dropped (validation below
        // re-adds it if it turns out to be needed).
        self.cache.add_entry(
            base_addr,
            interest.prefix_len,
            interest.real_prefix_len,
            interest.resolves,
            interest.metric,
        );

        let mut i = 0;
        while i < self.rib_request.queue.len() {
            enum Action {
                Satisfy,
                DropDeregister,
                Skip,
                Stop,
            }
            let action = match &self.rib_request.queue[i] {
                RibRequestEntry::Register(entry) => {
                    if self
                        .cache
                        .lookup_by_nexthop_without_entry(entry.nexthop)
                        .is_some()
                    {
                        Action::Satisfy
                    } else {
                        Action::Stop
                    }
                }
                RibRequestEntry::Deregister {
                    base_addr: dereg_addr,
                    prefix_len: dereg_len,
                } => {
                    if *dereg_addr == base_addr
                        && *dereg_len == interest.prefix_len
                    {
                        Action::DropDeregister
                    } else {
                        Action::Skip
                    }
                }
            };
            match action {
                Action::Satisfy => {
                    let Some(RibRequestEntry::Register(entry)) =
                        self.rib_request.queue.remove(i)
                    else {
                        unreachable!();
                    };
                    self.satisfy_register(entry, &mut outcome);
                }
                Action::DropDeregister => {
                    self.rib_request.queue.remove(i);
                }
                Action::Skip => i += 1,
                Action::Stop => break,
            }
        }

        // The only interested parties may have deregistered while the
        // request was in flight; in that case the new entry is unused and
        // interest must be withdrawn again.
        if !self.cache.validate_entry(base_addr, interest.prefix_len) {
            self.rib_request.queue.push_back(RibRequestEntry::Deregister {
                base_addr,
                prefix_len: interest.prefix_len,
            });
        }

        self.rib_request.busy = false;
        self.rib_request.send_next_request();
        outcome
    }

    // Handle the response to a deregister_interest request.
    pub fn deregister_interest_response(
        &mut self,
        result: Result<(), RpcError>,
    ) -> bool {
        self.rib_request.response_task = None;

        if let Err(error) = result {
            match error.classify(self.rib_request.previously_successful) {
                ErrorClass::Transient => {
                    warn!(%error, "deregister interest failed, will retry");
                    self.rib_request.schedule_retry();
                    return false;
                }
                ErrorClass::Fatal => {
                    error!(%error, "deregister interest failed");
                    self.rib_request.fail();
                    return true;
                }
                ErrorClass::AppLevel => {
                    warn!(%error, "deregister interest rejected");
                    // Fall through and continue with the next request.
                }
            }
        } else {
            self.rib_request.previously_successful = true;
        }

        debug_assert!(matches!(
            self.rib_request.queue.front(),
            Some(RibRequestEntry::Deregister { .. })
        ));
        self.rib_request.queue.pop_front();
        self.rib_request.busy = false;
        self.rib_request.send_next_request();
        false
    }

    // Re-send the request at the head of the queue after a transient
    // failure.
    pub fn retry(&mut self) {
        if self.rib_request.interface_failed {
            return;
        }
        self.rib_request.retry_task = None;
        self.rib_request.busy = false;
        self.rib_request.send_next_request();
    }

    pub fn failed(&self) -> bool {
        self.rib_request.interface_failed
    }

    // At most one request may be outstanding with the RIB.
    pub fn request_in_flight(&self) -> bool {
        self.rib_request.busy
    }

    fn reregister_nexthop(
        &mut self,
        nexthop: A::IpAddr,
        ref_cnt: u32,
        resolvable: bool,
        metric: u32,
    ) -> Option<A::IpAddr> {
        // Another cached entry may already cover this next hop.
        if self.cache.register_nexthop(nexthop, ref_cnt) {
            let Some((new_resolvable, new_metric)) =
                self.cache.lookup_by_nexthop(nexthop)
            else {
                error!(%nexthop, "covered next hop missing from cache");
                return None;
            };
            if new_resolvable != resolvable
                || (new_resolvable && new_metric != metric)
            {
                return Some(nexthop);
            }
            return None;
        }

        self.rib_request
            .reregister_nexthop(nexthop, ref_cnt, resolvable, metric);
        None
    }

    fn satisfy_register(
        &mut self,
        mut entry: RegisterEntry<A>,
        outcome: &mut ResponseOutcome<A>,
    ) {
        let nexthop = entry.nexthop;
        let Some((resolvable, _)) =
            self.cache.lookup_by_nexthop_without_entry(nexthop)
        else {
            return;
        };

        // Complete the downcalls from the lookup tables, unless everyone
        // lost interest in the meantime.
        if entry.register && entry.requests.total() > 0 {
            self.cache.register_nexthop(nexthop, entry.requests.total());
            for (requester, nets) in std::mem::take(&mut entry.requests.requests)
            {
                outcome.done.push(LookupDone {
                    nexthop,
                    requester,
                    nets,
                    resolved: resolvable,
                });
            }
        }

        // Complete the upcall-driven reregistration; the decision process
        // re-runs only if the answer actually changed.
        if entry.reregister && entry.ref_cnt > 0 {
            self.cache.register_nexthop(nexthop, entry.ref_cnt);
            if let Some((new_resolvable, new_metric)) =
                self.cache.lookup_by_nexthop(nexthop)
                && (new_resolvable != entry.resolvable
                    || (new_resolvable && new_metric != entry.metric))
            {
                outcome.changed.push(nexthop);
            }
        }
    }
}

// ===== helper functions =====

fn covers<A>(base_addr: A::IpAddr, prefix_len: u8, nexthop: A::IpAddr) -> bool
where
    A: AddressFamily,
{
    match (
        A::IpNetwork::new(base_addr, prefix_len),
        A::IpNetwork::new(nexthop, prefix_len),
    ) {
        (Ok(base), Ok(masked)) => base.apply_mask() == masked.apply_mask(),
        _ => false,
    }
}
