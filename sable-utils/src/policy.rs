//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// Identifiers of the policy filter banks a subsystem may run routes through.
//
// `Import` may reject routes. `ExportSourceMatch` only tags routes for later
// redistribution matching and is never allowed to reject.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PolicyFilterId {
    Import,
    ExportSourceMatch,
}

// Tags attached to a route by the policy engine.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct PolicyTags(BTreeSet<u32>);

// Variables a policy filter can read from (and write to) a route.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PolicyVar {
    Network4,
    Nexthop4,
    Network6,
    Nexthop6,
    Metric,
    PolicyTags,
}

// A value read from or written to a policy variable.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PolicyValue {
    Net(IpNetwork),
    Addr(IpAddr),
    U32(u32),
    Tags(PolicyTags),
    Unset,
}

// Read/write access to the fields of a route, as seen by a policy filter.
//
// Writes update the underlying route in place.
pub trait VarRW {
    fn read(&self, var: PolicyVar) -> PolicyValue;

    fn write(
        &mut self,
        var: PolicyVar,
        value: PolicyValue,
    ) -> Result<(), PolicyError>;
}

#[derive(Debug)]
pub enum PolicyError {
    RejectNotAllowed(PolicyFilterId),
    ReadOnlyVariable(PolicyVar),
    TypeMismatch(PolicyVar),
}

// A single match condition within a policy term.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PolicyMatch {
    // Route's network falls within the given prefix.
    NetworkWithin(IpNetwork),
    // Route's network is exactly the given prefix.
    NetworkExact(IpNetwork),
    Nexthop(IpAddr),
    Metric(u32),
}

// Action taken when all of a term's match conditions hold.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PolicyAction {
    Accept,
    Reject,
    // Attach a tag to the route and accept it.
    SetTag(u32),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PolicyTerm {
    pub matches: Vec<PolicyMatch>,
    pub action: PolicyAction,
}

// A compiled policy filter: terms evaluated in order, first match wins.
//
// The policy-expression language itself is out of scope; configuration
// hands over already-compiled programs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PolicyProgram {
    pub terms: Vec<PolicyTerm>,
}

// The set of configured filter programs of one subsystem.
#[derive(Debug, Default)]
pub struct PolicyFilters {
    import: Option<PolicyProgram>,
    export_source_match: Option<PolicyProgram>,
}

// ===== impl PolicyTags =====

impl PolicyTags {
    pub fn insert(&mut self, tag: u32) {
        self.0.insert(tag);
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u32> for PolicyTags {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> PolicyTags {
        PolicyTags(iter.into_iter().collect())
    }
}

// ===== impl PolicyFilters =====

impl PolicyFilters {
    // Install a filter program, replacing any previous one.
    pub fn configure(
        &mut self,
        filter_id: PolicyFilterId,
        program: PolicyProgram,
    ) -> Result<(), PolicyError> {
        if filter_id == PolicyFilterId::ExportSourceMatch
            && program
                .terms
                .iter()
                .any(|term| term.action == PolicyAction::Reject)
        {
            return Err(PolicyError::RejectNotAllowed(filter_id));
        }

        *self.slot(filter_id) = Some(program);
        Ok(())
    }

    // Remove a filter program. Routes run through an unconfigured filter
    // are accepted unmodified.
    pub fn reset(&mut self, filter_id: PolicyFilterId) {
        *self.slot(filter_id) = None;
    }

    // Run one filter over a route. Returns whether the route was accepted.
    pub fn run_filter(
        &self,
        filter_id: PolicyFilterId,
        varrw: &mut dyn VarRW,
    ) -> Result<bool, PolicyError> {
        let Some(program) = self.program(filter_id) else {
            return Ok(true);
        };

        for term in &program.terms {
            if !term.matches.iter().all(|m| m.matches(varrw)) {
                continue;
            }
            return match &term.action {
                PolicyAction::Accept => Ok(true),
                PolicyAction::Reject => Ok(false),
                PolicyAction::SetTag(tag) => {
                    let mut tags = match varrw.read(PolicyVar::PolicyTags) {
                        PolicyValue::Tags(tags) => tags,
                        _ => PolicyTags::default(),
                    };
                    tags.insert(*tag);
                    varrw.write(
                        PolicyVar::PolicyTags,
                        PolicyValue::Tags(tags),
                    )?;
                    Ok(true)
                }
            };
        }

        // No term matched.
        Ok(true)
    }

    fn program(&self, filter_id: PolicyFilterId) -> Option<&PolicyProgram> {
        match filter_id {
            PolicyFilterId::Import => self.import.as_ref(),
            PolicyFilterId::ExportSourceMatch => {
                self.export_source_match.as_ref()
            }
        }
    }

    fn slot(&mut self, filter_id: PolicyFilterId) -> &mut Option<PolicyProgram> {
        match filter_id {
            PolicyFilterId::Import => &mut self.import,
            PolicyFilterId::ExportSourceMatch => &mut self.export_source_match,
        }
    }
}

// ===== impl PolicyMatch =====

impl PolicyMatch {
    fn matches(&self, varrw: &dyn VarRW) -> bool {
        match self {
            PolicyMatch::NetworkWithin(prefix) => {
                let Some(net) = read_network(varrw) else {
                    return false;
                };
                prefix.contains(net.ip()) && net.prefix() >= prefix.prefix()
            }
            PolicyMatch::NetworkExact(prefix) => {
                read_network(varrw) == Some(*prefix)
            }
            PolicyMatch::Nexthop(addr) => {
                let nexthop = match addr {
                    IpAddr::V4(_) => varrw.read(PolicyVar::Nexthop4),
                    IpAddr::V6(_) => varrw.read(PolicyVar::Nexthop6),
                };
                nexthop == PolicyValue::Addr(*addr)
            }
            PolicyMatch::Metric(metric) => {
                varrw.read(PolicyVar::Metric) == PolicyValue::U32(*metric)
            }
        }
    }
}

// ===== impl PolicyError =====

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::RejectNotAllowed(filter_id) => {
                write!(f, "filter {:?} is not allowed to reject", filter_id)
            }
            PolicyError::ReadOnlyVariable(var) => {
                write!(f, "policy variable {:?} is read-only", var)
            }
            PolicyError::TypeMismatch(var) => {
                write!(f, "type mismatch writing policy variable {:?}", var)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

// ===== helper functions =====

fn read_network(varrw: &dyn VarRW) -> Option<IpNetwork> {
    for var in [PolicyVar::Network4, PolicyVar::Network6] {
        if let PolicyValue::Net(net) = varrw.read(var) {
            return Some(net);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};

    use super::*;

    struct TestRoute {
        net: IpNetwork,
        nexthop: IpAddr,
        metric: u32,
        tags: PolicyTags,
    }

    impl VarRW for TestRoute {
        fn read(&self, var: PolicyVar) -> PolicyValue {
            match var {
                PolicyVar::Network4 => PolicyValue::Net(self.net),
                PolicyVar::Nexthop4 => PolicyValue::Addr(self.nexthop),
                PolicyVar::Metric => PolicyValue::U32(self.metric),
                PolicyVar::PolicyTags => {
                    PolicyValue::Tags(self.tags.clone())
                }
                _ => PolicyValue::Unset,
            }
        }

        fn write(
            &mut self,
            var: PolicyVar,
            value: PolicyValue,
        ) -> Result<(), PolicyError> {
            match (var, value) {
                (PolicyVar::PolicyTags, PolicyValue::Tags(tags)) => {
                    self.tags = tags;
                    Ok(())
                }
                (var, _) => Err(PolicyError::ReadOnlyVariable(var)),
            }
        }
    }

    fn route() -> TestRoute {
        TestRoute {
            net: net4!("10.0.0.0/24").into(),
            nexthop: ip4!("192.0.2.1").into(),
            metric: 5,
            tags: Default::default(),
        }
    }

    #[test]
    fn unconfigured_filter_accepts() {
        let filters = PolicyFilters::default();
        let mut route = route();
        assert!(
            filters
                .run_filter(PolicyFilterId::Import, &mut route)
                .unwrap()
        );
    }

    #[test]
    fn first_matching_term_wins() {
        let mut filters = PolicyFilters::default();
        filters
            .configure(
                PolicyFilterId::Import,
                PolicyProgram {
                    terms: vec![
                        PolicyTerm {
                            matches: vec![PolicyMatch::Metric(99)],
                            action: PolicyAction::Reject,
                        },
                        PolicyTerm {
                            matches: vec![PolicyMatch::NetworkWithin(
                                net4!("10.0.0.0/8").into(),
                            )],
                            action: PolicyAction::Reject,
                        },
                    ],
                },
            )
            .unwrap();

        let mut route = route();
        assert!(
            !filters
                .run_filter(PolicyFilterId::Import, &mut route)
                .unwrap()
        );
    }

    #[test]
    fn tagging_updates_route() {
        let mut filters = PolicyFilters::default();
        filters
            .configure(
                PolicyFilterId::ExportSourceMatch,
                PolicyProgram {
                    terms: vec![PolicyTerm {
                        matches: vec![PolicyMatch::Nexthop(
                            ip4!("192.0.2.1").into(),
                        )],
                        action: PolicyAction::SetTag(7),
                    }],
                },
            )
            .unwrap();

        let mut route = route();
        assert!(
            filters
                .run_filter(PolicyFilterId::ExportSourceMatch, &mut route)
                .unwrap()
        );
        assert!(route.tags.contains(7));
    }

    #[test]
    fn source_match_may_not_reject() {
        let mut filters = PolicyFilters::default();
        let result = filters.configure(
            PolicyFilterId::ExportSourceMatch,
            PolicyProgram {
                terms: vec![PolicyTerm {
                    matches: vec![],
                    action: PolicyAction::Reject,
                }],
            },
        );
        assert!(matches!(result, Err(PolicyError::RejectNotAllowed(_))));
    }
}
