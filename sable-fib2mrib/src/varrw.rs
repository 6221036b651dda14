//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use sable_utils::policy::{PolicyError, PolicyValue, PolicyVar, VarRW};

use crate::route::Fib2mribRoute;

// Exposes a route's fields to the policy engine. Writes update the route
// in place.
#[derive(Debug)]
pub struct Fib2mribVarRW<'a> {
    route: &'a mut Fib2mribRoute,
}

// ===== impl Fib2mribVarRW =====

impl<'a> Fib2mribVarRW<'a> {
    pub fn new(route: &'a mut Fib2mribRoute) -> Fib2mribVarRW<'a> {
        Fib2mribVarRW { route }
    }
}

impl VarRW for Fib2mribVarRW<'_> {
    fn read(&self, var: PolicyVar) -> PolicyValue {
        match var {
            PolicyVar::Network4 if self.route.is_ipv4() => {
                PolicyValue::Net(self.route.net)
            }
            PolicyVar::Nexthop4 if self.route.is_ipv4() => {
                PolicyValue::Addr(self.route.nexthop)
            }
            PolicyVar::Network6 if self.route.is_ipv6() => {
                PolicyValue::Net(self.route.net)
            }
            PolicyVar::Nexthop6 if self.route.is_ipv6() => {
                PolicyValue::Addr(self.route.nexthop)
            }
            PolicyVar::Metric => PolicyValue::U32(self.route.metric),
            PolicyVar::PolicyTags => {
                PolicyValue::Tags(self.route.policy_tags.clone())
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
            (PolicyVar::Network4 | PolicyVar::Network6, PolicyValue::Net(net)) => {
                self.route.net = net;
                Ok(())
            }
            (
                PolicyVar::Nexthop4 | PolicyVar::Nexthop6,
                PolicyValue::Addr(addr),
            ) => {
                self.route.nexthop = addr;
                Ok(())
            }
            (PolicyVar::Metric, PolicyValue::U32(metric)) => {
                self.route.metric = metric;
                Ok(())
            }
            (PolicyVar::PolicyTags, PolicyValue::Tags(tags)) => {
                self.route.policy_tags = tags;
                Ok(())
            }
            (var, _) => Err(PolicyError::TypeMismatch(var)),
        }
    }
}
