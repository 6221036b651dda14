//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! The decision process: the single fan-in node of a family's pipeline.
//!
//! Routes hold cached state (resolvability, IGP distance) because that
//! state changes asynchronously. When considering alternatives on other
//! chains, the cached state on the route itself is authoritative, so the
//! view stays consistent with whatever the downstream chains were
//! previously told. The state of a route on another chain is never
//! modified here, except for the winner handover.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::af::AddressFamily;
use crate::debug::Debug;
use crate::peer::PeerId;
use crate::plumbing::Plumbing;
use crate::rib::{InternalMessage, RouteData, TableResult};
use crate::tables::fanout::FanoutOp;

// A route operation to hand to the fanout, tagged with the origin peer so
// the fanout can exclude it from distribution.
#[derive(Debug)]
pub struct Emit<A: AddressFamily> {
    pub origin: PeerId,
    pub op: FanoutOp<A>,
}

// ===== global functions =====

pub(crate) fn add_route<A>(
    plumbing: &Plumbing<A>,
    msg: InternalMessage<A>,
) -> (TableResult, Vec<Emit<A>>)
where
    A: AddressFamily,
{
    let mut emits = vec![];

    // If the next hop isn't resolvable, don't even consider the route.
    if !msg.route.nexthop_resolved() {
        return (TableResult::Unused, emits);
    }

    let (mut alternatives, old_winner) =
        plumbing.alternative_routes(Some(msg.peer.peer_id), msg.net());
    let old_winner = old_winner.map(|idx| alternatives[idx].clone());

    let new_route = RouteData::from_msg(&msg);
    let new_winner = if !alternatives.is_empty() {
        alternatives.push(new_route.clone());
        find_winner(&mut alternatives)
    } else {
        // The new route wins by default.
        Some(new_route)
    };
    let Some(new_winner) = new_winner else {
        return (TableResult::Unused, emits);
    };

    if let Some(old_winner) = old_winner {
        if Arc::ptr_eq(&old_winner.route, &new_winner.route) {
            // The winner didn't change.
            return (TableResult::NoChange, emits);
        }

        // The winner did change, so send a delete for the old winner.
        emits.push(Emit {
            origin: old_winner.peer.peer_id,
            op: FanoutOp::Delete(old_winner.to_msg()),
        });
        old_winner.route.set_is_not_winner();
    }

    // Send an add for the new winner.
    Debug::BestPathFound(msg.net().into()).log();
    new_winner
        .route
        .set_is_winner(new_winner.route.igp_metric().unwrap_or(0));
    if Arc::ptr_eq(&new_winner.route, &msg.route) {
        emits.push(Emit {
            origin: msg.peer.peer_id,
            op: FanoutOp::Add(msg),
        });
    } else {
        // The winner isn't the route that was just added; this can happen
        // due to MED weirdness.
        let mut winner_msg = new_winner.to_msg();
        if msg.push {
            winner_msg.set_push();
        }
        emits.push(Emit {
            origin: new_winner.peer.peer_id,
            op: FanoutOp::Add(winner_msg),
        });
    }

    (TableResult::Used, emits)
}

pub(crate) fn replace_route<A>(
    plumbing: &Plumbing<A>,
    old_msg: InternalMessage<A>,
    new_msg: InternalMessage<A>,
) -> (TableResult, Vec<Emit<A>>)
where
    A: AddressFamily,
{
    debug_assert!(old_msg.net() == new_msg.net());

    let (mut alternatives, old_winner) =
        plumbing.alternative_routes(Some(new_msg.peer.peer_id), new_msg.net());
    let mut old_winner = old_winner.map(|idx| alternatives[idx].clone());
    if old_winner.is_none() && old_msg.route.is_winner() {
        // The route being replaced was the old winner.
        old_winner = Some(RouteData::from_msg(&old_msg));
    }
    let Some(old_winner) = old_winner else {
        // No route was the old winner, presumably because none was
        // resolvable.
        return add_route(plumbing, new_msg);
    };

    let new_route = RouteData::from_msg(&new_msg);
    let new_winner = if !alternatives.is_empty() {
        alternatives.push(new_route);
        find_winner(&mut alternatives)
    } else if new_msg.route.nexthop_resolved() {
        // The new route wins by default if it's resolvable.
        Some(new_route)
    } else {
        None
    };

    // If there's no new winner, just delete the old route.
    let Some(new_winner) = new_winner else {
        let push_pending = new_msg.push && !old_msg.push;
        let (result, mut emits) = delete_route(plumbing, old_msg);
        if push_pending {
            emits.push(Emit {
                origin: new_msg.peer.peer_id,
                op: FanoutOp::Push,
            });
        }
        let result = match result {
            TableResult::Used => TableResult::Unused,
            result => result,
        };
        return (result, emits);
    };

    if Arc::ptr_eq(&new_winner.route, &old_winner.route) {
        return (TableResult::NoChange, vec![]);
    }

    // Build the deletion half.
    let old_out = if Arc::ptr_eq(&old_winner.route, &old_msg.route) {
        let mut out = old_msg;
        out.clear_push();
        out
    } else {
        old_winner.route.set_is_not_winner();
        old_winner.to_msg()
    };

    // Build the addition half.
    new_winner
        .route
        .set_is_winner(new_winner.route.igp_metric().unwrap_or(0));
    let new_out = if Arc::ptr_eq(&new_winner.route, &new_msg.route) {
        new_msg
    } else {
        let mut out = new_winner.to_msg();
        if new_msg.push {
            out.set_push();
        }
        out
    };

    let mut emits = vec![];
    if old_out.peer.peer_id == new_out.peer.peer_id {
        // Same origin: send as a replace without confusing the fanout.
        emits.push(Emit {
            origin: old_out.peer.peer_id,
            op: FanoutOp::Replace(old_out, new_out),
        });
    } else {
        // The fanout would route the two halves to different sets of
        // peers, so they must travel separately.
        emits.push(Emit {
            origin: old_out.peer.peer_id,
            op: FanoutOp::Delete(old_out),
        });
        emits.push(Emit {
            origin: new_out.peer.peer_id,
            op: FanoutOp::Add(new_out),
        });
    }

    (TableResult::Used, emits)
}

pub(crate) fn delete_route<A>(
    plumbing: &Plumbing<A>,
    msg: InternalMessage<A>,
) -> (TableResult, Vec<Emit<A>>)
where
    A: AddressFamily,
{
    let mut emits = vec![];

    let (mut alternatives, old_winner) =
        plumbing.alternative_routes(Some(msg.peer.peer_id), msg.net());
    let mut old_winner = old_winner.map(|idx| alternatives[idx].clone());
    if old_winner.is_none() && msg.route.is_winner() {
        // The route being deleted was the old winner.
        old_winner = Some(RouteData::from_msg(&msg));
    }

    let new_winner = if !alternatives.is_empty() {
        find_winner(&mut alternatives)
    } else {
        None
    };

    if old_winner.is_none() && new_winner.is_none() {
        // There are no resolvable routes, and there weren't before
        // either.
        return (TableResult::NoChange, emits);
    }

    let delayed_push = msg.push;
    if let Some(old_winner) = old_winner {
        if let Some(new_winner) = &new_winner
            && Arc::ptr_eq(&old_winner.route, &new_winner.route)
        {
            // The winner didn't change.
            return (TableResult::NoChange, emits);
        }

        if !Arc::ptr_eq(&old_winner.route, &msg.route) {
            let mut out = old_winner.to_msg();
            if delayed_push && new_winner.is_none() {
                out.set_push();
            }
            emits.push(Emit {
                origin: old_winner.peer.peer_id,
                op: FanoutOp::Delete(out),
            });
            old_winner.route.set_is_not_winner();
        } else {
            let mut out = msg.clone();
            if new_winner.is_some() {
                out.clear_push();
            }
            emits.push(Emit {
                origin: out.peer.peer_id,
                op: FanoutOp::Delete(out),
            });
            msg.route.set_is_not_winner();
        }
    }

    match new_winner {
        Some(new_winner) => {
            // Send an add for the new winner.
            Debug::BestPathFound(msg.net().into()).log();
            new_winner
                .route
                .set_is_winner(new_winner.route.igp_metric().unwrap_or(0));
            emits.push(Emit {
                origin: new_winner.peer.peer_id,
                op: FanoutOp::Add(new_winner.to_msg()),
            });
            if delayed_push {
                emits.push(Emit {
                    origin: msg.peer.peer_id,
                    op: FanoutOp::Push,
                });
            }
        }
        None => {
            Debug::BestPathNotFound(msg.net().into()).log();
        }
    }

    (TableResult::Used, emits)
}

// The tie-breaker cascade. Each step narrows the candidate list; the
// first step that leaves a single candidate decides.
//
// Resolvability and IGP distance come from the cached state on the routes
// themselves, never from the live resolver: the live answer may already
// disagree with what the downstream chains were told.
pub(crate) fn find_winner<A>(
    alternatives: &mut Vec<RouteData<A>>,
) -> Option<RouteData<A>>
where
    A: AddressFamily,
{
    // Routes that don't resolve are not candidates at all.
    alternatives.retain(|alt| alt.route.nexthop_resolved());
    if alternatives.is_empty() {
        return None;
    }
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // Highest LocalPref. Absent LocalPref is treated as 0.
    let best = alternatives
        .iter()
        .map(|alt| alt.attrs.value.base.local_pref.unwrap_or(0))
        .max()
        .unwrap();
    alternatives
        .retain(|alt| alt.attrs.value.base.local_pref.unwrap_or(0) == best);
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // Shortest AS path.
    let best = alternatives
        .iter()
        .map(|alt| alt.attrs.value.base.as_path.path_length())
        .min()
        .unwrap();
    alternatives
        .retain(|alt| alt.attrs.value.base.as_path.path_length() == best);
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // Lowest origin (IGP < EGP < INCOMPLETE).
    let best = alternatives
        .iter()
        .map(|alt| alt.attrs.value.base.origin)
        .min()
        .unwrap();
    alternatives.retain(|alt| alt.attrs.value.base.origin == best);
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // MED, compared only between routes from the same neighbor AS.
    med_elimination(alternatives);
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // Prefer routes from external peers over internal peers.
    if alternatives.iter().any(|alt| !alt.peer.ibgp) {
        alternatives.retain(|alt| !alt.peer.ibgp);
    }
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // Lowest IGP distance to the next hop.
    let best = alternatives
        .iter()
        .map(|alt| alt.route.igp_metric().unwrap_or(0))
        .min()
        .unwrap();
    alternatives.retain(|alt| alt.route.igp_metric().unwrap_or(0) == best);
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // Lowest router ID of the originating peer.
    let best = alternatives
        .iter()
        .map(|alt| alt.peer.router_id)
        .min()
        .unwrap();
    alternatives.retain(|alt| alt.peer.router_id == best);
    if alternatives.len() == 1 {
        return Some(alternatives[0].clone());
    }

    // Lowest neighbor address.
    let best = alternatives
        .iter()
        .map(|alt| alt.peer.neighbor_addr)
        .min()
        .unwrap();
    alternatives.retain(|alt| alt.peer.neighbor_addr == best);

    // Anything left over is effectively identical; pick the first.
    Some(alternatives[0].clone())
}

// Pairwise MED elimination: a route is dropped if another route from the
// same neighbor AS has a lower MED. An empty AS path compares under a
// sentinel AS of its own, so two empty-path routes do MED-compare with
// each other. Absent MED is treated as 0.
fn med_elimination<A>(alternatives: &mut Vec<RouteData<A>>)
where
    A: AddressFamily,
{
    let mut lowest: BTreeMap<Option<u32>, u32> = BTreeMap::new();
    for alt in alternatives.iter() {
        let neighbor_as = alt.attrs.value.base.as_path.first();
        let med = alt.attrs.value.base.med.unwrap_or(0);
        lowest
            .entry(neighbor_as)
            .and_modify(|best| *best = (*best).min(med))
            .or_insert(med);
    }
    alternatives.retain(|alt| {
        let neighbor_as = alt.attrs.value.base.as_path.first();
        let med = alt.attrs.value.base.med.unwrap_or(0);
        med == lowest[&neighbor_as]
    });
}
