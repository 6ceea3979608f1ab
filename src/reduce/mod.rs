//! The Reduce strategy's delegation planner (§4.3): given per-process
//! per-tile contribution masks, computes which processes compose which
//! tile and where each contributor sends its piece.

use crate::error::{ComposeError, Result};
use crate::options::SessionState;
use std::collections::HashMap;

/// The group of processes that compose one tile, plus where its composited
/// result is collected to (§3's "tile-plan record").
#[derive(Debug, Clone)]
pub struct TileAssignment {
    /// Participating process ranks, in seat order.
    pub compose_group: Vec<usize>,
    /// The tile's display process (always a member of `compose_group`).
    pub display_node: usize,
    /// Index of `display_node` within `compose_group`: always 0 in
    /// unordered mode, the display node's ordered seat otherwise (§4.3
    /// step 7).
    pub image_dest: usize,
}

/// The full assignment computed for every tile and every process (§4.3).
#[derive(Debug, Clone)]
pub struct DelegationPlan {
    /// One entry per tile, indexed by tile number.
    pub tiles: Vec<TileAssignment>,
    /// `(tile, contributor rank) -> destination rank` the contributor
    /// sends its piece to.
    pub send_destinations: HashMap<(usize, usize), usize>,
    /// `process rank -> tile` it was seated into, for processes seated in
    /// some tile's compose-group.
    pub seat: HashMap<usize, usize>,
}

/// This process's slice of a [`DelegationPlan`] (§4.3's public contract).
#[derive(Debug, Clone)]
pub struct ProcessPlan {
    /// This process's compose-group, or empty if it composes no tile.
    pub compose_group: Vec<usize>,
    /// The tile this process is seated in, or `None`.
    pub compose_tile: Option<usize>,
    /// Index of the tile's display node within `compose_group`.
    pub image_dest: usize,
    /// `(tile, destination rank)` for every tile this process contributes
    /// to (a process may contribute to several tiles even though it is
    /// seated in at most one).
    pub send_destinations: Vec<(usize, usize)>,
}

fn contributes(state: &dyn SessionState, process: usize, tile: usize) -> bool {
    state.contained_tiles_mask(process) & (1 << tile) != 0
}

/// Per-tile quota `Q(t)` (§4.3 step 1): at least one seat for any tile with
/// contributors, proportional to its share of total contributions
/// otherwise, capped at its own contributor count.
fn initial_quotas(contrib: &[usize], num_processes: usize) -> Vec<usize> {
    let total: usize = contrib.iter().sum();
    contrib
        .iter()
        .map(|&c| {
            if c == 0 {
                0
            } else if total == 0 {
                1
            } else {
                (c * num_processes / total).max(1).min(c)
            }
        })
        .collect()
}

/// Grow/shrink quotas until they sum to exactly `num_processes` (§4.3 step
/// 2), trading seats between the tiles with the most/least contributor
/// pressure per seat, ties broken by lower tile index.
fn rebalance(quotas: &mut [usize], contrib: &[usize], num_processes: usize) {
    let mut total: usize = quotas.iter().sum();

    while total < num_processes {
        let grow = (0..quotas.len())
            .filter(|&t| contrib[t] > quotas[t])
            .max_by(|&a, &b| {
                let ratio_a = contrib[a] as f64 / quotas[a].max(1) as f64;
                let ratio_b = contrib[b] as f64 / quotas[b].max(1) as f64;
                ratio_a
                    .partial_cmp(&ratio_b)
                    .unwrap()
                    .then(b.cmp(&a)) // prefer the lower index on ties
            });
        let Some(t) = grow else { break };
        quotas[t] += 1;
        total += 1;
    }

    while total > num_processes {
        let shrink = (0..quotas.len())
            .filter(|&t| quotas[t] >= 2)
            .min_by(|&a, &b| {
                let ratio_a = contrib[a] as f64 / quotas[a] as f64;
                let ratio_b = contrib[b] as f64 / quotas[b] as f64;
                ratio_a
                    .partial_cmp(&ratio_b)
                    .unwrap()
                    .then(a.cmp(&b)) // prefer the lower index on ties
            });
        let Some(t) = shrink else { break };
        quotas[t] -= 1;
        total -= 1;
    }
}

/// Compute the full assignment for every process and tile (§4.3).
///
/// # Errors
///
/// Returns [`ComposeError::SanityCheck`] if the rebalanced quotas don't sum
/// to `num_processes`, or if an invariant from §4.3's "Invariants checked"
/// is violated.
pub fn compute(state: &dyn SessionState) -> Result<DelegationPlan> {
    let num_processes = state.num_processes();
    let num_tiles = state.num_tiles();
    let contrib: Vec<usize> = state.tile_contrib_counts().to_vec();
    let display_nodes = state.display_nodes();

    if contrib.len() != num_tiles || display_nodes.len() != num_tiles {
        return Err(ComposeError::sanity(
            "tile_contrib_counts/display_nodes length disagrees with num_tiles",
        ));
    }

    let mut quotas = initial_quotas(&contrib, num_processes);
    rebalance(&mut quotas, &contrib, num_processes);
    let total_quota: usize = quotas.iter().sum();
    log::debug!("reduce delegator: num_tiles={num_tiles}, contrib={contrib:?}, quotas={quotas:?}");
    if total_quota != num_processes {
        return Err(ComposeError::sanity(format!(
            "quota rebalance produced {total_quota}, expected {num_processes}"
        )));
    }

    // Step 3: seat display nodes.
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); num_tiles];
    let mut seat: HashMap<usize, usize> = HashMap::new();
    for t in 0..num_tiles {
        if contrib[t] > 0 {
            groups[t].push(display_nodes[t]);
            seat.insert(display_nodes[t], t);
        }
    }

    // Steps 4/5 walk candidates in composite order when ordered compositing
    // is on, so each tile's seated set stays a contiguous prefix/suffix of
    // that tile's restriction of the order (§4.3, §8 scenario 6).
    let ordered = state.ordered_composite();
    let candidate_order: Vec<usize> = if ordered {
        state.composite_order().to_vec()
    } else {
        (0..num_processes).collect()
    };

    // Step 4: seat contributors into an under-full tile they contribute to.
    for &process in &candidate_order {
        if seat.contains_key(&process) {
            continue;
        }
        for t in 0..num_tiles {
            if groups[t].len() < quotas[t] && contributes(state, process, t) {
                groups[t].push(process);
                seat.insert(process, t);
                break;
            }
        }
    }

    // Step 5: seat the rest in tile order.
    for &process in &candidate_order {
        if seat.contains_key(&process) {
            continue;
        }
        for t in 0..num_tiles {
            if groups[t].len() < quotas[t] {
                groups[t].push(process);
                seat.insert(process, t);
                break;
            }
        }
    }

    for t in 0..num_tiles {
        if groups[t].len() != quotas[t] {
            return Err(ComposeError::sanity(format!(
                "tile {t} seated {} processes, quota was {}",
                groups[t].len(),
                quotas[t]
            )));
        }
    }

    // Step 6/7: send destinations and image_dest per tile.
    let composite_order = state.composite_order();
    let mut send_destinations = HashMap::new();
    let mut tiles = Vec::with_capacity(num_tiles);

    for t in 0..num_tiles {
        let mut proc_group = groups[t].clone();
        let display_node = display_nodes[t];

        if contrib[t] == 0 {
            tiles.push(TileAssignment {
                compose_group: proc_group,
                display_node,
                image_dest: 0,
            });
            continue;
        }

        let contributors: Vec<usize> = if ordered {
            composite_order
                .iter()
                .copied()
                .filter(|&p| contributes(state, p, t))
                .collect()
        } else {
            (0..num_processes).filter(|&p| contributes(state, p, t)).collect()
        };

        let image_dest = if ordered {
            assign_ordered(&contributors, &mut proc_group, &mut send_destinations, t);
            proc_group
                .iter()
                .position(|&p| p == display_node)
                .ok_or_else(|| ComposeError::sanity("display node missing from its own compose-group"))?
        } else {
            assign_unordered(state, &contributors, &proc_group, &mut send_destinations, t);
            0
        };

        tiles.push(TileAssignment {
            compose_group: proc_group,
            display_node,
            image_dest,
        });
    }

    for (t, tile) in tiles.iter().enumerate() {
        log::trace!(
            "tile {t}: compose_group={:?}, display_node={}, image_dest={}",
            tile.compose_group,
            tile.display_node,
            tile.image_dest
        );
    }

    Ok(DelegationPlan {
        tiles,
        send_destinations,
        seat,
    })
}

/// Unordered-mode send assignment (§4.3 step 6, unordered branch): a
/// contributor already seated in the tile sends to itself; others are
/// matched round-robin to group members who aren't themselves contributors
/// to this tile, avoiding piling extra traffic onto nodes already busy
/// compositing their own contribution.
fn assign_unordered(
    state: &dyn SessionState,
    contributors: &[usize],
    proc_group: &[usize],
    send_destinations: &mut HashMap<(usize, usize), usize>,
    tile: usize,
) {
    let non_contributor_members: Vec<usize> = proc_group
        .iter()
        .copied()
        .filter(|&p| !contributes(state, p, tile))
        .collect();

    let mut next_dest = 0usize;
    for &contributor in contributors {
        if proc_group.contains(&contributor) {
            send_destinations.insert((tile, contributor), contributor);
            continue;
        }
        let dest = if non_contributor_members.is_empty() {
            proc_group[next_dest % proc_group.len()]
        } else {
            non_contributor_members[next_dest % non_contributor_members.len()]
        };
        next_dest += 1;
        send_destinations.insert((tile, contributor), dest);
    }
}

/// Ordered-mode send assignment (§4.3 step 6, ordered branch): `contributors`
/// is already in composite order; contributor `i` owns slot
/// `i * group_size / num_contributors`. `proc_group` is first reshuffled so
/// that any contributor who is itself a seated member of the group sits at
/// the slot it owns — only then does assigning contributor `i` to
/// `proc_group[slot]` actually put a seated contributor's traffic onto
/// itself instead of scattering it across the group.
fn assign_ordered(
    contributors: &[usize],
    proc_group: &mut Vec<usize>,
    send_destinations: &mut HashMap<(usize, usize), usize>,
    tile: usize,
) {
    let group_size = proc_group.len();
    let num_contributors = contributors.len();
    if num_contributors == 0 || group_size == 0 {
        return;
    }

    let mut owned_slot: HashMap<usize, usize> = HashMap::new();
    for (i, &contributor) in contributors.iter().enumerate() {
        owned_slot.entry(contributor).or_insert(i * group_size / num_contributors);
    }

    let mut seated: Vec<Option<usize>> = vec![None; group_size];
    let mut unplaced = Vec::new();
    for &member in proc_group.iter() {
        match owned_slot.get(&member) {
            Some(&slot) if seated[slot].is_none() => seated[slot] = Some(member),
            _ => unplaced.push(member),
        }
    }
    let mut unplaced = unplaced.into_iter();
    for slot in &mut seated {
        if slot.is_none() {
            *slot = unplaced.next();
        }
    }
    *proc_group = seated
        .into_iter()
        .map(|s| s.expect("reshuffle preserves group size"))
        .collect();

    for (i, &contributor) in contributors.iter().enumerate() {
        let slot = i * group_size / num_contributors;
        send_destinations.insert((tile, contributor), proc_group[slot]);
    }
}

impl DelegationPlan {
    /// Project the global plan onto one process's view (§4.3's public
    /// contract: "caller's compose-group", "caller's compose-tile",
    /// per-tile send-destination, image-destination index).
    #[must_use]
    pub fn for_process(&self, rank: usize) -> ProcessPlan {
        let compose_tile = self.seat.get(&rank).copied();
        let (compose_group, image_dest) = match compose_tile {
            Some(t) => (self.tiles[t].compose_group.clone(), self.tiles[t].image_dest),
            None => (Vec::new(), 0),
        };
        let send_destinations = self
            .send_destinations
            .iter()
            .filter(|&(&(_, contributor), _)| contributor == rank)
            .map(|(&(tile, _), &dest)| (tile, dest))
            .collect();
        ProcessPlan {
            compose_group,
            compose_tile,
            image_dest,
            send_destinations,
        }
    }
}

/// Run the delegator for `rank` against `state`, returning its projected
/// view (§4.3's public contract, §6 outbound `reduce_compose` input).
///
/// # Errors
///
/// See [`compute`].
pub fn plan_for(state: &dyn SessionState, rank: usize) -> Result<ProcessPlan> {
    Ok(compute(state)?.for_process(rank))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{CompositeMode, InMemorySessionState};
    use crate::options::{ColorFormat, DepthFormat, ImageFormat};

    fn format() -> ImageFormat {
        ImageFormat {
            color: ColorFormat::RgbaUbyte,
            depth: DepthFormat::Float,
        }
    }

    fn stress_state() -> InMemorySessionState {
        // 8 processes, 3 tiles with contrib counts [6, 2, 8] (§8 scenario 6).
        // tile0: ranks 0-5; tile1: ranks 6-7; tile2: ranks 0-7 (all contribute).
        let mut masks = vec![0u64; 8];
        for p in 0..6 {
            masks[p] |= 1 << 0;
        }
        for p in 6..8 {
            masks[p] |= 1 << 1;
        }
        for p in 0..8 {
            masks[p] |= 1 << 2;
        }
        InMemorySessionState {
            composite_mode: CompositeMode::ZBuffer,
            image_format: format(),
            ordered_composite: false,
            composite_order: (0..8).collect(),
            interlace_images: false,
            magic_k: 8,
            num_processes: 8,
            rank: 0,
            num_tiles: 3,
            display_nodes: vec![0, 6, 7],
            tile_contrib_counts: vec![6, 2, 8],
            contained_tiles_masks: masks,
        }
    }

    #[test]
    fn quota_sums_to_process_count() {
        let plan = compute(&stress_state()).unwrap();
        let total: usize = plan.tiles.iter().map(|t| t.compose_group.len()).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn tile_two_gets_largest_quota() {
        let plan = compute(&stress_state()).unwrap();
        // tile 2 has the largest contrib count (8), so its quota should be
        // at least as large as the other two tiles'.
        let sizes: Vec<usize> = plan.tiles.iter().map(|t| t.compose_group.len()).collect();
        assert!(sizes[2] >= 3);
    }

    #[test]
    fn no_process_seated_in_more_than_one_tile() {
        let plan = compute(&stress_state()).unwrap();
        assert_eq!(plan.seat.len(), 8);
    }

    #[test]
    fn display_node_is_in_its_own_compose_group() {
        let plan = compute(&stress_state()).unwrap();
        for tile in &plan.tiles {
            if !tile.compose_group.is_empty() {
                assert!(tile.compose_group.contains(&tile.display_node));
            }
        }
    }

    #[test]
    fn single_tile_single_process_is_trivially_assigned() {
        let state = InMemorySessionState::single_process(format());
        let plan = compute(&state).unwrap();
        assert_eq!(plan.tiles.len(), 1);
        assert_eq!(plan.tiles[0].compose_group, vec![0]);
        assert_eq!(plan.tiles[0].display_node, 0);

        let projected = plan.for_process(0);
        assert_eq!(projected.compose_tile, Some(0));
        assert_eq!(projected.compose_group, vec![0]);
    }

    #[test]
    fn ordered_mode_assigns_contiguous_prefix_suffix_partitions() {
        let mut state = stress_state();
        state.ordered_composite = true;
        state.composite_order = vec![2, 0, 1, 3, 4, 5, 6, 7];
        let plan = compute(&state).unwrap();

        // Every contributor to tile 0 must get a send-destination inside
        // tile 0's compose group.
        let tile0_group = &plan.tiles[0].compose_group;
        for process in 0..6 {
            let dest = plan.send_destinations[&(0, process)];
            assert!(tile0_group.contains(&dest));
        }
    }
}
