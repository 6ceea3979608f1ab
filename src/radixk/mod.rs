//! The Radix-k composer (§4.2): a multi-round swap-composite scheduler.
//! Each round partitions the current working image among `k` partners,
//! exchanges pieces, and folds arrivals into a pairwise composite tree
//! (`tree`), leaving each partner holding an even slice of the round's
//! composited result.

mod tree;

use crate::diagnostic::DiagnosticSink;
use crate::error::{ComposeError, Result};
use crate::image::{self, ImageFormat, SparseImage};
use crate::options::{CompositeMode, RADIXK_TAG_BASE};
use crate::pivot::pivot_for;
use crate::scratch::{ScratchBuffers, ScratchSlot};
use crate::transport::Transport;
use bytes::Bytes;
use smallvec::SmallVec;
use tree::CompositeTree;

/// Partner lists are sized by a round's `k`, almost always `MAGIC_K` or
/// less; inline storage avoids a heap allocation per round for the common
/// case.
type PartnerList = SmallVec<[(u32, usize); 8]>;

/// Choose the per-round factorization of `world_size` around target `magic_k`
/// (§4.2.2): prefer `magic_k` itself, then search `[2, 2·magic_k)` outward
/// from `magic_k` by the pivot sequence, then scan up to `sqrt(remaining)`,
/// finally falling back to the remaining count itself (large prime case).
///
/// A pure function of `(world_size, magic_k)`, per the determinism property
/// in §8. `world_size == 1` yields zero rounds.
#[must_use]
pub fn radixk_get_k(world_size: u32, magic_k: u32) -> Vec<u32> {
    let mut factors = Vec::new();
    let mut remaining = world_size;
    while remaining > 1 {
        let k = choose_round_k(remaining, magic_k);
        factors.push(k);
        remaining /= k;
    }
    factors
}

fn choose_round_k(remaining: u32, magic_k: u32) -> u32 {
    if magic_k >= 2 && remaining % magic_k == 0 {
        return magic_k;
    }

    let lo = 2u32;
    let hi = 2 * magic_k;
    if hi > lo {
        let len = hi - lo;
        let pivot = magic_k.saturating_sub(lo).min(len - 1);
        for step in pivot_for(pivot, len) {
            let candidate = lo + step;
            if candidate >= 2 && remaining % candidate == 0 {
                return candidate;
            }
        }
    }

    let sqrt_remaining = (f64::from(remaining)).sqrt() as u32;
    let scan_start = hi.max(2);
    for candidate in scan_start..=sqrt_remaining {
        if candidate >= 2 && remaining % candidate == 0 {
            return candidate;
        }
    }

    remaining
}

/// Find `rank`'s position in `group`.
///
/// # Errors
///
/// Returns [`ComposeError::Topology`] if `rank` isn't a member of `group`.
fn position_in_group(group: &[usize], rank: usize) -> Result<usize> {
    group
        .iter()
        .position(|&r| r == rank)
        .ok_or(ComposeError::Topology {
            rank,
            group_size: group.len(),
        })
}

/// Run the Radix-k algorithm for the caller (`rank`, a member of `group`)
/// over `input`, returning the caller's final contiguous piece of the
/// composited image and that piece's offset in the overall pixel space
/// (§4.2's public contract).
///
/// `image_dest` is advisory only for this strategy (kept for symmetry with
/// the outbound interface in §6) and is not consulted here.
///
/// # Errors
///
/// Returns [`ComposeError::Topology`] if `rank` is not in `group`, or
/// propagates a sanity-check/format-mismatch/transport failure raised while
/// splitting, exchanging, or compositing pieces (§7). Every failure is also
/// reported to `diagnostics` before being returned.
pub async fn radixk_compose(
    transport: &dyn Transport,
    diagnostics: &dyn DiagnosticSink,
    group: &[usize],
    rank: usize,
    mode: CompositeMode,
    format: ImageFormat,
    magic_k: u32,
    interlace_enabled: bool,
    input: SparseImage,
) -> Result<(SparseImage, u32)> {
    log::info!("radixk compose starting: rank={rank}, group_size={}", group.len());
    let result = run(
        transport,
        diagnostics,
        group,
        rank,
        mode,
        format,
        magic_k,
        interlace_enabled,
        input,
    )
    .await;
    match result {
        Ok(result) => {
            log::info!("radixk compose finished: rank={rank}, piece_offset={}", result.1);
            Ok(result)
        }
        Err(err) => {
            diagnostics.raise_error(&err.to_string(), 1);
            Err(err)
        }
    }
}

async fn run(
    transport: &dyn Transport,
    diagnostics: &dyn DiagnosticSink,
    group: &[usize],
    rank: usize,
    mode: CompositeMode,
    format: ImageFormat,
    magic_k: u32,
    interlace_enabled: bool,
    input: SparseImage,
) -> Result<(SparseImage, u32)> {
    let rank_in_group = position_in_group(group, rank)?;
    let group_size = group.len() as u32;

    if group_size == 0 {
        return Err(ComposeError::sanity("compose-group is empty"));
    }
    if group_size == 1 {
        return Ok((input, 0));
    }

    let k_array = radixk_get_k(group_size, magic_k);
    log::debug!("radixk factor schedule for group_size={group_size}, magic_k={magic_k}: {k_array:?}");
    if k_array.iter().product::<u32>() != group_size {
        return Err(ComposeError::sanity(format!(
            "factorization product {} does not match group size {group_size}",
            k_array.iter().product::<u32>()
        )));
    }

    let mut working = if interlace_enabled && k_array.len() > 1 {
        image::interlace(&input, group_size)?
    } else {
        input
    };

    let mut offset = 0u32;
    let mut prefix_product = 1u32;
    let mut remaining_partitions = group_size;
    let mut global_partition = 0u32;
    let mut partition_stride = 1u32;
    let mut scratch = ScratchBuffers::new();

    for (round_idx, &k) in k_array.iter().enumerate() {
        let group_index = rank_in_group as u32;
        let p = (group_index / prefix_product) % k;

        let mut partners: PartnerList = group
            .iter()
            .enumerate()
            .filter_map(|(idx, &proc)| {
                let idx = idx as u32;
                let same_prefix = idx / (prefix_product * k) == group_index / (prefix_product * k);
                same_prefix.then(|| ((idx / prefix_product) % k, proc))
            })
            .collect();
        partners.sort_by_key(|&(partner_p, _)| partner_p);
        if partners.len() != k as usize {
            return Err(ComposeError::sanity(format!(
                "round {round_idx}: expected {k} partners, found {}",
                partners.len()
            )));
        }

        let (pieces, piece_offsets) = image::split(&working, offset, k, remaining_partitions)?;
        let max_piece = image::split_partition_num_pixels(
            working.pixel_count(),
            k,
            remaining_partitions,
        )?;
        let recv_cap = image::buffer_size(format, max_piece);
        let tag = RADIXK_TAG_BASE + round_idx as u32;
        log::debug!(
            "round {round_idx}: rank={rank}, k={k}, own_partition={p}, split offsets={piece_offsets:?}"
        );
        log::trace!("round {round_idx}: partners={partners:?}");

        let mut pending_reqs = Vec::with_capacity(k as usize - 1);
        let mut pending_partners = Vec::with_capacity(k as usize - 1);
        for (idx, &(_, proc)) in partners.iter().enumerate() {
            let idx = idx as u32;
            if idx == p {
                continue;
            }
            let req = transport.irecv(proc, tag, recv_cap).await?;
            pending_reqs.push(req);
            pending_partners.push(idx as usize);
        }

        let mut send_reqs = Vec::with_capacity(k as usize - 1);
        for partner_index in pivot_for(p, k) {
            if partner_index == p {
                continue;
            }
            let (_, proc) = partners[partner_index as usize];
            let piece = &pieces[partner_index as usize];
            let needed = image::buffer_size(piece.format(), piece.pixel_count());
            let buf = scratch.get(ScratchSlot::SendPiece(partner_index as u8), needed);
            let written = image::package_for_send_into(piece, buf);
            let payload = Bytes::copy_from_slice(&buf[..written]);
            send_reqs.push(transport.isend(proc, tag, payload).await?);
        }

        let mut tree = CompositeTree::new(
            k as usize,
            p as usize,
            pieces[p as usize].clone(),
            mode,
            format,
        )?;

        while !tree.is_complete() && !pending_reqs.is_empty() {
            let (slot, payload) = transport.wait_any(&mut pending_reqs).await?;
            let partner_index = pending_partners.remove(slot);
            let piece = image::unpackage_from_receive(&payload)?;
            if piece.pixel_count() != pieces[partner_index].pixel_count() {
                return Err(ComposeError::FormatMismatch {
                    expected: format!("{} pixels", pieces[partner_index].pixel_count()),
                    actual: format!("{} pixels", piece.pixel_count()),
                });
            }
            tree.arrive(partner_index, piece)?;
        }
        if !tree.is_complete() {
            return Err(ComposeError::sanity(format!(
                "round {round_idx}: composite tree incomplete after all receives drained"
            )));
        }

        transport.wait_all(send_reqs).await?;

        working = tree.take_result()?;
        offset = piece_offsets[p as usize];
        diagnostics.raise_debug(&format!(
            "round {round_idx} complete: rank={rank}, new_offset={offset}, active_count={}",
            working.active_count()
        ));
        global_partition += p * partition_stride;
        partition_stride *= k;
        prefix_product *= k;
        remaining_partitions /= k;
    }

    let piece_offset = if interlace_enabled && k_array.len() > 1 {
        image::interlace_offset(global_partition, group_size, working.pixel_count() * group_size)
    } else {
        offset
    };

    Ok((working, piece_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::test_support::RecordingSink;
    use crate::image::{ColorFormat, ColorPlane, DenseImage, DepthFormat};
    use crate::transport::mock::MockMesh;

    fn depth_format() -> ImageFormat {
        ImageFormat {
            color: ColorFormat::None,
            depth: DepthFormat::Float,
        }
    }

    #[test]
    fn get_k_matches_four_process_power_of_two_scenario() {
        assert_eq!(radixk_get_k(4, 8), vec![4]);
    }

    #[test]
    fn get_k_matches_six_process_scenario() {
        assert_eq!(radixk_get_k(6, 8), vec![6]);
    }

    #[test]
    fn get_k_product_equals_world_size() {
        for w in [1u32, 2, 3, 5, 7, 12, 16, 30, 64, 97] {
            let factors = radixk_get_k(w, 8);
            assert_eq!(factors.iter().product::<u32>(), w);
            assert!(factors.iter().all(|&k| k >= 2));
            if w > 1 {
                assert!((factors.len() as u32) <= (w as f64).log2().floor() as u32 + 1);
            }
        }
    }

    #[tokio::test]
    async fn single_process_single_tile_returns_input_unchanged() {
        let mesh = MockMesh::new(1);
        let endpoint = mesh.endpoint(0);
        let sink = RecordingSink::default();
        let format = depth_format();
        let dense = DenseImage::new(4, 1, ColorPlane::None, Some(vec![0.1, 0.2, 0.3, 0.4]));
        let sparse = image::compress(&dense, CompositeMode::ZBuffer);

        let (result, offset) = radixk_compose(
            &endpoint,
            &sink,
            &[0],
            0,
            CompositeMode::ZBuffer,
            format,
            8,
            false,
            sparse.clone(),
        )
        .await
        .unwrap();

        assert_eq!(offset, 0);
        assert_eq!(result.decode_all(), sparse.decode_all());
    }

    #[tokio::test]
    async fn four_processes_power_of_two_round() {
        let mesh = MockMesh::new(4);
        let format = depth_format();
        let group = vec![0, 1, 2, 3];

        let mut handles = Vec::new();
        for rank in 0..4u32 {
            let endpoint = mesh.endpoint(rank as usize);
            let group = group.clone();
            let depths: Vec<f32> = (0..16).map(|_| f32::from(rank as u16) * 0.25).collect();
            let dense = DenseImage::new(16, 1, ColorPlane::None, Some(depths));
            let sparse = image::compress(&dense, CompositeMode::ZBuffer);
            handles.push(tokio::spawn(async move {
                let sink = RecordingSink::default();
                radixk_compose(
                    &endpoint,
                    &sink,
                    &group,
                    rank as usize,
                    CompositeMode::ZBuffer,
                    format,
                    8,
                    false,
                    sparse,
                )
                .await
            }));
        }

        let mut pieces = Vec::new();
        for h in handles {
            let (result, offset) = h.await.unwrap().unwrap();
            pieces.push((offset, result));
        }
        pieces.sort_by_key(|(offset, _)| *offset);

        let offsets: Vec<u32> = pieces.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 4, 8, 12]);

        for (_, piece) in &pieces {
            for sample in piece.decode_all() {
                assert_eq!(sample.and_then(|s| s.depth), Some(0.0));
            }
        }
    }
}
