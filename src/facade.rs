//! The image-compose façade (§2, §6): the thin dispatcher a host calls
//! into, selecting a composer (direct Radix-k for a single tile, the
//! Reduce delegator for several) and driving the transport/collect it
//! needs.
//!
//! Radix-k alone drives the transport; the codec underneath it is a pure
//! library of buffer transforms with no I/O of its own (§2 "Control flow").

use crate::diagnostic::DiagnosticSink;
use crate::error::{ComposeError, Result};
use crate::image::{self, CompositeMode, DenseImage, ImageFormat, SparseImage};
use crate::options::{SessionState, RADIXK_TAG_BASE};
use crate::radixk;
use crate::reduce;
use crate::transport::Transport;
use bytes::Bytes;

/// Outbound entry point matching §6's `radixk_compose(group, group_size,
/// image_dest, input_sparse) → (result_sparse, piece_offset)`. `image_dest`
/// is advisory only for this strategy (kept for signature parity) — see
/// [`radixk::radixk_compose`].
///
/// # Errors
///
/// See [`radixk::radixk_compose`].
pub async fn radixk_compose(
    transport: &dyn Transport,
    diagnostics: &dyn DiagnosticSink,
    state: &dyn SessionState,
    group: &[usize],
    _image_dest: usize,
    input: SparseImage,
) -> Result<(SparseImage, u32)> {
    radixk::radixk_compose(
        transport,
        diagnostics,
        group,
        state.rank(),
        state.composite_mode(),
        state.image_format(),
        state.magic_k(),
        state.interlace_images(),
        input,
    )
    .await
}

/// A message tag dedicated to Reduce's pre-Radix-k contribution transfer,
/// distinct from Radix-k's own per-round tags (§5 "Ordering guarantees":
/// each phase needs its own tag namespace to stay unambiguous).
fn tile_tag(tile: usize) -> u32 {
    RADIXK_TAG_BASE.wrapping_add(0x1000_0000).wrapping_add(tile as u32)
}

/// Outbound entry point matching §6's `reduce_compose() → dense_tile_image`.
///
/// For a single tile spanning the whole session (the common case, and the
/// only one exercised by the "single process, single tile" scenario in
/// §8), this skips the delegator and invokes Radix-k directly over the
/// whole process group — the "single-tile convenience path" noted as a
/// supplemented feature.
///
/// For multiple tiles: consults the Reduce delegator for the global
/// process-to-tile assignment, sends this process's contribution to
/// whichever process was assigned to receive it (or keeps it if that's
/// itself), and — if this process is seated in some tile's compose-group —
/// receives its incoming contributions, merges them, runs Radix-k over
/// that tile's group, and gathers the final result to the tile's display
/// node.
///
/// Returns `None` for a process seated in no tile (it has nothing to
/// display).
///
/// # Errors
///
/// Propagates errors from the delegator, Radix-k, or the transport.
pub async fn reduce_compose(
    transport: &dyn Transport,
    diagnostics: &dyn DiagnosticSink,
    state: &dyn SessionState,
    rendered: &DenseImage,
) -> Result<Option<DenseImage>> {
    let format = state.image_format();
    let mode = state.composite_mode();
    let rank = state.rank();

    log::info!("reduce_compose starting: rank={rank}, num_tiles={}", state.num_tiles());

    if state.num_tiles() <= 1 {
        let whole_group: Vec<usize> = if state.ordered_composite() {
            state.composite_order().to_vec()
        } else {
            (0..state.num_processes()).collect()
        };
        let input = image::compress(rendered, mode);
        let (result, _offset) = radixk::radixk_compose(
            transport,
            diagnostics,
            &whole_group,
            rank,
            mode,
            format,
            state.magic_k(),
            state.interlace_images(),
            input,
        )
        .await?;
        return Ok(Some(image::decompress(&result)));
    }

    let plan = reduce::compute(state)?;

    for t in 0..state.num_tiles() {
        if state.contained_tiles_mask(rank) & (1 << t) == 0 {
            continue;
        }
        let &dest = plan
            .send_destinations
            .get(&(t, rank))
            .ok_or_else(|| ComposeError::sanity(format!("no send-destination for (tile {t}, rank {rank})")))?;
        if dest != rank {
            log::debug!("reduce_compose: rank={rank} sending tile {t} contribution to {dest}");
            let payload = image::package_for_send(&image::compress(rendered, mode));
            transport.send(dest, tile_tag(t), payload).await?;
        }
    }

    let Some(own_tile) = plan.seat.get(&rank).copied() else {
        log::debug!("reduce_compose: rank={rank} seated in no tile, nothing to display");
        return Ok(None);
    };
    log::debug!("reduce_compose: rank={rank} seated in tile {own_tile}");

    let mut contributions: Vec<(usize, SparseImage)> = Vec::new();
    if state.contained_tiles_mask(rank) & (1 << own_tile) != 0 {
        contributions.push((rank, image::compress(rendered, mode)));
    }

    let mut incoming: Vec<usize> = plan
        .send_destinations
        .iter()
        .filter(|&(&(t, contributor), &dest)| t == own_tile && dest == rank && contributor != rank)
        .map(|(&(_, contributor), _)| contributor)
        .collect();
    incoming.sort_unstable();

    let max_len = image::buffer_size(format, rendered.pixel_count());
    for peer in incoming {
        let req = transport.irecv(peer, tile_tag(own_tile), max_len).await?;
        let payload = req.wait().await?;
        contributions.push((peer, image::unpackage_from_receive(&payload)?));
    }

    // Ordered blending (§3) needs its contributors folded front-to-back;
    // sort by composite_order so the merge order is deterministic and
    // correct regardless of arrival/HashMap iteration order.
    if state.ordered_composite() {
        let composite_order = state.composite_order();
        contributions.sort_by_key(|(contributor, _)| {
            composite_order
                .iter()
                .position(|p| p == contributor)
                .unwrap_or(usize::MAX)
        });
    }

    let pieces: Vec<SparseImage> = contributions.into_iter().map(|(_, piece)| piece).collect();
    let merged = merge_pieces(&pieces, mode)?;

    let tile = &plan.tiles[own_tile];
    let (result, _offset) = radixk::radixk_compose(
        transport,
        diagnostics,
        &tile.compose_group,
        rank,
        mode,
        format,
        state.magic_k(),
        state.interlace_images(),
        merged,
    )
    .await?;

    let gathered = transport
        .gather(
            &tile.compose_group,
            tile.compose_group[tile.image_dest],
            image::package_for_send(&result),
        )
        .await?;

    log::info!("reduce_compose finished: rank={rank}, tile={own_tile}");
    gathered
        .map(|payloads| assemble_tile(&payloads, format))
        .transpose()
}

/// Fold every contributor's piece for one tile into a single sparse image
/// under `mode`, left to right. For z-buffer compositing the operator is
/// commutative and any order is correct; for alpha blend the caller must
/// already have `pieces` in front-to-back order (§3) before calling this.
fn merge_pieces(pieces: &[SparseImage], mode: CompositeMode) -> Result<SparseImage> {
    let mut iter = pieces.iter();
    let Some(first) = iter.next() else {
        return Err(ComposeError::sanity("no contributions to merge for this tile"));
    };
    let mut acc = first.clone();
    for piece in iter {
        acc = image::composite(&acc, piece, mode)?;
    }
    Ok(acc)
}

/// Reassemble a tile's gathered per-process pieces (contiguous partitions
/// of the tile's pixel space, in group order) into the dense image handed
/// back to the display layer.
fn assemble_tile(payloads: &[Bytes], format: ImageFormat) -> Result<DenseImage> {
    let mut samples = Vec::new();
    for payload in payloads {
        let piece = image::unpackage_from_receive(payload)?;
        samples.extend(piece.decode_all());
    }
    let n = samples.len() as u32;
    let sparse = SparseImage::encode_all(format, n, 1, &samples);
    Ok(image::decompress(&sparse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ColorPlane, ColorFormat, DenseImage, DepthFormat};
    use crate::options::{CompositeMode, InMemorySessionState};
    use crate::transport::mock::MockMesh;

    fn alpha_format() -> ImageFormat {
        ImageFormat {
            color: ColorFormat::RgbaFloat,
            depth: DepthFormat::None,
        }
    }

    fn single_pixel(rgba: [f32; 4]) -> SparseImage {
        let dense = DenseImage::new(1, 1, ColorPlane::RgbaFloat(vec![rgba]), None);
        image::compress(&dense, CompositeMode::AlphaBlend)
    }

    /// Ordered blend of three processes (composite order [2, 0, 1]): the
    /// merge must equal `blend(blend(img2, img0), img1)` and no other
    /// fold order produces the same result.
    #[test]
    fn merge_pieces_is_order_sensitive_under_alpha_blend() {
        let img0 = single_pixel([1.0, 0.0, 0.0, 0.5]);
        let img1 = single_pixel([0.0, 1.0, 0.0, 0.5]);
        let img2 = single_pixel([0.0, 0.0, 1.0, 0.5]);

        let composite_order_result =
            merge_pieces(&[img2.clone(), img0.clone(), img1.clone()], CompositeMode::AlphaBlend)
                .unwrap();
        let expected = image::composite(
            &image::composite(&img2, &img0, CompositeMode::AlphaBlend).unwrap(),
            &img1,
            CompositeMode::AlphaBlend,
        )
        .unwrap();
        assert_eq!(composite_order_result.decode_all(), expected.decode_all());

        let ascending_rank_result =
            merge_pieces(&[img0.clone(), img1.clone(), img2.clone()], CompositeMode::AlphaBlend)
                .unwrap();
        assert_ne!(
            composite_order_result.decode_all(),
            ascending_rank_result.decode_all()
        );
    }

    fn ordered_state(rank: usize) -> InMemorySessionState {
        InMemorySessionState {
            composite_mode: CompositeMode::AlphaBlend,
            image_format: alpha_format(),
            ordered_composite: true,
            composite_order: vec![2, 0, 1],
            interlace_images: false,
            magic_k: 8,
            num_processes: 3,
            rank,
            num_tiles: 1,
            display_nodes: vec![0],
            tile_contrib_counts: vec![3],
            contained_tiles_masks: vec![1, 1, 1],
        }
    }

    /// The single-tile convenience path must hand Radix-k a compose-group
    /// ordered by `composite_order`, not ascending rank, so its pairwise
    /// tree's front-to-back convention stays correct under ordered blend.
    #[tokio::test]
    async fn single_tile_path_orders_group_by_composite_order() {
        use crate::diagnostic::test_support::RecordingSink;

        let mesh = MockMesh::new(3);
        let mut handles = Vec::new();
        for rank in 0..3usize {
            let endpoint = mesh.endpoint(rank);
            let state = ordered_state(rank);
            let color = match rank {
                0 => [1.0, 0.0, 0.0, 0.5],
                1 => [0.0, 1.0, 0.0, 0.5],
                _ => [0.0, 0.0, 1.0, 0.5],
            };
            handles.push(tokio::spawn(async move {
                let sink = RecordingSink::default();
                let dense = DenseImage::new(1, 1, ColorPlane::RgbaFloat(vec![color]), None);
                reduce_compose(&endpoint, &sink, &state, &dense).await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        let expected = image::composite(
            &image::composite(
                &single_pixel([0.0, 0.0, 1.0, 0.5]),
                &single_pixel([1.0, 0.0, 0.0, 0.5]),
                CompositeMode::AlphaBlend,
            )
            .unwrap(),
            &single_pixel([0.0, 1.0, 0.0, 0.5]),
            CompositeMode::AlphaBlend,
        )
        .unwrap();

        for result in results.into_iter().flatten() {
            assert_eq!(
                result.color_at(0),
                image::decompress(&expected).color_at(0)
            );
        }
    }
}
