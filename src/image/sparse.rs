//! The sparse-image codec (§4.1): run-length encoding that skips inactive
//! pixels, plus compression, pairwise composition, partitioning and
//! interlacing over that representation.

use super::dense::DenseImage;
use super::pixel::{self, Sample};
use crate::error::{ComposeError, Result};
use crate::options::{CompositeMode, ImageFormat};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// One run in the interleaved inactive/active encoding (§3): `inactive`
/// never-active pixels followed by `active` pixels whose records are
/// stored in the image's pixel-data buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Count of consecutive inactive pixels.
    pub inactive: u32,
    /// Count of consecutive active pixels immediately following.
    pub active: u32,
}

/// Fixed 24-byte header written by [`package_for_send`] and read back by
/// [`unpackage_from_receive`] (resolving the Open Question in §9): magic,
/// format id, pixel/active counts, and nominal width/height. Native
/// (little-endian) byte order — homogeneous-cluster assumption, per §9.
const MAGIC: u32 = 0x4954_4330; // "ITC0"
const HEADER_LEN: usize = 24;
const RUN_LEN: usize = 8;

fn format_id(format: ImageFormat) -> u8 {
    use crate::options::{ColorFormat, DepthFormat};
    let color = match format.color {
        ColorFormat::None => 0u8,
        ColorFormat::RgbaUbyte => 1,
        ColorFormat::RgbaFloat => 2,
    };
    let depth = match format.depth {
        DepthFormat::None => 0u8,
        DepthFormat::Float => 1,
    };
    color | (depth << 4)
}

fn format_from_id(id: u8) -> Result<ImageFormat> {
    use crate::options::{ColorFormat, DepthFormat};
    let color = match id & 0x0F {
        0 => ColorFormat::None,
        1 => ColorFormat::RgbaUbyte,
        2 => ColorFormat::RgbaFloat,
        other => return Err(ComposeError::sanity(format!("unknown color format id {other}"))),
    };
    let depth = match (id >> 4) & 0x0F {
        0 => DepthFormat::None,
        1 => DepthFormat::Float,
        other => return Err(ComposeError::sanity(format!("unknown depth format id {other}"))),
    };
    Ok(ImageFormat { color, depth })
}

/// A run-length encoded partial image (§3), logically indexed `0..N` over a
/// 1D pixel sequence. Width/height are metadata only — a sparse image may
/// legitimately be 1-row by construction during exchange.
#[derive(Debug, Clone)]
pub struct SparseImage {
    format: ImageFormat,
    width: u32,
    height: u32,
    pixel_count: u32,
    runs: Vec<Run>,
    pixel_data: BytesMut,
}

impl SparseImage {
    /// The fixed color/depth format this image was constructed with.
    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Nominal width; metadata only.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Nominal height; metadata only.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Declared pixel count `N` (§3 invariant: sum of all run lengths).
    #[must_use]
    pub fn pixel_count(&self) -> u32 {
        self.pixel_count
    }

    /// Total active pixels across all runs.
    #[must_use]
    pub fn active_count(&self) -> u32 {
        self.runs.iter().map(|r| r.active).sum()
    }

    /// The run sequence.
    #[must_use]
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    /// Packed active-pixel payload, `active_count() * format.active_pixel_bytes()` bytes.
    #[must_use]
    pub fn pixel_data(&self) -> &[u8] {
        &self.pixel_data
    }

    fn empty(format: ImageFormat, width: u32, height: u32, pixel_count: u32) -> Self {
        Self {
            format,
            width,
            height,
            pixel_count,
            runs: Vec::new(),
            pixel_data: BytesMut::new(),
        }
    }

    /// Decode this sparse image into one `Option<Sample>` per logical pixel
    /// (`None` for inactive). Used internally by every transform below;
    /// kept crate-visible so the composer can decode arrival pieces too.
    pub(crate) fn decode_all(&self) -> Vec<Option<Sample>> {
        let pixel_bytes = self.format.active_pixel_bytes();
        let mut out = Vec::with_capacity(self.pixel_count as usize);
        let mut data_off = 0usize;
        for run in &self.runs {
            out.extend(std::iter::repeat(None).take(run.inactive as usize));
            for _ in 0..run.active {
                let sample = pixel::decode(self.format, &self.pixel_data[data_off..]);
                data_off += pixel_bytes;
                out.push(Some(sample));
            }
        }
        out
    }

    /// Encode a dense sequence of optional samples (one per logical pixel)
    /// into run-length form.
    pub(crate) fn encode_all(
        format: ImageFormat,
        width: u32,
        height: u32,
        samples: &[Option<Sample>],
    ) -> Self {
        let mut runs = Vec::new();
        let mut pixel_data = BytesMut::new();
        let mut i = 0usize;
        while i < samples.len() {
            let run_start = i;
            while i < samples.len() && samples[i].is_none() {
                i += 1;
            }
            let inactive = (i - run_start) as u32;
            let active_start = i;
            while i < samples.len() && samples[i].is_some() {
                pixel::encode(samples[i].as_ref().unwrap(), &mut pixel_data);
                i += 1;
            }
            let active = (i - active_start) as u32;
            if inactive != 0 || active != 0 {
                runs.push(Run { inactive, active });
            }
        }
        Self {
            format,
            width,
            height,
            pixel_count: samples.len() as u32,
            runs,
            pixel_data,
        }
    }
}

/// Bytes needed for one active-pixel record under `format` (§4.1).
#[must_use]
pub fn pixel_size(format: ImageFormat) -> usize {
    format.active_pixel_bytes()
}

/// Upper bound, in bytes, on the packaged size of any `N`-pixel sparse
/// image in `format`: the worst case is every pixel active, encoded as a
/// single run (§4.1). Used to size receive buffers before the peer's actual
/// content (and thus actual run structure) is known.
#[must_use]
pub fn buffer_size(format: ImageFormat, n: u32) -> usize {
    HEADER_LEN + 4 /* run_count */ + RUN_LEN /* one worst-case run */ + n as usize * pixel_size(format)
}

/// Upper bound across every format the codec supports — the largest plane
/// combination (`RGBA_FLOAT` color + `FLOAT` depth) sets the per-pixel cost.
#[must_use]
pub fn max_buffer_size(n: u32) -> usize {
    use crate::options::{ColorFormat, DepthFormat};
    buffer_size(
        ImageFormat {
            color: ColorFormat::RgbaFloat,
            depth: DepthFormat::Float,
        },
        n,
    )
}

/// Compress a dense image into run-length form (§4.1): a pixel is
/// "inactive" if depth-test compositing is in use and depth equals
/// `f32::MAX`, or if blend compositing is in use and alpha is zero.
/// Preserves color and depth bit-exactly for active pixels.
#[must_use]
pub fn compress(dense: &DenseImage, mode: CompositeMode) -> SparseImage {
    compress_sub(dense, 0, dense.pixel_count(), mode)
}

/// Compress the pixel range `[offset, offset + n)` of `dense` (§4.1).
///
/// # Panics
///
/// Panics if `offset + n` exceeds `dense.pixel_count()`.
#[must_use]
pub fn compress_sub(dense: &DenseImage, offset: u32, n: u32, mode: CompositeMode) -> SparseImage {
    assert!(offset + n <= dense.pixel_count(), "compress_sub range out of bounds");
    let format = dense.format();
    let mut runs = Vec::new();
    let mut pixel_data = BytesMut::new();
    let mut raw = Vec::with_capacity(format.active_pixel_bytes());

    let mut i = offset as usize;
    let end = (offset + n) as usize;
    while i < end {
        let run_start = i;
        while i < end && !pixel_is_active(dense, i, mode) {
            i += 1;
        }
        let inactive = (i - run_start) as u32;

        let active_start = i;
        while i < end && pixel_is_active(dense, i, mode) {
            raw.clear();
            dense.raw_color_at(i, &mut raw);
            pixel_data.extend_from_slice(&raw);
            if let Some(depth) = dense.depth_at(i) {
                pixel_data.extend_from_slice(&depth.to_le_bytes());
            }
            i += 1;
        }
        let active = (i - active_start) as u32;

        if inactive != 0 || active != 0 {
            runs.push(Run { inactive, active });
        }
    }

    SparseImage {
        format,
        width: dense.width(),
        height: dense.height(),
        pixel_count: n,
        runs,
        pixel_data,
    }
}

fn pixel_is_active(dense: &DenseImage, i: usize, mode: CompositeMode) -> bool {
    let sample = Sample {
        color: dense.color_at(i).map(|c| pixel::ColorSample::F32(c)),
        depth: dense.depth_at(i),
    };
    pixel::is_active(mode, &sample)
}

/// Decompress a sparse image back into a dense one, filling inactive
/// pixels with a cleared background (depth `f32::MAX`, alpha `0.0`).
/// Used to validate the round-trip codec law from §8 and by the façade
/// when materializing a final tile image.
#[must_use]
pub fn decompress(sparse: &SparseImage) -> DenseImage {
    use super::dense::ColorPlane;
    use crate::options::ColorFormat;

    let samples = sparse.decode_all();
    let n = samples.len();

    let color = match sparse.format.color {
        ColorFormat::None => ColorPlane::None,
        ColorFormat::RgbaUbyte => ColorPlane::RgbaUbyte(
            samples
                .iter()
                .map(|s| match s.and_then(|s| s.color) {
                    Some(pixel::ColorSample::U8(v)) => v,
                    Some(pixel::ColorSample::F32(v)) => {
                        v.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
                    }
                    None => [0, 0, 0, 0],
                })
                .collect(),
        ),
        ColorFormat::RgbaFloat => ColorPlane::RgbaFloat(
            samples
                .iter()
                .map(|s| match s.and_then(|s| s.color) {
                    Some(c) => c.as_f32(),
                    None => [0.0, 0.0, 0.0, 0.0],
                })
                .collect(),
        ),
    };

    let depth = (sparse.format.depth != crate::options::DepthFormat::None).then(|| {
        samples
            .iter()
            .map(|s| s.and_then(|s| s.depth).unwrap_or(f32::MAX))
            .collect()
    });

    DenseImage::new(sparse.width.max(n as u32), if sparse.width == 0 { 1 } else { sparse.height.max(1) }, color, depth)
}

/// Composite `a` and `b`, two sparse images covering the same pixel range
/// (equal `N`), into a new sparse image under `mode` (§4.1): `out[i] =
/// C(a[i], b[i])`, inactive in both inputs stays inactive. `a` is the
/// nearer operand in composite order.
///
/// # Errors
///
/// Returns [`ComposeError::FormatMismatch`] if `a` and `b` don't share a
/// pixel count.
pub fn composite(a: &SparseImage, b: &SparseImage, mode: CompositeMode) -> Result<SparseImage> {
    if a.pixel_count != b.pixel_count {
        return Err(ComposeError::FormatMismatch {
            expected: format!("{} pixels", a.pixel_count),
            actual: format!("{} pixels", b.pixel_count),
        });
    }
    let format = a.format;
    let a_samples = a.decode_all();
    let b_samples = b.decode_all();
    let combined: Vec<Option<Sample>> = a_samples
        .into_iter()
        .zip(b_samples)
        .map(|(fa, fb)| pixel::combine_optional(mode, format, fa, fb))
        .collect();
    Ok(SparseImage::encode_all(format, a.width, a.height, &combined))
}

/// The orientation used by [`composite_sub`], the older per-pixel
/// dense/sparse merge path kept for interface completeness (§4.1, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// The sparse image's active pixels overwrite the dense image
    /// unconditionally.
    SourceOnTop,
    /// The sparse image's active pixels only fill dense pixels that are
    /// themselves inactive under the session's composite mode.
    DestOnTop,
}

/// Composite `sparse_in` into the `[offset, offset + sparse_in.pixel_count())`
/// subrange of `dense`, in the given orientation.
///
/// # Errors
///
/// Returns [`ComposeError::SanityCheck`] if the range doesn't fit in `dense`.
pub fn composite_sub(
    dense: &mut DenseImage,
    offset: u32,
    sparse_in: &SparseImage,
    mode: CompositeMode,
    orientation: Orientation,
) -> Result<()> {
    let n = sparse_in.pixel_count();
    if offset + n > dense.pixel_count() {
        return Err(ComposeError::sanity(format!(
            "composite_sub range [{offset}, {}) exceeds dense image of {} pixels",
            offset + n,
            dense.pixel_count()
        )));
    }
    for (local_i, sample) in sparse_in.decode_all().into_iter().enumerate() {
        let Some(sample) = sample else { continue };
        let dest_i = offset as usize + local_i;
        let overwrite = match orientation {
            Orientation::SourceOnTop => true,
            Orientation::DestOnTop => !pixel_is_active(dense, dest_i, mode),
        };
        if overwrite {
            dense.write_sample(dest_i, &sample);
        }
    }
    Ok(())
}

/// Per-unit sizes produced by dividing `span` into `units` pieces as evenly
/// as possible (sizes differ by at most 1, the first `span % units` pieces
/// get the extra pixel). Shared by `split`, `split_partition_num_pixels`
/// and `interlace`, so their boundary alignment always agrees (§4.1).
fn even_sizes(span: u32, units: u32) -> Vec<u32> {
    if units == 0 {
        return Vec::new();
    }
    let base = span / units;
    let extra = span % units;
    (0..units)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Sizes of the `k` pieces `split` would produce for an input of `span`
/// pixels, aligned to `remaining_partitions`-many equal-width units so that
/// successive rounds of Radix-k (and interlacing) stay boundary-consistent.
///
/// # Errors
///
/// Returns [`ComposeError::SanityCheck`] if `k` doesn't evenly divide
/// `remaining_partitions`.
fn partition_sizes(span: u32, k: u32, remaining_partitions: u32) -> Result<Vec<u32>> {
    if remaining_partitions % k != 0 {
        return Err(ComposeError::sanity(format!(
            "k={k} does not divide remaining_partitions={remaining_partitions}"
        )));
    }
    let units = even_sizes(span, remaining_partitions);
    let units_per_piece = (remaining_partitions / k) as usize;
    Ok(units
        .chunks(units_per_piece)
        .map(|chunk| chunk.iter().sum())
        .collect())
}

/// The maximum single-piece size `split` can produce for these parameters;
/// used to size receive buffers before `split` is invoked (§4.1).
///
/// # Errors
///
/// See [`partition_sizes`].
pub fn split_partition_num_pixels(start_size: u32, k: u32, remaining_partitions: u32) -> Result<u32> {
    Ok(partition_sizes(start_size, k, remaining_partitions)?
        .into_iter()
        .max()
        .unwrap_or(0))
}

/// Partition `sparse_in` into `k` contiguous pixel ranges, as evenly as
/// possible, aligned to `remaining_partitions` (§4.1). Returns the pieces
/// together with their offsets relative to `start_offset`.
///
/// # Errors
///
/// See [`partition_sizes`].
pub fn split(
    sparse_in: &SparseImage,
    start_offset: u32,
    k: u32,
    remaining_partitions: u32,
) -> Result<(Vec<SparseImage>, Vec<u32>)> {
    let sizes = partition_sizes(sparse_in.pixel_count(), k, remaining_partitions)?;
    let samples = sparse_in.decode_all();

    let mut pieces = Vec::with_capacity(k as usize);
    let mut offsets = Vec::with_capacity(k as usize);
    let mut local_off = 0usize;
    for &size in &sizes {
        let piece = &samples[local_off..local_off + size as usize];
        pieces.push(SparseImage::encode_all(
            sparse_in.format,
            size,
            1,
            piece,
        ));
        offsets.push(start_offset + local_off as u32);
        local_off += size as usize;
    }
    Ok((pieces, offsets))
}

/// Permute `sparse_in` so that subsequently partitioning the result into
/// `groups` contiguous pieces draws each piece from a round-robin stride
/// over the input (§4.1), equalizing active-pixel density across peers.
///
/// # Errors
///
/// See [`partition_sizes`].
pub fn interlace(sparse_in: &SparseImage, groups: u32) -> Result<SparseImage> {
    let sizes = partition_sizes(sparse_in.pixel_count(), groups, groups)?;
    let samples = sparse_in.decode_all();

    let mut out = Vec::with_capacity(samples.len());
    for (p, &size) in sizes.iter().enumerate() {
        let mut idx = p;
        for _ in 0..size {
            out.push(samples[idx]);
            idx += groups as usize;
        }
    }
    Ok(SparseImage::encode_all(sparse_in.format, sparse_in.width, sparse_in.height, &out))
}

/// Reassemble the original pixel order from `groups`-many interlaced
/// pieces, given in partition order `0..groups`. Inverse of `interlace`.
///
/// # Errors
///
/// Returns [`ComposeError::SanityCheck`] if the pieces' sizes don't match
/// what `groups`-way even division of the total would produce.
pub fn interlace_gather(groups: u32, pieces: &[SparseImage]) -> Result<SparseImage> {
    if pieces.len() != groups as usize {
        return Err(ComposeError::sanity("interlace_gather needs exactly `groups` pieces"));
    }
    let total: u32 = pieces.iter().map(SparseImage::pixel_count).sum();
    let expected_sizes = partition_sizes(total, groups, groups)?;
    for (p, piece) in pieces.iter().enumerate() {
        if piece.pixel_count() != expected_sizes[p] {
            return Err(ComposeError::sanity(format!(
                "interlaced piece {p} has {} pixels, expected {}",
                piece.pixel_count(),
                expected_sizes[p]
            )));
        }
    }

    let format = pieces[0].format;
    let mut out: Vec<Option<Sample>> = vec![None; total as usize];
    for (p, piece) in pieces.iter().enumerate() {
        let mut idx = p;
        for sample in piece.decode_all() {
            out[idx] = sample;
            idx += groups as usize;
        }
    }
    Ok(SparseImage::encode_all(format, total, 1, &out))
}

/// Maps the permuted piece for global partition index `P` back to its
/// starting index in the original pixel order (§4.1, §9): with stride
/// `groups`, the piece occupies original indices `{P, P + groups, P + 2
/// groups, ...}`, so the inverse permutation is fully determined by `(P,
/// groups, N)` alone, with no need to consult the permuted data itself.
#[must_use]
pub fn interlace_offset(global_partition: u32, _groups: u32, _n: u32) -> u32 {
    global_partition
}

/// Writes the wire-format encoding of `sparse` into `buf` and returns the
/// number of bytes written. `buf` must be at least
/// `buffer_size(sparse.format(), sparse.pixel_count())` bytes (see
/// [`buffer_size`]); only the prefix actually written is meaningful.
///
/// Lets a caller reuse one scratch-backed buffer across many pieces instead
/// of allocating a fresh one per call — this is what the Radix-k composer's
/// round loop does for its per-partner send buffers via
/// [`crate::ScratchBuffers`] (§9).
pub fn package_for_send_into(sparse: &SparseImage, buf: &mut [u8]) -> usize {
    let original_len = buf.len();
    let mut cursor = buf;
    cursor.put_u32_le(MAGIC);
    cursor.put_u8(format_id(sparse.format));
    cursor.put_bytes(0, 3);
    cursor.put_u32_le(sparse.pixel_count);
    cursor.put_u32_le(sparse.active_count());
    cursor.put_u32_le(sparse.width);
    cursor.put_u32_le(sparse.height);

    cursor.put_u32_le(sparse.runs.len() as u32);
    for run in &sparse.runs {
        cursor.put_u32_le(run.inactive);
        cursor.put_u32_le(run.active);
    }
    cursor.put_slice(&sparse.pixel_data);
    original_len - cursor.len()
}

/// Serialize a sparse image to its on-the-wire form: identical to the
/// in-memory layout (§6 "Wire format"), prefixed by the 24-byte header
/// documented in `SPEC_FULL.md`.
#[must_use]
pub fn package_for_send(sparse: &SparseImage) -> Bytes {
    let needed = HEADER_LEN + 4 + sparse.runs.len() * RUN_LEN + sparse.pixel_data.len();
    let mut buf = vec![0u8; needed];
    let written = package_for_send_into(sparse, &mut buf);
    debug_assert_eq!(written, needed);
    Bytes::from(buf)
}

/// Parse a sparse image from its wire form, given only the byte blob (§3:
/// "a self-describing header sufficient to unpackage from receive").
///
/// # Errors
///
/// Returns [`ComposeError::FormatMismatch`] if the magic number doesn't
/// match, or [`ComposeError::SanityCheck`] if the buffer is truncated or
/// its declared run/pixel counts are inconsistent.
pub fn unpackage_from_receive(bytes: &[u8]) -> Result<SparseImage> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(ComposeError::sanity("buffer too short for sparse image header"));
    }
    let mut buf = bytes;
    let magic = buf.get_u32_le();
    if magic != MAGIC {
        return Err(ComposeError::FormatMismatch {
            expected: format!("magic {MAGIC:#x}"),
            actual: format!("magic {magic:#x}"),
        });
    }
    let format_byte = buf.get_u8();
    let format = format_from_id(format_byte)?;
    buf.advance(3);
    let pixel_count = buf.get_u32_le();
    let active_count = buf.get_u32_le();
    let width = buf.get_u32_le();
    let height = buf.get_u32_le();

    let run_count = buf.get_u32_le() as usize;
    if buf.remaining() < run_count * RUN_LEN {
        return Err(ComposeError::sanity("buffer truncated in run table"));
    }
    let mut runs = Vec::with_capacity(run_count);
    let mut seen_active = 0u32;
    let mut seen_total = 0u32;
    for _ in 0..run_count {
        let inactive = buf.get_u32_le();
        let active = buf.get_u32_le();
        seen_active += active;
        seen_total += inactive + active;
        runs.push(Run { inactive, active });
    }
    if seen_active != active_count || seen_total != pixel_count {
        return Err(ComposeError::sanity(
            "run table doesn't sum to declared pixel/active counts",
        ));
    }

    let pixel_bytes = format.active_pixel_bytes();
    let expected_payload = active_count as usize * pixel_bytes;
    if buf.remaining() < expected_payload {
        return Err(ComposeError::sanity("buffer truncated in pixel payload"));
    }
    let pixel_data = BytesMut::from(&buf[..expected_payload]);

    Ok(SparseImage {
        format,
        width,
        height,
        pixel_count,
        runs,
        pixel_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::dense::ColorPlane;
    use crate::options::{ColorFormat, DepthFormat};

    fn depth_format() -> ImageFormat {
        ImageFormat {
            color: ColorFormat::None,
            depth: DepthFormat::Float,
        }
    }

    fn dense_depth(values: &[f32]) -> DenseImage {
        DenseImage::new(values.len() as u32, 1, ColorPlane::None, Some(values.to_vec()))
    }

    #[test]
    fn buffer_size_bounds_max_buffer_size() {
        for n in [0u32, 1, 100, 4096] {
            for format in [
                depth_format(),
                ImageFormat { color: ColorFormat::RgbaUbyte, depth: DepthFormat::None },
                ImageFormat { color: ColorFormat::RgbaFloat, depth: DepthFormat::Float },
            ] {
                assert!(buffer_size(format, n) <= max_buffer_size(n));
            }
        }
    }

    #[test]
    fn fully_active_image_meets_size_bound() {
        let values: Vec<f32> = (0..100).map(|i| i as f32 * 0.001).collect();
        let dense = dense_depth(&values);
        let sparse = compress(&dense, CompositeMode::ZBuffer);
        assert_eq!(sparse.active_count(), 100);
        let packed = package_for_send(&sparse);
        assert!(packed.len() <= buffer_size(depth_format(), 100));
        assert!(packed.len() >= pixel_size(depth_format()) * 100);
    }

    #[test]
    fn every_other_pixel_active_meets_size_bound() {
        let values: Vec<f32> = (0..100)
            .map(|i| if i % 2 == 0 { i as f32 } else { f32::MAX })
            .collect();
        let dense = dense_depth(&values);
        let sparse = compress(&dense, CompositeMode::ZBuffer);
        assert_eq!(sparse.active_count(), 50);
        let packed = package_for_send(&sparse);
        assert!(packed.len() >= pixel_size(depth_format()) * 50);
        assert!(packed.len() <= buffer_size(depth_format(), 100));
    }

    #[test]
    fn round_trip_through_wire_format() {
        let values: Vec<f32> = vec![0.1, f32::MAX, 0.3, f32::MAX, f32::MAX, 0.6];
        let dense = dense_depth(&values);
        let sparse = compress(&dense, CompositeMode::ZBuffer);
        let packed = package_for_send(&sparse);
        let back = unpackage_from_receive(&packed).unwrap();
        assert_eq!(back.pixel_count(), sparse.pixel_count());
        assert_eq!(back.active_count(), sparse.active_count());
        assert_eq!(back.decode_all(), sparse.decode_all());
    }

    #[test]
    fn split_covers_input_with_sizes_off_by_at_most_one() {
        let values: Vec<f32> = (0..13).map(|i| i as f32).collect();
        let dense = dense_depth(&values);
        let sparse = compress(&dense, CompositeMode::ZBuffer);
        let (pieces, offsets) = split(&sparse, 0, 4, 4).unwrap();
        assert_eq!(pieces.len(), 4);
        let sizes: Vec<u32> = pieces.iter().map(SparseImage::pixel_count).collect();
        assert_eq!(sizes.iter().sum::<u32>(), 13);
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
        assert_eq!(offsets, vec![0, 4, 7, 10]);

        // reconstruct and compare
        let mut reconstructed = Vec::new();
        for piece in &pieces {
            reconstructed.extend(piece.decode_all());
        }
        assert_eq!(reconstructed, sparse.decode_all());
    }

    #[test]
    fn split_partition_num_pixels_matches_largest_piece() {
        let max = split_partition_num_pixels(13, 4, 4).unwrap();
        let values: Vec<f32> = (0..13).map(|i| i as f32).collect();
        let dense = dense_depth(&values);
        let sparse = compress(&dense, CompositeMode::ZBuffer);
        let (pieces, _) = split(&sparse, 0, 4, 4).unwrap();
        let actual_max = pieces.iter().map(SparseImage::pixel_count).max().unwrap();
        assert_eq!(max, actual_max);
    }

    #[test]
    fn interlace_then_gather_round_trips() {
        let values: Vec<f32> = (0..17).map(|i| i as f32).collect();
        let dense = dense_depth(&values);
        let sparse = compress(&dense, CompositeMode::ZBuffer);
        let permuted = interlace(&sparse, 4).unwrap();
        let (pieces, _) = split(&permuted, 0, 4, 4).unwrap();
        let rebuilt = interlace_gather(4, &pieces).unwrap();
        assert_eq!(rebuilt.decode_all(), sparse.decode_all());
    }

    #[test]
    fn interlace_offset_is_the_partition_index() {
        assert_eq!(interlace_offset(3, 8, 1000), 3);
    }

    #[test]
    fn composite_is_associative_for_zbuffer() {
        let a = dense_depth(&[0.5, f32::MAX, 0.2]);
        let b = dense_depth(&[0.1, 0.4, f32::MAX]);
        let c = dense_depth(&[0.9, 0.2, 0.3]);
        let mode = CompositeMode::ZBuffer;
        let (sa, sb, sc) = (compress(&a, mode), compress(&b, mode), compress(&c, mode));

        let ab = composite(&sa, &sb, mode).unwrap();
        let ab_c = composite(&ab, &sc, mode).unwrap();

        let bc = composite(&sb, &sc, mode).unwrap();
        let a_bc = composite(&sa, &bc, mode).unwrap();

        assert_eq!(ab_c.decode_all(), a_bc.decode_all());
    }

    #[test]
    fn composite_sub_source_on_top_overwrites() {
        let mut dense = dense_depth(&[1.0, 1.0, 1.0, 1.0]);
        let overlay = dense_depth(&[0.5, f32::MAX]);
        let sparse = compress(&overlay, CompositeMode::ZBuffer);
        composite_sub(&mut dense, 1, &sparse, CompositeMode::ZBuffer, Orientation::SourceOnTop).unwrap();
        assert_eq!(dense.depth_at(1), Some(0.5));
        assert_eq!(dense.depth_at(2), Some(1.0)); // inactive overlay pixel skipped
    }
}
