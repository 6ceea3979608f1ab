//! Image representations (§3): the dense raster a rendering front-end
//! hands in, the sparse run-length form exchanged between peers, and the
//! decoded pixel sample shared by both.

mod dense;
mod pixel;
mod sparse;

pub use dense::{ColorPlane, DenseImage};
pub use pixel::{combine, combine_optional, decode, encode, is_active, ColorSample, Sample};
pub use sparse::{
    buffer_size, composite, composite_sub, compress, compress_sub, decompress, interlace,
    interlace_gather, interlace_offset, max_buffer_size, package_for_send, package_for_send_into,
    pixel_size, split, split_partition_num_pixels, unpackage_from_receive, Orientation, Run,
    SparseImage,
};

pub use crate::options::{ColorFormat, CompositeMode, DepthFormat, ImageFormat};
