//! Simulates four processes each rendering a 16-pixel depth-only image and
//! running them through `radixk_compose` over an in-process mock
//! transport, printing each process's final piece offset and size.
//!
//! Run with `cargo run --example basic_compose`.

use radix_compose::diagnostic::LogSink;
use radix_compose::image::{self, ColorPlane, DenseImage};
use radix_compose::options::{ColorFormat, CompositeMode, DepthFormat, ImageFormat};
use radix_compose::transport::mock::MockMesh;

#[tokio::main]
async fn main() -> radix_compose::Result<()> {
    env_logger::init();
    let format = ImageFormat {
        color: ColorFormat::None,
        depth: DepthFormat::Float,
    };
    let group: Vec<usize> = (0..4).collect();
    let mesh = MockMesh::new(4);

    let mut handles = Vec::new();
    for &rank in &group {
        let endpoint = mesh.endpoint(rank);
        let group = group.clone();
        handles.push(tokio::spawn(async move {
            let depths: Vec<f32> = (0..16).map(|_| rank as f32 * 0.25).collect();
            let dense = DenseImage::new(16, 1, ColorPlane::None, Some(depths));
            let sparse = image::compress(&dense, CompositeMode::ZBuffer);
            let sink = LogSink;
            radix_compose::radixk::radixk_compose(
                &endpoint,
                &sink,
                &group,
                rank,
                CompositeMode::ZBuffer,
                format,
                8,
                false,
                sparse,
            )
            .await
        }));
    }

    for handle in handles {
        let (piece, offset) = handle.await.expect("task panicked")?;
        println!("piece_offset={offset} active_count={}", piece.active_count());
    }
    Ok(())
}
