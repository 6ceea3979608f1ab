// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! # radix-compose
//!
//! The parallel image-composition core of a sort-last parallel rendering
//! pipeline. N processes each render a full-screen portion of a 3D scene
//! into color and/or depth samples; this crate combines those N partial
//! images, pixel by pixel, into one or more final tile images, using as
//! little inter-process communication as the Radix-k swap-composite
//! algorithm allows.
//!
//! ## Features
//!
//! - **Sparse-image codec**: run-length compression that skips inactive
//!   pixels, pairwise composition under a z-buffer or alpha-blend operator,
//!   partitioning, and density-equalizing interlacing.
//! - **Radix-k composer**: a multi-round swap-composite scheduler that
//!   factors the process count and exchanges/composites image pieces
//!   round by round down to an evenly distributed final partition.
//! - **Reduce delegator**: process-to-tile assignment and send-destination
//!   planning for sessions with more than one output tile.
//! - **Async transport trait**: the composer drives message exchange
//!   through a small `Transport` trait; an in-process mock built on Tokio
//!   channels is included for tests and standalone experimentation.
//! - **Host-supplied topology**: session options and process/tile topology
//!   are read from a `SessionState` implementation rather than hard-coded.
//!
//! ## Quick Start
//!
//! ```no_run
//! use radix_compose::{
//!     diagnostic::LogSink,
//!     image::{ColorPlane, DenseImage},
//!     options::{ColorFormat, DepthFormat, ImageFormat, InMemorySessionState},
//!     transport::mock::MockMesh,
//!     facade,
//! };
//!
//! # async fn run() -> radix_compose::Result<()> {
//! let format = ImageFormat { color: ColorFormat::None, depth: DepthFormat::Float };
//! let state = InMemorySessionState::single_process(format);
//! let mesh = MockMesh::new(1);
//! let endpoint = mesh.endpoint(0);
//! let sink = LogSink;
//!
//! let rendered = DenseImage::new(4, 4, ColorPlane::None, Some(vec![0.0; 16]));
//! let tile = facade::reduce_compose(&endpoint, &sink, &state, &rendered).await?;
//! assert!(tile.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Rendering front-end           │
//! │                                         │
//! │  • Produces dense color/depth buffers   │
//! │  • Owns the scene and the GPU/CPU path  │
//! └──────────────────┬──────────────────────┘
//!                    │ DenseImage
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │              facade (Public)            │
//! │                                         │
//! │  • Single tile  → radixk directly       │
//! │  • Multiple tiles → reduce delegator    │
//! └──────────────────┬──────────────────────┘
//!                    │
//!        ┌───────────┴───────────┐
//!        ▼                       ▼
//! ┌─────────────┐         ┌─────────────┐
//! │   reduce    │         │   radixk    │
//! │             │         │             │
//! │ quota/seat/ │ group   │ split/      │
//! │ send-dest   │────────▶│ exchange/   │
//! │             │         │ tree-merge  │
//! └─────────────┘         └──────┬──────┘
//!                                │ SparseImage
//!                                ▼
//!                         ┌─────────────┐
//!                         │    image    │
//!                         │             │
//!                         │ codec, pixel│
//!                         │ combine ops │
//!                         └─────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diagnostic;
pub mod error;
pub mod facade;
pub mod image;
pub mod options;
pub mod radixk;
pub mod reduce;
pub mod transport;

mod pivot;
mod scratch;

pub use diagnostic::DiagnosticSink;
pub use error::{ComposeError, Result};
pub use options::SessionState;
pub use scratch::{ScratchBuffers, ScratchSlot};
pub use transport::Transport;

/// Factor `world_size` around `magic_k` for Radix-k's round schedule; see
/// [`radixk::radixk_get_k`].
pub use radixk::radixk_get_k;
