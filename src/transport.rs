//! The message-passing transport collaborator (§6).
//!
//! Implementing a real transport is out of scope for this crate (§1); what
//! lives here is the trait the Radix-k composer drives, plus an in-process
//! mock built on `tokio` channels so a single test process can stand in for
//! several ranks exchanging pieces.

use crate::error::{ComposeError, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// A handle to a posted non-blocking send or receive. The transport decides
/// its internal representation; the composer only ever awaits it.
#[async_trait]
pub trait Request: Send {
    /// Block until this request completes, returning the payload for a
    /// receive request (empty `Bytes` for a send).
    async fn wait(self: Box<Self>) -> Result<Bytes>;
}

/// Non-blocking send/receive plus the two wait primitives from §6's
/// transport contract: `isend`, `irecv`, `wait_any`, `wait_all`, `send`,
/// `gather`. Reliable, in-order per `(src, dst, tag)`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a non-blocking send of `payload` to `peer` under `tag`.
    async fn isend(&self, peer: usize, tag: u32, payload: Bytes) -> Result<Box<dyn Request>>;

    /// Post a non-blocking receive from `peer` under `tag`, expecting at
    /// most `max_len` bytes.
    async fn irecv(&self, peer: usize, tag: u32, max_len: usize) -> Result<Box<dyn Request>>;

    /// Block until any one of `reqs` completes, remove it from `reqs` and
    /// return its original index alongside its payload. The remaining,
    /// still-pending requests stay in `reqs` for a subsequent call. Used by
    /// the composite tree to react to arrivals in whatever order they occur
    /// (§4.2.1).
    async fn wait_any(&self, reqs: &mut Vec<Box<dyn Request>>) -> Result<(usize, Bytes)>;

    /// Block until every request in `reqs` has completed. Used as the
    /// send-side barrier at the end of each Radix-k round (§5).
    async fn wait_all(&self, reqs: Vec<Box<dyn Request>>) -> Result<()>;

    /// Blocking send, used for small control messages outside the hot path.
    async fn send(&self, peer: usize, tag: u32, payload: Bytes) -> Result<()>;

    /// Gather `payload` from every rank in `group` to `root`. Returns
    /// `Some(Vec<Bytes>)` ordered by group position on `root`, `None`
    /// elsewhere.
    async fn gather(
        &self,
        group: &[usize],
        root: usize,
        payload: Bytes,
    ) -> Result<Option<Vec<Bytes>>>;
}

/// An in-process mock transport for tests and standalone experimentation:
/// every "rank" is a handle sharing a set of `tokio::sync::mpsc` channels
/// keyed by `(src, dst, tag)`.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    type Key = (usize, usize, u32);

    struct Inner {
        queues: Mutex<HashMap<Key, (mpsc::UnboundedSender<Bytes>, mpsc::UnboundedReceiver<Bytes>)>>,
    }

    /// A shared mesh of channels connecting `world_size` ranks. Clone
    /// [`MockEndpoint`] handles from it, one per simulated rank.
    #[derive(Clone)]
    pub struct MockMesh {
        inner: Arc<Inner>,
        world_size: usize,
    }

    impl MockMesh {
        /// Create a new mesh sized for `world_size` ranks.
        #[must_use]
        pub fn new(world_size: usize) -> Self {
            Self {
                inner: Arc::new(Inner {
                    queues: Mutex::new(HashMap::new()),
                }),
                world_size,
            }
        }

        /// Create the transport handle for `rank`.
        #[must_use]
        pub fn endpoint(&self, rank: usize) -> MockEndpoint {
            MockEndpoint {
                mesh: self.clone(),
                rank,
            }
        }

        async fn sender(&self, src: usize, dst: usize, tag: u32) -> mpsc::UnboundedSender<Bytes> {
            let mut queues = self.inner.queues.lock().await;
            queues
                .entry((src, dst, tag))
                .or_insert_with(mpsc::unbounded_channel)
                .0
                .clone()
        }
    }

    /// One rank's view of a [`MockMesh`].
    pub struct MockEndpoint {
        mesh: MockMesh,
        rank: usize,
    }

    /// A completed mock request: the payload is already in hand, `wait`
    /// just hands it back (sends carry an empty payload).
    pub struct MockRequest(Bytes);

    #[async_trait]
    impl Request for MockRequest {
        async fn wait(self: Box<Self>) -> Result<Bytes> {
            Ok(self.0)
        }
    }

    #[async_trait]
    impl Transport for MockEndpoint {
        async fn isend(&self, peer: usize, tag: u32, payload: Bytes) -> Result<Box<dyn Request>> {
            let tx = self.mesh.sender(self.rank, peer, tag).await;
            tx.send(payload)
                .map_err(|e| ComposeError::Transport(e.to_string()))?;
            Ok(Box::new(MockRequest(Bytes::new())))
        }

        async fn irecv(&self, peer: usize, tag: u32, _max_len: usize) -> Result<Box<dyn Request>> {
            let mut queues = self.mesh.inner.queues.lock().await;
            let (_, rx) = queues
                .entry((peer, self.rank, tag))
                .or_insert_with(mpsc::unbounded_channel);
            let payload = rx
                .recv()
                .await
                .ok_or_else(|| ComposeError::Transport("peer channel closed".into()))?;
            Ok(Box::new(MockRequest(payload)))
        }

        async fn wait_any(&self, reqs: &mut Vec<Box<dyn Request>>) -> Result<(usize, Bytes)> {
            // The mock resolves requests eagerly in `irecv`/`isend` (each
            // already awaited its channel before returning), so whichever
            // slot we pick is already complete; popping the last one keeps
            // this O(1) without needing a real readiness poll.
            if reqs.is_empty() {
                return Err(ComposeError::sanity("wait_any on empty request list"));
            }
            let index = reqs.len() - 1;
            let req = reqs.pop().unwrap();
            let payload = req.wait().await?;
            Ok((index, payload))
        }

        async fn wait_all(&self, reqs: Vec<Box<dyn Request>>) -> Result<()> {
            for req in reqs {
                req.wait().await?;
            }
            Ok(())
        }

        async fn send(&self, peer: usize, tag: u32, payload: Bytes) -> Result<()> {
            self.isend(peer, tag, payload).await?.wait().await?;
            Ok(())
        }

        async fn gather(
            &self,
            group: &[usize],
            root: usize,
            payload: Bytes,
        ) -> Result<Option<Vec<Bytes>>> {
            const GATHER_TAG: u32 = 0x6761_7468; // "gath"
            if self.rank == root {
                let mut out = Vec::with_capacity(group.len());
                for &peer in group {
                    if peer == root {
                        out.push(payload.clone());
                        continue;
                    }
                    let req = self.irecv(peer, GATHER_TAG, usize::MAX).await?;
                    out.push(req.wait().await?);
                }
                Ok(Some(out))
            } else {
                self.send(root, GATHER_TAG, payload).await?;
                Ok(None)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn round_trip_send_recv() {
            let mesh = MockMesh::new(2);
            let a = mesh.endpoint(0);
            let b = mesh.endpoint(1);

            let sender = tokio::spawn(async move {
                a.send(1, 42, Bytes::from_static(b"hello")).await.unwrap();
            });
            let req = b.irecv(0, 42, 64).await.unwrap();
            let payload = req.wait().await.unwrap();
            sender.await.unwrap();

            assert_eq!(&payload[..], b"hello");
        }

        #[tokio::test]
        async fn gather_collects_in_group_order() {
            let mesh = MockMesh::new(3);
            let group = vec![1, 0, 2];

            let e1 = mesh.endpoint(1);
            let e2 = mesh.endpoint(2);
            let e0 = mesh.endpoint(0);

            let g = group.clone();
            let h1 = tokio::spawn(async move { e1.gather(&g, 1, Bytes::from_static(b"B")).await });
            let g = group.clone();
            let h2 = tokio::spawn(async move { e2.gather(&g, 1, Bytes::from_static(b"C")).await });
            let g = group.clone();
            let h0 = tokio::spawn(async move { e0.gather(&g, 1, Bytes::from_static(b"A")).await });

            let (r0, r1, r2) = (h0.await.unwrap(), h1.await.unwrap(), h2.await.unwrap());
            assert!(r0.unwrap().is_none());
            assert!(r2.unwrap().is_none());
            let gathered = r1.unwrap().unwrap();
            assert_eq!(gathered, vec![Bytes::from_static(b"B"), Bytes::from_static(b"A"), Bytes::from_static(b"C")]);
        }
    }
}
