//! Bridges the ANN backend's async `insert`/`search` entry points onto the
//! caller's thread. The indexing core itself is synchronous end-to-end: no
//! part of this crate's public API returns a `Future`.

use std::sync::LazyLock;
use tokio::runtime::Runtime;

static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("failed to create ann-backend runtime")
});

/// Run an async ANN-backend call to completion on the current thread.
///
/// Worker threads are capped at 1: the backend's own internal parallelism is
/// disabled by construction (`num_build_thread = 1`, see index_config.rs), so
/// a single worker is enough and keeps behavior predictable under whatever
/// outer parallelism the caller already has.
pub fn block_on<F: std::future::Future>(f: F) -> F::Output {
    RUNTIME.block_on(f)
}
