//! Transfer primitives shared by every entity strategy: dedup check, link
//! rewriting, retry policy, scratch-file lifecycle and batch download.

mod dedup;
mod download;
mod link;
mod retry;
mod scratch;

pub use dedup::{all_hashes, ensure_hashes_recognized};
pub use download::download_batch;
pub use link::{resolve_link, LinkRewrite};
pub use retry::{RetryPolicy, TRANSFER_MAX_ATTEMPTS, TRANSFER_RETRY_DELAY_SECS};
pub use scratch::{silent_remove, GeometryCache, ScratchBatch, ScratchDir};
