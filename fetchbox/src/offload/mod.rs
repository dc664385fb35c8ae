//! Offload manager for work that must not run on the coordination context.
//!
//! Pipeline stages and entity caches may be slow: decoding a large body,
//! deserializing models, reading a disk cache. Requests hand that work to an
//! [`OffloadManager`], which runs it on the tokio runtime and hands the
//! result back through an [`OffloadResult`] the request awaits locally.
//!
//! # Example
//!
//! ```
//! use fetchbox::offload::{OffloadConfig, OffloadManager};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = OffloadManager::new(OffloadConfig::default());
//! let length = manager.run("pipeline", async { "decoded body".len() }).await;
//! assert_eq!(length, Ok(12));
//! # }
//! ```

mod manager;
mod policy;

pub use manager::{OffloadError, OffloadKey, OffloadManager, OffloadResult};
pub use policy::{OffloadConfig, OffloadConfigBuilder, TimeoutPolicy};
pub use smol_str::SmolStr;
