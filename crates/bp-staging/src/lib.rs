//! Backplane Staging
//!
//! Durable holding area for inbound records between transport receipt and
//! the downstream commit:
//! - `StagingCache`: one file per record, crash-safe writes
//! - `codec`: the on-disk record format
//! - `BodyStorage`: lookup for claim-checked message bodies

pub mod body;
pub mod cache;
pub mod codec;
pub mod error;

pub use body::{BodyStorage, FileBodyStorage};
pub use cache::{StagedHandle, StagingCache};
pub use error::{CodecError, StagingError};

pub type Result<T> = std::result::Result<T, StagingError>;
