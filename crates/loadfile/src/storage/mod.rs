pub mod blob;

pub use blob::{BlobKind, BlobStore, StagedBlob};
