#![warn(missing_docs)]

//! weft-blob: bulk binary transfer over the message bus.
//!
//! Large payloads (*blobs*) are carried as sequences of fragment messages
//! and reassembled at their final target. The engine in this crate owns
//! both directions of the transfer:
//! - outgoing: fragmenting a pluggable data source into fragment messages
//!   under a per-call message budget, honoring priorities and deadlines
//! - incoming: storing fragments through a pluggable target, tracking the
//!   covered ranges, requesting resends for gaps and delivering a single
//!   completion (or cancellation) callback per blob

/// The blob transfer engine.
pub mod engine;
/// File-backed blob I/O rooted under a directory.
pub mod file_io;
/// Source and target blob I/O traits and buffer implementations.
pub mod io;
/// Resource locator parsing for synthesized and file streams.
pub mod resource;
/// Synthesized byte stream sources.
pub mod streams;

pub use engine::{BlobEngine, BlobId, SendHandler, TargetIoFactory};
pub use file_io::{FileSource, FileTarget};
pub use io::{BlobInfo, BufferSource, BufferTarget, SourceBlobIo, TargetBlobIo};
pub use resource::{open_resource_source, ServerAddress};
pub use streams::{ConstantSource, RandomSource, SequenceSource};
