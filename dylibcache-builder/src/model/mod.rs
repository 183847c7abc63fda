//! The in-memory data model of cache dylibs, sub-caches, regions, and
//! chunks, with the layout and ownership invariants the design and name.

pub mod cache_dylib;
pub mod chunk;
pub mod region;
pub mod subcache;

pub use cache_dylib::{BindTarget, CacheDylib, Dependent, SegmentAdjustment, SplitSegAdjustor};
pub use chunk::{Chunk, ChunkArena, ChunkId, ChunkKind, LinkeditPiece, SynthesizedKind};
pub use region::Region;
pub use subcache::{Backing, SubCache, SubCacheArena, SubCacheId};
