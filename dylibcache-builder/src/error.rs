//! Error taxonomy for the builder: a `#[non_exhaustive]` enum with one
//! `#[error("...")]` message per kind via `thiserror`, rather than a hand-
//! rolled `Display` impl or a catch-all string error.

use std::path::PathBuf;

use thiserror::Error;

/// Names a size-limited structure for `CapacityExceeded` messages.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Capacity {
    Region,
    WholeCache,
    HashTable,
    PrebuiltLoaderBuffer,
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capacity::Region => "region",
            Capacity::WholeCache => "whole cache",
            Capacity::HashTable => "hash table",
            Capacity::PrebuiltLoaderBuffer => "prebuilt loader buffer",
        };
        f.write_str(s)
    }
}

/// The single error type returned by [`crate::Builder::build`]. `build`
/// surfaces exactly one diagnostic per convention: "a single diagnostic
/// string". Per-input validation problems never reach here; they are
/// recorded as [`crate::warnings::Warning`]s instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuilderError {
    #[error("no input files were provided")]
    NoInputs,

    #[error("no cache-eligible dylibs remained after validation")]
    NoCacheDylibs,

    #[error("dependency '{path}' required by '{referrer}' was not found in the input closure")]
    DependencyNotFound { referrer: String, path: String },

    #[error("unsupported Mach-O feature in '{dylib}': {detail}")]
    FormatUnsupported { dylib: String, detail: String },

    #[error("{capacity} exceeded: needed {needed} bytes, had {available} bytes")]
    CapacityExceeded {
        capacity: Capacity,
        needed: u64,
        available: u64,
    },

    #[error("I/O failure on '{}': {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("required symbol '{symbol}' missing from '{dylib}'")]
    SymbolUnresolved { dylib: String, symbol: String },

    #[error("dylib pass failed for '{dylib}': {detail}")]
    DylibPassFailed { dylib: String, detail: String },
}

pub type Result<T> = std::result::Result<T, BuilderError>;
