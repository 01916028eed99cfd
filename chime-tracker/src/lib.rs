//! Chime-Tracker: tracker module loader and unified song model
//!
//! This crate parses the three classic tracker module container formats into
//! a single in-memory representation that the `chime-replay` engine plays
//! back:
//!
//! - **XM** (FastTracker 2 "Extended Module")
//! - **S3M** (Scream Tracker 3)
//! - **MOD** (ProTracker and its 4/8/16/32-channel descendants)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │  XM (.xm)    │  │  S3M (.s3m)  │  │  MOD (.mod)  │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        │                 │                 │
//!    xm::parse         s3m::parse     protracker::parse
//!        │                 │                 │
//!        ▼                 ▼                 ▼
//!     ┌────────────────────────────────────────────┐
//!     │              Module (unified)              │
//!     │  - patterns: Vec<Pattern> (5 bytes/cell)   │
//!     │  - instruments: Vec<Instrument>            │
//!     │  - sequence, panning, speed/tempo defaults │
//!     └────────────────────────────────────────────┘
//! ```
//!
//! Format detection is by signature: `"Extended Module:"` at offset 0 selects
//! the XM loader, `"SCRM"` at offset 44 the S3M loader, and anything else
//! falls through to the ProTracker loader.
//!
//! # Robustness
//!
//! Module files in the wild are frequently truncated or carry header fields
//! that point past the end of the file. The loaders are therefore tolerant:
//! structural problems (bad magic, unsupported packing) fail the load with a
//! [`LoadError`], while out-of-range content (loop regions past the sample
//! end, oversized envelope point counts, bad indices) is clamped or replaced
//! with an inert default and never fails.
//!
//! # Usage
//!
//! ```ignore
//! use chime_tracker::Module;
//!
//! let bytes = std::fs::read("song.xm").unwrap();
//! let module = Module::load(&bytes).unwrap();
//!
//! println!("Song: {}", module.name);
//! println!("Channels: {}", module.num_channels);
//! ```

mod data;
mod error;
mod module;
pub mod pitch;
mod protracker;
mod s3m;
mod xm;

pub use error::LoadError;
pub use module::{Envelope, Instrument, Module, Note, Pattern, Sample};

// =============================================================================
// Constants
// =============================================================================

/// XM signature at offset 0
pub const XM_MAGIC: &[u8; 16] = b"Extended Module:";

/// S3M signature at offset 44
pub const S3M_MAGIC: &[u8; 4] = b"SCRM";

/// Note key for "key off" (keys 1..=96 are playable, larger releases)
pub const KEY_OFF: u8 = 97;

/// Maximum number of channels retained by any loader
pub const MAX_CHANNELS: usize = 32;

/// Maximum rows per pattern retained by any loader
pub const MAX_ROWS: usize = 256;
