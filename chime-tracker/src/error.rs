//! Module loading error types

use thiserror::Error;

/// Structural errors that fail a module load outright.
///
/// Recoverable problems (out-of-range loop points, bad indices, oversized
/// envelope point counts) never surface here; the loaders clamp those to a
/// safe value instead. Every message renders in under 64 characters, the
/// diagnostic buffer size hosts historically reserved for these strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// XM header carries a version other than 0x0104
    #[error("XM format version must be 0x0104!")]
    XmVersion,
    /// XM pattern uses a packing type other than 0
    #[error("Unknown pattern packing type!")]
    XmPacking,
    /// "SCRM" signature check failed after S3M dispatch
    #[error("Not an S3M file!")]
    S3mMagic,
    /// S3M sample flagged as ADPCM-packed
    #[error("Packed samples not supported!")]
    S3mPackedSamples,
    /// MOD signature is not M.K./M!K!/FLT4/xCHN/xxCH
    #[error("MOD Format not recognised!")]
    ModFormat,
}
