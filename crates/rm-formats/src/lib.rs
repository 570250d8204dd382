//! Format detectors, decoders and encoders for retromod.
//!
//! Each supported container format lives in its own module owning header
//! parsing, offset resolution, sample extraction and pattern assembly.
//! All of them emit the canonical [`rm_ir::Song`] model. Detection and
//! dispatch are in [`detect`]; the inverse encoders (MOD, XM) are in
//! [`mod_export`] and [`xm_export`].
//!
//! The whole crate is synchronous and side-effect-free: callers hand in
//! a byte buffer, decoders hand back a song or a [`FormatError`]. Every
//! offset derived from the buffer is bounds-checked before use.

mod compress;
mod effect;
mod export_util;
mod normalize;
mod period;
mod reader;
mod scan;

mod ahx_format;
mod cinemaware_format;
mod cooksey_format;
mod dsm_format;
mod fc_format;
mod fc_macro;
mod gt2_format;
mod it_format;
mod mod_format;
mod musicass_format;
mod puma_format;
mod s3m_format;
mod stx_format;
mod xm_format;
mod xmf_format;

pub mod detect;
pub mod mod_export;
pub mod xm_export;

pub use compress::{decompress_it_16bit, decompress_it_8bit};
pub use detect::{identify, load};
pub use mod_export::export_mod;
pub use period::{finetune_to_c4speed, note_to_period, period_to_note, AMIGA_C3_PERIOD};
pub use reader::ByteReader;
pub use xm_export::export_xm;

pub use ahx_format::load_ahx;
pub use cinemaware_format::load_cinemaware;
pub use cooksey_format::load_cooksey;
pub use dsm_format::load_dsm;
pub use fc_format::load_fc;
pub use gt2_format::load_gt2;
pub use it_format::load_it;
pub use mod_format::load_mod;
pub use musicass_format::load_musicass;
pub use puma_format::load_puma;
pub use s3m_format::load_s3m;
pub use stx_format::load_stx;
pub use xm_format::load_xm;
pub use xmf_format::load_xmf;

/// Error type for format decoding and encoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    /// Structural validation failed where the cheap detector could not;
    /// the file belongs to some other format.
    #[error("not this format")]
    NotThisFormat,
    /// Invalid file header or magic bytes
    #[error("invalid header")]
    InvalidHeader,
    /// Unexpected end of file
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// Structural corruption in a positively-detected file
    #[error("corrupt file: {0}")]
    Corrupt(&'static str),
    /// Recognized file using a feature this crate does not implement
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
}

/// Result of an export: file bytes, a filename suggestion with the right
/// extension, and one human-readable warning per lossy transformation.
#[derive(Debug)]
pub struct ExportResult {
    pub data: Vec<u8>,
    pub suggested_name: String,
    pub warnings: Vec<String>,
}
