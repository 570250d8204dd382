//! Format detection and decode dispatch.
//!
//! Detectors run in three tiers, cheapest and most reliable first:
//!
//! 1. Fixed magic bytes (MOD signatures, XM text magic, IMPM, SCRM,
//!    RIFF/DSMF, SMOD/FC14, THX/HVL).
//! 2. Magic plus field-range validation (GT2 year, STX marker pair).
//! 3. Pure heuristics with no magic at all. These parse real structure
//!    (bytecode prologues, offset tables) and accept only when every
//!    derived value is consistent, so they go last where a tier-1 match
//!    can never be shadowed by a lucky heuristic.
//!
//! Within a tier the order is arbitrary since the predicates are
//! mutually exclusive by construction.

use rm_ir::{Song, SourceFormat};

use crate::FormatError;
use crate::{
    ahx_format, cinemaware_format, cooksey_format, dsm_format, fc_format, gt2_format, it_format,
    mod_format, musicass_format, puma_format, s3m_format, stx_format, xm_format, xmf_format,
};

/// Identify the container format of a byte buffer.
///
/// Every detector decides from the bytes alone, so the filename hint is
/// unused here; it stays in the signature because [`load`] forwards it
/// to decoders that fall back on it for cosmetic fields (the MOD title).
pub fn identify(data: &[u8], _filename: Option<&str>) -> Option<SourceFormat> {
    // Tier 1: fixed magic.
    if xm_format::detect(data) {
        return Some(SourceFormat::Xm);
    }
    if it_format::detect(data) {
        return Some(SourceFormat::It);
    }
    if dsm_format::detect(data) {
        return Some(SourceFormat::Dsm);
    }
    if fc_format::detect(data) {
        return Some(SourceFormat::FutureComposer);
    }
    if ahx_format::detect(data) {
        return Some(SourceFormat::Ahx);
    }
    if mod_format::detect(data) {
        return Some(SourceFormat::Mod);
    }

    // Tier 2: magic plus range checks. STX before S3M: both carry SCRM,
    // the STX marker pair disambiguates.
    if stx_format::detect(data) {
        return Some(SourceFormat::Stx);
    }
    if s3m_format::detect(data) {
        return Some(SourceFormat::S3m);
    }
    if gt2_format::detect(data) {
        return Some(SourceFormat::GraoumfTracker2);
    }

    // Tier 3: heuristics.
    if musicass_format::detect(data) {
        return Some(SourceFormat::MusicAssembler);
    }
    if cinemaware_format::detect(data) {
        return Some(SourceFormat::Cinemaware);
    }
    if cooksey_format::detect(data) {
        return Some(SourceFormat::MarkCooksey);
    }
    if xmf_format::detect(data) {
        return Some(SourceFormat::Xmf);
    }
    if puma_format::detect(data) {
        return Some(SourceFormat::PumaTracker);
    }

    None
}

/// Detect and decode in one step.
pub fn load(data: &[u8], filename: Option<&str>) -> Result<Song, FormatError> {
    let format = identify(data, filename).ok_or(FormatError::NotThisFormat)?;
    log::debug!("detected {}", format.name());
    match format {
        SourceFormat::Mod => mod_format::load_mod(data, filename),
        SourceFormat::Xm => xm_format::load_xm(data),
        SourceFormat::It => it_format::load_it(data),
        SourceFormat::S3m => s3m_format::load_s3m(data),
        SourceFormat::Stx => stx_format::load_stx(data),
        SourceFormat::Dsm => dsm_format::load_dsm(data),
        SourceFormat::FutureComposer => fc_format::load_fc(data),
        SourceFormat::PumaTracker => puma_format::load_puma(data),
        SourceFormat::MusicAssembler => musicass_format::load_musicass(data),
        SourceFormat::Cinemaware => cinemaware_format::load_cinemaware(data),
        SourceFormat::MarkCooksey => cooksey_format::load_cooksey(data),
        SourceFormat::GraoumfTracker2 => gt2_format::load_gt2(data),
        SourceFormat::Xmf => xmf_format::load_xmf(data),
        SourceFormat::Ahx => ahx_format::load_ahx(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_zero_buffers_match_nothing() {
        assert_eq!(identify(&[], None), None);
        assert_eq!(identify(&[0u8; 16], None), None);
        assert_eq!(identify(&vec![0u8; 8192], None), None);
    }

    #[test]
    fn load_on_unknown_data_reports_not_this_format() {
        let err = load(&[0u8; 64], None).unwrap_err();
        assert_eq!(err, FormatError::NotThisFormat);
    }

    #[test]
    fn each_synthetic_file_identifies_as_exactly_its_format() {
        let files: Vec<(Vec<u8>, SourceFormat)> = vec![
            (mod_format::tests::build_test_mod(), SourceFormat::Mod),
            (xm_format::tests::build_test_xm(), SourceFormat::Xm),
            (it_format::tests::build_test_it(), SourceFormat::It),
            (s3m_format::tests::build_test_s3m(), SourceFormat::S3m),
            (stx_format::tests::build_test_stx(), SourceFormat::Stx),
            (dsm_format::tests::build_test_dsm(), SourceFormat::Dsm),
            (fc_format::tests::build_test_fc(), SourceFormat::FutureComposer),
            (puma_format::tests::build_test_puma(), SourceFormat::PumaTracker),
            (
                musicass_format::tests::build_test_musicass(),
                SourceFormat::MusicAssembler,
            ),
            (
                cinemaware_format::tests::build_test_cinemaware(),
                SourceFormat::Cinemaware,
            ),
            (
                cooksey_format::tests::build_test_cooksey(),
                SourceFormat::MarkCooksey,
            ),
            (gt2_format::tests::build_test_gt2(), SourceFormat::GraoumfTracker2),
            (xmf_format::tests::build_test_xmf(), SourceFormat::Xmf),
            (ahx_format::tests::build_test_ahx(), SourceFormat::Ahx),
        ];
        for (data, expected) in &files {
            assert_eq!(
                identify(data, None),
                Some(*expected),
                "misidentified {}",
                expected.name()
            );
        }
    }
}
