//! Adversarial-input tests: no buffer, however malformed, may panic a
//! detector or decoder. Decoders may reject, recover, or degrade, but
//! the only allowed failure is an error value.

use rm_formats::{identify, load, FormatError};

/// Deterministic xorshift byte stream.
fn garbage(len: usize, mut seed: u32) -> Vec<u8> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed >> 24) as u8
        })
        .collect()
}

#[test]
fn empty_and_tiny_buffers() {
    for len in 0..64 {
        let data = garbage(len, 0xDEAD_BEEF + len as u32);
        let _ = identify(&data, None);
        let _ = load(&data, Some("noise.bin"));
    }
}

#[test]
fn random_buffers_never_panic() {
    for (len, seed) in [(128, 1u32), (1080, 2), (1084, 3), (4096, 4), (65536, 5)] {
        let data = garbage(len, seed);
        let _ = identify(&data, None);
        let _ = load(&data, None);
    }
}

#[test]
fn magic_stamped_garbage_never_panics() {
    // Garbage wearing each format's magic must reach the decoder and
    // fail (or degrade) without panicking.
    let stamps: &[(&[u8], usize)] = &[
        (b"Extended Module: ", 0),
        (b"IMPM", 0),
        (b"SCRM", 0x2C),
        (b"SMOD", 0),
        (b"FC14", 0),
        (b"THX\0", 0),
        (b"HVL\0", 0),
        (b"GT2\0", 0),
        (b"M.K.", 1080),
        (b"!Scream!", 20),
    ];

    for (i, (magic, offset)) in stamps.iter().enumerate() {
        for len in [256usize, 2048, 8192] {
            if offset + magic.len() > len {
                continue;
            }
            let mut data = garbage(len, 0xC0FF_EE00 + i as u32);
            data[*offset..offset + magic.len()].copy_from_slice(magic);
            let _ = identify(&data, None);
            let _ = load(&data, None);
        }
    }
}

#[test]
fn riff_garbage_never_panics() {
    for len in [64usize, 512, 8192] {
        let mut data = garbage(len, 0x0D15_EA5E);
        data[0..4].copy_from_slice(b"RIFF");
        data[8..12].copy_from_slice(b"DSMF");
        let _ = identify(&data, None);
        let _ = load(&data, None);
    }
}

#[test]
fn truncation_sweep_never_panics() {
    // Take a valid file, cut it at every length, and feed each prefix
    // through the full pipeline.
    let mut valid = vec![0u8; 1084];
    valid[0..4].copy_from_slice(b"cut!");
    valid[950] = 1;
    valid[1080..1084].copy_from_slice(b"M.K.");
    valid.extend_from_slice(&[0u8; 64 * 4 * 4]);

    for cut in 0..valid.len() {
        let _ = load(&valid[..cut], None);
    }
    assert!(load(&valid, None).is_ok());
}

#[test]
fn unknown_data_is_an_error_not_a_guess() {
    let err = load(&[0xFFu8; 512], None).unwrap_err();
    assert_eq!(err, FormatError::NotThisFormat);
}
