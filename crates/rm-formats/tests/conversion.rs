//! End-to-end conversion tests through the public API: build a song,
//! export it, decode the bytes back, and compare.

use rm_formats::{export_mod, export_xm, identify, load};
use rm_ir::{
    Cell, Effect, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat,
    VolumeCommand,
};

fn sampled_song() -> Song {
    let mut song = Song::with_channels("fixture", SourceFormat::Mod, 4);

    let mut sample = Sample::new("pluck");
    sample.data = SampleData::Mono8((0..64).map(|i| (i * 4 - 128) as i8).collect());
    sample.default_volume = 48;
    sample.loop_start = 0;
    sample.loop_end = 64;
    sample.loop_type = LoopType::Forward;
    song.instruments.push(Instrument::sampled("pluck", sample));

    let mut pattern = Pattern::new(64, 4);
    *pattern.cell_mut(0, 0) = Cell {
        note: Note::On(37),
        instrument: 1,
        volume: VolumeCommand::None,
        effect: Effect::SetVolume(40),
        effect2: Effect::None,
    };
    *pattern.cell_mut(4, 1) = Cell {
        note: Note::On(49),
        instrument: 1,
        volume: VolumeCommand::None,
        effect: Effect::VolumeSlide(-2),
        effect2: Effect::None,
    };
    pattern.cell_mut(63, 3).effect = Effect::PositionJump(0);
    song.patterns.push(pattern);
    song.positions = vec![0];
    song
}

#[test]
fn mod_export_decodes_back_identically() {
    let song = sampled_song();
    let export = export_mod(&song);
    assert_eq!(export.warnings, Vec::<String>::new());

    assert_eq!(identify(&export.data, None), Some(SourceFormat::Mod));
    let reloaded = load(&export.data, None).unwrap();
    reloaded.check_invariants().unwrap();

    assert_eq!(reloaded.title.as_str(), "fixture");
    assert_eq!(reloaded.positions, song.positions);
    assert_eq!(reloaded.patterns, song.patterns);

    let s = reloaded.instruments[0].first_sample().unwrap();
    assert_eq!(s.len(), 64);
    assert_eq!(s.default_volume, 48);
    assert!(s.has_loop());
}

#[test]
fn mod_export_is_byte_stable() {
    // After one decode pass the encode/decode pair is a fixed point.
    let first = export_mod(&sampled_song());
    let second = export_mod(&load(&first.data, None).unwrap());
    let third = export_mod(&load(&second.data, None).unwrap());
    assert_eq!(third.data, second.data);
}

#[test]
fn xm_export_decodes_back_identically() {
    let mut song = sampled_song();
    song.linear_periods = true;
    // XM-only material: key off and a volume column
    song.patterns[0].cell_mut(8, 2).note = Note::Off;
    song.patterns[0].cell_mut(9, 2).volume = VolumeCommand::Volume(20);

    let export = export_xm(&song);
    assert_eq!(export.warnings, Vec::<String>::new());

    assert_eq!(identify(&export.data, None), Some(SourceFormat::Xm));
    let reloaded = load(&export.data, None).unwrap();
    reloaded.check_invariants().unwrap();

    assert_eq!(reloaded.patterns, song.patterns);
    assert!(reloaded.linear_periods);
    assert_eq!(reloaded.patterns[0].cell(8, 2).note, Note::Off);
    assert_eq!(
        reloaded.patterns[0].cell(9, 2).volume,
        VolumeCommand::Volume(20)
    );
}

#[test]
fn mod_to_xm_conversion_chain() {
    // MOD bytes -> song -> XM bytes -> song keeps the score intact.
    let mod_bytes = export_mod(&sampled_song()).data;
    let decoded = load(&mod_bytes, None).unwrap();
    let xm_bytes = export_xm(&decoded).data;
    let converted = load(&xm_bytes, None).unwrap();

    assert_eq!(converted.source_format, SourceFormat::Xm);
    assert_eq!(converted.patterns[0].cell(0, 0).note, Note::On(37));
    assert_eq!(converted.patterns[0].cell(0, 0).effect, Effect::SetVolume(40));
}

#[test]
fn lossy_mod_export_reports_every_conversion() {
    let mut song = sampled_song();
    song.num_channels = 5;
    song.channels.push(Default::default());
    song.patterns[0] = {
        let mut p = Pattern::new(96, 5);
        p.cell_mut(0, 0).note = Note::On(80); // above the MOD range
        p.cell_mut(0, 4).note = Note::Off;
        p
    };
    song.instruments.push(Instrument::synth("chip", 1, 64));

    let export = export_mod(&song);
    let w = &export.warnings;
    assert!(w.iter().any(|m| m.contains("padded to 6")));
    assert!(w.iter().any(|m| m.contains("96 rows")));
    assert!(w.iter().any(|m| m.contains("clamped")));
    assert!(w.iter().any(|m| m.contains("note-off")));
    assert!(w.iter().any(|m| m.contains("baked")));

    // Still a loadable file
    let reloaded = load(&export.data, None).unwrap();
    assert_eq!(reloaded.num_channels, 6);
}
