//! retromod CLI - tracker module inspection and conversion.
//!
//! Detects the container format of a module file, decodes it to the
//! canonical song model, prints song information, and converts to the
//! MOD and XM containers.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use rm_ir::{InstrumentKind, Song};

/// retromod - retro tracker module decoder and converter
#[derive(Parser)]
#[command(name = "retromod")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the container format of a file without decoding it
    Detect {
        /// Path to the module file
        file: PathBuf,
    },

    /// Decode a module and print song information
    Info {
        /// Path to the module file
        file: PathBuf,

        /// Also list instruments
        #[arg(short, long)]
        instruments: bool,
    },

    /// Convert a module to another container format
    Export {
        /// Path to the module file
        file: PathBuf,

        /// Target container
        #[arg(short, long, value_enum)]
        to: Target,

        /// Output path (default: derived from the song title)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Mod,
    Xm,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Detect { file } => detect(&file),
        Commands::Info { file, instruments } => info(&file, instruments),
        Commands::Export { file, to, output } => export(&file, to, output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

fn file_name_hint(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn detect(path: &Path) -> Result<(), String> {
    let data = read_file(path)?;
    match rm_formats::identify(&data, file_name_hint(path)) {
        Some(format) => {
            println!("{}", format.name());
            Ok(())
        }
        None => Err(format!("{}: unknown format", path.display())),
    }
}

fn load(path: &Path) -> Result<Song, String> {
    let data = read_file(path)?;
    rm_formats::load(&data, file_name_hint(path))
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn info(path: &Path, with_instruments: bool) -> Result<(), String> {
    let song = load(path)?;

    println!("Title:    {}", song.title);
    println!("Format:   {}", song.source_format.name());
    println!("Channels: {}", song.num_channels);
    println!("Patterns: {}", song.patterns.len());
    println!("Orders:   {}", song.positions.len());
    println!(
        "Tempo:    {} BPM, speed {}{}",
        song.initial_tempo,
        song.initial_speed,
        if song.linear_periods { " (linear periods)" } else { "" }
    );

    let sampled = song
        .instruments
        .iter()
        .filter(|i| i.first_sample().is_some_and(|s| !s.is_empty()))
        .count();
    let synth = song.instruments.iter().filter(|i| i.is_synth()).count();
    println!(
        "Instruments: {} ({} with PCM, {} synthesis)",
        song.instruments.len(),
        sampled,
        synth
    );

    if with_instruments {
        println!();
        for (i, inst) in song.instruments.iter().enumerate() {
            match &inst.kind {
                InstrumentKind::Sampled { samples, .. } => {
                    let frames: usize = samples.iter().map(|s| s.len()).sum();
                    println!(
                        "{:3}: {:28} {} sample(s), {} frames",
                        i + 1,
                        inst.name,
                        samples.len(),
                        frames
                    );
                }
                InstrumentKind::Synth { waveform, .. } => {
                    println!("{:3}: {:28} synth, waveform {}", i + 1, inst.name, waveform);
                }
            }
        }
    }

    Ok(())
}

fn export(path: &Path, to: Target, output: Option<PathBuf>) -> Result<(), String> {
    let song = load(path)?;

    let result = match to {
        Target::Mod => rm_formats::export_mod(&song),
        Target::Xm => rm_formats::export_xm(&song),
    };

    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }

    let out_path = output.unwrap_or_else(|| PathBuf::from(&result.suggested_name));
    fs::write(&out_path, &result.data)
        .map_err(|e| format!("cannot write {}: {}", out_path.display(), e))?;
    println!(
        "wrote {} ({} bytes, {} warning(s))",
        out_path.display(),
        result.data.len(),
        result.warnings.len()
    );

    Ok(())
}
