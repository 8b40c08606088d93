//! Serum CLI - Inspect archives, rebuild caches and replay raw frame dumps.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serum_decode::{
    archive::{cache_path_for, Archive},
    engine::{ColorizeOutcome, Engine},
    schema::PlaybackConfig,
    SourceFormat, VERSION,
};

/// Time between two replayed frames.
const REPLAY_FRAME_MS: u64 = 16;

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--rebuild-cache" if args.len() >= 3 => rebuild_cache(Path::new(&args[2])),
        "--replay" if args.len() >= 4 => {
            let config = load_config(args.get(4).map(PathBuf::from));
            replay(Path::new(&args[2]), Path::new(&args[3]), config);
        }
        arg if !arg.starts_with("--") => {
            let config = load_config(args.get(2).map(PathBuf::from));
            inspect(Path::new(arg), config);
        }
        _ => {
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <archive> [config.json]", program);
    eprintln!("       {} --rebuild-cache <archive>", program);
    eprintln!("       {} --replay <archive> <frames.raw> [config.json]", program);
    eprintln!();
    eprintln!("Decode a Serum colorization archive (serum-decode {}).", VERSION);
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  archive      Source archive (.cRZ) or its cache (.cROMc)");
    eprintln!("  frames.raw   Concatenated raw frames, one byte per pixel");
    eprintln!("  config.json  Playback configuration (default: built-in)");
    eprintln!();
    eprintln!("Example configuration is generated with --example flag.");
}

fn load_config(path: Option<PathBuf>) -> PlaybackConfig {
    let Some(path) = path else {
        return PlaybackConfig::default();
    };
    let config_str = fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });
    serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    })
}

fn load_engine(path: &Path, config: PlaybackConfig) -> Engine {
    let mut engine = Engine::new(config).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    });
    let start = Instant::now();
    let origin = engine.load(path).unwrap_or_else(|e| {
        eprintln!("Error loading archive: {}", e);
        std::process::exit(1);
    });
    println!("Loaded from {:?} in {:.1} ms", origin, start.elapsed().as_secs_f32() * 1000.0);
    engine
}

fn inspect(path: &Path, config: PlaybackConfig) {
    let engine = load_engine(path, config);
    let Some(archive) = engine.archive() else {
        return;
    };

    println!("Serum Archive");
    println!("=============");
    println!("Name: {}", archive.name);
    println!("Format: {:?}", archive.format);
    println!("Resolution: {}x{}", archive.width, archive.height);
    if archive.format == SourceFormat::Current && archive.has_extra_plane() {
        println!(
            "Extra resolution: {}x{} (available: {})",
            archive.width_extra,
            archive.height_extra,
            archive.extra_available()
        );
    }
    println!("Frames: {}", archive.nframes);
    println!("Colors: {} in, {} out", archive.nocolors, archive.nccolors);
    println!("Comparison masks: {}", archive.ncompmasks);
    println!("Sprites: {}", archive.nsprites);
    println!("Backgrounds: {}", archive.nbackgrounds);
    println!("Triggers: {}", archive.trigger_count());
    if archive.is256x64 {
        println!("Comparison: 256x64");
    }
}

fn rebuild_cache(path: &Path) {
    let start = Instant::now();
    let archive = Archive::open_source(path, PlaybackConfig::default().request).unwrap_or_else(|e| {
        eprintln!("Error reading archive: {}", e);
        std::process::exit(1);
    });
    let cache = cache_path_for(path);
    if let Err(e) = archive.save_cache(&cache) {
        eprintln!("Error writing cache: {}", e);
        std::process::exit(1);
    }
    println!(
        "Wrote {} in {:.1} ms",
        cache.display(),
        start.elapsed().as_secs_f32() * 1000.0
    );
}

fn replay(path: &Path, dump: &Path, config: PlaybackConfig) {
    let mut engine = load_engine(path, config);
    let frame_len = engine.archive().map_or(0, Archive::comparison_len);
    let data = fs::read(dump).unwrap_or_else(|e| {
        eprintln!("Error reading frame dump: {}", e);
        std::process::exit(1);
    });
    if frame_len == 0 || data.len() < frame_len {
        eprintln!("Frame dump holds no complete {}-byte frame", frame_len);
        std::process::exit(1);
    }

    let frames = data.len() / frame_len;
    println!("Replaying {} frames...", frames);

    let mut colorized = 0u64;
    let mut unchanged = 0u64;
    let mut fallback = 0u64;
    let mut not_found = 0u64;
    let mut triggers = 0u64;
    let mut rotations = 0u64;
    let mut next_rotation: Option<u64> = None;

    let start = Instant::now();
    for (i, frame) in data.chunks_exact(frame_len).enumerate() {
        let now = i as u64 * REPLAY_FRAME_MS;
        while let Some(due) = next_rotation.filter(|&due| due <= now) {
            let step = engine.rotate_at(due);
            rotations += 1;
            next_rotation = step.next_in_ms.map(|d| due + d as u64);
        }

        match engine.colorize_at(frame, now) {
            ColorizeOutcome::Colorized {
                first_rotation_in_ms,
                trigger,
                ..
            } => {
                colorized += 1;
                triggers += trigger.is_some() as u64;
                next_rotation = first_rotation_in_ms.map(|d| now + d as u64);
            }
            ColorizeOutcome::Unchanged => unchanged += 1,
            ColorizeOutcome::Fallback => {
                fallback += 1;
                next_rotation = None;
            }
            ColorizeOutcome::NotFound => not_found += 1,
        }
    }
    let elapsed = start.elapsed();

    println!();
    println!("Colorized: {}", colorized);
    println!("Unchanged: {}", unchanged);
    println!("Fallback: {}", fallback);
    println!("Not found: {}", not_found);
    println!("Triggers: {}", triggers);
    println!("Rotation steps: {}", rotations);
    println!(
        "Time: {:.2}s ({:.1} frames/s)",
        elapsed.as_secs_f32(),
        frames as f32 / elapsed.as_secs_f32().max(f32::EPSILON)
    );
}

fn print_example_config() {
    let config = PlaybackConfig::default();

    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
}
