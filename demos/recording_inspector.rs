//! Recording inspector - lists and summarizes recordings on disk
//!
//! Run with: cargo run --example recording_inspector -- [RECORDINGS_DIR] [FILENAME]
//!
//! Without a file name every valid recording in the directory is listed.
//! With one, that recording's frames are walked and summarized.

use std::path::PathBuf;

use ascii_stream_rs::media::format::{parse_header, read_record, Record};
use ascii_stream_rs::media::{list_recordings, resolve_recording};
use ascii_stream_rs::registry::DEFAULT_RECORDINGS_DIR;

fn inspect(dir: &std::path::Path, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = resolve_recording(dir, name)
        .ok_or_else(|| format!("no recording named '{}' in {}", name, dir.display()))?;
    let data = std::fs::read(&path)?;

    let (header, mut pos) = parse_header(&data)?;
    println!("File:      {}", path.display());
    println!("Version:   {}", header.version.as_deref().unwrap_or("?"));
    println!("Started:   {}", header.timestamp.as_deref().unwrap_or("?"));

    let mut frames = 0u64;
    let mut last_ms = 0u64;
    let mut largest = 0usize;
    while let Record::Frame(record, next) = read_record(&data, pos)? {
        frames += 1;
        last_ms = record.elapsed_ms;
        largest = largest.max(record.payload.len());
        pos = next;
    }

    println!("Frames:    {}", frames);
    println!("Length:    {:.3}s", last_ms as f64 / 1000.0);
    println!("Largest:   {} bytes", largest);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let dir = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDINGS_DIR));

    if let Some(name) = args.get(2) {
        return inspect(&dir, name);
    }

    let recordings = list_recordings(&dir)?;
    if recordings.is_empty() {
        println!("No recordings in {}", dir.display());
        return Ok(());
    }

    println!(
        "{:<40} {:<20} {:>8} {:>8} {:>10}",
        "FILE", "STARTED", "SECS", "FRAMES", "BYTES"
    );
    for info in recordings {
        println!(
            "{:<40} {:<20} {:>8} {:>8} {:>10}",
            info.filename,
            info.timestamp.as_deref().unwrap_or("-"),
            info.duration_secs,
            info.frame_count,
            info.file_size
        );
    }

    Ok(())
}
