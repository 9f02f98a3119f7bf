// crates/jamcut-engine/src/bin/jamcut.rs
//
// Headless operator CLI for the engine. Drives the same coordinator API an
// editor frontend would:
//
//   jamcut record <store-dir> <seconds>                      — synthetic take → blob
//   jamcut list   <store-dir>                                — stored clip ids
//   jamcut play   <store-dir> <project.json> [secs] [--loop] — headless playback
//   jamcut export <store-dir> <project.json> <time> <out.png>

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use jamcut_core::project::Project;
use jamcut_engine::{write_png, Player};
use jamcut_media::{BlobStore, RecordSpec, SineSource, TestPatternSource};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("record") => cmd_record(&args[1..]),
        Some("list")   => cmd_list(&args[1..]),
        Some("play")   => cmd_play(&args[1..]),
        Some("export") => cmd_export(&args[1..]),
        _ => {
            eprintln!("usage: jamcut record <store-dir> <seconds>");
            eprintln!("       jamcut list   <store-dir>");
            eprintln!("       jamcut play   <store-dir> <project.json> [secs] [--loop]");
            eprintln!("       jamcut export <store-dir> <project.json> <time> <out.png>");
            Ok(())
        }
    }
}

fn cmd_record(args: &[String]) -> Result<()> {
    let dir = args.first().ok_or_else(|| anyhow!("missing store dir"))?;
    let seconds: f64 = args
        .get(1)
        .ok_or_else(|| anyhow!("missing duration"))?
        .parse()
        .context("duration must be seconds")?;

    let store = BlobStore::open(dir)?;
    let mut player = Player::new(store.clone());
    let track_id = Uuid::new_v4();

    let video = Box::new(TestPatternSource::new(640, 360, 30));
    let audio = Box::new(SineSource::new(44_100, 440.0, 1024));
    player.start_recording(
        track_id,
        video,
        Some(audio),
        RecordSpec { width: 640, height: 360, fps: 30 },
    )?;

    eprintln!("recording {seconds:.1}s of test pattern…");
    std::thread::sleep(Duration::from_secs_f64(seconds));

    let result = player.stop_recording()?;
    println!("{} ({} frames)", result.clip_id, result.frame_count);
    Ok(())
}

fn cmd_list(args: &[String]) -> Result<()> {
    let dir = args.first().ok_or_else(|| anyhow!("missing store dir"))?;
    let store = BlobStore::open(dir)?;
    for id in store.list()? {
        println!("{id}");
    }
    Ok(())
}

fn load_project(path: &str) -> Result<Project> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read project {path}"))?;
    Project::from_json(&json).context("parse project JSON")
}

/// Load every project clip whose blob exists in the store.
fn load_resident_clips(player: &mut Player, store: &BlobStore) -> Result<usize> {
    let clips: Vec<(Uuid, Uuid)> = player
        .project()
        .media_tracks
        .iter()
        .flat_map(|t| t.clips.iter().map(move |c| (t.id, c.id)))
        .filter(|(_, clip_id)| store.exists(*clip_id))
        .collect();

    let mut loaded = 0;
    for (track_id, clip_id) in clips {
        match player.load_clip(track_id, clip_id) {
            Ok(duration) => {
                eprintln!("loaded {clip_id} ({duration:.2}s)");
                loaded += 1;
            }
            Err(e) => eprintln!("skipping {clip_id}: {e}"),
        }
    }
    Ok(loaded)
}

fn cmd_play(args: &[String]) -> Result<()> {
    let dir = args.first().ok_or_else(|| anyhow!("missing store dir"))?;
    let project_path = args.get(1).ok_or_else(|| anyhow!("missing project file"))?;
    let seconds: f64 = args
        .get(2)
        .filter(|a| !a.starts_with("--"))
        .map(|a| a.parse())
        .transpose()
        .context("seconds must be a number")?
        .unwrap_or(5.0);
    let looping = args.iter().any(|a| a == "--loop");

    let store = BlobStore::open(dir)?;
    let mut player = Player::new(store.clone());
    player.set_project(load_project(project_path)?);
    eprintln!(
        "timeline {:.2}s across {} segments",
        player.duration(),
        player.timeline().segments.len()
    );

    let loaded = load_resident_clips(&mut player, &store)?;
    if loaded == 0 {
        eprintln!("no stored clips resolve — playing placements dry");
    }

    player.set_loop(looping);
    player.play(Some(0.0))?;
    player.run_for(Duration::from_secs_f64(seconds));
    player.pause();

    let stats = player.frame_stats();
    println!(
        "expected {} rendered {} dropped {} stale {}",
        stats.expected, stats.rendered, stats.dropped, stats.stale
    );
    Ok(())
}

fn cmd_export(args: &[String]) -> Result<()> {
    let dir = args.first().ok_or_else(|| anyhow!("missing store dir"))?;
    let project_path = args.get(1).ok_or_else(|| anyhow!("missing project file"))?;
    let time: f64 = args
        .get(2)
        .ok_or_else(|| anyhow!("missing capture time"))?
        .parse()
        .context("time must be seconds")?;
    let out = args.get(3).ok_or_else(|| anyhow!("missing output path"))?;

    let store = BlobStore::open(dir)?;
    let mut player = Player::new_detached(store.clone());
    player.set_project(load_project(project_path)?);
    load_resident_clips(&mut player, &store)?;

    // Let the workers' seek anchors reach the compositor before capturing.
    player.seek(time)?;
    player.run_for(Duration::from_millis(200));

    let image = player.capture_frame(time)?;
    write_png(std::path::Path::new(out), &image)?;
    println!("{out}");
    Ok(())
}
