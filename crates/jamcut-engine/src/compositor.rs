// crates/jamcut-engine/src/compositor.rs
//
// The compositor: a dedicated thread owning the output canvas.
//
// Per-clip frame ports feed a texture map (latest frame per clip);
// render(time) looks up the active placements by binary search, draws each
// one through its compiled effect chain, and accounts
// expected/rendered/dropped/stale. Live preview frames are keyed by track
// under the PREVIEW_CLIP_ID sentinel. Capture paths read the composed
// canvas back for export.
//
// Frames are explicit resources: replacing a texture drops the previous
// backing, reconnecting a port closes the prior one, and the
// capture-with-frames path consumes the frames it is given.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

use jamcut_core::effects::EffectSourceKind;
use jamcut_core::engine_types::{EngineFrame, RenderStats};
use jamcut_core::pixel;
use jamcut_core::project::EffectValue;
use jamcut_core::timeline::{CompiledTimeline, Placement, PREVIEW_CLIP_ID};

use jamcut_media::source::FrameSource;

use crate::effect_chain::{CompiledChain, ControlTable};

/// A frame captured off the canvas, export-ready.
pub struct CapturedImage {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>, // RGBA
    /// `time × 10⁶`, the capture contract's microsecond timestamp.
    pub timestamp_us: i64,
}

enum Cmd {
    SetTimeline(CompiledTimeline),
    SetCanvas { width: u32, height: u32 },
    SetEffectValue { ref_key: String, value: EffectValue },
    ConnectPort { clip_id: Uuid, rx: Receiver<EngineFrame> },
    DisconnectPort { clip_id: Uuid },
    SetPreviewFrame { track_id: Uuid, frame: Option<EngineFrame> },
    Render { time: f64, reply: Sender<RenderStats> },
    Capture { time: f64, reply: Sender<Result<CapturedImage>> },
    CaptureWithFrames {
        time: f64,
        frames: Vec<(Uuid, EngineFrame)>,
        reply: Sender<Result<CapturedImage>>,
    },
    Shutdown,
}

/// Control handle; the canvas lives on the compositor thread behind it.
pub struct Compositor {
    tx: Sender<Cmd>,
    join: Option<std::thread::JoinHandle<()>>,
    /// One reader task per previewed track, stoppable individually.
    preview_stops: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl Compositor {
    pub fn spawn(width: u32, height: u32) -> Self {
        let (tx, rx) = unbounded();
        let join = std::thread::spawn(move || run(rx, width, height));
        Self {
            tx,
            join: Some(join),
            preview_stops: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_timeline(&self, timeline: CompiledTimeline) {
        let _ = self.tx.send(Cmd::SetTimeline(timeline));
    }

    pub fn set_canvas(&self, width: u32, height: u32) {
        let _ = self.tx.send(Cmd::SetCanvas { width, height });
    }

    /// Store a live parameter value for the next render. The key addresses
    /// `(sourceType, sourceId, effectIndex, paramKey)` in the contractual
    /// string form.
    pub fn set_effect_value(
        &self,
        source:       EffectSourceKind,
        source_id:    Uuid,
        effect_index: usize,
        param_key:    &str,
        value:        EffectValue,
    ) {
        let ref_key = format!("{}:{}:{}:{}", source.as_str(), source_id, effect_index, param_key);
        let _ = self.tx.send(Cmd::SetEffectValue { ref_key, value });
    }

    /// Wire a video worker's outbound port. Reconnecting for the same clip
    /// replaces — and thereby closes — the prior port; this is the loop
    /// handoff mechanism.
    pub fn connect_port(&self, clip_id: Uuid, rx: Receiver<EngineFrame>) {
        let _ = self.tx.send(Cmd::ConnectPort { clip_id, rx });
    }

    pub fn disconnect_port(&self, clip_id: Uuid) {
        let _ = self.tx.send(Cmd::DisconnectPort { clip_id });
    }

    /// Start (or stop, with `None`) a continuously-reading preview task
    /// for `track_id`. The task extracts the latest frame from the stream;
    /// starting a new one stops and replaces the previous.
    pub fn set_preview_stream(&self, track_id: Uuid, stream: Option<Box<dyn FrameSource>>) {
        let mut stops = self.preview_stops.lock();
        if let Some(prev) = stops.remove(&track_id) {
            prev.store(true, Ordering::Relaxed);
        }
        match stream {
            Some(mut source) => {
                let stop = Arc::new(AtomicBool::new(false));
                stops.insert(track_id, Arc::clone(&stop));
                let tx = self.tx.clone();
                std::thread::spawn(move || {
                    let started = std::time::Instant::now();
                    while !stop.load(Ordering::Relaxed) {
                        let Some(frame) = source.next_frame() else { break };
                        let msg = Cmd::SetPreviewFrame {
                            track_id,
                            frame: Some(EngineFrame {
                                clip_id:   PREVIEW_CLIP_ID,
                                timestamp: started.elapsed().as_secs_f64(),
                                duration:  0.0,
                                width:  frame.width,
                                height: frame.height,
                                data:   frame.data,
                            }),
                        };
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    // Stream ended or reader replaced: the last extracted
                    // frame stays up until set_preview_stream(None) clears
                    // it or a newer reader overwrites it.
                });
            }
            None => {
                let _ = self.tx.send(Cmd::SetPreviewFrame { track_id, frame: None });
            }
        }
    }

    /// Dispatch a render; the stats resolve on the returned channel. The
    /// render loop does not block on this — it drains resolved stats on a
    /// later tick.
    pub fn render(&self, time: f64) -> Receiver<RenderStats> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(Cmd::Render { time, reply });
        rx
    }

    /// Export: render at `time` from the live texture map and read back.
    pub fn render_and_capture(&self, time: f64) -> Result<CapturedImage> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(Cmd::Capture { time, reply });
        rx.recv().context("compositor gone")?
    }

    /// Export with caller-supplied frames; the frames are consumed.
    pub fn render_frames_and_capture(
        &self,
        time: f64,
        frames: Vec<(Uuid, EngineFrame)>,
    ) -> Result<CapturedImage> {
        let (reply, rx) = bounded(1);
        let _ = self.tx.send(Cmd::CaptureWithFrames { time, frames, reply });
        rx.recv().context("compositor gone")?
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        for (_, stop) in self.preview_stops.lock().drain() {
            stop.store(true, Ordering::Relaxed);
        }
        let _ = self.tx.send(Cmd::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Write a captured image to disk as RGBA PNG.
pub fn write_png(path: &Path, image: &CapturedImage) -> Result<()> {
    use std::io::BufWriter;
    let file = std::fs::File::create(path)
        .with_context(|| format!("create {}", path.display()))?;
    let w = &mut BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, image.width, image.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().context("write png header")?;
    writer.write_image_data(&image.data).context("write png data")?;
    eprintln!("[comp] PNG saved → {}", path.display());
    Ok(())
}

// ── Compositor thread ─────────────────────────────────────────────────────────

struct Texture {
    frame: EngineFrame,
}

struct Core {
    width:  u32,
    height: u32,
    canvas: Vec<u8>,
    timeline: CompiledTimeline,
    textures: HashMap<Uuid, Texture>,
    preview:  HashMap<Uuid, EngineFrame>,
    /// Compiled chains by signature.
    chains: HashMap<u64, CompiledChain>,
    /// Live parameter overrides by contractual ref key.
    overrides: HashMap<String, EffectValue>,
    /// Timestamp last drawn per clip — the stale detector.
    last_drawn: HashMap<Uuid, f64>,
}

fn run(rx: Receiver<Cmd>, width: u32, height: u32) {
    let mut ports: HashMap<Uuid, Receiver<EngineFrame>> = HashMap::new();
    let mut core = Core {
        width,
        height,
        canvas: vec![0u8; (width * height * 4) as usize],
        timeline: CompiledTimeline::default(),
        textures: HashMap::new(),
        preview:  HashMap::new(),
        chains:   HashMap::new(),
        overrides: HashMap::new(),
        last_drawn: HashMap::new(),
    };

    loop {
        let Ok(cmd) = rx.recv() else { return };
        match cmd {
            Cmd::SetTimeline(timeline) => {
                core.timeline = timeline;
            }
            Cmd::SetCanvas { width, height } => {
                core.width = width;
                core.height = height;
                core.canvas = vec![0u8; (width * height * 4) as usize];
            }
            Cmd::SetEffectValue { ref_key, value } => {
                core.overrides.insert(ref_key, value.normalized());
            }
            Cmd::ConnectPort { clip_id, rx: port } => {
                // Replacing drops the previous receiver: the old port
                // closes and its worker's sends start failing cleanly.
                ports.insert(clip_id, port);
            }
            Cmd::DisconnectPort { clip_id } => {
                ports.remove(&clip_id);
            }
            Cmd::SetPreviewFrame { track_id, frame } => match frame {
                // Replacing the entry closes (drops) the previous frame.
                Some(frame) => {
                    core.preview.insert(track_id, frame);
                }
                None => {
                    core.preview.remove(&track_id);
                }
            },
            Cmd::Render { time, reply } => {
                drain_ports(&mut ports, &mut core.textures);
                let stats = core.render(time, None);
                let _ = reply.send(stats);
            }
            Cmd::Capture { time, reply } => {
                drain_ports(&mut ports, &mut core.textures);
                core.render(time, None);
                let _ = reply.send(Ok(core.capture(time)));
            }
            Cmd::CaptureWithFrames { time, frames, reply } => {
                let supplied: HashMap<Uuid, EngineFrame> = frames.into_iter().collect();
                core.render(time, Some(&supplied));
                let _ = reply.send(Ok(core.capture(time)));
                // `supplied` drops here — the contract is that provided
                // frames are closed after use.
            }
            Cmd::Shutdown => {
                // Close every frame, cancel every port.
                ports.clear();
                core.textures.clear();
                core.preview.clear();
                return;
            }
        }
    }
}

/// Pull every pending frame off every port, keeping the newest per clip.
fn drain_ports(
    ports:    &mut HashMap<Uuid, Receiver<EngineFrame>>,
    textures: &mut HashMap<Uuid, Texture>,
) {
    let mut closed = Vec::new();
    for (clip_id, port) in ports.iter() {
        loop {
            match port.try_recv() {
                Ok(frame) => {
                    // Insert drops any previous backing for this clip.
                    textures.insert(*clip_id, Texture { frame });
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    closed.push(*clip_id);
                    break;
                }
            }
        }
    }
    for clip_id in closed {
        ports.remove(&clip_id);
    }
}

impl Core {
    /// Compose the active placements at `time` onto the canvas.
    fn render(&mut self, time: f64, supplied: Option<&HashMap<Uuid, EngineFrame>>) -> RenderStats {
        pixel::clear(&mut self.canvas);
        let mut stats = RenderStats::default();

        let Some(segment) = self.timeline.segment_at(time) else {
            return stats;
        };
        let seg_start = segment.start;
        let placements: Vec<Placement> = segment.placements.clone();

        for placement in &placements {
            stats.expected += 1;

            let frame = if placement.clip_id == PREVIEW_CLIP_ID {
                self.preview.get(&placement.track_id)
            } else if let Some(supplied) = supplied {
                supplied.get(&placement.clip_id)
            } else {
                self.textures.get(&placement.clip_id).map(|t| &t.frame)
            };
            let Some(frame) = frame else {
                stats.dropped += 1;
                continue;
            };

            // Stale: a newer frame should exist (the display window of the
            // last one has passed) yet the same timestamp renders again.
            let media_t = placement.in_point + (time - seg_start) * placement.speed;
            if placement.clip_id != PREVIEW_CLIP_ID {
                if let Some(&prev) = self.last_drawn.get(&placement.clip_id) {
                    if prev == frame.timestamp && frame.duration > 0.0 && media_t >= frame.end()
                    {
                        stats.stale += 1;
                    }
                }
                self.last_drawn.insert(placement.clip_id, frame.timestamp);
            }

            let chain = self
                .chains
                .entry(placement.effects.effect_id)
                .or_insert_with(|| {
                    CompiledChain::compile(
                        placement.effects.effect_id,
                        &placement.effects.effect_kinds,
                    )
                });

            let (data, opacity): (std::borrow::Cow<[u8]>, f32) = if chain.is_empty() {
                (std::borrow::Cow::Borrowed(&frame.data), 1.0)
            } else {
                let controls = ControlTable::resolve(
                    &placement.effects.effect_param_refs,
                    &self.overrides,
                    chain.len(),
                );
                // Chains mutate pixels; work on a copy so the texture
                // stays pristine for the next render.
                let mut owned = frame.data.clone();
                let opacity = chain.apply(&mut owned, &controls);
                (std::borrow::Cow::Owned(owned), opacity)
            };

            pixel::blit_nearest(
                &mut self.canvas, self.width, self.height,
                &data, frame.width, frame.height,
                placement.viewport, opacity,
            );
            stats.rendered += 1;
        }

        stats
    }

    fn capture(&self, time: f64) -> CapturedImage {
        CapturedImage {
            width:  self.width,
            height: self.height,
            data:   self.canvas.clone(),
            timestamp_us: (time * 1_000_000.0) as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamcut_core::project::{CanvasSize, Clip, Project, Track};
    use jamcut_core::timeline::compile;

    fn solid_frame(clip_id: Uuid, rgb: [u8; 3], ts: f64, dur: f64) -> EngineFrame {
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        EngineFrame {
            clip_id,
            timestamp: ts,
            duration: dur,
            width: 2,
            height: 2,
            data,
        }
    }

    fn one_clip_setup() -> (Compositor, Uuid, Uuid) {
        let clip_id = Uuid::new_v4();
        let mut track = Track::new("T");
        let track_id = track.id;
        track.clips.push(Clip::media(clip_id, 0.0, 2000.0));
        let project = Project {
            canvas: CanvasSize { width: 8, height: 8 },
            media_tracks: vec![track],
            ..Project::default()
        };
        let comp = Compositor::spawn(8, 8);
        comp.set_timeline(compile(&project, &[]));
        (comp, clip_id, track_id)
    }

    #[test]
    fn placement_without_frame_counts_dropped() {
        let (comp, _, _) = one_clip_setup();
        let stats = comp.render(0.5).recv().unwrap();
        assert_eq!(stats, RenderStats { expected: 1, rendered: 0, dropped: 1, stale: 0 });
    }

    #[test]
    fn arrived_frame_renders_and_lands_on_canvas() {
        let (comp, clip_id, _) = one_clip_setup();
        let (tx, rx) = bounded(4);
        comp.connect_port(clip_id, rx);
        tx.send(solid_frame(clip_id, [200, 0, 0], 0.5, 1.0)).unwrap();

        let stats = comp.render(0.5).recv().unwrap();
        assert_eq!(stats.rendered, 1);
        assert_eq!(stats.dropped, 0);

        let image = comp.render_and_capture(0.5).unwrap();
        assert_eq!(image.timestamp_us, 500_000);
        assert_eq!(image.data[0], 200); // full-canvas viewport, red frame
    }

    #[test]
    fn stale_frames_are_detected_only_past_their_window() {
        let (comp, clip_id, _) = one_clip_setup();
        let (tx, rx) = bounded(4);
        comp.connect_port(clip_id, rx);
        // Frame covers [0.0, 0.1).
        tx.send(solid_frame(clip_id, [1, 2, 3], 0.0, 0.1)).unwrap();

        // Within the window: rendered, not stale.
        let s1 = comp.render(0.05).recv().unwrap();
        assert_eq!((s1.rendered, s1.stale), (1, 0));
        // Re-rendered past the window with no replacement: stale.
        let s2 = comp.render(0.5).recv().unwrap();
        assert_eq!((s2.rendered, s2.stale), (1, 1));
    }

    #[test]
    fn reconnecting_a_port_closes_the_old_sender() {
        let (comp, clip_id, _) = one_clip_setup();
        let (old_tx, old_rx) = bounded::<EngineFrame>(4);
        comp.connect_port(clip_id, old_rx);
        let (_new_tx, new_rx) = bounded::<EngineFrame>(4);
        comp.connect_port(clip_id, new_rx);

        // Old receiver was dropped by the replace; sends now fail.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            comp.render(0.5).recv().unwrap();
            if old_tx.send(solid_frame(clip_id, [9, 9, 9], 0.0, 0.1)).is_err() {
                break; // closed, as required
            }
            assert!(std::time::Instant::now() < deadline, "old port never closed");
        }
    }

    #[test]
    fn preview_placements_use_the_preview_frame() {
        let clip_id = Uuid::new_v4();
        let mut track = Track::new("T");
        let track_id = track.id;
        track.clips.push(Clip::media(clip_id, 0.0, 1000.0));
        let project = Project {
            canvas: CanvasSize { width: 4, height: 4 },
            media_tracks: vec![track],
            ..Project::default()
        };
        let comp = Compositor::spawn(4, 4);
        comp.set_timeline(compile(&project, &[track_id]));

        // No preview frame yet: the preview placement drops.
        let stats = comp.render(0.5).recv().unwrap();
        assert_eq!((stats.expected, stats.dropped), (1, 1));

        let source = jamcut_media::TestPatternSource::new(4, 4, 30)
            .unpaced()
            .with_frame_limit(3);
        comp.set_preview_stream(track_id, Some(Box::new(source)));
        // Give the reader task a moment to push frames.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let stats = comp.render(0.5).recv().unwrap();
            if stats.rendered == 1 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "preview never rendered");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn capture_with_supplied_frames_consumes_them() {
        let (comp, clip_id, _) = one_clip_setup();
        let frames = vec![(clip_id, solid_frame(clip_id, [0, 50, 0], 0.5, 1.0))];
        let image = comp
            .render_frames_and_capture(0.5, frames)
            .unwrap();
        assert_eq!(image.data[1], 50);
        // The live texture map was not involved: a normal render still drops.
        let stats = comp.render(0.5).recv().unwrap();
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn png_round_trips_through_disk() {
        let (comp, clip_id, _) = one_clip_setup();
        let frames = vec![(clip_id, solid_frame(clip_id, [10, 20, 30], 0.0, 1.0))];
        let image = comp.render_frames_and_capture(0.0, frames).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        write_png(&path, &image).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
