// crates/jamcut-core/src/timeline.rs
//
// Timeline compiler: project → flat segment/placement structure.
//
// The compositor queries the output once per rendered frame, so all the
// expensive work happens here: layout windows are resolved, clips are split
// at layout boundaries, effect cascades are flattened, and the timeline is
// cut into half-open segments within which the active placement set is
// constant. Lookup at render time is a binary search.
//
// All times in the compiled structure are seconds. Project clip times
// (milliseconds or musical ticks) are normalized via Project::to_secs.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use crate::effects::{visual_cascade, EffectCascade};
use crate::helpers::geometry::{grid_cell, pip_inset, split_slot, Viewport};
use crate::project::{ClipSource, LayoutMode, Project, Track};

/// Sentinel clip id marking a live preview placement. The compositor
/// resolves these against its per-track preview frames instead of the
/// texture map.
pub const PREVIEW_CLIP_ID: Uuid = Uuid::nil();

/// Stand-in duration for preview clips. They are "effectively infinite":
/// long enough to outlast any session, excluded from the timeline duration.
const PREVIEW_SPAN_SECS: f64 = 86_400.0;

/// Where and how to draw one clip during one segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub clip_id:  Uuid,
    /// Audio routing destination and preview-frame lookup key.
    pub track_id: Uuid,
    pub viewport: Viewport,
    /// Source-local window in seconds. `out - in` always equals the
    /// segment length times `speed`.
    pub in_point:  f64,
    pub out_point: f64,
    pub speed:     f64,
    #[serde(flatten)]
    pub effects: EffectCascade,
}

/// Half-open interval `[start, end)` with a constant placement set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutSegment {
    pub start: f64,
    pub end:   f64,
    pub placements: Vec<Placement>,
}

/// The compiler's output. Segments are sorted, non-overlapping, and any
/// `t ∈ [0, duration)` is contained by at most one of them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledTimeline {
    pub duration: f64,
    pub segments: Vec<LayoutSegment>,
}

impl CompiledTimeline {
    /// Binary-search the segment containing `t`, if any.
    pub fn segment_at(&self, t: f64) -> Option<&LayoutSegment> {
        let idx = self.segments.partition_point(|s| s.start <= t);
        if idx == 0 {
            return None;
        }
        let seg = &self.segments[idx - 1];
        (t < seg.end).then_some(seg)
    }

    /// The active placements at `t` (empty slice in gaps).
    pub fn placements_at(&self, t: f64) -> &[Placement] {
        self.segment_at(t).map(|s| s.placements.as_slice()).unwrap_or(&[])
    }
}

/// Content hash of the compiler's inputs, for memoized recompilation.
/// Same project snapshot + same preview set → same fingerprint.
pub fn compile_fingerprint(project: &Project, preview_tracks: &[Uuid]) -> u64 {
    let mut hasher = DefaultHasher::new();
    // The project model is plain serializable data; its JSON form is a
    // faithful content identity for memoization purposes.
    serde_json::to_string(project)
        .unwrap_or_default()
        .hash(&mut hasher);
    for id in preview_tracks {
        id.hash(&mut hasher);
    }
    hasher.finish()
}

// ── Clip-info collection ──────────────────────────────────────────────────────

/// One clip's contribution, already split at layout boundaries so its
/// viewport is constant for its whole window.
#[derive(Clone, Debug)]
struct ClipInfo {
    clip_id:   Uuid,
    track_id:  Uuid,
    viewport:  Viewport,
    start:     f64,
    end:       f64,
    source_in: f64,
    speed:     f64,
    cascade:   EffectCascade,
    preview:   bool,
}

/// A layout clip's active window with its per-track viewport assignments.
struct LayoutWindow {
    start: f64,
    end:   f64,
    assignments: Vec<(Uuid, Viewport)>,
}

fn layout_assignments(
    canvas:  Viewport,
    mode:    LayoutMode,
    columns: u32,
    rows:    u32,
    slots:   &[Uuid],
) -> Vec<(Uuid, Viewport)> {
    match mode {
        LayoutMode::Grid => {
            let columns = columns.max(1);
            let rows = rows.max(1);
            slots
                .iter()
                .take((columns * rows) as usize)
                .enumerate()
                .map(|(i, &tid)| {
                    let col = i as u32 % columns;
                    let row = i as u32 / columns;
                    (tid, grid_cell(canvas, columns, rows, col, row, 0.0, 0.0))
                })
                .collect()
        }
        LayoutMode::Focus | LayoutMode::Unknown => {
            slots.iter().map(|&tid| (tid, canvas)).collect()
        }
        LayoutMode::Pip => slots
            .iter()
            .take(2)
            .enumerate()
            .map(|(i, &tid)| {
                let vp = if i == 0 { canvas } else { pip_inset(canvas) };
                (tid, vp)
            })
            .collect(),
        LayoutMode::Split => {
            let count = slots.len() as u32;
            slots
                .iter()
                .enumerate()
                .map(|(i, &tid)| (tid, split_slot(canvas, i as u32, count)))
                .collect()
        }
    }
}

/// Collect layout windows from the metadata tracks, in declaration order.
/// Later windows take precedence where they overlap.
fn collect_layout_windows(project: &Project, canvas: Viewport) -> Vec<LayoutWindow> {
    let mut windows = Vec::new();
    for track in &project.metadata_tracks {
        for clip in &track.clips {
            let ClipSource::Layout { mode, columns, rows, slots } = &clip.source else {
                continue; // media clips on metadata tracks are ignored
            };
            let Some(duration) = clip.resolved_duration() else { continue };
            let start = project.to_secs(clip.start);
            let end = start + project.to_secs(duration);
            if end <= start {
                continue;
            }
            windows.push(LayoutWindow {
                start,
                end,
                assignments: layout_assignments(canvas, *mode, *columns, *rows, slots),
            });
        }
    }
    windows
}

/// The layout active at `t`: the last-declared window containing it.
fn active_window(windows: &[LayoutWindow], t: f64) -> Option<&LayoutWindow> {
    windows.iter().rev().find(|w| w.start <= t && t < w.end)
}

/// Split one media clip at layout boundaries and emit an info per span.
#[allow(clippy::too_many_arguments)]
fn push_clip_infos(
    infos:    &mut Vec<ClipInfo>,
    windows:  &[LayoutWindow],
    canvas:   Viewport,
    track_id: Uuid,
    clip_id:  Uuid,
    start:    f64,
    end:      f64,
    offset:   f64,
    speed:    f64,
    cascade:  EffectCascade,
    preview:  bool,
) {
    let mut cuts: Vec<f64> = vec![start, end];
    for w in windows {
        for t in [w.start, w.end] {
            if t > start && t < end {
                cuts.push(t);
            }
        }
    }
    cuts.sort_by(|a, b| a.total_cmp(b));
    cuts.dedup();

    for span in cuts.windows(2) {
        let (a, b) = (span[0], span[1]);
        if b <= a {
            continue;
        }
        let viewport = match active_window(windows, a) {
            Some(w) => match w.assignments.iter().find(|(tid, _)| *tid == track_id) {
                Some((_, vp)) => *vp,
                // The active layout does not list this track — hidden.
                None => continue,
            },
            None => canvas,
        };
        if viewport.is_empty() {
            continue;
        }
        infos.push(ClipInfo {
            clip_id,
            track_id,
            viewport,
            start: a,
            end: b,
            source_in: offset + (a - start) * speed,
            speed,
            cascade: cascade.clone(),
            preview,
        });
    }
}

fn collect_clip_infos(
    project:        &Project,
    preview_tracks: &[Uuid],
) -> Vec<ClipInfo> {
    let canvas = Viewport::full(project.canvas.width, project.canvas.height);
    let windows = collect_layout_windows(project, canvas);
    let mut infos = Vec::new();

    for track in &project.media_tracks {
        for clip in &track.clips {
            if clip.is_layout() {
                continue; // layout clips only act from metadata tracks
            }
            // No duration and no probed hint: the clip cannot resolve to a
            // drawable window yet — emit nothing for it.
            let Some(duration) = clip.resolved_duration() else { continue };
            let start = project.to_secs(clip.start);
            let end = start + project.to_secs(duration);
            if end <= start {
                continue;
            }
            push_clip_infos(
                &mut infos,
                &windows,
                canvas,
                track.id,
                clip.id,
                start,
                end,
                clip.offset,
                clip.speed,
                visual_cascade(project, track, clip),
                false,
            );
        }
    }

    // Preview clips go last so they punch through the track's media clips.
    for &track_id in preview_tracks {
        let cascade = project
            .track(track_id)
            .map(|t| preview_cascade(project, t))
            .unwrap_or_default();
        push_clip_infos(
            &mut infos,
            &windows,
            canvas,
            track_id,
            PREVIEW_CLIP_ID,
            0.0,
            PREVIEW_SPAN_SECS,
            0.0,
            1.0,
            cascade,
            true,
        );
    }

    infos
}

/// A preview placement inherits the track's cascade but has no clip of its
/// own to contribute effects.
fn preview_cascade(project: &Project, track: &Track) -> EffectCascade {
    let synthetic = crate::project::Clip::media(PREVIEW_CLIP_ID, 0.0, 0.0);
    visual_cascade(project, track, &synthetic)
}

// ── Segment construction ──────────────────────────────────────────────────────

/// Compile `project` (plus injected preview tracks) into a flat timeline.
pub fn compile(project: &Project, preview_tracks: &[Uuid]) -> CompiledTimeline {
    let infos = collect_clip_infos(project, preview_tracks);
    if infos.is_empty() {
        return CompiledTimeline::default();
    }

    // Preview spans are excluded from the content duration: the transport
    // clock and the loop length derive from real media.
    let duration = infos
        .iter()
        .filter(|i| !i.preview)
        .map(|i| i.end)
        .fold(0.0f64, f64::max);

    let mut bounds: Vec<f64> = vec![0.0];
    bounds.extend(infos.iter().flat_map(|i| [i.start, i.end]));
    bounds.sort_by(|a, b| a.total_cmp(b));
    bounds.dedup();

    let segments: Vec<LayoutSegment> = bounds
        .par_windows(2)
        .filter_map(|pair| build_segment(&infos, pair[0], pair[1]))
        .collect();

    CompiledTimeline { duration, segments }
}

fn build_segment(infos: &[ClipInfo], start: f64, end: f64) -> Option<LayoutSegment> {
    if end <= start {
        return None;
    }

    // Per track, the topmost clip wins: infos are in collection order, so
    // a later overlapping info replaces an earlier one (punch-through).
    let mut top: Vec<(Uuid, &ClipInfo)> = Vec::new();
    for info in infos {
        if info.start < end && info.end > start {
            match top.iter_mut().find(|(tid, _)| *tid == info.track_id) {
                Some(slot) => slot.1 = info,
                None => top.push((info.track_id, info)),
            }
        }
    }
    if top.is_empty() {
        return None;
    }

    let placements = top
        .into_iter()
        .map(|(_, info)| {
            let in_point = info.source_in + (start - info.start) * info.speed;
            Placement {
                clip_id:   info.clip_id,
                track_id:  info.track_id,
                viewport:  info.viewport,
                in_point,
                out_point: in_point + (end - start) * info.speed,
                speed:     info.speed,
                effects:   info.cascade.clone(),
            }
        })
        .collect();

    Some(LayoutSegment { start, end, placements })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{CanvasSize, Clip, LayoutMode};

    fn project_with_track(clips: Vec<Clip>) -> (Project, Uuid) {
        let mut track = Track::new("T");
        let track_id = track.id;
        track.clips = clips;
        let project = Project {
            canvas: CanvasSize { width: 640, height: 360 },
            media_tracks: vec![track],
            ..Project::default()
        };
        (project, track_id)
    }

    #[test]
    fn overlapping_clips_punch_through() {
        // A = [0, 1000) ms, B = [500, 1500) ms on the same track.
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (project, _) = project_with_track(vec![
            Clip::media(a, 0.0, 1000.0),
            Clip::media(b, 500.0, 1000.0),
        ]);
        let tl = compile(&project, &[]);

        assert!((tl.duration - 1.5).abs() < 1e-9);
        assert_eq!(tl.segments.len(), 2);

        let s0 = &tl.segments[0];
        assert!((s0.start, s0.end) == (0.0, 0.5));
        assert_eq!(s0.placements.len(), 1);
        assert_eq!(s0.placements[0].clip_id, a);

        let s1 = &tl.segments[1];
        assert!((s1.start, s1.end) == (0.5, 1.5));
        assert_eq!(s1.placements.len(), 1);
        assert_eq!(s1.placements[0].clip_id, b);
    }

    #[test]
    fn grid_layout_assigns_cells_row_major() {
        let tracks: Vec<Track> = (0..4).map(|i| Track::new(&format!("T{i}"))).collect();
        let slot_ids: Vec<Uuid> = tracks.iter().map(|t| t.id).collect();
        let mut media_tracks = tracks;
        for track in &mut media_tracks {
            track.clips.push(Clip::media(Uuid::new_v4(), 0.0, 1000.0));
        }

        let mut meta = Track::new("layouts");
        meta.clips.push(Clip::layout(
            Uuid::new_v4(), 0.0, 1000.0,
            LayoutMode::Grid, 2, 2, slot_ids.clone(),
        ));

        let project = Project {
            canvas: CanvasSize { width: 640, height: 360 },
            media_tracks,
            metadata_tracks: vec![meta],
            ..Project::default()
        };
        let tl = compile(&project, &[]);
        let placements = tl.placements_at(0.5);
        assert_eq!(placements.len(), 4);

        let vp_of = |tid: Uuid| {
            placements.iter().find(|p| p.track_id == tid).unwrap().viewport
        };
        assert_eq!(vp_of(slot_ids[0]), Viewport::new(0, 0, 320, 180));
        assert_eq!(vp_of(slot_ids[1]), Viewport::new(320, 0, 320, 180));
        assert_eq!(vp_of(slot_ids[2]), Viewport::new(0, 180, 320, 180));
        assert_eq!(vp_of(slot_ids[3]), Viewport::new(320, 180, 320, 180));
    }

    #[test]
    fn musical_projects_convert_ticks() {
        // 120 BPM stored as 12000, 960 PPQ: 3840 ticks = 2.0 s.
        let id = Uuid::new_v4();
        let (mut project, _) = project_with_track(vec![Clip::media(id, 3840.0, 3840.0)]);
        project.bpm = Some(12_000);
        project.ppq = Some(960);

        let tl = compile(&project, &[]);
        assert!((tl.duration - 4.0).abs() < 1e-9);
        let seg = tl.segment_at(3.0).unwrap();
        assert!((seg.start - 2.0).abs() < 1e-9);
        assert!((seg.end - 4.0).abs() < 1e-9);
    }

    #[test]
    fn segments_are_sorted_disjoint_and_place_every_instant() {
        let (project, _) = project_with_track(vec![
            Clip::media(Uuid::new_v4(), 0.0, 700.0),
            Clip::media(Uuid::new_v4(), 300.0, 1000.0),
            Clip::media(Uuid::new_v4(), 2000.0, 500.0),
        ]);
        let tl = compile(&project, &[]);

        for pair in tl.segments.windows(2) {
            assert!(pair[0].end <= pair[1].start + 1e-12);
            assert!(pair[0].start < pair[0].end);
        }
        // At most one containing segment for a sweep of instants.
        let mut t = 0.0;
        while t < tl.duration {
            let hits = tl
                .segments
                .iter()
                .filter(|s| s.start <= t && t < s.end)
                .count();
            assert!(hits <= 1, "t = {t}");
            t += 0.05;
        }
    }

    #[test]
    fn placement_window_matches_segment_length_times_speed() {
        let mut clip = Clip::media(Uuid::new_v4(), 0.0, 2000.0);
        clip.speed = 2.0;
        clip.offset = 1.0;
        let (project, _) = project_with_track(vec![
            clip,
            Clip::media(Uuid::new_v4(), 500.0, 500.0),
        ]);
        let tl = compile(&project, &[]);

        for seg in &tl.segments {
            for p in &seg.placements {
                let expect = (seg.end - seg.start) * p.speed;
                assert!(
                    ((p.out_point - p.in_point) - expect).abs() < 1e-6,
                    "segment [{}, {})", seg.start, seg.end
                );
            }
        }
        // Past the punch-through window only the speed-2 clip remains, its
        // in-point advanced by elapsed-time × speed from its offset.
        let p = tl.placements_at(1.5).iter()
            .find(|p| p.speed == 2.0)
            .cloned()
            .unwrap();
        assert!((p.in_point - (1.0 + 1.0 * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn pip_and_split_viewports() {
        let t0 = Track::new("main");
        let t1 = Track::new("inset");
        let ids = [t0.id, t1.id];
        let mut media_tracks = vec![t0, t1];
        for track in &mut media_tracks {
            track.clips.push(Clip::media(Uuid::new_v4(), 0.0, 1000.0));
        }
        let mut meta = Track::new("layouts");
        meta.clips.push(Clip::layout(
            Uuid::new_v4(), 0.0, 500.0,
            LayoutMode::Pip, 0, 0, ids.to_vec(),
        ));
        meta.clips.push(Clip::layout(
            Uuid::new_v4(), 500.0, 500.0,
            LayoutMode::Split, 0, 0, ids.to_vec(),
        ));
        let project = Project {
            canvas: CanvasSize { width: 640, height: 360 },
            media_tracks,
            metadata_tracks: vec![meta],
            ..Project::default()
        };
        let tl = compile(&project, &[]);

        let pip = tl.placements_at(0.25);
        assert_eq!(pip.iter().find(|p| p.track_id == ids[0]).unwrap().viewport,
                   Viewport::full(640, 360));
        assert_eq!(pip.iter().find(|p| p.track_id == ids[1]).unwrap().viewport,
                   Viewport::new(464, 254, 160, 90));

        let split = tl.placements_at(0.75);
        assert_eq!(split.iter().find(|p| p.track_id == ids[0]).unwrap().viewport,
                   Viewport::new(0, 0, 320, 360));
        assert_eq!(split.iter().find(|p| p.track_id == ids[1]).unwrap().viewport,
                   Viewport::new(320, 0, 320, 360));
    }

    #[test]
    fn track_not_listed_in_active_layout_is_hidden() {
        let t0 = Track::new("shown");
        let t1 = Track::new("hidden");
        let shown = t0.id;
        let mut media_tracks = vec![t0, t1];
        for track in &mut media_tracks {
            track.clips.push(Clip::media(Uuid::new_v4(), 0.0, 1000.0));
        }
        let mut meta = Track::new("layouts");
        meta.clips.push(Clip::layout(
            Uuid::new_v4(), 0.0, 1000.0,
            LayoutMode::Focus, 0, 0, vec![shown],
        ));
        let project = Project {
            canvas: CanvasSize { width: 640, height: 360 },
            media_tracks,
            metadata_tracks: vec![meta],
            ..Project::default()
        };
        let tl = compile(&project, &[]);
        let placements = tl.placements_at(0.5);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].track_id, shown);
    }

    #[test]
    fn clip_without_duration_emits_nothing() {
        let mut clip = Clip::media(Uuid::new_v4(), 0.0, 1000.0);
        clip.duration = None;
        let (project, _) = project_with_track(vec![clip.clone()]);
        let tl = compile(&project, &[]);
        assert!(tl.segments.is_empty());

        // Once probed, the hint resolves it.
        clip.duration_hint = Some(800.0);
        let (project, _) = project_with_track(vec![clip]);
        let tl = compile(&project, &[]);
        assert!((tl.duration - 0.8).abs() < 1e-9);
    }

    #[test]
    fn preview_track_punches_through_and_extends_past_media() {
        let clip_id = Uuid::new_v4();
        let (project, track_id) = project_with_track(vec![
            Clip::media(clip_id, 0.0, 1000.0),
        ]);
        let tl = compile(&project, &[track_id]);

        // Duration still comes from real media.
        assert!((tl.duration - 1.0).abs() < 1e-9);

        // The preview hides the media clip and extends far beyond it.
        let at_media = tl.placements_at(0.5);
        assert_eq!(at_media.len(), 1);
        assert_eq!(at_media[0].clip_id, PREVIEW_CLIP_ID);
        let beyond = tl.placements_at(10.0);
        assert_eq!(beyond.len(), 1);
        assert_eq!(beyond[0].clip_id, PREVIEW_CLIP_ID);
    }

    #[test]
    fn segment_lookup_binary_search() {
        let (project, _) = project_with_track(vec![
            Clip::media(Uuid::new_v4(), 0.0, 500.0),
            Clip::media(Uuid::new_v4(), 1000.0, 500.0),
        ]);
        let tl = compile(&project, &[]);
        assert!(tl.segment_at(0.25).is_some());
        assert!(tl.segment_at(0.75).is_none()); // gap
        assert!(tl.segment_at(1.25).is_some());
        assert!(tl.segment_at(-0.1).is_none());
        assert!(tl.segment_at(99.0).is_none());
    }

    #[test]
    fn fingerprint_tracks_content_and_preview_set() {
        let (project, track_id) = project_with_track(vec![
            Clip::media(Uuid::new_v4(), 0.0, 1000.0),
        ]);
        let a = compile_fingerprint(&project, &[]);
        let b = compile_fingerprint(&project, &[]);
        assert_eq!(a, b);
        let c = compile_fingerprint(&project, &[track_id]);
        assert_ne!(a, c);

        let mut changed = project.clone();
        changed.media_tracks[0].clips[0].start = 250.0;
        assert_ne!(a, compile_fingerprint(&changed, &[]));
    }
}
