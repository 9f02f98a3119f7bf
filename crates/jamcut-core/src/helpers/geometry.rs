// crates/jamcut-core/src/helpers/geometry.rs
//
// Viewport math for the timeline compiler's layout modes.
//
// All functions place integer pixel rectangles inside a parent viewport.
// Fractional gap/padding are expressed relative to the parent's smaller
// dimension so square cells keep square gutters at any aspect ratio.

use serde::{Deserialize, Serialize};

/// Integer pixel rectangle on the canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width:  u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The full canvas as a viewport.
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pip inset margin in pixels from the parent's bottom-right corner.
const PIP_MARGIN: i32 = 16;
/// Pip inset size as a fraction of the parent viewport.
const PIP_FRACTION: f64 = 0.25;

/// Place grid cell `(col, row)` inside `parent`.
///
/// `gap` and `padding` are fractions of the parent's smaller dimension;
/// `gap` separates cells, `padding` insets the whole grid from the parent's
/// edges. Cell edges are rounded to integers so adjacent cells share edges
/// exactly when gap is zero.
///
/// ```
/// use jamcut_core::helpers::geometry::{grid_cell, Viewport};
/// let parent = Viewport::full(640, 360);
/// assert_eq!(grid_cell(parent, 2, 2, 0, 0, 0.0, 0.0), Viewport::new(0, 0, 320, 180));
/// assert_eq!(grid_cell(parent, 2, 2, 1, 0, 0.0, 0.0), Viewport::new(320, 0, 320, 180));
/// assert_eq!(grid_cell(parent, 2, 2, 0, 1, 0.0, 0.0), Viewport::new(0, 180, 320, 180));
/// assert_eq!(grid_cell(parent, 2, 2, 1, 1, 0.0, 0.0), Viewport::new(320, 180, 320, 180));
/// ```
pub fn grid_cell(
    parent:  Viewport,
    columns: u32,
    rows:    u32,
    col:     u32,
    row:     u32,
    gap:     f64,
    padding: f64,
) -> Viewport {
    let columns = columns.max(1);
    let rows    = rows.max(1);
    let unit = parent.width.min(parent.height) as f64;
    let gap_px = gap.max(0.0) * unit;
    let pad_px = padding.max(0.0) * unit;

    let inner_w = parent.width as f64  - 2.0 * pad_px;
    let inner_h = parent.height as f64 - 2.0 * pad_px;
    let cell_w = (inner_w - gap_px * (columns - 1) as f64) / columns as f64;
    let cell_h = (inner_h - gap_px * (rows - 1) as f64) / rows as f64;
    if cell_w <= 0.0 || cell_h <= 0.0 {
        return Viewport::default();
    }

    let x0 = parent.x as f64 + pad_px + col as f64 * (cell_w + gap_px);
    let y0 = parent.y as f64 + pad_px + row as f64 * (cell_h + gap_px);
    // Round edges, not sizes — keeps adjacent cells seam-free.
    let x1 = (x0 + cell_w).round();
    let y1 = (y0 + cell_h).round();
    let x0 = x0.round();
    let y0 = y0.round();

    Viewport::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32)
}

/// Picture-in-picture inset: 25 % × 25 % of the parent, anchored to the
/// bottom-right corner with a 16 px margin.
///
/// ```
/// use jamcut_core::helpers::geometry::{pip_inset, Viewport};
/// let inset = pip_inset(Viewport::full(640, 360));
/// assert_eq!(inset, Viewport::new(464, 254, 160, 90));
/// ```
pub fn pip_inset(parent: Viewport) -> Viewport {
    let w = (parent.width as f64  * PIP_FRACTION).round() as u32;
    let h = (parent.height as f64 * PIP_FRACTION).round() as u32;
    let x = parent.x + parent.width as i32  - w as i32 - PIP_MARGIN;
    let y = parent.y + parent.height as i32 - h as i32 - PIP_MARGIN;
    Viewport::new(x, y, w, h)
}

/// Slot `index` of `count` in an even horizontal division of `parent`.
///
/// ```
/// use jamcut_core::helpers::geometry::{split_slot, Viewport};
/// let parent = Viewport::full(640, 360);
/// assert_eq!(split_slot(parent, 0, 2), Viewport::new(0, 0, 320, 360));
/// assert_eq!(split_slot(parent, 1, 2), Viewport::new(320, 0, 320, 360));
/// // Widths of an uneven division still tile the parent exactly.
/// let a = split_slot(parent, 0, 3);
/// let b = split_slot(parent, 1, 3);
/// let c = split_slot(parent, 2, 3);
/// assert_eq!(a.width + b.width + c.width, 640);
/// ```
pub fn split_slot(parent: Viewport, index: u32, count: u32) -> Viewport {
    let count = count.max(1);
    let w = parent.width as f64 / count as f64;
    let x0 = (parent.x as f64 + index as f64 * w).round();
    let x1 = (parent.x as f64 + (index + 1) as f64 * w).round();
    Viewport::new(x0 as i32, parent.y, (x1 - x0) as u32, parent.height)
}
