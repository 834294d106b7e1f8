/* Tile-scan frame differ: compares two RGB565 frame buffers and returns
 * either nothing (no change), a single full-frame rect (too much changed
 * to bother with a tighter bound), or one bounding rect covering every
 * changed tile. Returning one rect instead of per-tile rects keeps the
 * wire-header overhead down for the common case of a small cluster of
 * changed pixels (e.g. a clock tick). */
use crate::error::{EngineError, Result};
use crate::models::DirtyRect;

pub const DEFAULT_TILE: u32 = 32;
pub const DEFAULT_MAX_RATIO: f64 = 0.35;

/// Diff `previous` against `current`, both `width * height * 2` bytes of
/// RGB565 little-endian pixels.
pub fn diff_frames(
    previous: &[u8],
    current: &[u8],
    width: u32,
    height: u32,
    tile: u32,
    max_ratio: f64,
) -> Result<Vec<DirtyRect>> {
    if previous.len() != current.len() {
        return Err(EngineError::InvalidArgument(format!(
            "frame sizes must match: {} != {}",
            previous.len(),
            current.len()
        )));
    }

    let stride = (width * 2) as usize;
    let mut changed_tiles: Vec<(u32, u32)> = Vec::new();

    let mut y = 0;
    while y < height {
        let h = tile.min(height - y);
        let mut x = 0;
        while x < width {
            let w = tile.min(width - x);
            let mut changed = false;
            for row in 0..h {
                let start = (y + row) as usize * stride + x as usize * 2;
                let end = start + w as usize * 2;
                if previous[start..end] != current[start..end] {
                    changed = true;
                    break;
                }
            }
            if changed {
                changed_tiles.push((x, y));
            }
            x += tile;
        }
        y += tile;
    }

    if changed_tiles.is_empty() {
        return Ok(Vec::new());
    }

    let changed_pixels = changed_tiles.len() as f64 * (tile * tile) as f64;
    if changed_pixels / (width * height) as f64 > max_ratio {
        return Ok(vec![DirtyRect::new(0, 0, width, height)]);
    }

    let min_x = changed_tiles.iter().map(|t| t.0).min().unwrap();
    let min_y = changed_tiles.iter().map(|t| t.1).min().unwrap();
    let max_x = changed_tiles.iter().map(|t| t.0).max().unwrap();
    let max_y = changed_tiles.iter().map(|t| t.1).max().unwrap();
    let rect_w = (width - min_x).min((max_x - min_x) + tile);
    let rect_h = (height - min_y).min((max_y - min_y) + tile);

    Ok(vec![DirtyRect::new(min_x, min_y, rect_w, rect_h)])
}
