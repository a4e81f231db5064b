//! Generators for synthetic, verifiable simulation data.
//!
//! Every cell value encodes its global position, so a value read back from
//! the array store tells exactly which step, level and grid cell it came from.

/// Value stored for a cell at global `(step, level, y, x)`.
///
/// Exact in `f32` for `step < 16`, `level < 100`, `y, x < 100`.
pub fn cell_value(step: usize, level: usize, y: usize, x: usize) -> f32 {
    (step * 1_000_000 + level * 10_000 + y * 100 + x) as f32
}

/// Block of `frames x levels x ny x nx` values, row-major, whose origin is at
/// global `(first_step, 0, y0, x0)`.
///
/// # Example
///
/// ```
/// use test_utils::{cell_value, create_patch_block};
///
/// let block = create_patch_block(2, 1, 2, 3, 5, 4, 10);
/// assert_eq!(block.len(), 12);
/// assert_eq!(block[0], cell_value(5, 0, 4, 10));
/// assert_eq!(block[7], cell_value(6, 0, 4, 11));
/// ```
pub fn create_patch_block(
    frames: usize,
    levels: usize,
    ny: usize,
    nx: usize,
    first_step: usize,
    y0: usize,
    x0: usize,
) -> Vec<f32> {
    let mut data = Vec::with_capacity(frames * levels * ny * nx);
    for frame in 0..frames {
        for level in 0..levels {
            for y in 0..ny {
                for x in 0..nx {
                    data.push(cell_value(first_step + frame, level, y0 + y, x0 + x));
                }
            }
        }
    }
    data
}

/// `Times` character data: one `YYYY-MM-DD_HH:MM:SS` string per frame.
pub fn create_times_chars(times: &[String]) -> Vec<u8> {
    times.iter().flat_map(|t| t.bytes()).collect()
}
