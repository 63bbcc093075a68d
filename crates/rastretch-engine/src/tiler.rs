//! Tiler: split an image into a row-major grid of processable tiles.
//!
//! Each axis is cut into `count` strides of `size / count` pixels. The
//! last stride on each axis absorbs the remainder, so edge tiles may be
//! larger than interior ones but the grid always covers the image exactly.

use crate::types::{ConfigError, Tile};

/// Partition a `xsize` × `ysize` image into tiles.
///
/// `vertical_count` is the number of vertical segments (cuts along the x
/// axis); `horizontal_count` is the number of horizontal segments (cuts
/// along the y axis). `1` on both axes yields a single tile covering the
/// whole image.
///
/// Tiles are returned in row-major order (all tiles of the first band of
/// rows, left to right, then the next). When a count exceeds the number of
/// pixels on its axis it is clamped to that number so no tile is empty.
///
/// # Errors
///
/// Returns [`ConfigError::EmptyImage`] if either dimension is zero and
/// [`ConfigError::ZeroSegments`] if either count is zero.
pub fn segment_image(
    xsize: usize,
    ysize: usize,
    vertical_count: usize,
    horizontal_count: usize,
) -> Result<Vec<Tile>, ConfigError> {
    if xsize == 0 || ysize == 0 {
        return Err(ConfigError::EmptyImage {
            width: xsize,
            height: ysize,
        });
    }
    if vertical_count == 0 {
        return Err(ConfigError::ZeroSegments { axis: "vertical" });
    }
    if horizontal_count == 0 {
        return Err(ConfigError::ZeroSegments { axis: "horizontal" });
    }

    let columns = axis_spans(xsize, vertical_count);
    let rows = axis_spans(ysize, horizontal_count);

    let mut tiles = Vec::with_capacity(columns.len() * rows.len());
    for &(y_start, height) in &rows {
        for &(x_start, width) in &columns {
            tiles.push(Tile::new(x_start, y_start, width, height));
        }
    }
    Ok(tiles)
}

/// `(start, length)` spans along one axis; the last span takes the remainder.
fn axis_spans(size: usize, count: usize) -> Vec<(usize, usize)> {
    let count = count.min(size);
    let step = size / count;
    (0..count)
        .map(|i| {
            let start = i * step;
            let len = if i + 1 == count { size - start } else { step };
            (start, len)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Every pixel covered by exactly one tile.
    fn assert_exact_cover(tiles: &[Tile], xsize: usize, ysize: usize) {
        let mut hits = vec![0u8; xsize * ysize];
        for tile in tiles {
            assert!(tile.width > 0 && tile.height > 0, "empty tile {tile}");
            for y in tile.y_start..tile.y_end() {
                for x in tile.x_start..tile.x_end() {
                    hits[y * xsize + x] += 1;
                }
            }
        }
        assert!(
            hits.iter().all(|&h| h == 1),
            "tiles do not exactly cover {xsize}x{ysize}"
        );
    }

    #[test]
    fn single_segment_covers_whole_image() {
        let tiles = segment_image(64, 48, 1, 1).unwrap();
        assert_eq!(tiles, vec![Tile::new(0, 0, 64, 48)]);
    }

    #[test]
    fn remainder_goes_to_last_column() {
        let tiles = segment_image(10, 10, 3, 1).unwrap();
        let widths: Vec<usize> = tiles.iter().map(|t| t.width).collect();
        assert_eq!(widths, vec![3, 3, 4]);
        assert_exact_cover(&tiles, 10, 10);
    }

    #[test]
    fn remainder_goes_to_last_row() {
        let tiles = segment_image(10, 11, 1, 2).unwrap();
        let heights: Vec<usize> = tiles.iter().map(|t| t.height).collect();
        assert_eq!(heights, vec![5, 6]);
    }

    #[test]
    fn order_is_row_major() {
        let tiles = segment_image(4, 4, 2, 2).unwrap();
        let origins: Vec<(usize, usize)> = tiles.iter().map(|t| (t.x_start, t.y_start)).collect();
        assert_eq!(origins, vec![(0, 0), (2, 0), (0, 2), (2, 2)]);
    }

    #[test]
    fn exact_cover_over_many_shapes() {
        for xsize in 1..=17 {
            for ysize in [1, 2, 7, 13] {
                for v in 1..=6 {
                    for h in 1..=4 {
                        let tiles = segment_image(xsize, ysize, v, h).unwrap();
                        assert_exact_cover(&tiles, xsize, ysize);

                        // Widths of each row of tiles sum to xsize, heights of
                        // each column of tiles sum to ysize.
                        let per_row = v.min(xsize);
                        for row in tiles.chunks(per_row) {
                            assert_eq!(row.iter().map(|t| t.width).sum::<usize>(), xsize);
                        }
                        let column_height: usize =
                            tiles.iter().step_by(per_row).map(|t| t.height).sum();
                        assert_eq!(column_height, ysize);
                    }
                }
            }
        }
    }

    #[test]
    fn count_larger_than_axis_is_clamped() {
        let tiles = segment_image(3, 2, 8, 5).unwrap();
        assert_eq!(tiles.len(), 6);
        assert_exact_cover(&tiles, 3, 2);
    }

    #[test]
    fn zero_counts_are_rejected() {
        assert_eq!(
            segment_image(10, 10, 0, 1),
            Err(ConfigError::ZeroSegments { axis: "vertical" })
        );
        assert_eq!(
            segment_image(10, 10, 1, 0),
            Err(ConfigError::ZeroSegments {
                axis: "horizontal"
            })
        );
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(matches!(
            segment_image(0, 10, 1, 1),
            Err(ConfigError::EmptyImage { .. })
        ));
    }
}
