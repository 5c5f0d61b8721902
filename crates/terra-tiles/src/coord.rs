//! Grid coordinate addressing one tile of a partitioned texture.

use std::fmt;

/// `(ring, segment)` address of one tile.
///
/// `ring` is the row (latitude band, or pixel-tile row), `segment` the column
/// (longitude band, or pixel-tile column). Used as the cache key, so equality and
/// hashing are derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoordinate {
    /// Row index, `0..rings`.
    pub ring: u32,
    /// Column index, `0..segments`.
    pub segment: u32,
}

impl GridCoordinate {
    /// Create a coordinate from a ring (row) and segment (column).
    pub const fn new(ring: u32, segment: u32) -> Self {
        Self { ring, segment }
    }

    /// Row-major linear index for a grid with `segments` columns.
    pub fn index(self, segments: u32) -> usize {
        self.ring as usize * segments as usize + self.segment as usize
    }
}

impl fmt::Display for GridCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ring, self.segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_row_major_index() {
        assert_eq!(GridCoordinate::new(0, 0).index(8), 0);
        assert_eq!(GridCoordinate::new(0, 7).index(8), 7);
        assert_eq!(GridCoordinate::new(2, 3).index(8), 19);
    }

    #[test]
    fn test_hash_distinguishes_transposed_coordinates() {
        let set: HashSet<_> = [GridCoordinate::new(1, 2), GridCoordinate::new(2, 1)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(GridCoordinate::new(3, 14).to_string(), "(3, 14)");
    }
}
