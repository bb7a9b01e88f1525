//! Splitting a frame range into encoding chunks.

use serde::{Deserialize, Serialize};
use vart_models::FrameSpan;

use crate::error::{MediaError, MediaResult};

/// Default number of chunks a job is split into.
pub const DEFAULT_TARGET_CHUNKS: u64 = 8;
/// Default lower bound on frames per chunk.
pub const DEFAULT_MIN_CHUNK: u64 = 50;
/// Default upper bound on frames per chunk.
pub const DEFAULT_MAX_CHUNK: u64 = 300;

/// Half-open frame interval `[start, end)` encoded as one chunk file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Position of the chunk in the output
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes chunk boundaries.
///
/// `chunk_size = clamp(N / target, min, max)`. A trailing remainder shorter
/// than `min` is folded into the previous chunk, so the last chunk may hold
/// up to `max + min - 1` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    target_chunks: u64,
    min_size: u64,
    max_size: u64,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_CHUNKS, DEFAULT_MIN_CHUNK, DEFAULT_MAX_CHUNK)
    }
}

impl ChunkPlanner {
    /// Bounds are normalised so that `1 <= min <= max` and `target >= 1`.
    pub fn new(target_chunks: u64, min_size: u64, max_size: u64) -> Self {
        let min_size = min_size.max(1);
        Self {
            target_chunks: target_chunks.max(1),
            min_size,
            max_size: max_size.max(min_size),
        }
    }

    /// Frames per full chunk for a range of `total` frames.
    pub fn chunk_size(&self, total: u64) -> u64 {
        (total / self.target_chunks).clamp(self.min_size, self.max_size)
    }

    /// Ranges covering `[0, total)`.
    pub fn plan(&self, total: u64) -> MediaResult<Vec<ChunkRange>> {
        if total == 0 {
            return Err(MediaError::invalid_range("cannot plan chunks for 0 frames"));
        }

        if total <= self.min_size {
            return Ok(vec![ChunkRange {
                index: 0,
                start: 0,
                end: total,
            }]);
        }

        let size = self.chunk_size(total);
        let mut ranges: Vec<ChunkRange> = Vec::with_capacity((total / size + 1) as usize);
        let mut start = 0;
        while start < total {
            let end = (start + size).min(total);
            let remainder = end - start;
            match ranges.last_mut() {
                Some(last) if remainder < self.min_size => last.end = end,
                _ => ranges.push(ChunkRange {
                    index: ranges.len(),
                    start,
                    end,
                }),
            }
            start = end;
        }

        Ok(ranges)
    }

    /// Ranges covering an absolute source span, e.g. a trim window.
    pub fn plan_span(&self, span: FrameSpan) -> MediaResult<Vec<ChunkRange>> {
        let ranges = self.plan(span.len())?;
        Ok(ranges
            .into_iter()
            .map(|r| ChunkRange {
                index: r.index,
                start: r.start + span.start,
                end: r.end + span.start,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(ranges: &[ChunkRange], start: u64, end: u64) {
        assert_eq!(ranges.first().unwrap().start, start);
        assert_eq!(ranges.last().unwrap().end, end);
        for (i, pair) in ranges.windows(2).enumerate() {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap after chunk {i}");
        }
        for (i, r) in ranges.iter().enumerate() {
            assert_eq!(r.index, i);
            assert!(!r.is_empty());
        }
    }

    #[test]
    fn test_zero_frames_is_invalid_range() {
        assert!(matches!(
            ChunkPlanner::default().plan(0),
            Err(MediaError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_short_source_is_one_chunk() {
        let planner = ChunkPlanner::default();
        for n in [1, 17, 50] {
            assert_eq!(
                planner.plan(n).unwrap(),
                vec![ChunkRange { index: 0, start: 0, end: n }]
            );
        }
    }

    #[test]
    fn test_ninety_frames_is_one_chunk() {
        let ranges = ChunkPlanner::default().plan(90).unwrap();
        assert_eq!(ranges, vec![ChunkRange { index: 0, start: 0, end: 90 }]);
    }

    #[test]
    fn test_targets_eight_chunks() {
        let ranges = ChunkPlanner::default().plan(1000).unwrap();
        assert_eq!(ranges.len(), 8);
        assert!(ranges.iter().all(|r| r.len() == 125));
    }

    #[test]
    fn test_long_video_capped_at_max_size() {
        let ranges = ChunkPlanner::default().plan(10_000).unwrap();
        assert_covers(&ranges, 0, 10_000);
        assert_eq!(ranges.len(), 34);
        assert!(ranges.iter().all(|r| r.len() <= 300));
        assert_eq!(ranges.last().unwrap().len(), 100);
    }

    #[test]
    fn test_small_remainder_merged_into_previous() {
        let ranges = ChunkPlanner::new(8, 50, 300).plan(620).unwrap();
        // 620 / 8 = 77 per chunk; 8 * 77 = 616 leaves 4 frames.
        assert_eq!(ranges.len(), 8);
        assert_eq!(ranges.last().unwrap().len(), 81);
        assert_covers(&ranges, 0, 620);
    }

    #[test]
    fn test_contiguous_cover_for_many_sizes() {
        for planner in [
            ChunkPlanner::default(),
            ChunkPlanner::new(3, 10, 40),
            ChunkPlanner::new(1, 1, 1),
        ] {
            for n in 1..=1500 {
                let ranges = planner.plan(n).unwrap();
                assert_covers(&ranges, 0, n);
            }
        }
    }

    #[test]
    fn test_plan_span_offsets_ranges() {
        let ranges = ChunkPlanner::default().plan_span(FrameSpan::new(30, 60)).unwrap();
        assert_eq!(ranges, vec![ChunkRange { index: 0, start: 30, end: 60 }]);
    }

    #[test]
    fn test_bounds_normalised() {
        let planner = ChunkPlanner::new(0, 0, 0);
        assert_eq!(planner.chunk_size(10), 1);
    }
}
