//! Fixed-width overlapping windows over a shard stream.

use rand::seq::SliceRandom;
use rand::Rng;

/// Slices `stream` into `context_length` windows every `stride` ids.
///
/// A window may start at offset `o` only while `o + context_length < len`,
/// so the window ending exactly at the last id is never produced.
pub fn make_windows(stream: &[u32], context_length: usize, stride: usize) -> Vec<&[u32]> {
    debug_assert!(stride > 0, "stride must be positive");
    let stride = stride.max(1);
    (0..stream.len().saturating_sub(context_length))
        .step_by(stride)
        .map(|start| &stream[start..start + context_length])
        .collect()
}

/// `make_windows` followed by an in-place shuffle.
pub fn sample_windows<'a, R: Rng + ?Sized>(
    stream: &'a [u32],
    context_length: usize,
    stride: usize,
    rng: &mut R,
) -> Vec<&'a [u32]> {
    let mut windows = make_windows(stream, context_length, stride);
    windows.shuffle(rng);
    windows
}

/// Number of windows `make_windows` yields for a stream of `len` ids.
pub fn window_count(len: usize, context_length: usize, stride: usize) -> usize {
    if len <= context_length {
        0
    } else {
        1 + (len - context_length - 1) / stride.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn stream(len: u32) -> Vec<u32> {
        (0..len).collect()
    }

    #[test]
    fn offsets_follow_stride_and_skip_last_start() {
        let ids = stream(10);
        let windows = make_windows(&ids, 4, 2);
        let starts: Vec<u32> = windows.iter().map(|w| w[0]).collect();
        assert_eq!(starts, vec![0, 2, 4]);
        assert!(windows.iter().all(|w| w.len() == 4));
    }

    #[test]
    fn stream_not_longer_than_context_has_no_windows() {
        assert!(make_windows(&stream(4), 4, 1).is_empty());
        assert!(make_windows(&stream(2), 4, 1).is_empty());
        assert!(make_windows(&[], 4, 1).is_empty());
    }

    #[test]
    fn count_matches_closed_form() {
        for len in 0..40u32 {
            for stride in 1..9 {
                let ids = stream(len);
                assert_eq!(
                    make_windows(&ids, 5, stride).len(),
                    window_count(len as usize, 5, stride),
                    "len {len} stride {stride}"
                );
            }
        }
    }

    #[test]
    fn stride_wider_than_context_leaves_gaps() {
        let ids = stream(20);
        let windows = make_windows(&ids, 3, 7);
        let starts: Vec<u32> = windows.iter().map(|w| w[0]).collect();
        assert_eq!(starts, vec![0, 7, 14]);
    }

    #[test]
    fn shuffle_keeps_the_same_windows() {
        let ids = stream(64);
        let mut rng = StdRng::seed_from_u64(7);
        let mut sampled = sample_windows(&ids, 8, 3, &mut rng);
        let mut ordered = make_windows(&ids, 8, 3);
        sampled.sort();
        ordered.sort();
        assert_eq!(sampled, ordered);
    }
}
