//! In-place two-chunk spread.
//!
//! Rebalances a window that fits under one extent without any staging
//! extents. Phase 1 compacts every segment pair towards the right end of
//! the window, diverting the rightmost two pairs into a side buffer
//! ("chunk 2") so the in-window compaction ("chunk 1") never overruns
//! unread data. Phase 2 assigns the target cardinalities. Phase 3 drains
//! chunk 1 and then chunk 2 left to right into the packed pair layout.
//! Because phase 1 walks right to left, chunk 1 holds the smaller keys and
//! chunk 2 the larger ones, so draining them in that order keeps the window
//! sorted.

use crate::rebalance::SpreadInsert;
use crate::PmaIndex;

/// Copies the run `keys[src..src + n]` into `dst_keys[..n + 1]`, splicing
/// `(key, value)` at its sorted position.
fn splice_into_chunk(
    keys: &[i64],
    values: &[i64],
    src: usize,
    n: usize,
    dst_keys: &mut [i64],
    dst_values: &mut [i64],
    key: i64,
    value: i64,
) {
    let mut i = 0;
    while i < n && keys[src + i] < key {
        dst_keys[i] = keys[src + i];
        dst_values[i] = values[src + i];
        i += 1;
    }
    dst_keys[i] = key;
    dst_values[i] = value;
    while i < n {
        dst_keys[i + 1] = keys[src + i];
        dst_values[i + 1] = values[src + i];
        i += 1;
    }
}

/// As [`splice_into_chunk`], but the destination is `keys[dst..dst + n + 1]`
/// of the same arrays. The destination must start past the source run.
fn splice_within(
    keys: &mut [i64],
    values: &mut [i64],
    src: usize,
    n: usize,
    dst: usize,
    key: i64,
    value: i64,
) {
    debug_assert!(dst >= src + n);
    let mut i = 0;
    while i < n && keys[src + i] < key {
        keys[dst + i] = keys[src + i];
        values[dst + i] = values[src + i];
        i += 1;
    }
    keys[dst + i] = key;
    values[dst + i] = value;
    keys.copy_within(src + i..src + n, dst + i + 1);
    values.copy_within(src + i..src + n, dst + i + 1);
}

impl PmaIndex {
    /// Rebalances the window `[segment_start, segment_start + num_segments)`
    /// so that each segment ends up with `cardinality / num_segments`
    /// elements (the leftmost segments take the remainder).
    ///
    /// `cardinality` includes the pending insert when one is present; the
    /// pending pair is spliced into the stream while its pair is compacted.
    pub(crate) fn spread_two_chunk(
        &mut self,
        cardinality: usize,
        segment_start: usize,
        num_segments: usize,
        insertion: Option<SpreadInsert>,
    ) {
        debug_assert!(segment_start % 2 == 0, "window must start at an even segment");
        debug_assert!(num_segments % 2 == 0, "window must span whole pairs");

        let b = self.storage.segment_capacity;
        let win = segment_start * b;
        let ws = segment_start;
        let insert_rel: i64 = insertion
            .as_ref()
            .map(|si| si.segment_id as i64 - segment_start as i64)
            .unwrap_or(-1);

        let chunk2_capacity = 4 * b + 1;
        let mut chunk2_keys = vec![0i64; chunk2_capacity];
        let mut chunk2_values = vec![0i64; chunk2_capacity];

        {
            let (keys, values, sizes) = self.storage.parts_mut();

            // Phase 1a: the rightmost two pairs go into chunk 2.
            let mut out_seg: i64 = num_segments as i64 - 2;
            let mut out_start = (out_seg as usize + 1) * b - sizes[ws + out_seg as usize] as usize;
            let mut out_end = out_start
                + sizes[ws + out_seg as usize] as usize
                + sizes[ws + out_seg as usize + 1] as usize;
            let mut space_left = chunk2_capacity;
            let mut copied_segments = 0;

            while out_seg >= 0 && copied_segments < 4 {
                let n = out_end - out_start;
                if insert_rel == out_seg || insert_rel == out_seg + 1 {
                    let si = insertion.as_ref().unwrap();
                    let dst = space_left - n - 1;
                    splice_into_chunk(
                        keys,
                        values,
                        win + out_start,
                        n,
                        &mut chunk2_keys[dst..space_left],
                        &mut chunk2_values[dst..space_left],
                        si.key,
                        si.value,
                    );
                    space_left -= n + 1;
                } else {
                    chunk2_keys[space_left - n..space_left]
                        .copy_from_slice(&keys[win + out_start..win + out_end]);
                    chunk2_values[space_left - n..space_left]
                        .copy_from_slice(&values[win + out_start..win + out_end]);
                    space_left -= n;
                }

                out_seg -= 2;
                if out_seg >= 0 {
                    out_start = (out_seg as usize + 1) * b - sizes[ws + out_seg as usize] as usize;
                    out_end = out_start
                        + sizes[ws + out_seg as usize] as usize
                        + sizes[ws + out_seg as usize + 1] as usize;
                }
                copied_segments += 2;
            }

            let chunk2_off = space_left;
            let chunk2_size = chunk2_capacity - space_left;

            // Phase 1b: compact the remaining pairs against the right end
            // of the window.
            let mut chunk1_current = num_segments * b;
            while out_seg >= 0 {
                let n = out_end - out_start;
                if insert_rel == out_seg || insert_rel == out_seg + 1 {
                    let si = insertion.as_ref().unwrap();
                    splice_within(
                        keys,
                        values,
                        win + out_start,
                        n,
                        win + chunk1_current - n - 1,
                        si.key,
                        si.value,
                    );
                    chunk1_current -= n + 1;
                } else {
                    keys.copy_within(win + out_start..win + out_end, win + chunk1_current - n);
                    values.copy_within(win + out_start..win + out_end, win + chunk1_current - n);
                    chunk1_current -= n;
                }

                out_seg -= 2;
                if out_seg >= 0 {
                    out_start = (out_seg as usize + 1) * b - sizes[ws + out_seg as usize] as usize;
                    out_end = out_start
                        + sizes[ws + out_seg as usize] as usize
                        + sizes[ws + out_seg as usize + 1] as usize;
                }
            }

            let chunk1_off = chunk1_current;
            let chunk1_size = num_segments * b - chunk1_current;

            // Phase 2: target cardinalities, remainder to the left.
            let elements_per_segment = cardinality / num_segments;
            let odd_segments = cardinality % num_segments;
            for i in 0..num_segments {
                sizes[ws + i] = (elements_per_segment + usize::from(i < odd_segments)) as u16;
            }

            // Phase 3: drain chunk 1 then chunk 2 into the pair layout.
            let mut using_chunk1 = chunk1_size > 0;
            let mut in_cur = 0usize;
            let mut in_size = if using_chunk1 { chunk1_size } else { chunk2_size };

            for i in (0..num_segments).step_by(2) {
                let out_start = (i + 1) * b - sizes[ws + i] as usize;
                let out_end = out_start + sizes[ws + i] as usize + sizes[ws + i + 1] as usize;
                let mut out_cur = out_start;

                while out_cur < out_end {
                    let m = (out_end - out_cur).min(in_size - in_cur);
                    debug_assert!(m > 0, "ran out of input while filling the window");
                    if using_chunk1 {
                        keys.copy_within(
                            win + chunk1_off + in_cur..win + chunk1_off + in_cur + m,
                            win + out_cur,
                        );
                        values.copy_within(
                            win + chunk1_off + in_cur..win + chunk1_off + in_cur + m,
                            win + out_cur,
                        );
                    } else {
                        keys[win + out_cur..win + out_cur + m]
                            .copy_from_slice(&chunk2_keys[chunk2_off + in_cur..chunk2_off + in_cur + m]);
                        values[win + out_cur..win + out_cur + m]
                            .copy_from_slice(&chunk2_values[chunk2_off + in_cur..chunk2_off + in_cur + m]);
                    }
                    out_cur += m;
                    in_cur += m;
                    if in_cur == in_size && using_chunk1 {
                        using_chunk1 = false;
                        in_cur = 0;
                        in_size = chunk2_size;
                    }
                }

                self.index
                    .set_separator_key(segment_start + i, keys[win + out_start]);
                self.index.set_separator_key(
                    segment_start + i + 1,
                    keys[win + out_start + sizes[ws + i] as usize],
                );
            }
        }

        if insertion.is_some() {
            self.storage.cardinality += 1;
        }
    }
}
