//! Extent-granular spread with staging buffers.
//!
//! Rebalances a window spanning one or more extents by rewriting extents
//! from right to left. The read cursor starts at the packed end of the
//! window and walks leftwards; each destination extent is written either
//! directly (once the cursor has left it) or into a staging buffer
//! acquired from the storage regions. Staged extents are committed as soon
//! as the cursor moves past them, so:
//!
//! - a write to extent `e` never reads from `e` after extents right of `e`
//!   have been committed, and
//! - writes to an extent still being read land on a staging buffer, so the
//!   read view stays untouched until the commit.
//!
//! The same walk optionally merges a second, pre-sorted input (the bulk
//! load batch) consumed from its back, element by element.

use crate::storage::Storage;
use marrow_index::StaticIndex;
use std::collections::VecDeque;

pub(crate) struct RewiredSpread<'a> {
    storage: &'a mut Storage,
    index: &'a mut StaticIndex,
    /// First segment of the window.
    window_start: usize,
    /// Number of segments in the window.
    window_length: usize,
    /// Elements distributed by the spread: the window's current contents
    /// plus the batch, but not the pending insert.
    cardinality: usize,
    segments_per_extent: usize,
    /// Sorted batch merged during the walk; empty for point rebalances.
    batch: &'a [(i64, i64)],
    /// Index of the next unconsumed batch element, from the back.
    batch_pos: i64,
    /// Pending pair placed by a segment-local insert after the spread.
    pending: Option<(i64, i64)>,
    /// Read cursor: one past the last unread element, as an absolute
    /// element position. Negative once the window contents are consumed.
    position: i64,
    /// Staged extents waiting for the cursor to leave them, oldest first.
    to_commit: VecDeque<(usize, Vec<i64>, Vec<i64>)>,
}

impl<'a> RewiredSpread<'a> {
    pub(crate) fn new(
        storage: &'a mut Storage,
        index: &'a mut StaticIndex,
        window_start: usize,
        window_length: usize,
        cardinality: usize,
        batch: &'a [(i64, i64)],
    ) -> Self {
        let b = storage.segment_capacity;
        let extent_len = storage
            .extent_len()
            .expect("rewired spread requires extent-backed storage");
        let segments_per_extent = extent_len / b;
        debug_assert!(segments_per_extent >= 1);
        debug_assert_eq!(window_length % segments_per_extent, 0);
        debug_assert_eq!((window_start * b) % extent_len, 0);

        let window_last = window_start + window_length - 1;
        let position = (window_last * b + storage.sizes()[window_last] as usize) as i64;
        let batch_pos = batch.len() as i64 - 1;

        Self {
            storage,
            index,
            window_start,
            window_length,
            cardinality,
            segments_per_extent,
            batch,
            batch_pos,
            pending: None,
            position,
            to_commit: VecDeque::new(),
        }
    }

    pub(crate) fn set_element_to_insert(&mut self, key: i64, value: i64) {
        debug_assert!(self.pending.is_none(), "pending insert already set");
        self.pending = Some((key, value));
    }

    /// Overrides the read cursor; used on resize, where the old contents
    /// end well before the freshly extended window does.
    pub(crate) fn set_start_position(&mut self, position: usize) {
        let b = self.storage.segment_capacity as i64;
        let segment = (position as i64 - 1).div_euclid(b);
        debug_assert!(
            segment >= self.window_start as i64
                && segment < (self.window_start + self.window_length) as i64,
            "start position outside the window"
        );
        self.position = position as i64;
    }

    /// Window-relative extent containing the given absolute position.
    fn position_to_extent(&self, position: i64) -> i64 {
        let b = self.storage.segment_capacity as i64;
        let segment = (position - (self.window_start as i64) * b).div_euclid(b);
        segment.div_euclid(self.segments_per_extent as i64)
    }

    fn current_extent(&self) -> i64 {
        self.position_to_extent(self.position - 1)
    }

    /// Absolute element offset of a window-relative extent.
    fn extent_offset(&self, extent_id: usize) -> usize {
        (self.window_start + extent_id * self.segments_per_extent) * self.storage.segment_capacity
    }

    pub(crate) fn execute(&mut self) {
        self.spread_window();
        self.update_segment_sizes();
        self.update_index();
    }

    fn spread_window(&mut self) {
        let num_extents = self.window_length / self.segments_per_extent;
        let elements_per_extent = self.cardinality / num_extents;
        let odd_extents = self.cardinality % num_extents;

        debug_assert_eq!(self.storage.used_buffers(), 0);
        for extent_id in (0..num_extents).rev() {
            self.spread_extent(
                extent_id,
                elements_per_extent + usize::from(extent_id < odd_extents),
            );
        }
        debug_assert_eq!(self.storage.used_buffers(), 0);
    }

    fn spread_extent(&mut self, extent_id: usize, num_elements: usize) {
        // While the cursor is at or right of this extent, the live pages
        // are still a read source: stage the new contents instead.
        let staging = self.current_extent() >= extent_id as i64;
        if staging {
            let (mut key_buffer, mut value_buffer) = self.storage.acquire_buffers();
            self.spread_elements(
                extent_id,
                num_elements,
                Some((key_buffer.as_mut_slice(), value_buffer.as_mut_slice())),
            );
            self.to_commit
                .push_back((extent_id, key_buffer, value_buffer));
        } else {
            self.spread_elements(extent_id, num_elements, None);
        }
        self.reclaim_past_extents();
    }

    /// Commits every staged extent the read cursor has moved past.
    fn reclaim_past_extents(&mut self) {
        let current = self.current_extent();
        while self
            .to_commit
            .front()
            .is_some_and(|(extent_id, _, _)| *extent_id as i64 > current)
        {
            let (extent_id, key_buffer, value_buffer) = self.to_commit.pop_front().unwrap();
            let absolute = self.window_start / self.segments_per_extent + extent_id;
            self.storage.commit_buffers(absolute, key_buffer, value_buffer);
        }
    }

    fn spread_elements(
        &mut self,
        extent_id: usize,
        num_elements: usize,
        scratch: Option<(&mut [i64], &mut [i64])>,
    ) {
        if self.batch.is_empty() {
            self.spread_elements_copy(extent_id, num_elements, scratch);
        } else {
            self.spread_elements_merge(extent_id, num_elements, scratch);
        }
    }

    /// Fills one destination extent right to left by copying runs of
    /// segment pairs from the read cursor backwards.
    fn spread_elements_copy(
        &mut self,
        extent_id: usize,
        num_elements: usize,
        scratch: Option<(&mut [i64], &mut [i64])>,
    ) {
        let b = self.storage.segment_capacity as i64;
        let spe = self.segments_per_extent;
        let elements_per_segment = (num_elements / spe) as i64;
        let odd_segments = (num_elements % spe) as i64;
        debug_assert!(elements_per_segment + 1 <= b);
        let window_start = self.window_start as i64;
        let dest_base = self.extent_offset(extent_id) as i64;

        let (keys, values, sizes) = self.storage.parts_mut();
        let keys_ptr = keys.as_mut_ptr();
        let values_ptr = values.as_mut_ptr();
        let (dst_keys, dst_values, dst_base) = match scratch {
            Some((k, v)) => (k.as_mut_ptr(), v.as_mut_ptr(), 0i64),
            None => (keys_ptr, values_ptr, dest_base),
        };

        // Source run: the (even, odd) pair containing position - 1.
        let mut in_seg = (self.position - 1).div_euclid(2 * b) * 2;
        let mut in_start = in_seg * b + b - sizes[in_seg as usize] as i64;
        let mut in_run = self.position - in_start;
        debug_assert!(in_run > 0 && in_run <= 2 * b);

        for pair in (0..spe / 2).rev() {
            let out_seg = (pair * 2) as i64;
            let run_lhs = elements_per_segment + i64::from(out_seg < odd_segments);
            let run_rhs = elements_per_segment + i64::from(out_seg + 1 < odd_segments);
            let mut out_run = run_lhs + run_rhs;
            debug_assert!(out_run <= 2 * b - 2);
            let out_disp = dst_base + out_seg * b + (b - run_lhs);

            while out_run > 0 {
                let m = out_run.min(in_run) as usize;
                let src = (in_start + in_run - m as i64) as usize;
                let dst = (out_disp + out_run - m as i64) as usize;
                // Destination is either a staging buffer or an extent the
                // cursor has already left; it never overlaps the source.
                unsafe {
                    std::ptr::copy_nonoverlapping(keys_ptr.add(src) as *const i64, dst_keys.add(dst), m);
                    std::ptr::copy_nonoverlapping(
                        values_ptr.add(src) as *const i64,
                        dst_values.add(dst),
                        m,
                    );
                }
                in_run -= m as i64;
                out_run -= m as i64;

                if in_run == 0 {
                    debug_assert!(in_seg % 2 == 0);
                    in_seg -= 2;
                    if in_seg >= window_start {
                        in_run = sizes[in_seg as usize] as i64
                            + sizes[in_seg as usize + 1] as i64;
                        debug_assert!(in_run > 0 && in_run <= 2 * b);
                        in_start = in_seg * b + b - sizes[in_seg as usize] as i64;
                    } else {
                        in_start = window_start * b;
                    }
                }
            }
        }

        self.position = in_start + in_run;
    }

    /// Fills one destination extent right to left, merging the window
    /// contents with the batch, both consumed from their largest elements.
    fn spread_elements_merge(
        &mut self,
        extent_id: usize,
        num_elements: usize,
        scratch: Option<(&mut [i64], &mut [i64])>,
    ) {
        let b = self.storage.segment_capacity as i64;
        let spe = self.segments_per_extent;
        let elements_per_segment = (num_elements / spe) as i64;
        let odd_segments = (num_elements % spe) as i64;
        debug_assert!(elements_per_segment + i64::from(odd_segments > 0) <= b);
        let window_start = self.window_start as i64;
        let dest_base = self.extent_offset(extent_id) as i64;

        let (keys, values, sizes) = self.storage.parts_mut();
        let keys_ptr = keys.as_mut_ptr();
        let values_ptr = values.as_mut_ptr();
        let (dst_keys, dst_values, dst_base) = match scratch {
            Some((k, v)) => (k.as_mut_ptr(), v.as_mut_ptr(), 0i64),
            None => (keys_ptr, values_ptr, dest_base),
        };

        // Input 1: the window contents, consumed from the cursor backwards.
        let mut in1_seg = (self.position - 1).div_euclid(2 * b) * 2;
        let mut in1_base = 0i64;
        let mut in1_idx = -1i64;
        if in1_seg >= window_start {
            in1_base = in1_seg * b + b - sizes[in1_seg as usize] as i64;
            let run = self.position - in1_base;
            debug_assert!(run > 0 && run <= 2 * b);
            in1_idx = run - 1;
        }

        // Input 2: the batch, consumed from its back.
        let batch = self.batch;
        let mut batch_pos = self.batch_pos;

        // Advances input 1 to the previous pair once its run is consumed.
        macro_rules! advance_input1 {
            () => {
                if in1_idx < 0 && in1_seg > window_start {
                    in1_seg -= 2;
                    let run =
                        sizes[in1_seg as usize] as i64 + sizes[in1_seg as usize + 1] as i64;
                    in1_base = in1_seg * b + b - sizes[in1_seg as usize] as i64;
                    in1_idx = run - 1;
                }
            };
        }

        for pair in (0..spe / 2).rev() {
            let out_seg = (pair * 2) as i64;
            let run_lhs = elements_per_segment + i64::from(out_seg < odd_segments);
            let run_rhs = elements_per_segment + i64::from(out_seg + 1 < odd_segments);
            let out_disp = dst_base + out_seg * b + (b - run_lhs);
            let mut k = run_lhs + run_rhs - 1;

            while k >= 0 && in1_idx >= 0 && batch_pos >= 0 {
                let window_key = unsafe { *keys_ptr.add((in1_base + in1_idx) as usize) };
                if window_key > batch[batch_pos as usize].0 {
                    unsafe {
                        *dst_keys.add((out_disp + k) as usize) = window_key;
                        *dst_values.add((out_disp + k) as usize) =
                            *values_ptr.add((in1_base + in1_idx) as usize);
                    }
                    in1_idx -= 1;
                    advance_input1!();
                } else {
                    let (key, value) = batch[batch_pos as usize];
                    unsafe {
                        *dst_keys.add((out_disp + k) as usize) = key;
                        *dst_values.add((out_disp + k) as usize) = value;
                    }
                    batch_pos -= 1;
                }
                k -= 1;
            }

            while k >= 0 && in1_idx >= 0 {
                unsafe {
                    *dst_keys.add((out_disp + k) as usize) =
                        *keys_ptr.add((in1_base + in1_idx) as usize);
                    *dst_values.add((out_disp + k) as usize) =
                        *values_ptr.add((in1_base + in1_idx) as usize);
                }
                in1_idx -= 1;
                advance_input1!();
                k -= 1;
            }

            while k >= 0 && batch_pos >= 0 {
                let (key, value) = batch[batch_pos as usize];
                unsafe {
                    *dst_keys.add((out_disp + k) as usize) = key;
                    *dst_values.add((out_disp + k) as usize) = value;
                }
                batch_pos -= 1;
                k -= 1;
            }

            debug_assert!(k < 0, "ran out of input while filling extent {extent_id}");
        }

        self.position = if in1_idx >= 0 { in1_base + in1_idx + 1 } else { -1 };
        self.batch_pos = batch_pos;
    }

    /// Records the per-segment cardinalities implied by the distribution.
    fn update_segment_sizes(&mut self) {
        let num_extents = self.window_length / self.segments_per_extent;
        let elements_per_extent = self.cardinality / num_extents;
        let odd_extents = self.cardinality % num_extents;

        let (_, _, sizes) = self.storage.parts_mut();
        let mut segment_id = self.window_start;
        for extent in 0..num_extents {
            let extent_cardinality = elements_per_extent + usize::from(extent < odd_extents);
            let per_segment = extent_cardinality / self.segments_per_extent;
            let odd_segments = extent_cardinality % self.segments_per_extent;
            for s in 0..self.segments_per_extent {
                sizes[segment_id] = (per_segment + usize::from(s < odd_segments)) as u16;
                segment_id += 1;
            }
        }
    }

    /// Refreshes the separators from the new segment minima and, for point
    /// rebalances, places the pending pair in its segment.
    fn update_index(&mut self) {
        let mut pending = self.pending.take();
        let mut segment_id = self.window_start;

        for i in 0..self.window_length {
            let mut minimum = self.storage.get_minimum(segment_id);
            if let Some((key, value)) = pending {
                if key < minimum {
                    if i > 0 {
                        self.storage.insert_into_segment(segment_id - 1, key, value);
                    } else {
                        minimum = key;
                        self.storage.insert_into_segment(segment_id, key, value);
                    }
                    pending = None;
                }
            }
            self.index.set_separator_key(segment_id, minimum);
            segment_id += 1;
        }

        if let Some((key, value)) = pending {
            // Larger than every minimum: it belongs in the last segment.
            self.storage
                .insert_into_segment(self.window_start + self.window_length - 1, key, value);
        }
    }
}
