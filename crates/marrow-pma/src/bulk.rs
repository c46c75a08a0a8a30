//! Bulk loading of pre-sorted batches.
//!
//! A batch is first partitioned into *runs*: maximal slices whose keys all
//! fall into one segment. Each run is then fused up the calibrator tree
//! until its window can absorb the run at an admissible density, absorbing
//! neighbouring runs whose windows it overlaps. Surviving runs are applied
//! with a merge matching their window size: segment-local, two-chunk, or
//! extent-granular. When even the root window cannot absorb the batch, the
//! whole array is rebuilt at the root target density in one streaming
//! merge.

use crate::rewired::RewiredSpread;
use crate::storage::Workspace;
use crate::PmaIndex;
use marrow_common::size::{hyperceil, log2};
use tracing::debug;

/// A maximal batch slice landing in a single segment, later widened to the
/// window that absorbs it.
#[derive(Debug)]
struct RunInfo {
    /// First batch index of the run.
    run_start: usize,
    /// Number of batch elements in the run.
    run_length: usize,
    /// Elements of the run plus the current contents of its window.
    cardinality: usize,
    window_start: usize,
    window_length: usize,
    /// Cleared when the run is absorbed into a neighbour.
    valid: bool,
}

impl PmaIndex {
    /// Loads a batch of key-value pairs sorted by key.
    ///
    /// Keys are assumed unique and disjoint from the stored keys; ties are
    /// kept but leave lookups unspecified, as with [`insert`](Self::insert).
    pub fn load_sorted(&mut self, batch: &[(i64, i64)]) {
        if batch.is_empty() {
            return;
        }
        debug_assert!(
            batch.windows(2).all(|w| w[0].0 <= w[1].0),
            "batch must be sorted by key"
        );
        debug!(batch_len = batch.len(), "bulk load");

        if self.is_empty() {
            self.load_empty(batch);
        } else {
            let mut runs = self.generate_runs(batch);
            if self.fuse_runs(&mut runs) {
                self.load_resize(batch);
            } else {
                self.load_spread(batch, &runs);
            }
        }
    }

    /// Splits the batch into per-segment runs. A run ends where the next
    /// key passes the successor segment's minimum.
    fn generate_runs(&self, batch: &[(i64, i64)]) -> Vec<RunInfo> {
        let number_segments = self.storage.number_segments;
        let mut runs = Vec::new();
        let mut i = 0;
        while i < batch.len() {
            let segment_id = self.index.find_first(batch[i].0);
            let max = if segment_id + 1 < number_segments {
                self.storage.get_minimum(segment_id + 1)
            } else {
                i64::MAX
            };

            let start = i;
            i += 1;
            while i < batch.len() && batch[i].0 <= max {
                i += 1;
            }

            runs.push(RunInfo {
                run_start: start,
                run_length: i - start,
                cardinality: self.storage.sizes()[segment_id] as usize + (i - start),
                window_start: segment_id,
                window_length: 1,
                valid: true,
            });
        }
        runs
    }

    /// Widens each run's window up the calibrator tree until its density
    /// fits, absorbing overlapping neighbour runs. Returns true when the
    /// root window itself overflows and the array must resize.
    fn fuse_runs(&mut self, runs: &mut [RunInfo]) -> bool {
        let b = self.storage.segment_capacity;
        let storage_height = self.storage.height;
        let number_segments = self.storage.number_segments;
        let run_count = runs.len();

        for i in 0..run_count {
            if !runs[i].valid {
                continue;
            }
            let segment_id = runs[i].window_start;
            debug_assert_eq!(runs[i].window_length, 1);

            let mut num_elements = runs[i].cardinality;
            let mut theta = self.density.upper_threshold_leaves();
            let mut density = num_elements as f64 / b as f64;
            let mut height = 1usize;
            let mut window_length = 1usize;
            let mut window_id = segment_id;
            let mut window_start = segment_id;

            if storage_height > 1 && density > theta {
                let mut windex_left = segment_id as i64 - 1;
                let mut windex_right = segment_id + 1;

                // Nearest valid runs on either side: their window edges
                // mark where absorption takes over from plain counting.
                let mut sindex_left = i as i64 - 1;
                let mut sindex_right = i + 1;
                let mut srun_left = -1i64;
                let mut srun_right = -1i64;
                while sindex_left >= 0 && srun_left < 0 {
                    let run = &runs[sindex_left as usize];
                    if run.valid {
                        srun_left = (run.window_start + run.window_length - 1) as i64;
                    } else {
                        sindex_left -= 1;
                    }
                }
                while sindex_right < run_count && srun_right < 0 {
                    if runs[sindex_right].valid {
                        srun_right = runs[sindex_right].window_start as i64;
                    } else {
                        sindex_right += 1;
                    }
                }

                loop {
                    height += 1;
                    window_length *= 2;
                    window_id /= 2;
                    window_start = window_id * window_length;
                    let window_end = window_start + window_length;
                    theta = self.density.thresholds(height, storage_height).1;

                    while windex_left >= window_start as i64 {
                        if windex_left == srun_left {
                            let left = sindex_left as usize;
                            num_elements += runs[left].cardinality;
                            runs[i].run_start = runs[left].run_start;
                            runs[i].run_length += runs[left].run_length;
                            runs[left].valid = false;
                            windex_left = runs[left].window_start as i64 - 1;

                            sindex_left -= 1;
                            srun_left = -1;
                            while sindex_left >= 0 && srun_left < 0 {
                                let run = &runs[sindex_left as usize];
                                if run.valid {
                                    srun_left = (run.window_start + run.window_length - 1) as i64;
                                } else {
                                    sindex_left -= 1;
                                }
                            }
                        } else {
                            num_elements += self.storage.sizes()[windex_left as usize] as usize;
                            windex_left -= 1;
                        }
                    }

                    while windex_right < window_end {
                        if windex_right as i64 == srun_right {
                            let right = sindex_right;
                            num_elements += runs[right].cardinality;
                            runs[i].run_length += runs[right].run_length;
                            runs[right].valid = false;
                            windex_right = runs[right].window_start + runs[right].window_length;

                            sindex_right += 1;
                            srun_right = -1;
                            while sindex_right < run_count && srun_right < 0 {
                                if runs[sindex_right].valid {
                                    srun_right = runs[sindex_right].window_start as i64;
                                } else {
                                    sindex_right += 1;
                                }
                            }
                        } else {
                            num_elements += self.storage.sizes()[windex_right] as usize;
                            windex_right += 1;
                        }
                    }

                    density = num_elements as f64 / (window_length * b) as f64;
                    if !(density > theta && height < storage_height) {
                        break;
                    }
                }
            }

            runs[i].window_start = window_start;
            runs[i].window_length = window_length;
            runs[i].cardinality = num_elements;

            if window_length == number_segments && density > theta {
                return true;
            }
        }

        false
    }

    /// Applies every surviving run with the merge strategy matching its
    /// window size.
    fn load_spread(&mut self, batch: &[(i64, i64)], runs: &[RunInfo]) {
        for entry in runs.iter().filter(|r| r.valid) {
            let slice = &batch[entry.run_start..entry.run_start + entry.run_length];
            if entry.window_length == 1 {
                if entry.run_length == 1 {
                    self.insert_common(entry.window_start, slice[0].0, slice[0].1);
                } else {
                    self.load_merge_single(entry.window_start, slice, entry.cardinality);
                }
            } else {
                let window_bytes =
                    entry.window_length * self.storage.segment_capacity * std::mem::size_of::<i64>();
                if self.storage.rewired_spread_available()
                    && window_bytes >= self.storage.extent_size_bytes()
                {
                    let mut spread = RewiredSpread::new(
                        &mut self.storage,
                        &mut self.index,
                        entry.window_start,
                        entry.window_length,
                        entry.cardinality,
                        slice,
                    );
                    spread.execute();
                    self.storage.cardinality += entry.run_length;
                } else {
                    self.load_merge_multi(
                        entry.window_start,
                        entry.window_length,
                        slice,
                        entry.cardinality,
                    );
                }
            }
        }
    }

    /// Merges a run into its single segment through a temporary copy of
    /// the current contents.
    fn load_merge_single(&mut self, segment_id: usize, sequence: &[(i64, i64)], cardinality: usize) {
        let b = self.storage.segment_capacity;
        let base = segment_id * b;
        let even = segment_id % 2 == 0;
        let input_size = self.storage.sizes()[segment_id] as usize;
        debug_assert_eq!(input_size, cardinality - sequence.len());
        debug_assert!(cardinality <= b);

        let input_start = base + if even { b - input_size } else { 0 };
        let input_keys = self.storage.keys()[input_start..input_start + input_size].to_vec();
        let input_values = self.storage.values()[input_start..input_start + input_size].to_vec();

        {
            let (keys, values, sizes) = self.storage.parts_mut();
            let output_start = if even { b - cardinality } else { 0 };
            let output_end = if even { b } else { cardinality };
            let mut out = output_start;
            let mut ic = 0usize;
            let mut sc = 0usize;

            while out < output_end && ic < input_size && sc < sequence.len() {
                if sequence[sc].0 < input_keys[ic] {
                    keys[base + out] = sequence[sc].0;
                    values[base + out] = sequence[sc].1;
                    sc += 1;
                } else {
                    keys[base + out] = input_keys[ic];
                    values[base + out] = input_values[ic];
                    ic += 1;
                }
                out += 1;
            }
            if out < output_end && ic < input_size {
                let n = input_size - ic;
                keys[base + out..base + out + n].copy_from_slice(&input_keys[ic..]);
                values[base + out..base + out + n].copy_from_slice(&input_values[ic..]);
                out += n;
            }
            while out < output_end && sc < sequence.len() {
                keys[base + out] = sequence[sc].0;
                values[base + out] = sequence[sc].1;
                sc += 1;
                out += 1;
            }
            debug_assert_eq!(out, output_end);

            sizes[segment_id] = cardinality as u16;
            self.index.set_separator_key(segment_id, keys[base + output_start]);
        }
        self.storage.cardinality += sequence.len();
    }

    /// Merges a run into a multi-segment window with the two-chunk
    /// protocol, the batch acting as a third input stream.
    fn load_merge_multi(
        &mut self,
        window_start: usize,
        window_length: usize,
        sequence: &[(i64, i64)],
        cardinality: usize,
    ) {
        let b = self.storage.segment_capacity;
        debug_assert!(window_start % 2 == 0);
        debug_assert!(window_length > 1);
        debug_assert!(window_length * b >= cardinality);

        let elements_per_segment = cardinality / window_length;
        let odd_segments = cardinality % window_length;
        let win = window_start * b;
        let ws = window_start;

        let chunk2_capacity = (b + window_length / (elements_per_segment + 1)) * 2;
        let mut chunk2_keys = vec![0i64; chunk2_capacity];
        let mut chunk2_values = vec![0i64; chunk2_capacity];

        {
            let (keys, values, sizes) = self.storage.parts_mut();

            // Phase 1a: fill chunk 2 from the right end of the window.
            let mut out_seg: i64 = window_length as i64 - 2;
            let mut out_start =
                ((out_seg as usize + 1) * b - sizes[ws + out_seg as usize] as usize) as i64;
            let mut out_end = out_start
                + sizes[ws + out_seg as usize] as i64
                + sizes[ws + out_seg as usize + 1] as i64;
            let mut out_cur = out_end;
            let mut space_left = chunk2_capacity as i64;

            while out_seg >= 0 && space_left > 0 {
                let m = space_left.min(out_cur - out_start) as usize;
                let src = win + (out_cur as usize) - m;
                let dst = (space_left as usize) - m;
                chunk2_keys[dst..space_left as usize].copy_from_slice(&keys[src..src + m]);
                chunk2_values[dst..space_left as usize].copy_from_slice(&values[src..src + m]);
                out_cur -= m as i64;
                space_left -= m as i64;

                if out_cur <= out_start {
                    out_seg -= 2;
                    if out_seg >= 0 {
                        out_start = ((out_seg as usize + 1) * b
                            - sizes[ws + out_seg as usize] as usize)
                            as i64;
                        out_end = out_start
                            + sizes[ws + out_seg as usize] as i64
                            + sizes[ws + out_seg as usize + 1] as i64;
                        out_cur = out_end;
                    }
                }
            }

            let chunk2_off = space_left as usize;
            let chunk2_size = chunk2_capacity - chunk2_off;

            // Phase 1b: compact the rest in place against the window end.
            let mut chunk1_current = (window_length * b) as i64;
            while out_seg >= 0 {
                let m = (out_cur - out_start) as usize;
                let src = win + out_cur as usize - m;
                keys.copy_within(src..src + m, win + chunk1_current as usize - m);
                values.copy_within(src..src + m, win + chunk1_current as usize - m);
                chunk1_current -= m as i64;
                out_cur -= m as i64;

                if out_cur <= out_start {
                    out_seg -= 2;
                    if out_seg >= 0 {
                        out_start = ((out_seg as usize + 1) * b
                            - sizes[ws + out_seg as usize] as usize)
                            as i64;
                        out_end = out_start
                            + sizes[ws + out_seg as usize] as i64
                            + sizes[ws + out_seg as usize + 1] as i64;
                        out_cur = out_end;
                    }
                }
            }

            let chunk1_off = chunk1_current as usize;
            let chunk1_size = window_length * b - chunk1_off;

            // Phase 2: target cardinalities.
            for i in 0..window_length {
                sizes[ws + i] = (elements_per_segment + usize::from(i < odd_segments)) as u16;
            }

            // Phase 3: three-way merge of chunk 1, chunk 2 and the batch.
            let mut using_chunk1 = chunk1_size > 0;
            let mut in_cur = 0usize;
            let mut in_size = if using_chunk1 { chunk1_size } else { chunk2_size };
            let mut sc = 0usize;

            for i in (0..window_length).step_by(2) {
                let out_start = (i + 1) * b - sizes[ws + i] as usize;
                let out_end = out_start + sizes[ws + i] as usize + sizes[ws + i + 1] as usize;
                let mut out = out_start;

                while out < out_end && in_cur < in_size && sc < sequence.len() {
                    let (in_key, in_value) = if using_chunk1 {
                        (keys[win + chunk1_off + in_cur], values[win + chunk1_off + in_cur])
                    } else {
                        (chunk2_keys[chunk2_off + in_cur], chunk2_values[chunk2_off + in_cur])
                    };
                    if in_key <= sequence[sc].0 {
                        keys[win + out] = in_key;
                        values[win + out] = in_value;
                        in_cur += 1;
                        if in_cur == in_size && using_chunk1 {
                            using_chunk1 = false;
                            in_cur = 0;
                            in_size = chunk2_size;
                        }
                    } else {
                        keys[win + out] = sequence[sc].0;
                        values[win + out] = sequence[sc].1;
                        sc += 1;
                    }
                    out += 1;
                }

                while out < out_end && in_cur < in_size {
                    let m = (out_end - out).min(in_size - in_cur);
                    if using_chunk1 {
                        keys.copy_within(
                            win + chunk1_off + in_cur..win + chunk1_off + in_cur + m,
                            win + out,
                        );
                        values.copy_within(
                            win + chunk1_off + in_cur..win + chunk1_off + in_cur + m,
                            win + out,
                        );
                    } else {
                        keys[win + out..win + out + m].copy_from_slice(
                            &chunk2_keys[chunk2_off + in_cur..chunk2_off + in_cur + m],
                        );
                        values[win + out..win + out + m].copy_from_slice(
                            &chunk2_values[chunk2_off + in_cur..chunk2_off + in_cur + m],
                        );
                    }
                    out += m;
                    in_cur += m;
                    if in_cur == in_size && using_chunk1 {
                        using_chunk1 = false;
                        in_cur = 0;
                        in_size = chunk2_size;
                    }
                }

                while out < out_end && sc < sequence.len() {
                    keys[win + out] = sequence[sc].0;
                    values[win + out] = sequence[sc].1;
                    sc += 1;
                    out += 1;
                }

                self.index
                    .set_separator_key(window_start + i, keys[win + out_start]);
                self.index.set_separator_key(
                    window_start + i + 1,
                    keys[win + out_start + sizes[ws + i] as usize],
                );
            }
        }

        self.storage.cardinality += sequence.len();
    }

    /// Rebuilds the whole array at the root target density, stream-merging
    /// the current contents with the batch.
    fn load_resize(&mut self, batch: &[(i64, i64)]) {
        let b = self.storage.segment_capacity;
        let array_bytes = self.storage.number_segments * b * std::mem::size_of::<i64>();
        if self.storage.rewired_spread_available() && array_bytes >= self.storage.extent_size_bytes()
        {
            self.load_resize_rewire(batch);
        } else {
            self.load_resize_general(batch);
        }

        let height = self.storage.height;
        let _ = self.density.thresholds(height, height);
    }

    fn load_resize_rewire(&mut self, batch: &[(i64, i64)]) {
        let b = self.storage.segment_capacity;
        let segments_before = self.storage.number_segments;
        let cardinality = self.storage.cardinality + batch.len();
        let capacity = hyperceil(
            (cardinality as f64 / self.density.upper_threshold_root()).ceil() as usize,
        );
        let segments_after = capacity / b;
        debug!(segments_before, segments_after, "bulk load resize, rewired");

        let start_position =
            (segments_before - 1) * b + self.storage.sizes()[segments_before - 1] as usize;

        self.storage.extend(segments_after - segments_before);
        self.index.rebuild(segments_after);

        let mut spread = RewiredSpread::new(
            &mut self.storage,
            &mut self.index,
            0,
            segments_after,
            cardinality,
            batch,
        );
        spread.set_start_position(start_position);
        spread.execute();

        self.storage.cardinality += batch.len();
    }

    fn load_resize_general(&mut self, batch: &[(i64, i64)]) {
        let b = self.storage.segment_capacity;
        let cardinality = self.storage.cardinality + batch.len();
        let capacity = hyperceil(
            (cardinality as f64 / self.density.upper_threshold_root()).ceil() as usize,
        );
        let num_segments = capacity / b;
        let elements_per_segment = cardinality / num_segments;
        let odd_segments = cardinality % num_segments;
        debug!(
            capacity_before = self.storage.capacity,
            capacity_after = capacity,
            "bulk load resize, general"
        );

        let old_segments = self.storage.number_segments;
        let new_workspace = Workspace::alloc(num_segments, b, self.storage.pages_per_extent);
        let old_workspace = std::mem::replace(&mut self.storage.workspace, new_workspace);
        let (old_keys, old_values, old_sizes) = old_workspace.borrow_parts();

        self.index.rebuild(num_segments);

        // Input cursor over the old pairs.
        let mut in_seg = 0usize;
        let mut in_cur = b - old_sizes[0] as usize;
        let mut in_end = b + old_sizes[1] as usize;
        let mut bc = 0usize;

        {
            let (keys, values, sizes) = self.storage.parts_mut();
            for j in (0..num_segments).step_by(2) {
                sizes[j] = (elements_per_segment + usize::from(j < odd_segments)) as u16;
                sizes[j + 1] = (elements_per_segment + usize::from(j + 1 < odd_segments)) as u16;

                let out_start = (j + 1) * b - sizes[j] as usize;
                let out_end = out_start + sizes[j] as usize + sizes[j + 1] as usize;
                let mut out = out_start;

                while out < out_end && bc < batch.len() && in_cur < in_end {
                    if old_keys[in_cur] < batch[bc].0 {
                        keys[out] = old_keys[in_cur];
                        values[out] = old_values[in_cur];
                        in_cur += 1;
                        if in_cur >= in_end {
                            in_seg += 2;
                            if in_seg < old_segments {
                                in_cur = (in_seg + 1) * b - old_sizes[in_seg] as usize;
                                in_end = in_cur
                                    + old_sizes[in_seg] as usize
                                    + old_sizes[in_seg + 1] as usize;
                            }
                        }
                    } else {
                        keys[out] = batch[bc].0;
                        values[out] = batch[bc].1;
                        bc += 1;
                    }
                    out += 1;
                }

                while out < out_end && in_cur < in_end {
                    let m = (out_end - out).min(in_end - in_cur);
                    keys[out..out + m].copy_from_slice(&old_keys[in_cur..in_cur + m]);
                    values[out..out + m].copy_from_slice(&old_values[in_cur..in_cur + m]);
                    out += m;
                    in_cur += m;
                    if in_cur >= in_end {
                        in_seg += 2;
                        if in_seg < old_segments {
                            in_cur = (in_seg + 1) * b - old_sizes[in_seg] as usize;
                            in_end = in_cur
                                + old_sizes[in_seg] as usize
                                + old_sizes[in_seg + 1] as usize;
                        }
                    }
                }

                while out < out_end && bc < batch.len() {
                    keys[out] = batch[bc].0;
                    values[out] = batch[bc].1;
                    bc += 1;
                    out += 1;
                }

                self.index.set_separator_key(j, keys[out_start]);
                self.index
                    .set_separator_key(j + 1, keys[out_start + sizes[j] as usize]);
            }
        }

        self.storage.cardinality = cardinality;
        self.storage.capacity = capacity;
        self.storage.number_segments = num_segments;
        self.storage.height = log2(num_segments) + 1;
    }

    fn load_empty(&mut self, batch: &[(i64, i64)]) {
        debug_assert!(self.is_empty());
        let b = self.storage.segment_capacity;
        if b as f64 * self.density.upper_threshold_leaves() >= batch.len() as f64 {
            self.load_empty_single(batch);
        } else {
            self.load_empty_multi(batch);
        }
    }

    /// The batch fits in segment 0 at the leaf density.
    fn load_empty_single(&mut self, batch: &[(i64, i64)]) {
        debug_assert_eq!(self.storage.number_segments, 1);
        let b = self.storage.segment_capacity;
        let n = batch.len();
        debug_assert!(n <= b);

        {
            let (keys, values, sizes) = self.storage.parts_mut();
            let start = b - n;
            for (i, &(key, value)) in batch.iter().enumerate() {
                keys[start + i] = key;
                values[start + i] = value;
            }
            sizes[0] = n as u16;
        }
        self.index.set_separator_key(0, batch[0].0);
        self.storage.cardinality = n;
    }

    /// Replaces the workspace with one sized between the root and leaf
    /// target densities and spreads the batch evenly across it.
    fn load_empty_multi(&mut self, batch: &[(i64, i64)]) {
        let b = self.storage.segment_capacity;
        let n = batch.len();
        let target_density =
            (self.density.upper_threshold_root() + self.density.upper_threshold_leaves()) / 2.0;
        let capacity = hyperceil((n as f64 / target_density).ceil() as usize);
        let num_segments = capacity / b;
        let elements_per_segment = n / num_segments;
        let odd_segments = n % num_segments;
        debug!(batch_len = n, capacity, num_segments, "bulk load into empty");

        self.index.rebuild(num_segments);
        self.storage.workspace = Workspace::alloc(num_segments, b, self.storage.pages_per_extent);

        {
            let (keys, values, sizes) = self.storage.parts_mut();
            for i in 0..num_segments {
                sizes[i] = (elements_per_segment + usize::from(i < odd_segments)) as u16;
            }

            let mut current = 0usize;
            for i in (0..num_segments).step_by(2) {
                let out_start = (i + 1) * b - sizes[i] as usize;
                let out_end = out_start + sizes[i] as usize + sizes[i + 1] as usize;
                for out in out_start..out_end {
                    keys[out] = batch[current].0;
                    values[out] = batch[current].1;
                    current += 1;
                }
                self.index.set_separator_key(i, keys[out_start]);
                self.index
                    .set_separator_key(i + 1, keys[out_start + sizes[i] as usize]);
            }
            debug_assert_eq!(current, n);
        }

        self.storage.cardinality = n;
        self.storage.capacity = capacity;
        self.storage.number_segments = num_segments;
        self.storage.height = log2(num_segments) + 1;

        let height = self.storage.height;
        let _ = self.density.thresholds(height, height);
    }
}
