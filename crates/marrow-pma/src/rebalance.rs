//! Window search and resize.
//!
//! After a segment over- or underflows, the calibrator tree is walked from
//! the leaf upwards: at each height the window doubles and the element
//! count is extended incrementally to the new bounds. The first window
//! whose density falls inside its band is redistributed; if even the root
//! is out of band, the whole array resizes.

use crate::rewired::RewiredSpread;
use crate::storage::Workspace;
use crate::PmaIndex;
use marrow_common::size::log2;
use tracing::debug;

/// A pending element carried into a spread triggered by an insert into a
/// full segment.
pub(crate) struct SpreadInsert {
    pub(crate) key: i64,
    pub(crate) value: i64,
    pub(crate) segment_id: usize,
}

impl PmaIndex {
    /// Rebalances around `segment_id`. `insertion` is the pending pair when
    /// the trigger was an insert into a full segment.
    pub(crate) fn rebalance(&mut self, segment_id: usize, insertion: Option<(i64, i64)>) {
        let b = self.storage.segment_capacity;
        let is_insert = insertion.is_some();
        let mut num_elements = if is_insert {
            b + 1
        } else {
            self.storage.sizes()[segment_id] as usize
        };

        // These bounds only hold for the degenerate one-segment tree; the
        // loop below replaces them as soon as there is a window to grow.
        let mut rho = 0.0f64;
        let mut theta = 1.0f64;
        let mut density = num_elements as f64 / b as f64;
        let mut height = 1usize;

        let mut window_length = 1usize;
        let mut window_id = segment_id;
        let mut window_start = segment_id;

        if self.storage.height > 1 {
            let mut index_left = segment_id as i64 - 1;
            let mut index_right = segment_id + 1;

            loop {
                height += 1;
                window_length *= 2;
                window_id /= 2;
                window_start = window_id * window_length;
                let window_end = window_start + window_length;
                let bounds = self.density.thresholds(height, self.storage.height);
                rho = bounds.0;
                theta = bounds.1;

                let sizes = self.storage.sizes();
                while index_left >= window_start as i64 {
                    num_elements += sizes[index_left as usize] as usize;
                    index_left -= 1;
                }
                while index_right < window_end {
                    num_elements += sizes[index_right] as usize;
                    index_right += 1;
                }

                density = num_elements as f64 / (window_length * b) as f64;

                let out_of_band =
                    (is_insert && density > theta) || (!is_insert && density < rho);
                if !(out_of_band && height < self.storage.height) {
                    break;
                }
            }
        }

        if (is_insert && density <= theta) || (!is_insert && density >= rho) {
            let spread_insertion = insertion.map(|(key, value)| SpreadInsert {
                key,
                value,
                segment_id,
            });
            self.spread(num_elements, window_start, window_length, spread_insertion);
        } else {
            self.resize(insertion);
        }
    }

    /// Redistributes `cardinality` elements (including a pending insert)
    /// over the given window, choosing the rewired strategy once the
    /// window spans at least one extent.
    pub(crate) fn spread(
        &mut self,
        cardinality: usize,
        window_start: usize,
        window_length: usize,
        insertion: Option<SpreadInsert>,
    ) {
        let b = self.storage.segment_capacity;
        let window_bytes = window_length * b * std::mem::size_of::<i64>();
        if self.storage.rewired_spread_available()
            && window_bytes >= self.storage.extent_size_bytes()
        {
            // The rewired spread distributes only the elements already
            // stored; the pending pair is placed by a segment-local insert
            // while the separators are refreshed.
            let existing = cardinality - usize::from(insertion.is_some());
            let mut spread = RewiredSpread::new(
                &mut self.storage,
                &mut self.index,
                window_start,
                window_length,
                existing,
                &[],
            );
            if let Some(si) = insertion {
                spread.set_element_to_insert(si.key, si.value);
            }
            spread.execute();
        } else {
            self.spread_two_chunk(cardinality, window_start, window_length, insertion);
        }
    }

    /// Doubles the capacity on insert, halves it on delete.
    fn resize(&mut self, insertion: Option<(i64, i64)>) {
        let b = self.storage.segment_capacity;
        let array_bytes = self.storage.number_segments * b * std::mem::size_of::<i64>();
        if insertion.is_some()
            && self.storage.rewired_spread_available()
            && array_bytes >= self.storage.extent_size_bytes()
        {
            let (key, value) = insertion.unwrap();
            self.resize_rewire(key, value);
        } else {
            self.resize_general(insertion);
        }

        // Regenerate the cached thresholds for the new tree height.
        let height = self.storage.height;
        let _ = self.density.thresholds(height, height);
    }

    /// Doubling resize that grows the extent regions in place and spreads
    /// right-to-left instead of copying into a fresh workspace.
    fn resize_rewire(&mut self, key: i64, value: i64) {
        let b = self.storage.segment_capacity;
        let segments_before = self.storage.number_segments;
        let segments_after = segments_before * 2;
        debug!(segments_before, segments_after, "resize up, rewired");

        let start_position =
            (segments_before - 1) * b + self.storage.sizes()[segments_before - 1] as usize;

        self.storage.extend(segments_before);
        self.index.rebuild(segments_after);

        let cardinality = self.storage.cardinality;
        let mut spread = RewiredSpread::new(
            &mut self.storage,
            &mut self.index,
            0,
            segments_after,
            cardinality,
            &[],
        );
        spread.set_element_to_insert(key, value);
        spread.set_start_position(start_position);
        spread.execute();
    }

    /// Streaming resize into a freshly allocated workspace.
    fn resize_general(&mut self, insertion: Option<(i64, i64)>) {
        let b = self.storage.segment_capacity;
        let is_insert = insertion.is_some();
        let capacity = if is_insert {
            self.storage.capacity * 2
        } else {
            self.storage.capacity / 2
        };
        let num_segments = capacity / b;
        let cardinality = self.storage.cardinality;
        let elements_per_segment = cardinality / num_segments;
        let odd_segments = cardinality % num_segments;
        debug!(
            capacity_before = self.storage.capacity,
            capacity_after = capacity,
            num_segments,
            "resize, general"
        );

        let old_segments = self.storage.number_segments;
        let new_workspace = Workspace::alloc(num_segments, b, self.storage.pages_per_extent);
        let old_workspace = std::mem::replace(&mut self.storage.workspace, new_workspace);
        let (old_keys, old_values, old_sizes) = old_workspace.borrow_parts();

        self.index.rebuild(num_segments);

        // Input cursor over the old arrays. A delete can leave one empty
        // segment behind; skip it here and wherever the cursor advances.
        let mut input_segment = 0usize;
        let mut input_odd = false;
        let mut input_size = old_sizes[0] as usize;
        let mut input_pos;
        if input_size == 0 {
            debug_assert!(!is_insert);
            input_segment = 1;
            input_odd = true;
            input_size = old_sizes[1] as usize;
            input_pos = b;
        } else {
            input_pos = b - input_size;
        }

        let mut pending = insertion;
        let mut pending_target = None;

        {
            let (keys, values, sizes) = self.storage.parts_mut();
            let mut output_odd = false;

            for j in 0..num_segments {
                let segment_count = elements_per_segment + usize::from(j < odd_segments);
                let output_offset = if output_odd { 0 } else { b - segment_count };
                let mut out_pos = j * b + output_offset;
                sizes[j] = segment_count as u16;
                if input_pos < old_keys.len() {
                    self.index.set_separator_key(j, old_keys[input_pos]);
                }

                let mut elements_to_copy = segment_count;
                loop {
                    let cpy = elements_to_copy.min(input_size);
                    keys[out_pos..out_pos + cpy]
                        .copy_from_slice(&old_keys[input_pos..input_pos + cpy]);
                    values[out_pos..out_pos + cpy]
                        .copy_from_slice(&old_values[input_pos..input_pos + cpy]);
                    out_pos += cpy;
                    input_pos += cpy;
                    input_size -= cpy;
                    elements_to_copy -= cpy;

                    if input_size == 0 {
                        input_segment += 1;
                        input_odd = !input_odd;
                        if input_segment < old_segments {
                            input_size = old_sizes[input_segment] as usize;
                            if input_size == 0 {
                                debug_assert!(!is_insert);
                                input_segment += 1;
                                input_odd = !input_odd;
                                if input_segment < old_segments {
                                    input_size = old_sizes[input_segment] as usize;
                                    debug_assert!(
                                        input_size > 0,
                                        "at most one empty segment can exist"
                                    );
                                }
                            }
                            if input_segment < old_segments {
                                let offset = if input_odd { 0 } else { b - input_size };
                                input_pos = input_segment * b + offset;
                            }
                        }
                    }

                    if elements_to_copy == 0 {
                        break;
                    }
                }

                if pending.is_some() && pending_target.is_none() && segment_count > 0 {
                    let (key, _) = pending.unwrap();
                    if key < keys[out_pos - 1] {
                        pending_target = Some(j);
                    }
                }

                output_odd = !output_odd;
            }
        }

        // Place the pending element now that the stream copy is done. Its
        // target segment's contents are final, so a segment-local insert
        // is enough.
        if let Some((key, value)) = pending.take() {
            let target = pending_target.unwrap_or(num_segments - 1);
            let minimum = self.storage.insert_into_segment(target, key, value);
            if minimum {
                self.index.set_separator_key(target, key);
            }
        }

        self.storage.capacity = capacity;
        self.storage.number_segments = num_segments;
        self.storage.height = log2(num_segments) + 1;
    }
}
