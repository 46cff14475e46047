// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! reader provides fair per-word sampling across the entropy sources.
//!
//! The reader fills one mix block slot per tick at most. For each
//! slot it scans the sources starting at a persistent rotating
//! cursor, skipping sources that are disabled or have no word ready,
//! and consumes the first ready word it finds. The cursor then moves
//! one position past the source that was scanned to, so a fast
//! source cannot crowd out a slow one: after delivering, a source
//! goes to the back of the scan order, and over any window of 32
//! slots each continuously-ready source lands within one word of an
//! even share.
//!
//! If no source is ready the slot is simply not filled this tick.
//! That is not an error; it shows up only as reduced throughput.

use crate::mixer::MixBlock;
use crate::source::SourceSet;

/// Reader samples words from a [`SourceSet`] into mix blocks,
/// one slot per tick.
///
pub struct Reader {
    // The rotating scan cursor. Persists across
    // slots and blocks.
    cursor: usize,
}

impl Reader {
    /// Returns a reader with its cursor at the first
    /// source.
    ///
    pub fn new() -> Self {
        Reader { cursor: 0 }
    }

    /// Attempts to fill the next slot of the given block
    /// with a word from the first ready source at or
    /// after the cursor. Returns whether a slot was
    /// filled.
    ///
    /// A full block, an empty source set, or a tick on
    /// which every source is stalled all leave the block
    /// and the cursor untouched.
    ///
    pub fn fill_slot(&mut self, sources: &mut SourceSet, block: &mut MixBlock) -> bool {
        if block.is_full() || sources.is_empty() {
            return false;
        }

        let count = sources.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            if !sources.ready(index) {
                continue;
            }

            let word = sources.take_word(index);
            block.push(word);

            // The scan stopped at `index`; the cursor
            // advances one past it, sending the source
            // that just delivered to the back of the
            // scan order.
            self.cursor = (index + 1) % count;

            return true;
        }

        false
    }
}
