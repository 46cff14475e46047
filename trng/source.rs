// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! source provides the uniform pull interface over the physical entropy
//! producers feeding the TRNG.
//!
//! Each producer sits behind the [`EntropySource`] trait, which mirrors
//! the handshake of the hardware source ports: a source reports whether
//! it is online (`enabled`), whether a 32-bit word is available (`syn`),
//! and presents the word itself (`data`) until the reader consumes it
//! with `ack`. The core never blocks on a source; `syn=false` simply
//! means no word is available this tick.
//!
//! Sources are collected into a [`SourceSet`], which layers the
//! operator-controlled enable bits, per-source delivery counters, and
//! health aggregation on top of the raw producers.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// EntropySource is the uniform interface over one entropy producer.
///
/// The contract follows the hardware source port: when `syn` returns
/// true, `data` is valid and stable until `ack` is called; after `ack`
/// the source may lower `syn` and present its next word whenever it is
/// ready. Callers must treat `syn=false` as "no word available now"
/// and must not block waiting for it.
///
pub trait EntropySource: Send {
    /// Reports whether the source itself is online and
    /// willing to deliver words. This is the source's own
    /// view; the operator enable bit is layered on top by
    /// the [`SourceSet`].
    ///
    fn enabled(&self) -> bool;

    /// Reports whether a word is currently available.
    ///
    fn syn(&self) -> bool;

    /// The currently presented word. Only meaningful
    /// while `syn` returns true.
    ///
    fn data(&self) -> u32;

    /// Consumes the currently presented word.
    ///
    fn ack(&mut self);

    /// Reports whether the source's online health tests
    /// have failed. Most sources have no self-tests and
    /// report healthy forever.
    ///
    fn error(&self) -> bool {
        false
    }

    /// Advances the source by one logical tick. Free-running
    /// producers use this to model their word rate; sources
    /// fed from outside ignore it.
    ///
    fn tick(&mut self) {}
}

/// Identifies one entropy source within a [`SourceSet`].
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceId(usize);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "source {}", self.0)
    }
}

/// A point-in-time view of one source's state, as forwarded
/// through the status surface.
///
#[derive(Clone, Copy, Debug)]
pub struct SourceHealth {
    /// The source's id.
    pub id: SourceId,

    /// The operator enable bit.
    pub enabled: bool,

    /// The source's self-reported online flag.
    pub online: bool,

    /// Whether the source's health tests have failed.
    pub error: bool,

    /// How many words the reader has consumed from
    /// this source.
    pub words: u64,
}

/// Pairs a producer with its operator state.
///
struct SourceHandle {
    id: SourceId,

    // The operator enable bit. A disabled source is
    // never acked, even if it raises `syn`.
    enabled: bool,

    // Words consumed from this source by the reader.
    words: u64,

    source: Box<dyn EntropySource>,
}

/// SourceSet is the ordered collection of entropy sources the
/// round-robin reader samples from.
///
/// The set preserves insertion order, which fixes the scan order
/// used by the reader's rotating cursor.
///
pub struct SourceSet {
    sources: Vec<SourceHandle>,

    // Tracks the previous aggregate error state so the
    // rising edge can be logged exactly once.
    had_error: bool,
}

impl SourceSet {
    /// Returns an empty source set.
    ///
    pub fn new() -> Self {
        SourceSet {
            sources: Vec::new(),
            had_error: false,
        }
    }

    /// Adds a producer to the set, enabled, and returns
    /// its id. Sources are never removed while the
    /// pipeline runs; use [`enable`](SourceSet::enable)
    /// to take one out of rotation.
    ///
    pub fn add(&mut self, source: Box<dyn EntropySource>) -> SourceId {
        let id = SourceId(self.sources.len());
        self.sources.push(SourceHandle {
            id,
            enabled: true,
            words: 0,
            source,
        });

        id
    }

    /// The number of sources in the set.
    ///
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the set is empty.
    ///
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sets the operator enable bit for the given source.
    /// Returns false if the id is unknown.
    ///
    pub fn enable(&mut self, id: SourceId, enabled: bool) -> bool {
        match self.sources.get_mut(id.0) {
            None => false,
            Some(handle) => {
                handle.enabled = enabled;
                true
            }
        }
    }

    /// Reports whether the source at the given index is
    /// ready to deliver a word: operator-enabled, online,
    /// and presenting `syn`.
    ///
    pub(crate) fn ready(&self, index: usize) -> bool {
        let handle = &self.sources[index];
        handle.enabled && handle.source.enabled() && handle.source.syn()
    }

    /// Consumes and returns the word presented by the
    /// source at the given index. The caller must have
    /// checked [`ready`](SourceSet::ready) this tick.
    ///
    pub(crate) fn take_word(&mut self, index: usize) -> u32 {
        let handle = &mut self.sources[index];
        let word = handle.source.data();
        handle.source.ack();
        handle.words += 1;

        word
    }

    /// Advances every source by one logical tick and
    /// re-evaluates the aggregate health state.
    ///
    pub(crate) fn tick(&mut self) {
        for handle in self.sources.iter_mut() {
            handle.source.tick();
        }

        let error = self.security_error();
        if error && !self.had_error {
            log::warn!("entropy source health failure reported");
        }

        self.had_error = error;
    }

    /// The TRNG-wide security error flag: the OR of every
    /// source's health failure flag.
    ///
    pub fn security_error(&self) -> bool {
        self.sources.iter().any(|handle| handle.source.error())
    }

    /// Returns a health snapshot for every source, in
    /// scan order.
    ///
    pub fn health(&self) -> Vec<SourceHealth> {
        self.sources
            .iter()
            .map(|handle| SourceHealth {
                id: handle.id,
                enabled: handle.enabled,
                online: handle.source.enabled(),
                error: handle.source.error(),
                words: handle.words,
            })
            .collect()
    }
}
