// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! mixer provides the hash-chained entropy conditioner.
//!
//! The mixer accumulates sampled words into 1024-bit mix blocks and
//! folds each full block into a running SHA-512 state. A mix block is
//! exactly one SHA-512 message block, so each absorption is a single
//! application of the compression function, with no padding and no
//! finalization: the chain is one endless message that is extended
//! for as long as the TRNG lives. A seed fragment is a snapshot of
//! the interior state after an absorption, which makes every fragment
//! depend on all entropy ever absorbed, not just the block that
//! preceded it.
//!
//! The chain state never leaves this module. On a discard the mixer
//! scrubs the in-flight block and any unclaimed fragment, but the
//! chain itself deliberately survives; only an explicit operator
//! restart reinitializes it.

use sha2::compress512;
use sha2::digest::generic_array::typenum::U128;
use sha2::digest::generic_array::GenericArray;
use zeroize::Zeroize;

/// The number of 32-bit slots in a mix block.
///
pub const SLOT_COUNT: usize = 32;

/// The size of a serialized mix block in bytes.
///
pub const BLOCK_BYTES: usize = SLOT_COUNT * 4;

/// The size of a seed fragment in bytes.
///
pub const FRAGMENT_SIZE: usize = 64;

/// The SHA-512 initial hash state.
///
const INITIAL_STATE: [u64; 8] = [
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
    0xa54ff53a5f1d36f1,
    0x510e527fade682d1,
    0x9b05688c2b3e6c1f,
    0x1f83d9abfb41bd6b,
    0x5be0cd19137e2179,
];

/// A 1024-bit entropy accumulation buffer.
///
/// Slots are filled strictly in ascending order by the reader;
/// the block is full once all 32 slots have been written since
/// the last reset.
///
pub struct MixBlock {
    slots: [u32; SLOT_COUNT],
    filled: usize,
}

impl MixBlock {
    /// Returns an empty block.
    ///
    pub fn new() -> Self {
        MixBlock {
            slots: [0u32; SLOT_COUNT],
            filled: 0,
        }
    }

    /// Stores a word in the next free slot. Words
    /// pushed into a full block are dropped; the
    /// reader never offers one.
    ///
    pub fn push(&mut self, word: u32) {
        debug_assert!(self.filled < SLOT_COUNT, "push into full mix block");
        if self.filled < SLOT_COUNT {
            self.slots[self.filled] = word;
            self.filled += 1;
        }
    }

    /// Whether all 32 slots have been written.
    ///
    pub fn is_full(&self) -> bool {
        self.filled == SLOT_COUNT
    }

    /// Whether no slot has been written.
    ///
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Scrubs the slots and marks the block empty.
    ///
    pub fn reset(&mut self) {
        self.slots.zeroize();
        self.filled = 0;
    }

    /// The slot words written so far, for inspection
    /// in tests.
    ///
    #[cfg(test)]
    pub(crate) fn slots(&self) -> &[u32] {
        &self.slots[..self.filled]
    }

    /// Serializes the block as a SHA-512 message block,
    /// each slot big-endian in slot order.
    ///
    fn to_bytes(&self, out: &mut [u8; BLOCK_BYTES]) {
        for (i, word) in self.slots.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
    }
}

/// The running SHA-512 state of the mixer.
///
/// Unlike a conventional hash, the chain exposes a snapshot of
/// its interior state rather than a finalized digest, so the
/// message can keep growing after every read.
///
struct Chain {
    state: [u64; 8],
}

impl Chain {
    fn new() -> Self {
        Chain {
            state: INITIAL_STATE, // Copy.
        }
    }

    /// Extends the message with one 1024-bit block.
    ///
    fn absorb(&mut self, block: &[u8; BLOCK_BYTES]) {
        let block: GenericArray<u8, U128> = GenericArray::clone_from_slice(&block[..]);
        compress512(&mut self.state, core::slice::from_ref(&block));
    }

    /// Writes the current interior state into `out`,
    /// big-endian, without finalizing the chain.
    ///
    fn snapshot(&self, out: &mut [u8; FRAGMENT_SIZE]) {
        for (i, word) in self.state.iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&word.to_be_bytes());
        }
    }

    /// Scrubs the state and starts a fresh chain.
    ///
    fn restart(&mut self) {
        self.state.zeroize();
        self.state = INITIAL_STATE;
    }
}

/// The mixer's state machine.
///
#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    /// Waiting for the expander to ask for seed material.
    Idle,

    /// Accumulating sampled words into the mix block.
    Collect,

    /// Folding the full block into the hash chain.
    Absorb,

    /// Holding a seed fragment until the expander
    /// acknowledges it.
    Emit,

    /// Scrubbing in-flight state after a discard.
    Cancel,
}

/// The level signals the mixer samples on each tick.
///
pub struct MixerInputs {
    /// The expander wants (more) seed material.
    pub more_seed: bool,

    /// The expander consumed the presented fragment
    /// last tick.
    pub seed_ack: bool,

    /// Discard command from the control surface.
    pub discard: bool,

    /// The TRNG enable bit.
    pub enable: bool,
}

/// Mixer derives seed fragments from accumulated entropy blocks.
///
pub struct Mixer {
    state: State,
    block: MixBlock,
    chain: Chain,
    fragment: [u8; FRAGMENT_SIZE],
}

impl Mixer {
    /// Returns a mixer with a freshly initialized hash
    /// chain. The chain is initialized here, exactly
    /// once; every block absorbed later extends the
    /// same message.
    ///
    pub fn new() -> Self {
        Mixer {
            state: State::Idle,
            block: MixBlock::new(),
            chain: Chain::new(),
            fragment: [0u8; FRAGMENT_SIZE],
        }
    }

    /// Whether the mixer is accumulating words, i.e.
    /// the reader should fill a slot this tick.
    ///
    pub fn collecting(&self) -> bool {
        self.state == State::Collect && !self.block.is_full()
    }

    /// The mix block being filled.
    ///
    pub fn block_mut(&mut self) -> &mut MixBlock {
        &mut self.block
    }

    /// Whether a seed fragment is presented.
    ///
    pub fn seed_valid(&self) -> bool {
        self.state == State::Emit
    }

    /// The presented seed fragment. Only meaningful
    /// while [`seed_valid`](Mixer::seed_valid) is true.
    ///
    pub fn fragment(&self) -> &[u8; FRAGMENT_SIZE] {
        &self.fragment
    }

    /// Advances the state machine by one tick.
    ///
    pub fn step(&mut self, inputs: MixerInputs) {
        // A discard (or the enable bit dropping) preempts
        // whatever was in flight. Idle has nothing to
        // scrub, and a cancel in progress is left to
        // finish.
        if inputs.discard || !inputs.enable {
            if !matches!(self.state, State::Idle | State::Cancel) {
                self.state = State::Cancel;
                return;
            }
        }

        self.state = match self.state {
            State::Idle => {
                if inputs.enable && inputs.more_seed {
                    State::Collect
                } else {
                    State::Idle
                }
            }

            State::Collect => {
                if self.block.is_full() {
                    State::Absorb
                } else {
                    State::Collect
                }
            }

            State::Absorb => {
                let mut bytes = [0u8; BLOCK_BYTES];
                self.block.to_bytes(&mut bytes);
                self.chain.absorb(&bytes);
                self.chain.snapshot(&mut self.fragment);
                bytes.zeroize();
                self.block.reset();

                State::Emit
            }

            State::Emit => {
                if inputs.seed_ack {
                    // The fragment is the expander's now;
                    // the mixer does not retain it.
                    self.fragment.zeroize();

                    if inputs.more_seed {
                        State::Collect
                    } else {
                        State::Idle
                    }
                } else {
                    State::Emit
                }
            }

            State::Cancel => {
                // Scrub the in-flight block and fragment.
                // The chain survives: a discard must not
                // throw away the entropy already absorbed.
                self.block.reset();
                self.fragment.zeroize();

                State::Idle
            }
        };
    }

    /// Operator restart: scrubs everything, including
    /// the hash chain, and reinitializes it. This is
    /// the only way to reinitialize the chain after
    /// construction.
    ///
    pub fn restart(&mut self) {
        self.block.reset();
        self.fragment.zeroize();
        self.chain.restart();
        self.state = State::Idle;
    }
}
