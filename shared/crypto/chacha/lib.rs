// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the original ChaCha stream cipher as a keystream block
//! generator.
//!
//! This is the variant described in djb's ChaCha paper, with a 64-bit
//! IV and a 64-bit block counter, rather than the IETF variant from
//! RFC 7539. The round count is chosen when the cipher state is
//! created, rather than being fixed at 20, so the same state machine
//! can run ChaCha8, ChaCha12, ChaCha20, or the more conservative
//! round counts used by hardware random number generators.
//!
//! This is deliberately quite a simple, conservative implementation.
//! The priorities for this crate, in order, are:
//!
//! 1. Correctness
//! 2. Readability
//! 3. Performance
//!
//! As a result, the crate is currently implemented in pure Rust.
//!
//! Unlike a general-purpose cipher, this crate only produces raw
//! keystream blocks. Callers that want to encrypt data XOR the
//! keystream with their plaintext themselves.
//!
//! # Examples
//!
//! Generate a block of keystream:
//!
//! ```
//! use chacha::{ChaCha, BLOCK_SIZE};
//!
//! let key = [0u8; 32];
//! let iv = [0u8; 8];
//!
//! // Create the cipher state, running
//! // the standard 20 rounds.
//! let mut cipher = ChaCha::new(&key, &iv, 0, 20).unwrap();
//!
//! // Produce the first keystream block.
//! let mut block = [0u8; BLOCK_SIZE];
//! cipher.next_block(&mut block);
//! ```

#![no_std]

use zeroize::Zeroize;

/// The size of a ChaCha key in bytes.
///
pub const KEY_SIZE: usize = 32;

/// The size of a ChaCha IV in bytes.
///
/// This is the 64-bit IV of the original
/// cipher, not the 96-bit nonce of the
/// IETF variant.
///
pub const IV_SIZE: usize = 8;

/// The size of a ChaCha keystream block
/// in bytes.
///
pub const BLOCK_SIZE: usize = 64;

/// The smallest round count the cipher
/// will accept.
///
pub const MIN_ROUNDS: u8 = 8;

/// The largest round count the cipher
/// will accept.
///
pub const MAX_ROUNDS: u8 = 31;

/// The first 4 words of the ChaCha
/// state.
///
const WORDS: [u32; 4] = [
    0x61707865, // expa
    0x3320646e, // nd 3
    0x79622d32, // 2-by
    0x6b206574, // te k
];

/// Represents an error that can occur
/// while using ChaCha.
///
#[derive(Debug, PartialEq)]
pub enum Error {
    /// The requested round count is
    /// outside [`MIN_ROUNDS`, `MAX_ROUNDS`].
    InvalidRounds(u8),
}

/// The ChaCha cipher state.
///
/// The state produces one 512-bit keystream
/// block at a time, incrementing the 64-bit
/// block counter after each block. The
/// counter wraps silently if it overflows;
/// callers that need a bounded keystream
/// enforce their own block budget.
///
pub struct ChaCha {
    key: [u32; 8],
    counter: u64,
    iv: [u32; 2],
    rounds: u8,
}

impl ChaCha {
    /// Returns a ChaCha cipher state, which
    /// can be used to produce a key stream.
    ///
    /// The counter is the initial value of
    /// the 64-bit block counter. `new` returns
    /// an error if the round count is outside
    /// [`MIN_ROUNDS`, `MAX_ROUNDS`].
    ///
    pub fn new(
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        counter: u64,
        rounds: u8,
    ) -> Result<Self, Error> {
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&rounds) {
            return Err(Error::InvalidRounds(rounds));
        }

        Ok(ChaCha {
            key: [
                u32::from_le_bytes([key[0x00], key[0x01], key[0x02], key[0x03]]),
                u32::from_le_bytes([key[0x04], key[0x05], key[0x06], key[0x07]]),
                u32::from_le_bytes([key[0x08], key[0x09], key[0x0a], key[0x0b]]),
                u32::from_le_bytes([key[0x0c], key[0x0d], key[0x0e], key[0x0f]]),
                u32::from_le_bytes([key[0x10], key[0x11], key[0x12], key[0x13]]),
                u32::from_le_bytes([key[0x14], key[0x15], key[0x16], key[0x17]]),
                u32::from_le_bytes([key[0x18], key[0x19], key[0x1a], key[0x1b]]),
                u32::from_le_bytes([key[0x1c], key[0x1d], key[0x1e], key[0x1f]]),
            ],
            counter,
            iv: [
                u32::from_le_bytes([iv[0x00], iv[0x01], iv[0x02], iv[0x03]]),
                u32::from_le_bytes([iv[0x04], iv[0x05], iv[0x06], iv[0x07]]),
            ],
            rounds,
        })
    }

    /// Returns the current value of the
    /// block counter.
    ///
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Returns the current key state.
    ///
    fn key_state(&self) -> KeyState {
        KeyState {
            s: [
                WORDS[0],
                WORDS[1],
                WORDS[2],
                WORDS[3],
                self.key[0],
                self.key[1],
                self.key[2],
                self.key[3],
                self.key[4],
                self.key[5],
                self.key[6],
                self.key[7],
                self.counter as u32,
                (self.counter >> 32) as u32,
                self.iv[0],
                self.iv[1],
            ],
        }
    }

    /// Fills the given slice with the
    /// next block of key stream, advancing
    /// the block counter.
    ///
    pub fn next_block(&mut self, block: &mut [u8; BLOCK_SIZE]) {
        let next = self.key_state().advance(self.rounds);
        for (i, word) in next.s.iter().enumerate() {
            block[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }

        self.counter = self.counter.wrapping_add(1);
    }
}

impl Zeroize for ChaCha {
    /// Scrubs the key, counter, and IV.
    ///
    /// The round count is configuration,
    /// not key material, so it is left
    /// intact.
    ///
    fn zeroize(&mut self) {
        self.key.zeroize();
        self.counter.zeroize();
        self.iv.zeroize();
    }
}

/// Represents the ChaCha internal key
/// state.
///
#[derive(Clone, Debug, PartialEq)]
struct KeyState {
    s: [u32; 16],
}

impl KeyState {
    /// Performs the ChaCha block function.
    /// This duplicates the key state, then
    /// advances it the given number of
    /// rounds, returning the final processed
    /// state.
    ///
    /// Even-numbered rounds operate on the
    /// columns of the state and odd-numbered
    /// rounds on its diagonals, so a round
    /// count of 20 performs the 10 double
    /// rounds of the standard cipher.
    ///
    fn advance(self, rounds: u8) -> KeyState {
        let mut state = self.clone();

        for round in 0..rounds {
            if round % 2 == 0 {
                state.quarter_round(0x0, 0x4, 0x8, 0xc);
                state.quarter_round(0x1, 0x5, 0x9, 0xd);
                state.quarter_round(0x2, 0x6, 0xa, 0xe);
                state.quarter_round(0x3, 0x7, 0xb, 0xf);
            } else {
                state.quarter_round(0x0, 0x5, 0xa, 0xf);
                state.quarter_round(0x1, 0x6, 0xb, 0xc);
                state.quarter_round(0x2, 0x7, 0x8, 0xd);
                state.quarter_round(0x3, 0x4, 0x9, 0xe);
            }
        }

        // Add the original state to the
        // result, using vector addition.
        for (new, old) in state.s.iter_mut().zip(self.s.iter()) {
            *new = new.wrapping_add(*old);
        }

        state
    }

    /// Performs a quarter round operation
    /// on the given indices into the key
    /// state, as described in RFC 7539,
    /// section 2.2.
    ///
    /// Each of the indices must be in the
    /// range [0, 16).
    ///
    fn quarter_round(&mut self, a: usize, b: usize, c: usize, d: usize) {
        (self.s[a], self.s[b], self.s[c], self.s[d]) =
            quarter_round(self.s[a], self.s[b], self.s[c], self.s[d]);
    }
}

/// Performs a quarter round operation, as
/// described in RFC 7539, section 2.1:
///
/// ```c
/// a += b; d ^= a; d <<<= 16;
/// c += d; b ^= c; b <<<= 12;
/// a += b; d ^= a; d <<<= 8;
/// c += d; b ^= c; b <<<= 7;
/// ```
///
fn quarter_round(a: u32, b: u32, c: u32, d: u32) -> (u32, u32, u32, u32) {
    // Make the four values mutable within the function.
    let mut a = a;
    let mut b = b;
    let mut c = c;
    let mut d = d;

    a = a.wrapping_add(b);
    d ^= a;
    d = d.rotate_left(16);

    c = c.wrapping_add(d);
    b ^= c;
    b = b.rotate_left(12);

    a = a.wrapping_add(b);
    d ^= a;
    d = d.rotate_left(8);

    c = c.wrapping_add(d);
    b ^= c;
    b = b.rotate_left(7);

    (a, b, c, d)
}
