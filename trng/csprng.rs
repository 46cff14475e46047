// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! csprng provides the seeded keystream expander.
//!
//! The expander turns each seed pair from the mixer into one
//! "epoch" of cipher output. The first 512-bit fragment becomes the
//! working block; the second supplies the ChaCha key, IV, and
//! initial block counter (its top 128 bits are deliberately left
//! unused, matching the hardware seed layout). Each generation step
//! XORs one keystream block into the working block, pushes the
//! result to the output buffer, and charges one block against the
//! epoch's budget. When the budget reaches the configured threshold
//! (hard-capped at 2^60 blocks) the expander goes back to the mixer
//! for a fresh seed pair.
//!
//! A reseed command, a discard, or the enable bit dropping all route
//! through the Cancel state, which scrubs every piece of cipher
//! state and flushes the output buffer before returning to Idle. No
//! keystream block is ever emitted without a complete two-fragment
//! seeding transaction since the most recent reset.

use crate::buffer::OutputBuffer;
use crate::control::Config;
use crate::mixer::FRAGMENT_SIZE;
use chacha::{ChaCha, BLOCK_SIZE, IV_SIZE, KEY_SIZE};
use zeroize::Zeroize;

/// Offsets of the cipher parameters within the second
/// seed fragment.
///
const KEY_OFFSET: usize = 0;
const IV_OFFSET: usize = KEY_OFFSET + KEY_SIZE;
const COUNTER_OFFSET: usize = IV_OFFSET + IV_SIZE;

/// The expander's state machine.
///
#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    /// Dormant: no demand, or not yet seeded.
    Idle,

    /// Waiting for the first seed fragment.
    Seed0,

    /// Requesting the second fragment.
    Await1,

    /// Waiting for the second seed fragment.
    Seed1,

    /// Loading the cipher with the new key material.
    InitBlock,

    /// Waiting for the cipher to report ready.
    InitWait,

    /// Commanding one keystream step.
    Gen,

    /// Waiting for the keystream block and handing it
    /// to the output buffer.
    GenWait,

    /// Deciding whether to generate, reseed, or go
    /// dormant.
    More,

    /// Scrubbing all cipher state after a cancel.
    Cancel,
}

/// The level signals the expander samples on each tick.
///
pub struct CsprngInputs<'a> {
    /// The TRNG enable bit.
    pub enable: bool,

    /// Reseed command: discard this epoch and reseed.
    pub reseed: bool,

    /// Discard command from the control surface.
    pub discard: bool,

    /// The output buffer has a free slot.
    pub needs_more: bool,

    /// The mixer presents a seed fragment.
    pub seed_valid: bool,

    /// The presented fragment. Only meaningful while
    /// `seed_valid` is true.
    pub fragment: &'a [u8; FRAGMENT_SIZE],

    /// The live configuration. Sampled at each seeding,
    /// so configuration writes take effect at the next
    /// epoch.
    pub config: &'a Config,
}

/// Csprng expands seed pairs into a bounded stream of
/// keystream blocks.
///
pub struct Csprng {
    state: State,

    // The active cipher. None until a seeding completes
    // and again after any cancel.
    cipher: Option<ChaCha>,

    // Key material extracted from the second fragment,
    // kept until the cipher is loaded and scrubbed on
    // cancel.
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
    counter: u64,

    // The working block from the first fragment. Every
    // emitted block is keystream XOR working block.
    working: [u8; BLOCK_SIZE],

    // The block being handed to the output buffer.
    pending: [u8; BLOCK_SIZE],

    // Blocks generated this epoch, and the threshold at
    // which the epoch ends.
    budget: u64,
    threshold: u64,

    // Level handshake to the mixer.
    more_seed: bool,

    // One-tick latch: the presented fragment was
    // consumed this tick.
    seed_ack: bool,
}

impl Csprng {
    /// Returns an unseeded expander.
    ///
    pub fn new() -> Self {
        Csprng {
            state: State::Idle,
            cipher: None,
            key: [0u8; KEY_SIZE],
            iv: [0u8; IV_SIZE],
            counter: 0,
            working: [0u8; BLOCK_SIZE],
            pending: [0u8; BLOCK_SIZE],
            budget: 0,
            threshold: 0,
            more_seed: false,
            seed_ack: false,
        }
    }

    /// The level handshake asking the mixer for seed
    /// material.
    ///
    pub fn more_seed(&self) -> bool {
        self.more_seed
    }

    /// Consumes the fragment acknowledgement latched by
    /// the previous tick.
    ///
    pub fn take_seed_ack(&mut self) -> bool {
        core::mem::replace(&mut self.seed_ack, false)
    }

    /// Whether the expander holds a complete seed and is
    /// able to generate keystream.
    ///
    pub fn ready(&self) -> bool {
        match self.state {
            State::Gen | State::GenWait | State::More => true,
            State::Idle => self.cipher.is_some(),
            _ => false,
        }
    }

    /// Keystream blocks generated in the current epoch.
    ///
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Advances the state machine by one tick.
    ///
    pub fn step(&mut self, inputs: CsprngInputs, buffer: &mut OutputBuffer) {
        // Reseed, discard, and the enable bit dropping
        // all preempt the current activity. Idle with no
        // cipher has nothing to throw away, and a cancel
        // already in progress runs to completion; every
        // other state holds key material and must scrub.
        if inputs.discard || inputs.reseed || !inputs.enable {
            let dormant = self.state == State::Idle && self.cipher.is_none();
            if !dormant && self.state != State::Cancel {
                self.state = State::Cancel;
                self.more_seed = false;
                self.seed_ack = false;
                return;
            }
        }

        self.state = match self.state {
            State::Idle => {
                self.more_seed = false;
                if inputs.enable && inputs.needs_more {
                    // Every exit from Idle runs a full
                    // two-fragment seeding before any
                    // output.
                    self.more_seed = true;
                    State::Seed0
                } else {
                    State::Idle
                }
            }

            State::Seed0 => {
                if inputs.seed_valid {
                    self.working.copy_from_slice(&inputs.fragment[..]);
                    self.seed_ack = true;
                    State::Await1
                } else {
                    State::Seed0
                }
            }

            // more_seed stays raised: the second fragment
            // has been requested.
            State::Await1 => State::Seed1,

            State::Seed1 => {
                if inputs.seed_valid {
                    let fragment = inputs.fragment;
                    self.key
                        .copy_from_slice(&fragment[KEY_OFFSET..KEY_OFFSET + KEY_SIZE]);
                    self.iv
                        .copy_from_slice(&fragment[IV_OFFSET..IV_OFFSET + IV_SIZE]);

                    let mut counter = [0u8; 8];
                    counter.copy_from_slice(&fragment[COUNTER_OFFSET..COUNTER_OFFSET + 8]);
                    self.counter = u64::from_le_bytes(counter);

                    // The remaining 128 bits of the
                    // fragment are unused by the seed
                    // layout.
                    self.seed_ack = true;
                    self.more_seed = false;
                    State::InitBlock
                } else {
                    State::Seed1
                }
            }

            State::InitBlock => {
                self.budget = 0;
                self.threshold = inputs.config.reseed_threshold();

                match ChaCha::new(&self.key, &self.iv, self.counter, inputs.config.num_rounds()) {
                    Ok(cipher) => {
                        self.cipher = Some(cipher);
                        State::InitWait
                    }
                    Err(err) => {
                        // The configuration surface
                        // validates round counts, so a
                        // rejected seed means state
                        // corruption. Scrub and start
                        // over.
                        log::warn!("cipher rejected seed: {:?}", err);
                        State::Cancel
                    }
                }
            }

            State::InitWait => State::Gen,

            State::Gen => match self.cipher.as_mut() {
                Some(cipher) => {
                    cipher.next_block(&mut self.pending);
                    for (byte, mask) in self.pending.iter_mut().zip(self.working.iter()) {
                        *byte ^= mask;
                    }
                    State::GenWait
                }
                None => State::Cancel,
            },

            State::GenWait => {
                if buffer.push(&self.pending) {
                    self.pending.zeroize();
                    self.budget += 1;
                    State::More
                } else {
                    State::GenWait
                }
            }

            State::More => {
                if self.budget >= self.threshold {
                    log::debug!("Reseeding CSPRNG.");
                    self.more_seed = true;
                    State::Seed0
                } else if !inputs.needs_more {
                    State::Idle
                } else {
                    State::Gen
                }
            }

            State::Cancel => {
                self.key.zeroize();
                self.iv.zeroize();
                self.counter.zeroize();
                self.working.zeroize();
                self.pending.zeroize();
                self.budget = 0;
                self.threshold = 0;

                if let Some(cipher) = self.cipher.as_mut() {
                    cipher.zeroize();
                }
                self.cipher = None;

                // The buffered output belongs to the
                // cancelled epoch.
                buffer.discard();

                State::Idle
            }
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer;
    use hex_literal::hex;

    /// The seed pair produced by the mixer from repeated
    /// blocks of 0xAAAAAAAA words (see the mixer tests).
    ///
    const FRAGMENT_1: [u8; FRAGMENT_SIZE] = hex!(
        "ca28c716a580a101 4a8d128aa6298977"
        "1fb45e921fe5a8d6 be275a571a846857"
        "230d363f4ea6ba1a 7fe1a26e10524bf0"
        "aeaf73bf52179a8b 0c4bab16d1fd97df"
    );

    const FRAGMENT_2: [u8; FRAGMENT_SIZE] = hex!(
        "53e6d6304ea6b3ff 9547628d03e2d2bf"
        "8022c488069f6a63 498617a6dc3b2cdc"
        "a3d3eac41c5a67ae abfae56110e988b6"
        "7b56f5e32a08f396 35d76f39cef14111"
    );

    /// The first output block for that seed pair with 24
    /// cipher rounds: keystream XOR working block.
    ///
    const OUT_BLOCK_0: [u8; BLOCK_SIZE] = hex!(
        "5d847055b6c846af 57653cfc9f1f24c4"
        "8dad2792d35244e4 b287ab43ae985c74"
        "dff9823cb2f393a3 a540af6492615b82"
        "ad8db6b599f9899f c98b02b7269bef1f"
    );

    fn inputs<'a>(
        needs_more: bool,
        seed_valid: bool,
        fragment: &'a [u8; FRAGMENT_SIZE],
        config: &'a Config,
    ) -> CsprngInputs<'a> {
        CsprngInputs {
            enable: true,
            reseed: false,
            discard: false,
            needs_more,
            seed_valid,
            fragment,
            config,
        }
    }

    /// Walks a fresh expander through a complete seeding
    /// transaction, leaving it in Gen.
    ///
    fn seed(csprng: &mut Csprng, buffer: &mut OutputBuffer, config: &Config) {
        let zero = [0u8; FRAGMENT_SIZE];

        // Idle -> Seed0: demand raises more_seed.
        csprng.step(inputs(true, false, &zero, config), buffer);
        assert!(csprng.more_seed());
        assert!(!csprng.ready());

        // Seed0 consumes the first fragment.
        csprng.step(inputs(true, true, &FRAGMENT_1, config), buffer);
        assert!(csprng.take_seed_ack());

        // Await1 -> Seed1; the old fragment is gone while
        // the mixer prepares the next one.
        csprng.step(inputs(true, false, &zero, config), buffer);
        csprng.step(inputs(true, false, &zero, config), buffer);
        assert!(csprng.more_seed());

        // Seed1 consumes the second fragment.
        csprng.step(inputs(true, true, &FRAGMENT_2, config), buffer);
        assert!(csprng.take_seed_ack());
        assert!(!csprng.more_seed());

        // InitBlock -> InitWait -> Gen.
        csprng.step(inputs(true, false, &zero, config), buffer);
        csprng.step(inputs(true, false, &zero, config), buffer);
    }

    #[test]
    fn test_csprng_first_block() {
        let mut csprng = Csprng::new();
        let mut buffer = OutputBuffer::new();
        let config = Config::new();

        seed(&mut csprng, &mut buffer, &config);
        assert!(csprng.ready());

        // Gen -> GenWait pushes the first block.
        let zero = [0u8; FRAGMENT_SIZE];
        csprng.step(inputs(true, false, &zero, &config), &mut buffer);
        csprng.step(inputs(true, false, &zero, &config), &mut buffer);

        assert_eq!(csprng.budget(), 1);
        assert!(buffer.rnd_valid());
        assert_eq!(*buffer.slots(), {
            let mut want = [[0u8; buffer::SLOT_SIZE]; buffer::SLOT_COUNT];
            want[0] = OUT_BLOCK_0;
            want
        });
    }

    #[test]
    fn test_csprng_no_output_before_seed() {
        let mut csprng = Csprng::new();
        let mut buffer = OutputBuffer::new();
        let config = Config::new();
        let zero = [0u8; FRAGMENT_SIZE];

        // Demand without seed material: the expander
        // waits in Seed0 forever and emits nothing.
        for _ in 0..100 {
            csprng.step(inputs(true, false, &zero, &config), &mut buffer);
        }

        assert!(!buffer.rnd_valid());
        assert!(!csprng.ready());
    }

    #[test]
    fn test_csprng_budget_triggers_reseed() {
        let mut csprng = Csprng::new();
        let mut buffer = OutputBuffer::new();
        let mut config = Config::new();
        config.set_num_blocks(2);

        seed(&mut csprng, &mut buffer, &config);

        let zero = [0u8; FRAGMENT_SIZE];

        // Two blocks: Gen, GenWait, More, Gen, GenWait.
        for _ in 0..5 {
            csprng.step(inputs(true, false, &zero, &config), &mut buffer);
        }
        assert_eq!(csprng.budget(), 2);

        // More sees the exhausted budget and asks the
        // mixer for a fresh seed pair.
        csprng.step(inputs(true, false, &zero, &config), &mut buffer);
        assert!(csprng.more_seed());
        assert!(!csprng.ready());
    }

    #[test]
    fn test_csprng_pauses_when_buffer_full() {
        let mut csprng = Csprng::new();
        let mut buffer = OutputBuffer::new();
        let config = Config::new();

        seed(&mut csprng, &mut buffer, &config);

        let zero = [0u8; FRAGMENT_SIZE];
        let mut guard = 0;
        while buffer.needs_more() {
            let needs_more = buffer.needs_more();
            csprng.step(inputs(needs_more, false, &zero, &config), &mut buffer);

            guard += 1;
            assert!(guard < 100, "buffer never filled");
        }

        assert_eq!(csprng.budget(), buffer::SLOT_COUNT as u64);

        // With the buffer full, More parks in Idle and
        // stops asking for anything.
        csprng.step(inputs(false, false, &zero, &config), &mut buffer);
        csprng.step(inputs(false, false, &zero, &config), &mut buffer);
        assert!(!csprng.more_seed());
        assert!(csprng.ready());
    }

    #[test]
    fn test_csprng_reseed_cancels_epoch() {
        let mut csprng = Csprng::new();
        let mut buffer = OutputBuffer::new();
        let config = Config::new();

        seed(&mut csprng, &mut buffer, &config);

        let zero = [0u8; FRAGMENT_SIZE];
        csprng.step(inputs(true, false, &zero, &config), &mut buffer);
        csprng.step(inputs(true, false, &zero, &config), &mut buffer);
        assert!(buffer.rnd_valid());

        // Pulse reseed: Cancel, then the scrub tick.
        csprng.step(
            CsprngInputs {
                enable: true,
                reseed: true,
                discard: false,
                needs_more: true,
                seed_valid: false,
                fragment: &zero,
                config: &config,
            },
            &mut buffer,
        );
        csprng.step(inputs(true, false, &zero, &config), &mut buffer);

        assert!(!csprng.ready());
        assert!(!buffer.rnd_valid(), "cancel must flush the buffer");
        assert_eq!(csprng.budget(), 0);
        assert_eq!(csprng.key, [0u8; KEY_SIZE]);
        assert_eq!(csprng.working, [0u8; BLOCK_SIZE]);
        assert_eq!(csprng.counter, 0);
    }

    #[test]
    fn test_csprng_disabled_stays_idle() {
        let mut csprng = Csprng::new();
        let mut buffer = OutputBuffer::new();
        let config = Config::new();
        let zero = [0u8; FRAGMENT_SIZE];

        for _ in 0..10 {
            csprng.step(
                CsprngInputs {
                    enable: false,
                    reseed: false,
                    discard: false,
                    needs_more: true,
                    seed_valid: false,
                    fragment: &zero,
                    config: &config,
                },
                &mut buffer,
            );
        }

        assert!(!csprng.more_seed());
        assert!(!csprng.ready());
    }

    #[test]
    fn test_csprng_ignores_fragment_tail() {
        // Two second-fragments differing only in their
        // top 128 bits must produce identical cipher
        // state, since only bits [383:0] are consumed.
        let mut tainted = FRAGMENT_2;
        for byte in tainted[COUNTER_OFFSET + 8..].iter_mut() {
            *byte ^= 0xff;
        }

        let run = |second: &[u8; FRAGMENT_SIZE]| -> [u8; buffer::SLOT_SIZE] {
            let mut csprng = Csprng::new();
            let mut buffer = OutputBuffer::new();
            let config = Config::new();
            let zero = [0u8; FRAGMENT_SIZE];

            csprng.step(inputs(true, false, &zero, &config), &mut buffer);
            csprng.step(inputs(true, true, &FRAGMENT_1, &config), &mut buffer);
            csprng.step(inputs(true, false, &zero, &config), &mut buffer);
            csprng.step(inputs(true, false, &zero, &config), &mut buffer);
            csprng.step(inputs(true, true, second, &config), &mut buffer);
            for _ in 0..4 {
                csprng.step(inputs(true, false, &zero, &config), &mut buffer);
            }

            assert!(buffer.rnd_valid());
            buffer.slots()[0]
        };

        assert_eq!(run(&FRAGMENT_2), run(&tainted));
    }
}
