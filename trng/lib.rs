// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! trng implements the core of a true random number generator: a
//! three-stage datapath that samples raw entropy from independent
//! physical sources, conditions it through a hash-chained mixer, and
//! expands it through a seeded stream cipher into a continuous
//! sequence of 32-bit random words.
//!
//! The pipeline mirrors the synchronous hardware design it descends
//! from. Five components run producer to consumer:
//!
//! 1. Source ports ([`source`], [`sources`]) deliver 32-bit words.
//! 2. The round-robin reader ([`reader`]) samples them fairly.
//! 3. The mixer ([`mixer`]) folds 1024-bit blocks into a persistent
//!    SHA-512 chain and emits 512-bit seed fragments.
//! 4. The CSPRNG ([`csprng`]) expands each seed pair into a bounded
//!    budget of ChaCha keystream blocks.
//! 5. The output buffer ([`buffer`]) decouples block production from
//!    word-at-a-time consumption.
//!
//! Everything advances on a single logical tick, driven by
//! [`Trng::tick`]. No stage ever blocks: backpressure is expressed
//! through polled level signals (`needs_more`, `more_seed`), exactly
//! as in the hardware, and a stage with nothing to do simply does
//! not advance that tick. Commands written through the control
//! surface take effect at the next tick, never retroactively.
//!
//! # Examples
//!
//! ```
//! use trng::sources::channel;
//! use trng::Trng;
//!
//! let mut trng = Trng::new();
//!
//! // Attach a source fed by a driver thread.
//! let (source, feeder) = channel::channel(64);
//! trng.add_source(Box::new(source));
//!
//! // The driver delivers digitized noise words.
//! feeder.push(0x12345678);
//!
//! // Step the pipeline and drain random words.
//! let mut words = [0u32; 4];
//! let _count = trng.generate(&mut words, 10_000);
//! ```

#![no_std]

extern crate alloc;

pub mod buffer;
pub mod control;
pub mod csprng;
pub mod mixer;
pub mod reader;
pub mod source;
pub mod sources;

pub use crate::control::{Config, Error, Status, StatusFlags};
pub use crate::source::{EntropySource, SourceHealth, SourceId};

use crate::buffer::OutputBuffer;
use crate::control::Commands;
use crate::csprng::{Csprng, CsprngInputs};
use crate::mixer::{Mixer, MixerInputs};
use crate::reader::Reader;
use crate::source::SourceSet;
use alloc::boxed::Box;

/// Trng is the assembled datapath: sources, reader, mixer,
/// expander, and output buffer, stepped together on one
/// logical tick.
///
pub struct Trng {
    sources: SourceSet,
    reader: Reader,
    mixer: Mixer,
    csprng: Csprng,
    buffer: OutputBuffer,
    config: Config,
    commands: Commands,
}

impl Trng {
    /// Returns an enabled TRNG with the default
    /// configuration and no sources. At least one
    /// source must be added before the pipeline can
    /// produce anything.
    ///
    pub fn new() -> Self {
        Trng::with_config(Config::new())
    }

    /// Returns an enabled TRNG with the given
    /// configuration.
    ///
    pub fn with_config(config: Config) -> Self {
        Trng {
            sources: SourceSet::new(),
            reader: Reader::new(),
            mixer: Mixer::new(),
            csprng: Csprng::new(),
            buffer: OutputBuffer::new(),
            config,
            commands: Commands::new(),
        }
    }

    /// Registers an entropy source and returns its id.
    ///
    pub fn add_source(&mut self, source: Box<dyn EntropySource>) -> SourceId {
        self.sources.add(source)
    }

    /// Sets the operator enable bit for one source.
    ///
    pub fn enable_source(&mut self, id: SourceId, enabled: bool) -> Result<(), Error> {
        if self.sources.enable(id, enabled) {
            Ok(())
        } else {
            Err(Error::UnknownSource(id))
        }
    }

    /// Sets the cipher round count, taking effect at the
    /// next seeding cycle.
    ///
    pub fn set_num_rounds(&mut self, rounds: u8) -> Result<(), Error> {
        self.config.set_num_rounds(rounds)
    }

    /// Sets the reseed threshold in keystream blocks.
    /// Values above the hard cap are clamped in use.
    ///
    pub fn set_num_blocks(&mut self, blocks: u64) {
        self.config.set_num_blocks(blocks)
    }

    /// Sets the TRNG enable bit. While disabled, the
    /// mixer and expander halt at their next tick;
    /// sources keep running at operator discretion.
    ///
    pub fn set_enable(&mut self, enable: bool) {
        self.commands.set_enable(enable);
    }

    /// Commands the expander to discard its current
    /// epoch and run a fresh two-fragment seeding
    /// cycle.
    ///
    pub fn reseed(&mut self) {
        self.commands.pulse_reseed();
    }

    /// Commands a pipeline flush: buffered output is
    /// scrubbed and the mixer and expander cancel
    /// whatever was in flight. The mixer's hash chain
    /// survives.
    ///
    pub fn discard(&mut self) {
        self.commands.pulse_discard();
    }

    /// Commands an operator restart: a full flush that
    /// also reinitializes the mixer's hash chain. This
    /// is the only command that does.
    ///
    pub fn restart(&mut self) {
        self.commands.pulse_restart();
    }

    /// Advances the whole pipeline by one tick.
    ///
    pub fn tick(&mut self) {
        let restart = self.commands.take_restart();
        let discard = self.commands.take_discard() || restart;
        let reseed = self.commands.take_reseed();
        let enable = self.commands.enabled();

        if restart {
            log::debug!("restarting TRNG pipeline");
            self.mixer.restart();
        }

        if discard {
            // The command flushes the buffer directly;
            // the mixer and expander see the same pulse
            // below and cancel their in-flight state.
            self.buffer.discard();
        }

        self.sources.tick();

        if enable && self.mixer.collecting() {
            self.reader.fill_slot(&mut self.sources, self.mixer.block_mut());
        }

        let seed_ack = self.csprng.take_seed_ack();
        self.mixer.step(MixerInputs {
            more_seed: self.csprng.more_seed(),
            seed_ack,
            discard,
            enable,
        });

        let seed_valid = self.mixer.seed_valid();
        let fragment = *self.mixer.fragment();
        self.csprng.step(
            CsprngInputs {
                enable,
                reseed,
                discard,
                needs_more: self.buffer.needs_more(),
                seed_valid,
                fragment: &fragment,
                config: &self.config,
            },
            &mut self.buffer,
        );
    }

    /// Whether a random word is currently presented.
    ///
    pub fn rnd_valid(&self) -> bool {
        self.buffer.rnd_valid()
    }

    /// The presented random word. Only meaningful while
    /// [`rnd_valid`](Trng::rnd_valid) returns true.
    ///
    pub fn rnd_data(&self) -> u32 {
        self.buffer.rnd_data()
    }

    /// Consumes the presented random word.
    ///
    pub fn rnd_ack(&mut self) {
        self.buffer.rnd_ack();
    }

    /// Ticks the pipeline until `out` is full or
    /// `max_ticks` ticks have elapsed, consuming at most
    /// one word per tick. Returns the number of words
    /// written.
    ///
    /// The bound makes starvation observable instead of
    /// hanging the caller: a pipeline with no working
    /// entropy source simply returns fewer words.
    ///
    pub fn generate(&mut self, out: &mut [u32], max_ticks: usize) -> usize {
        let mut written = 0;
        for _ in 0..max_ticks {
            if written == out.len() {
                break;
            }

            self.tick();
            if self.buffer.rnd_valid() {
                out[written] = self.buffer.rnd_data();
                self.buffer.rnd_ack();
                written += 1;
            }
        }

        written
    }

    /// Fills `buf` with random bytes, little-endian word
    /// by word, within the same tick bound as
    /// [`generate`](Trng::generate). Returns the number
    /// of bytes written, which is short only if the
    /// pipeline starved.
    ///
    pub fn read(&mut self, buf: &mut [u8], max_ticks: usize) -> usize {
        let mut written = 0;
        let mut ticks = 0;
        while written < buf.len() && ticks < max_ticks {
            self.tick();
            ticks += 1;

            if !self.buffer.rnd_valid() {
                continue;
            }

            let word = self.buffer.rnd_data();
            self.buffer.rnd_ack();

            let bytes = word.to_le_bytes();
            let take = bytes.len().min(buf.len() - written);
            buf[written..written + take].copy_from_slice(&bytes[..take]);
            written += take;
        }

        written
    }

    /// The TRNG-wide security error flag: the OR of
    /// every source's health failure flag.
    ///
    pub fn security_error(&self) -> bool {
        self.sources.security_error()
    }

    /// Returns a status snapshot.
    ///
    pub fn status(&self) -> Status {
        let mut flags = StatusFlags::empty();
        if self.csprng.ready() {
            flags |= StatusFlags::READY;
        }
        if self.buffer.rnd_valid() {
            flags |= StatusFlags::RND_VALID;
        }
        if self.sources.security_error() {
            flags |= StatusFlags::SECURITY_ERROR;
        }

        Status {
            flags,
            block_budget: self.csprng.budget(),
            sources: self.sources.health(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sources::constant::ConstantSource;

    #[test]
    fn test_pipeline_produces_output() {
        let mut trng = Trng::new();
        trng.add_source(Box::new(ConstantSource::new(0xAAAAAAAA, 1)));

        let mut words = [0u32; 8];
        let got = trng.generate(&mut words, 10_000);
        assert_eq!(got, 8);
    }

    #[test]
    fn test_pipeline_stalls_without_sources() {
        let mut trng = Trng::new();

        let mut words = [0u32; 1];
        let got = trng.generate(&mut words, 1000);
        assert_eq!(got, 0, "no source, no output");
        assert!(!trng.rnd_valid());
    }

    #[test]
    fn test_pipeline_disabled_is_quiet() {
        let mut trng = Trng::new();
        trng.add_source(Box::new(ConstantSource::new(1, 1)));
        trng.set_enable(false);

        let mut words = [0u32; 1];
        assert_eq!(trng.generate(&mut words, 1000), 0);

        // Re-enabling brings the pipeline back.
        trng.set_enable(true);
        assert_eq!(trng.generate(&mut words, 10_000), 1);
    }

    #[test]
    fn test_pipeline_status_flags() {
        let mut trng = Trng::new();
        trng.add_source(Box::new(ConstantSource::new(1, 1)));

        let status = trng.status();
        assert!(!status.flags.contains(StatusFlags::READY));
        assert!(!status.flags.contains(StatusFlags::RND_VALID));
        assert!(!status.flags.contains(StatusFlags::SECURITY_ERROR));

        let mut words = [0u32; 1];
        trng.generate(&mut words, 10_000);

        let status = trng.status();
        assert!(status.flags.contains(StatusFlags::READY));
        assert!(status.flags.contains(StatusFlags::RND_VALID));
        assert_eq!(status.sources.len(), 1);
        assert!(status.sources[0].words > 0);
    }

    #[test]
    fn test_pipeline_read_bytes() {
        let mut trng = Trng::new();
        trng.add_source(Box::new(ConstantSource::new(0xAAAAAAAA, 1)));

        // An unaligned length exercises the partial last
        // word.
        let mut buf = [0u8; 11];
        assert_eq!(trng.read(&mut buf, 10_000), 11);

        // The bytes are the word stream, little-endian.
        let mut words = [0u32; 3];
        let mut twin = Trng::new();
        twin.add_source(Box::new(ConstantSource::new(0xAAAAAAAA, 1)));
        twin.generate(&mut words, 10_000);

        assert_eq!(buf[..4], words[0].to_le_bytes());
        assert_eq!(buf[4..8], words[1].to_le_bytes());
        assert_eq!(buf[8..11], words[2].to_le_bytes()[..3]);
    }

    #[test]
    fn test_pipeline_unknown_source_rejected() {
        let mut trng = Trng::new();
        let id = trng.add_source(Box::new(ConstantSource::new(1, 1)));

        assert!(trng.enable_source(id, false).is_ok());

        let mut other = Trng::new();
        other.add_source(Box::new(ConstantSource::new(1, 1)));
        let bogus = other.add_source(Box::new(ConstantSource::new(2, 1)));

        assert_eq!(
            trng.enable_source(bogus, true),
            Err(Error::UnknownSource(bogus))
        );
    }
}
