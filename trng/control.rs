// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! control provides the command mailbox, configuration, and status
//! surface of the TRNG.
//!
//! The register-mapped bus plumbing lives outside the core; what this
//! module models is the small command set it decodes into: a level
//! `enable` bit, pulsed `reseed`/`discard`/`restart` commands, and
//! the configuration words. Pulses are latched here and consumed by
//! the pipeline at its next tick, which is what gives commands their
//! "take effect on the next state-machine tick, never retroactively"
//! semantics.

use crate::source::{SourceHealth, SourceId};
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

/// The core's name, split over two words of big-endian
/// ASCII: `"trng"`, `"    "`.
///
pub const NAME0: u32 = 0x7472_6e67;
pub const NAME1: u32 = 0x2020_2020;

/// The core's version as big-endian ASCII: `"0.01"`.
///
pub const VERSION: u32 = 0x302e_3031;

/// The default cipher round count.
///
pub const DEFAULT_ROUNDS: u8 = 24;

/// The hard cap on keystream blocks per seeding epoch.
/// The expander reseeds at this budget no matter how
/// `num_blocks` is configured.
///
pub const BLOCK_BUDGET_CAP: u64 = 1 << 60;

/// Represents an error in a configuration or command
/// write. These are non-fatal: the write is rejected
/// and the datapath continues untouched.
///
#[derive(Debug, PartialEq)]
pub enum Error {
    /// The requested round count is outside the
    /// supported range.
    InvalidRounds(u8),

    /// The source id does not name a registered
    /// source.
    UnknownSource(SourceId),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidRounds(rounds) => {
                write!(f, "invalid cipher round count {}", rounds)
            }
            Error::UnknownSource(id) => write!(f, "unknown {}", id),
        }
    }
}

/// The TRNG's configuration words.
///
#[derive(Clone, Copy, Debug)]
pub struct Config {
    num_rounds: u8,
    num_blocks: u64,
}

impl Config {
    /// Returns the default configuration: 24 cipher
    /// rounds and the maximum block budget.
    ///
    pub fn new() -> Self {
        Config {
            num_rounds: DEFAULT_ROUNDS,
            num_blocks: BLOCK_BUDGET_CAP,
        }
    }

    /// The configured cipher round count.
    ///
    pub fn num_rounds(&self) -> u8 {
        self.num_rounds
    }

    /// Sets the cipher round count. Takes effect at the
    /// next seeding cycle. Rejects counts outside
    /// [`chacha::MIN_ROUNDS`, `chacha::MAX_ROUNDS`].
    ///
    pub fn set_num_rounds(&mut self, rounds: u8) -> Result<(), Error> {
        if !(chacha::MIN_ROUNDS..=chacha::MAX_ROUNDS).contains(&rounds) {
            log::warn!("rejecting cipher round count {}", rounds);
            return Err(Error::InvalidRounds(rounds));
        }

        self.num_rounds = rounds;
        Ok(())
    }

    /// The configured reseed threshold in blocks.
    ///
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    /// Sets the reseed threshold. Values above the hard
    /// cap are accepted but have no effect beyond it.
    ///
    pub fn set_num_blocks(&mut self, blocks: u64) {
        if blocks > BLOCK_BUDGET_CAP {
            log::warn!("block budget {} exceeds hard cap; capping", blocks);
        }

        self.num_blocks = blocks;
    }

    /// The effective reseed threshold: the configured
    /// value, bounded by the hard cap.
    ///
    pub fn reseed_threshold(&self) -> u64 {
        self.num_blocks.min(BLOCK_BUDGET_CAP)
    }
}

/// The latched command state, as written by the operator
/// and consumed by the pipeline tick.
///
pub struct Commands {
    enable: bool,
    reseed: bool,
    discard: bool,
    restart: bool,
}

impl Commands {
    /// Returns the reset command state: enabled, no
    /// pulses pending.
    ///
    pub fn new() -> Self {
        Commands {
            enable: true,
            reseed: false,
            discard: false,
            restart: false,
        }
    }

    /// The level enable bit.
    ///
    pub fn enabled(&self) -> bool {
        self.enable
    }

    /// Sets the level enable bit.
    ///
    pub fn set_enable(&mut self, enable: bool) {
        self.enable = enable;
    }

    /// Latches a reseed pulse.
    ///
    pub fn pulse_reseed(&mut self) {
        self.reseed = true;
    }

    /// Latches a discard pulse.
    ///
    pub fn pulse_discard(&mut self) {
        self.discard = true;
    }

    /// Latches an operator restart pulse.
    ///
    pub fn pulse_restart(&mut self) {
        self.restart = true;
    }

    /// Consumes a pending reseed pulse.
    ///
    pub(crate) fn take_reseed(&mut self) -> bool {
        core::mem::replace(&mut self.reseed, false)
    }

    /// Consumes a pending discard pulse.
    ///
    pub(crate) fn take_discard(&mut self) -> bool {
        core::mem::replace(&mut self.discard, false)
    }

    /// Consumes a pending restart pulse.
    ///
    pub(crate) fn take_restart(&mut self) -> bool {
        core::mem::replace(&mut self.restart, false)
    }
}

bitflags! {
    /// The packed status register view.
    ///
    pub struct StatusFlags: u32 {
        /// The expander holds a complete seed and can
        /// generate keystream.
        const READY = 1 << 0;

        /// A random word is presented to the consumer.
        const RND_VALID = 1 << 1;

        /// At least one source reports a health test
        /// failure.
        const SECURITY_ERROR = 1 << 2;
    }
}

/// A point-in-time status snapshot, combining the packed
/// flags with the wider debug state.
///
pub struct Status {
    /// The packed status flags.
    pub flags: StatusFlags,

    /// Keystream blocks generated in the current
    /// seeding epoch.
    pub block_budget: u64,

    /// Per-source health, in scan order.
    pub sources: Vec<SourceHealth>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_rounds() {
        let mut config = Config::new();
        assert_eq!(config.num_rounds(), 24);

        assert_eq!(config.set_num_rounds(7), Err(Error::InvalidRounds(7)));
        assert_eq!(config.set_num_rounds(32), Err(Error::InvalidRounds(32)));
        assert_eq!(config.num_rounds(), 24, "rejected write must not stick");

        assert!(config.set_num_rounds(8).is_ok());
        assert_eq!(config.num_rounds(), 8);
    }

    #[test]
    fn test_config_block_budget_cap() {
        let mut config = Config::new();
        assert_eq!(config.reseed_threshold(), BLOCK_BUDGET_CAP);

        config.set_num_blocks(8);
        assert_eq!(config.reseed_threshold(), 8);

        // An overflowing threshold is accepted but the
        // effective budget stays at the hard cap.
        config.set_num_blocks(u64::MAX);
        assert_eq!(config.num_blocks(), u64::MAX);
        assert_eq!(config.reseed_threshold(), BLOCK_BUDGET_CAP);
    }

    #[test]
    fn test_commands_pulses_are_consumed() {
        let mut commands = Commands::new();
        assert!(commands.enabled());
        assert!(!commands.take_reseed());

        commands.pulse_reseed();
        commands.pulse_discard();
        commands.pulse_restart();

        assert!(commands.take_reseed());
        assert!(!commands.take_reseed());
        assert!(commands.take_discard());
        assert!(!commands.take_discard());
        assert!(commands.take_restart());
        assert!(!commands.take_restart());
    }

    #[test]
    fn test_identification() {
        assert_eq!(&NAME0.to_be_bytes(), b"trng");
        assert_eq!(&NAME1.to_be_bytes(), b"    ");
        assert_eq!(&VERSION.to_be_bytes(), b"0.01");
    }
}
