// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! channel provides an entropy source fed from outside the core.
//!
//! A physical source driver (which may run on its own thread) pushes
//! 32-bit words into a bounded queue through its [`Feeder`]; the
//! reader consumes them through the matching [`ChannelSource`]. The
//! queue is the only concurrency seam in the core, so it sits behind
//! a spin lock on its own.
//!
//! The driver also owns the source's online and health flags: a
//! driver that detects degenerate noise marks the source failed, and
//! the flag is aggregated into the TRNG-wide security error.

use crate::source::EntropySource;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// The shared state between a channel source and its feeder.
///
struct Shared {
    words: spin::Mutex<VecDeque<u32>>,
    online: AtomicBool,
    failed: AtomicBool,
}

/// ChannelSource is an entropy source whose words arrive from
/// an external driver through a [`Feeder`].
///
pub struct ChannelSource {
    shared: Arc<Shared>,
}

/// Feeder is the driver-side handle of a channel source.
///
pub struct Feeder {
    shared: Arc<Shared>,
    capacity: usize,
}

/// Returns a connected source/feeder pair whose queue holds
/// at most `capacity` words.
///
pub fn channel(capacity: usize) -> (ChannelSource, Feeder) {
    let shared = Arc::new(Shared {
        words: spin::Mutex::new(VecDeque::with_capacity(capacity)),
        online: AtomicBool::new(true),
        failed: AtomicBool::new(false),
    });

    let source = ChannelSource {
        shared: shared.clone(),
    };

    let feeder = Feeder { shared, capacity };

    (source, feeder)
}

impl EntropySource for ChannelSource {
    fn enabled(&self) -> bool {
        self.shared.online.load(Ordering::Acquire)
    }

    fn syn(&self) -> bool {
        !self.shared.words.lock().is_empty()
    }

    fn data(&self) -> u32 {
        // Stable until `ack`: only the reader pops and
        // the feeder only pushes at the back.
        match self.shared.words.lock().front() {
            None => 0,
            Some(word) => *word,
        }
    }

    fn ack(&mut self) {
        self.shared.words.lock().pop_front();
    }

    fn error(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }
}

impl Feeder {
    /// Pushes one word into the queue. Returns false,
    /// dropping the word, if the queue is full.
    ///
    pub fn push(&self, word: u32) -> bool {
        let mut words = self.shared.words.lock();
        if words.len() >= self.capacity {
            return false;
        }

        words.push_back(word);
        true
    }

    /// Marks the source online or offline. An offline
    /// source is skipped by the reader but keeps its
    /// queued words.
    ///
    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::Release);
    }

    /// Reports a health test failure (or recovery) for
    /// this source.
    ///
    pub fn set_failed(&self, failed: bool) {
        self.shared.failed.store(failed, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_handshake() {
        let (mut source, feeder) = channel(2);

        assert!(source.enabled());
        assert!(!source.syn());

        assert!(feeder.push(0x11111111));
        assert!(feeder.push(0x22222222));
        assert!(!feeder.push(0x33333333), "queue should be bounded");

        // The presented word is stable until acked.
        assert!(source.syn());
        assert_eq!(source.data(), 0x11111111);
        assert_eq!(source.data(), 0x11111111);

        source.ack();
        assert_eq!(source.data(), 0x22222222);

        source.ack();
        assert!(!source.syn());
    }

    #[test]
    fn test_channel_flags() {
        let (source, feeder) = channel(1);

        feeder.set_online(false);
        assert!(!source.enabled());

        feeder.set_online(true);
        assert!(source.enabled());

        assert!(!source.error());
        feeder.set_failed(true);
        assert!(source.error());
    }
}
