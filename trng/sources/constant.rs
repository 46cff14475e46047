// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! constant provides a synthetic entropy source emitting a fixed word.
//!
//! This exists for exercising the datapath in tests: the word and the
//! turnaround time are both chosen by the caller, so source rates can
//! be modelled exactly. The period is the number of ticks between an
//! ack and the next word appearing: a period of 1 presents a word on
//! every tick, a period of 3 models a source that needs two idle
//! ticks to digitize its next word.

use crate::source::EntropySource;

/// ConstantSource is a synthetic source that presents the same
/// word forever at a fixed rate.
///
pub struct ConstantSource {
    word: u32,
    period: u32,

    // Ticks until the next word is presented. Zero
    // means a word is available now.
    countdown: u32,
}

impl ConstantSource {
    /// Returns a source presenting `word` every `period`
    /// ticks. A period of zero is treated as one.
    ///
    pub fn new(word: u32, period: u32) -> Self {
        ConstantSource {
            word,
            period: period.max(1),
            countdown: 0,
        }
    }
}

impl EntropySource for ConstantSource {
    fn enabled(&self) -> bool {
        true
    }

    fn syn(&self) -> bool {
        self.countdown == 0
    }

    fn data(&self) -> u32 {
        self.word
    }

    fn ack(&mut self) {
        self.countdown = self.period;
    }

    fn tick(&mut self) {
        if self.countdown > 0 {
            self.countdown -= 1;
        }
    }
}
