// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! sources provides the built-in entropy producers.
//!
//! Physical noise sources live outside the core and deliver their
//! words through [`channel`]; [`constant`] and the feature-gated
//! [`pseudo`] source exist for exercising the datapath without
//! hardware.

pub mod channel;
pub mod constant;
#[cfg(feature = "pseudo")]
pub mod pseudo;
