// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Monotonic time for samples and transitions.
//!
//! A [`Timestamp`] is an offset from the [`Clock`] epoch, which is fixed when the
//! monitor is built. Offsets never go backwards and serialize as milliseconds.

use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};

/// Monotonic point in time, measured from the owning [`Clock`]'s epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    #[must_use]
    pub const fn from_duration(offset: Duration) -> Self {
        Self(offset)
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    #[must_use]
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Milliseconds since the epoch, saturating at `u64::MAX`.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_millis())
    }
}

/// Source of [`Timestamp`]s. Copies share the same epoch.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed())
    }

    #[must_use]
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
