// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{SystemTime, UNIX_EPOCH};

const MODULUS: u64 = 0x7fff_ffff; // 2^31 - 1
const MULTIPLIER: u64 = 48271;

/// Generator of candidate temporary-file name fragments.
///
/// A Park-Miller linear congruential generator. Not cryptographic, and
/// deliberately so: collision safety comes from create-exclusive opens
/// plus retry, not from name secrecy. The seed is re-drawn from wall
/// time and the process id whenever it is invalid or after 100
/// sequential draws, so long-lived processes do not walk a single fixed
/// cycle forever.
#[derive(Debug)]
pub(crate) struct TempNames {
    seed: u32,
    draws: u32,
}

impl TempNames {
    pub(crate) fn new() -> Self {
        Self { seed: 0, draws: 0 }
    }

    /// Returns the next name fragment, lowercase hex.
    pub(crate) fn next(&mut self) -> String {
        if self.seed == 0 || u64::from(self.seed) >= MODULUS || self.draws > 100 {
            self.reseed();
        }
        let value = u64::from(self.seed) * MULTIPLIER % MODULUS;
        self.seed = u32::try_from(value).expect("Park-Miller output fits in 31 bits");
        self.draws += 1;
        format!("{value:x}")
    }

    fn reseed(&mut self) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos() & u128::from(u64::MAX)).unwrap_or(0));
        let mixed = nanos.wrapping_add(u64::from(std::process::id()));
        // Fold into [1, MODULUS - 1] so the seed is always valid.
        self.seed = u32::try_from(mixed % (MODULUS - 1) + 1).expect("seed fits in 31 bits");
        self.draws = 0;
    }
}
