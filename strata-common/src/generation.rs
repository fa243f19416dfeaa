// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Generation number for a cluster configuration snapshot.
///
/// Generations only ever move forward; a snapshot carrying a given
/// generation wholly supersedes any snapshot with a lower one.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new() -> Self {
        Generation(1)
    }

    pub const fn next(&self) -> Self {
        Generation(self.0 + 1)
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation::new()
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
