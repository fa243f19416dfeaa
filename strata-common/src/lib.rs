// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model types shared between the strata node agent and the controller.

pub mod cluster;
pub mod dataset;
pub mod generation;
pub mod volume;
