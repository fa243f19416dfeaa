// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Library interface to the strata node agent.

pub mod action;
pub mod agent;
pub mod cluster_status;
pub mod config;
pub mod controller;
pub mod convergence;
pub mod discovery;
pub mod plan;

#[macro_use]
extern crate slog;
