// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pure per-dataset planning: map each (desired, discovered) state pair to
//! the one corrective action that moves the dataset a step closer to its
//! desired state.

use crate::action::{Action, ActionKind};
use std::collections::{BTreeMap, BTreeSet};
use strata_common::dataset::{
    DatasetId, DesiredDataset, DesiredState, DiscoveredDataset,
    DiscoveredState,
};

/// Errors surfaced by a planning pass.
///
/// A planning error is a configuration or programming defect, not an
/// operational condition: the iteration that hits one must abort loudly
/// rather than silently planning nothing.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(
        "no transition for desired state {desired} and discovered state \
         {discovered} (dataset {dataset_id})"
    )]
    NoTransition {
        dataset_id: DatasetId,
        desired: DesiredState,
        discovered: DiscoveredState,
    },

    #[error(
        "cannot build {kind} action for dataset {dataset_id}: \
         missing {field}"
    )]
    MissingField {
        dataset_id: DatasetId,
        kind: ActionKind,
        field: &'static str,
    },
}

/// Immutable map from a (desired, discovered) state pair to an action kind.
///
/// Built once at agent startup and never mutated afterwards.
#[derive(Debug)]
pub struct TransitionTable(
    BTreeMap<(DesiredState, DiscoveredState), ActionKind>,
);

impl TransitionTable {
    pub fn new() -> Self {
        use ActionKind::*;
        use DesiredState as Want;
        use DiscoveredState as Have;

        let entries = [
            (Want::Mounted, Have::NonExistent, Create),
            (Want::Mounted, Have::NonManifest, Attach),
            (Want::Mounted, Have::Attached, Mount),
            (Want::Mounted, Have::Mounted, Nothing),
            (Want::NotMounted, Have::NonExistent, Create),
            (Want::NotMounted, Have::NonManifest, Attach),
            (Want::NotMounted, Have::Attached, Nothing),
            (Want::NotMounted, Have::Mounted, Unmount),
            (Want::Deleted, Have::NonExistent, Nothing),
            (Want::Deleted, Have::NonManifest, Destroy),
            (Want::Deleted, Have::Attached, Destroy),
            (Want::Deleted, Have::Mounted, Unmount),
            (Want::NonManifest, Have::NonExistent, Nothing),
            (Want::NonManifest, Have::NonManifest, Nothing),
            (Want::NonManifest, Have::Attached, Detach),
            (Want::NonManifest, Have::Mounted, Unmount),
        ];
        TransitionTable(
            entries
                .into_iter()
                .map(|(desired, discovered, kind)| ((desired, discovered), kind))
                .collect(),
        )
    }

    #[cfg(test)]
    pub(crate) fn from_entries(
        entries: impl IntoIterator<Item = (DesiredState, DiscoveredState, ActionKind)>,
    ) -> Self {
        TransitionTable(
            entries
                .into_iter()
                .map(|(desired, discovered, kind)| ((desired, discovered), kind))
                .collect(),
        )
    }

    fn lookup(
        &self,
        desired: DesiredState,
        discovered: DiscoveredState,
    ) -> Option<ActionKind> {
        self.0.get(&(desired, discovered)).copied()
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        TransitionTable::new()
    }
}

/// Plans corrective actions for a node's datasets.
#[derive(Debug, Default)]
pub struct Planner {
    table: TransitionTable,
}

impl Planner {
    pub fn new() -> Self {
        Planner { table: TransitionTable::new() }
    }

    #[cfg(test)]
    pub(crate) fn with_table(table: TransitionTable) -> Self {
        Planner { table }
    }

    /// Compute one action per dataset appearing in either map.
    ///
    /// A dataset the control plane no longer mentions defaults to a
    /// deleted desired state, so orphaned volumes converge to
    /// destruction; a dataset with no discovered entry defaults to a
    /// non-existent discovered state. The resulting actions are
    /// independent: no ordering among them is implied.
    ///
    /// Pure: no side effects, and identical inputs produce identical
    /// action sets.
    pub fn plan(
        &self,
        discovered: &BTreeMap<DatasetId, DiscoveredDataset>,
        desired: &BTreeMap<DatasetId, DesiredDataset>,
    ) -> Result<BTreeSet<Action>, PlanError> {
        let ids: BTreeSet<DatasetId> =
            discovered.keys().chain(desired.keys()).copied().collect();
        let mut actions = BTreeSet::new();
        for dataset_id in ids {
            let have = discovered.get(&dataset_id);
            let want = desired.get(&dataset_id);
            let desired_state =
                want.map(DesiredDataset::state).unwrap_or(DesiredState::Deleted);
            let discovered_state = have
                .map(DiscoveredDataset::state)
                .unwrap_or(DiscoveredState::NonExistent);
            let kind = self
                .table
                .lookup(desired_state, discovered_state)
                .ok_or(PlanError::NoTransition {
                    dataset_id,
                    desired: desired_state,
                    discovered: discovered_state,
                })?;
            actions.insert(Action::from_state_and_config(
                kind, dataset_id, have, want,
            )?);
        }
        Ok(actions)
    }
}
