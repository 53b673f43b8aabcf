//! Pool-visible container identity and state

use crate::ActionIdentity;
use crate::config::is_name_char;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one tracked container
///
/// `seq` is the pool's opaque key; `name` is the human-readable form used
/// for diagnostics and lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    seq: u64,
    name: String,
}

impl ContainerId {
    /// Build the id for the `seq`th container of a pool.
    ///
    /// Names look like `<prefix>_<seq>` for ad hoc containers and
    /// `<prefix>_<seq>_<namespace>_<action>` for action containers.
    #[must_use]
    pub fn new(prefix: &str, seq: u64, key: Option<&ActionIdentity>) -> Self {
        let name = match key {
            Some(key) => format!(
                "{prefix}_{seq}_{}_{}",
                sanitize(&key.namespace),
                sanitize(&key.name)
            ),
            None => format!("{prefix}_{seq}"),
        };
        Self { seq, name }
    }

    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// Parked and available for reuse
    Idle,
    /// Checked out to a caller
    Active,
}

/// Point-in-time description of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub id: ContainerId,
    pub state: SlotState,
    pub key: Option<ActionIdentity>,
    pub healthy: bool,
}
