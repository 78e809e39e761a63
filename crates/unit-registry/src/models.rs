//! Data models for the unit registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a unit
///
/// The status is the single source of truth for which lifecycle operations
/// are legal. `SkipBecauseBroken` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    /// Registered, code not loaded
    NotLoaded,
    /// Loader is running
    LoadingSourceCode,
    /// Exports are installed, bootstrap not run
    NotBootstrapped,
    /// Bootstrap is running
    Bootstrapping,
    /// Bootstrapped and idle
    NotMounted,
    /// Mount is running
    Mounting,
    /// Active
    Mounted,
    /// Unmount is running
    Unmounting,
    /// Unload is running
    Unloading,
    /// An operation failed or the exports were malformed
    SkipBecauseBroken,
}

impl UnitStatus {
    /// Canonical upper-case name, as carried in routing event details
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::NotLoaded => "NOT_LOADED",
            UnitStatus::LoadingSourceCode => "LOADING_SOURCE_CODE",
            UnitStatus::NotBootstrapped => "NOT_BOOTSTRAPPED",
            UnitStatus::Bootstrapping => "BOOTSTRAPPING",
            UnitStatus::NotMounted => "NOT_MOUNTED",
            UnitStatus::Mounting => "MOUNTING",
            UnitStatus::Mounted => "MOUNTED",
            UnitStatus::Unmounting => "UNMOUNTING",
            UnitStatus::Unloading => "UNLOADING",
            UnitStatus::SkipBecauseBroken => "SKIP_BECAUSE_BROKEN",
        }
    }

    /// Whether the unit code has been loaded (exports installed)
    pub fn is_loaded(&self) -> bool {
        !matches!(
            self,
            UnitStatus::NotLoaded | UnitStatus::LoadingSourceCode | UnitStatus::SkipBecauseBroken
        )
    }

    /// Whether the unit is mounted
    pub fn is_active(&self) -> bool {
        *self == UnitStatus::Mounted
    }

    /// Whether the unit is broken
    pub fn is_broken(&self) -> bool {
        *self == UnitStatus::SkipBecauseBroken
    }

    /// Whether the status is held only while an operation is in flight
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UnitStatus::LoadingSourceCode
                | UnitStatus::Bootstrapping
                | UnitStatus::Mounting
                | UnitStatus::Unmounting
                | UnitStatus::Unloading
        )
    }

    /// Check whether `self -> to` is an arrow of the status table
    pub fn can_transition_to(self, to: UnitStatus) -> bool {
        use UnitStatus::*;

        match (self, to) {
            // Broken is absorbing
            (SkipBecauseBroken, _) => false,
            // Any other status may break
            (_, SkipBecauseBroken) => true,

            (NotLoaded, LoadingSourceCode) => true,
            (LoadingSourceCode, NotBootstrapped) => true,

            (NotBootstrapped, Bootstrapping) => true,
            (Bootstrapping, NotMounted) => true,

            (NotMounted, Mounting) => true,
            (Mounting, Mounted) => true,

            (Mounted, Unmounting) => true,
            (Unmounting, NotMounted) => true,

            (NotMounted, Unloading) => true,
            (NotBootstrapped, Unloading) => true,
            (Unloading, NotLoaded) => true,

            _ => false,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Fetch the unit code and install its exports
    Load,
    /// One-time initialization
    Bootstrap,
    /// Activate
    Mount,
    /// Deactivate
    Unmount,
    /// Drop the exports so the next activation loads fresh code
    Unload,
}

impl Operation {
    /// All operation kinds in lifecycle order
    pub const ALL: [Operation; 5] = [
        Operation::Load,
        Operation::Bootstrap,
        Operation::Mount,
        Operation::Unmount,
        Operation::Unload,
    ];

    /// Lower-case operation name
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Load => "load",
            Operation::Bootstrap => "bootstrap",
            Operation::Mount => "mount",
            Operation::Unmount => "unmount",
            Operation::Unload => "unload",
        }
    }

    /// Progressive form used in warnings ("Mounting unit 'x' ...")
    pub fn progressive(&self) -> &'static str {
        match self {
            Operation::Load => "Loading",
            Operation::Bootstrap => "Bootstrapping",
            Operation::Mount => "Mounting",
            Operation::Unmount => "Unmounting",
            Operation::Unload => "Unloading",
        }
    }

    /// Status held while the operation is in flight
    pub fn in_flight_status(&self) -> UnitStatus {
        match self {
            Operation::Load => UnitStatus::LoadingSourceCode,
            Operation::Bootstrap => UnitStatus::Bootstrapping,
            Operation::Mount => UnitStatus::Mounting,
            Operation::Unmount => UnitStatus::Unmounting,
            Operation::Unload => UnitStatus::Unloading,
        }
    }

    /// Status reached when the operation succeeds
    pub fn settled_status(&self) -> UnitStatus {
        match self {
            Operation::Load => UnitStatus::NotBootstrapped,
            Operation::Bootstrap => UnitStatus::NotMounted,
            Operation::Mount => UnitStatus::Mounted,
            Operation::Unmount => UnitStatus::NotMounted,
            Operation::Unload => UnitStatus::NotLoaded,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a registered unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Unit name
    pub name: String,

    /// Current status
    pub status: UnitStatus,

    /// Whether lifecycle exports are installed
    pub has_lifecycles: bool,

    /// Whether an unload has been requested and not yet performed
    pub unload_requested: bool,

    /// When the unit was registered
    pub registered_at: DateTime<Utc>,

    /// Last status change
    pub last_status_change: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        use UnitStatus::*;

        // The happy path, in order
        let path = [
            NotLoaded,
            LoadingSourceCode,
            NotBootstrapped,
            Bootstrapping,
            NotMounted,
            Mounting,
            Mounted,
            Unmounting,
            NotMounted,
            Unloading,
            NotLoaded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }

        // Unloading straight after load
        assert!(NotBootstrapped.can_transition_to(Unloading));

        // Everything but broken may break
        assert!(Mounting.can_transition_to(SkipBecauseBroken));
        assert!(NotLoaded.can_transition_to(SkipBecauseBroken));
        assert!(!SkipBecauseBroken.can_transition_to(NotLoaded));
        assert!(!SkipBecauseBroken.can_transition_to(SkipBecauseBroken));

        // Skipping arrows is rejected
        assert!(!NotLoaded.can_transition_to(Mounted));
        assert!(!Mounted.can_transition_to(Unloading));
        assert!(!Mounted.can_transition_to(Mounted));
        assert!(!NotMounted.can_transition_to(NotLoaded));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&UnitStatus::SkipBecauseBroken).unwrap();
        assert_eq!(json, "\"SKIP_BECAUSE_BROKEN\"");

        let parsed: UnitStatus = serde_json::from_str("\"NOT_MOUNTED\"").unwrap();
        assert_eq!(parsed, UnitStatus::NotMounted);
        assert_eq!(parsed.to_string(), "NOT_MOUNTED");
    }

    #[test]
    fn test_operation_statuses() {
        for op in Operation::ALL {
            assert!(op.in_flight_status().is_transient());
            assert!(op.in_flight_status().can_transition_to(op.settled_status()));
        }
        assert_eq!(Operation::Bootstrap.progressive(), "Bootstrapping");
    }
}
