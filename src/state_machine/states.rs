use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource state as stored by the inventory.
///
/// The inventory carries states as integer codes; serde goes through
/// [`ResourceState::code`] so records round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ResourceState {
    /// Build has been requested by a user
    Requested,
    /// Build is being carried out by a worker
    Building,
    /// Terminal failure, needs an operator
    Unresourced,
    /// Built and serving
    Running,
    /// Shutdown has been requested
    Quiesce,
    /// Shut down but retained
    Quiesced,
    /// Restart has been requested
    Restart,
    /// Deletion has been requested
    Scrub,
    /// Shut down and waiting for the scrub grace period to pass
    ScrubQueue,
    /// Update of a running resource has been requested
    Update,
    /// Update of a running resource is being carried out
    Updating,
    /// Shutdown is being carried out
    Quiescing,
    /// Restart is being carried out
    Restarting,
    /// Shutdown ahead of deletion is being carried out
    ScrubPrep,
    /// Update of a quiesced resource has been requested
    QuiescedUpdate,
    /// Update of a quiesced resource is being carried out
    QuiescedUpdating,
}

impl ResourceState {
    pub const ALL: [ResourceState; 16] = [
        Self::Requested,
        Self::Building,
        Self::Unresourced,
        Self::Running,
        Self::Quiesce,
        Self::Quiesced,
        Self::Restart,
        Self::Scrub,
        Self::ScrubQueue,
        Self::Update,
        Self::Updating,
        Self::Quiescing,
        Self::Restarting,
        Self::ScrubPrep,
        Self::QuiescedUpdate,
        Self::QuiescedUpdating,
    ];

    /// Integer code used on the wire
    pub fn code(&self) -> i32 {
        match self {
            Self::Requested => 1,
            Self::Building => 2,
            Self::Unresourced => 3,
            Self::Running => 4,
            Self::Quiesce => 5,
            Self::Quiesced => 6,
            Self::Restart => 7,
            Self::Scrub => 8,
            Self::ScrubQueue => 9,
            Self::Update => 10,
            Self::Updating => 11,
            Self::Quiescing => 12,
            Self::Restarting => 13,
            Self::ScrubPrep => 14,
            Self::QuiescedUpdate => 15,
            Self::QuiescedUpdating => 16,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.code() == code)
    }

    /// A worker currently owns the resource. No dispatch may return while the
    /// resource is still in one of these states.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Building
                | Self::Quiescing
                | Self::Restarting
                | Self::ScrubPrep
                | Self::Updating
                | Self::QuiescedUpdating
        )
    }

    /// A user has asked for an operation that has not been picked up yet
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::Requested
                | Self::Quiesce
                | Self::Restart
                | Self::Scrub
                | Self::Update
                | Self::QuiescedUpdate
        )
    }

    /// Resting states reached by a successful operation
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Running | Self::Quiesced | Self::ScrubQueue)
    }

    /// Counts towards a project's live resources when deciding whether the
    /// project can be removed
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Unresourced)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Building => "building",
            Self::Unresourced => "unresourced",
            Self::Running => "running",
            Self::Quiesce => "quiesce",
            Self::Quiesced => "quiesced",
            Self::Restart => "restart",
            Self::Scrub => "scrub",
            Self::ScrubQueue => "scrub_queue",
            Self::Update => "update",
            Self::Updating => "updating",
            Self::Quiescing => "quiescing",
            Self::Restarting => "restarting",
            Self::ScrubPrep => "scrub_prep",
            Self::QuiescedUpdate => "quiesced_update",
            Self::QuiescedUpdating => "quiesced_updating",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ResourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<i32>() {
            return Self::from_code(code).ok_or_else(|| format!("Invalid resource state code: {s}"));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.to_string() == s)
            .ok_or_else(|| format!("Invalid resource state: {s}"))
    }
}

impl TryFrom<i32> for ResourceState {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("Invalid resource state code: {code}"))
    }
}

impl From<ResourceState> for i32 {
    fn from(state: ResourceState) -> Self {
        state.code()
    }
}

/// Kind of managed resource.
///
/// The inventory has carried several names for the router concept over time
/// (`vrf`, `vr`, `virtual_router`, `phantom_vrf`); they all parse to
/// [`ResourceKind::VirtualRouter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    VirtualMachine,
    VirtualRouter,
    StorageVolume,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        Self::VirtualMachine,
        Self::VirtualRouter,
        Self::StorageVolume,
    ];

    /// Record field holding the platform tag used to pick an executor
    pub fn platform_field(&self) -> &'static str {
        match self {
            Self::VirtualMachine => "hypervisor",
            Self::VirtualRouter => "router_model",
            Self::StorageVolume => "storage_backend",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VirtualMachine => write!(f, "virtual_machine"),
            Self::VirtualRouter => write!(f, "virtual_router"),
            Self::StorageVolume => write!(f, "storage_volume"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vm" | "virtual_machine" => Ok(Self::VirtualMachine),
            "vr" | "vrf" | "router" | "virtual_router" | "phantom_vrf" => Ok(Self::VirtualRouter),
            "volume" | "storage" | "storage_volume" => Ok(Self::StorageVolume),
            _ => Err(format!("Invalid resource kind: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_in_progress_states_are_neither_requests_nor_stable() {
        for state in ResourceState::ALL {
            if state.is_in_progress() {
                assert!(!state.is_request(), "{state} is both");
                assert!(!state.is_stable(), "{state} is both");
            }
        }
    }

    #[test]
    fn test_serializes_as_integer_code() {
        let json = serde_json::to_value(ResourceState::Building).unwrap();
        assert_eq!(json, serde_json::json!(2));

        let state: ResourceState = serde_json::from_value(serde_json::json!(4)).unwrap();
        assert_eq!(state, ResourceState::Running);

        assert!(serde_json::from_value::<ResourceState>(serde_json::json!(99)).is_err());
    }

    #[test]
    fn test_from_str_accepts_names_and_codes() {
        assert_eq!("scrub_queue".parse::<ResourceState>().unwrap(), ResourceState::ScrubQueue);
        assert_eq!("3".parse::<ResourceState>().unwrap(), ResourceState::Unresourced);
        assert!("stuck".parse::<ResourceState>().is_err());
    }

    #[test]
    fn test_router_aliases_unify() {
        for alias in ["vrf", "vr", "virtual_router", "phantom_vrf", "VRF"] {
            assert_eq!(alias.parse::<ResourceKind>().unwrap(), ResourceKind::VirtualRouter);
        }
        assert_eq!("vm".parse::<ResourceKind>().unwrap(), ResourceKind::VirtualMachine);
        assert!("switch".parse::<ResourceKind>().is_err());
    }

    proptest! {
        #[test]
        fn prop_codes_are_unique_and_reversible(code in 0i32..32) {
            match ResourceState::from_code(code) {
                Some(state) => prop_assert_eq!(state.code(), code),
                None => prop_assert!(!(1..=16).contains(&code)),
            }
        }

        #[test]
        fn prop_display_round_trips(index in 0usize..16) {
            let state = ResourceState::ALL[index];
            prop_assert_eq!(state.to_string().parse::<ResourceState>().unwrap(), state);
        }
    }
}
