use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle operations the dispatcher can drive a resource through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOperation {
    /// Create the resource on its host
    Build,
    /// Shut the resource down, either to rest or ahead of a scrub
    Quiesce,
    /// Remove the resource from its host and from inventory
    Scrub,
    /// Power-cycle a running resource
    Restart,
    /// Apply changed configuration
    Update,
}

impl LifecycleOperation {
    pub const ALL: [LifecycleOperation; 5] = [
        Self::Build,
        Self::Quiesce,
        Self::Scrub,
        Self::Restart,
        Self::Update,
    ];

    /// Event name used for notifications and logs
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Build => "lifecycle.build",
            Self::Quiesce => "lifecycle.quiesce",
            Self::Scrub => "lifecycle.scrub",
            Self::Restart => "lifecycle.restart",
            Self::Update => "lifecycle.update",
        }
    }
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Quiesce => write!(f, "quiesce"),
            Self::Scrub => write!(f, "scrub"),
            Self::Restart => write!(f, "restart"),
            Self::Update => write!(f, "update"),
        }
    }
}

impl std::str::FromStr for LifecycleOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "quiesce" => Ok(Self::Quiesce),
            "scrub" => Ok(Self::Scrub),
            "restart" => Ok(Self::Restart),
            "update" => Ok(Self::Update),
            _ => Err(format!("Invalid lifecycle operation: {s}")),
        }
    }
}
