//! # System Constants
//!
//! Defaults and names shared across the dispatcher, poller and binary.

/// Delay before a blocked router scrub is retried
pub const DEFAULT_SCRUB_RESCHEDULE_SECONDS: u64 = 60;

/// Attempts an executor makes at a retryable remote command
pub const DEFAULT_EXECUTOR_MAX_ATTEMPTS: u32 = 10;

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 20;

/// Attempts at writing a compensating state before giving up to the sweep
pub const DEFAULT_COMPENSATION_MAX_ATTEMPTS: u32 = 5;

/// Age after which an in-progress record is treated as abandoned
pub const DEFAULT_STALE_CLAIM_TIMEOUT_SECONDS: u64 = 3600;

/// Request header carrying the state a conditional update expects
pub const EXPECTED_STATE_HEADER: &str = "X-Expected-State";

pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Reasons attached to failure and skip metrics
pub mod reasons {
    pub const NOT_FOUND: &str = "not_found";
    pub const STALE_STATE: &str = "stale_state";
    pub const CLAIM_LOST: &str = "claim_lost";
    pub const INVENTORY_UNAVAILABLE: &str = "inventory_unavailable";
    pub const INVALID_RECORD: &str = "invalid_record";
    pub const DEPENDENCY_NOT_READY: &str = "dependency_not_ready";
    pub const DEPENDENCY_FAILED: &str = "dependency_failed";
    pub const CHILDREN_REMAIN: &str = "children_remain";
    pub const ATTRIBUTES_MISSING: &str = "attributes_missing";
    pub const UNKNOWN_PLATFORM: &str = "unknown_platform";
    pub const EXECUTOR_FAILED: &str = "executor_failed";
    pub const EXECUTOR_ERROR: &str = "executor_error";
    pub const EXECUTOR_PANIC: &str = "executor_panic";
    pub const FINALIZE_FAILED: &str = "finalize_failed";
    pub const DISPATCH_PANIC: &str = "dispatch_panic";
    pub const COMPENSATION_FAILED: &str = "compensation_failed";
    pub const STALE_CLAIM: &str = "stale_claim";
}

/// Notification event kinds
pub mod events {
    pub const OPERATION_SUCCEEDED: &str = "operation.succeeded";
    pub const OPERATION_FAILED: &str = "operation.failed";
}
