//! Condition state machine
//!
//! Conditions are keyed by type. Setting a condition never mutates the
//! input: callers get a new list back and decide whether to persist it.

use chrono::{DateTime, Utc};
use crds::{Condition, ConditionStatus, ConditionType};

/// Which differences on an existing condition cause an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Refresh `lastUpdateTime` even when nothing differs
    Always,
    /// Only a status change updates the condition
    Never,
    /// Update when status, reason or message differ
    #[default]
    IfReasonOrMessageChange,
}

/// Desired value of one condition, produced by a feature reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    /// Condition type
    pub type_: ConditionType,
    /// Desired status
    pub status: ConditionStatus,
    /// CamelCase reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl ConditionUpdate {
    /// Build an update from a degraded flag
    pub fn degraded(type_: ConditionType, degraded: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_,
            status: ConditionStatus::from(degraded),
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// Set a condition using the current time
pub fn set_condition(
    conditions: &[Condition],
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    policy: UpdatePolicy,
) -> Vec<Condition> {
    set_condition_at(conditions, type_, status, reason, message, policy, Utc::now())
}

/// Set a condition as of `now`
///
/// - absent: appended with both timestamps at `now`
/// - status differs: every field replaced, both timestamps at `now`
/// - status equal: reason and message replaced according to `policy`,
///   `lastUpdateTime` refreshed only when something was replaced
///   (or always, under [`UpdatePolicy::Always`])
pub fn set_condition_at(
    conditions: &[Condition],
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    policy: UpdatePolicy,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let mut next = conditions.to_vec();

    let Some(existing) = next.iter_mut().find(|c| c.type_ == type_) else {
        next.push(Condition {
            type_,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_update_time: now,
            last_transition_time: now,
        });
        return next;
    };

    if existing.status != status {
        existing.status = status;
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.last_update_time = now;
        existing.last_transition_time = now;
        return next;
    }

    let differs = existing.reason != reason || existing.message != message;
    let update = match policy {
        UpdatePolicy::Always => true,
        UpdatePolicy::Never => false,
        UpdatePolicy::IfReasonOrMessageChange => differs,
    };
    if update {
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.last_update_time = now;
    }
    next
}

/// Apply a batch of updates in order with the default policy
pub fn apply_updates(conditions: &[Condition], updates: &[ConditionUpdate], now: DateTime<Utc>) -> Vec<Condition> {
    updates.iter().fold(conditions.to_vec(), |acc, u| {
        set_condition_at(
            &acc,
            u.type_,
            u.status,
            &u.reason,
            &u.message,
            UpdatePolicy::default(),
            now,
        )
    })
}
