//! Unit tests for the condition state machine

#[cfg(test)]
mod tests {
    use crate::conditions::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use crds::{Condition, ConditionStatus, ConditionType};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn workload(status: ConditionStatus, reason: &str, message: &str, now: DateTime<Utc>, list: &[Condition]) -> Vec<Condition> {
        set_condition_at(
            list,
            ConditionType::WorkloadScanningDegraded,
            status,
            reason,
            message,
            UpdatePolicy::default(),
            now,
        )
    }

    #[test]
    fn test_absent_condition_is_appended() {
        let list = workload(ConditionStatus::False, "Available", "ok", t(0), &[]);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_update_time, t(0));
        assert_eq!(list[0].last_transition_time, t(0));
    }

    #[test]
    fn test_set_condition_uses_current_time() {
        let before = Utc::now();
        let list = set_condition(
            &[],
            ConditionType::NodeScanningDegraded,
            ConditionStatus::Unknown,
            "Pending",
            "",
            UpdatePolicy::default(),
        );
        assert!(list[0].last_transition_time >= before);
    }

    #[test]
    fn test_identical_set_is_a_no_op() {
        let first = workload(ConditionStatus::False, "Available", "ok", t(0), &[]);
        let second = workload(ConditionStatus::False, "Available", "ok", t(10), &first);
        assert_eq!(second, first, "nothing differs, so nothing changes");
    }

    #[test]
    fn test_status_change_moves_both_timestamps() {
        let first = workload(ConditionStatus::False, "Available", "ok", t(0), &[]);
        let second = workload(ConditionStatus::True, "Unavailable", "0/1 ready", t(10), &first);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].status, ConditionStatus::True);
        assert_eq!(second[0].reason, "Unavailable");
        assert_eq!(second[0].last_transition_time, t(10));
        assert_eq!(second[0].last_update_time, t(10));
    }

    #[test]
    fn test_message_change_keeps_transition_time() {
        let first = workload(ConditionStatus::True, "Unavailable", "0/2 ready", t(0), &[]);
        let second = workload(ConditionStatus::True, "Unavailable", "1/2 ready", t(10), &first);
        assert_eq!(second[0].message, "1/2 ready");
        assert_eq!(second[0].last_update_time, t(10));
        assert_eq!(second[0].last_transition_time, t(0));
    }

    #[test]
    fn test_policy_never_ignores_message_change() {
        let first = workload(ConditionStatus::True, "Unavailable", "0/2 ready", t(0), &[]);
        let second = set_condition_at(
            &first,
            ConditionType::WorkloadScanningDegraded,
            ConditionStatus::True,
            "Unavailable",
            "1/2 ready",
            UpdatePolicy::Never,
            t(10),
        );
        assert_eq!(second, first);
    }

    #[test]
    fn test_policy_always_refreshes_update_time() {
        let first = workload(ConditionStatus::False, "Available", "ok", t(0), &[]);
        let second = set_condition_at(
            &first,
            ConditionType::WorkloadScanningDegraded,
            ConditionStatus::False,
            "Available",
            "ok",
            UpdatePolicy::Always,
            t(10),
        );
        assert_eq!(second[0].last_update_time, t(10));
        assert_eq!(second[0].last_transition_time, t(0));
    }

    #[test]
    fn test_types_are_independent_and_ordered_by_insertion() {
        let list = workload(ConditionStatus::False, "Available", "ok", t(0), &[]);
        let list = set_condition_at(
            &list,
            ConditionType::ScanApiDegraded,
            ConditionStatus::False,
            "ScanApiDisabled",
            "disabled",
            UpdatePolicy::default(),
            t(1),
        );
        let list = workload(ConditionStatus::True, "Unavailable", "down", t(2), &list);

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].type_, ConditionType::WorkloadScanningDegraded);
        assert_eq!(list[1].type_, ConditionType::ScanApiDegraded);
        assert_eq!(list[1].last_update_time, t(1));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let original = workload(ConditionStatus::False, "Available", "ok", t(0), &[]);
        let snapshot = original.clone();
        let _ = workload(ConditionStatus::True, "Unavailable", "down", t(5), &original);
        assert_eq!(original, snapshot);
    }

    #[test]
    fn test_apply_updates_in_order() {
        let updates = vec![
            ConditionUpdate::degraded(ConditionType::NodeScanningDegraded, false, "NodeScanningAvailable", "ok"),
            ConditionUpdate::degraded(ConditionType::AdmissionDegraded, true, "AdmissionUnavailable", "down"),
        ];
        let list = apply_updates(&[], &updates, t(0));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].status, ConditionStatus::False);
        assert_eq!(list[1].status, ConditionStatus::True);

        let again = apply_updates(&list, &updates, t(30));
        assert_eq!(again, list);
    }
}
