//! Charging plan model and decision policy for Hestia
//!
//! Plans are immutable value objects produced by one coordination pass and
//! consumed by at most one execution pass; they carry no live references
//! back to source state. The decision policy and admission control are pure
//! functions so their properties can be checked without any I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduling priority of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
}

/// Action decided for one vehicle, first match wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    None,
    StartCharging,
    DelayCharging,
    ScheduleOffPeak,
    QueueCharging,
}

/// One vehicle line item in a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePlanEntry {
    pub vehicle_id: String,
    pub display_name: String,
    pub current_charge: f64,
    pub target_charge: f64,
    pub charging_needed: f64,
    pub is_plugged_in: bool,
    pub priority: Priority,
    pub action: PlanAction,
    pub reason: String,
}

/// Storage-level action recommended by a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageAction {
    RaiseReserveFloor {
        site_id: String,
        from_percent: u8,
        to_percent: u8,
    },
}

/// Advisory recommendation, no state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub message: String,
}

/// A complete charging plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingPlan {
    pub id: uuid::Uuid,
    pub created_at: DateTime<Utc>,
    pub vehicles: Vec<VehiclePlanEntry>,
    pub storage_actions: Vec<StorageAction>,
    pub recommendations: Vec<Recommendation>,
}

/// One recorded plan-item outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Vehicle ID or site ID the item addressed
    pub target: String,

    /// What was attempted or skipped
    pub description: String,

    /// Failure detail, present only in the failed partition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn ok(target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            description: description.into(),
            error: None,
        }
    }

    pub fn failed(
        target: impl Into<String>,
        description: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            description: description.into(),
            error: Some(error.into()),
        }
    }
}

/// Partitioned outcomes of one plan execution. Entries accumulate
/// independently, so one failure never discards the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub executed: Vec<ExecutionRecord>,
    pub failed: Vec<ExecutionRecord>,
    pub skipped: Vec<ExecutionRecord>,
}

/// Site-level context the decision policy evaluates against
#[derive(Debug, Clone)]
pub struct SiteContext {
    /// Storage battery level in percent
    pub storage_level: f64,

    /// Configured reserve floor in percent
    pub reserve_floor: f64,

    /// Current solar production in watts
    pub solar_power_w: f64,

    /// Current home load in watts
    pub load_power_w: f64,

    /// Grid power in watts; negative means net export
    pub grid_power_w: f64,

    /// Headroom above the reserve floor that permits charging
    pub storage_headroom: f64,

    /// Solar must exceed load by this margin to permit charging
    pub solar_margin_w: f64,
}

/// Decide the action for one vehicle. Branches are evaluated in priority
/// order; the first match wins even when later branches would also hold.
pub fn decide_action(
    charging_needed: f64,
    is_plugged_in: bool,
    site: &SiteContext,
) -> (PlanAction, String) {
    if charging_needed <= 0.0 {
        return (PlanAction::None, "already at or above target".to_string());
    }
    if !is_plugged_in {
        return (PlanAction::None, "not plugged in".to_string());
    }

    if site.storage_level > site.reserve_floor + site.storage_headroom {
        return (
            PlanAction::StartCharging,
            "high storage level allows charging".to_string(),
        );
    }
    if site.solar_power_w > site.load_power_w + site.solar_margin_w {
        return (
            PlanAction::StartCharging,
            "excess solar available".to_string(),
        );
    }
    if site.storage_level < site.reserve_floor {
        return (PlanAction::DelayCharging, "preserve reserve".to_string());
    }
    (
        PlanAction::ScheduleOffPeak,
        "deferred to off-peak window".to_string(),
    )
}

/// Cap the number of `start_charging` entries at `max_simultaneous`.
///
/// Candidates are ranked by priority (high before normal), then by
/// descending charging need; the remainder is demoted to `queue_charging`.
pub fn apply_admission_control(entries: &mut [VehiclePlanEntry], max_simultaneous: usize) {
    let mut candidates: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.action == PlanAction::StartCharging)
        .map(|(i, _)| i)
        .collect();

    if candidates.len() <= max_simultaneous {
        return;
    }

    candidates.sort_by(|&a, &b| {
        let ea = &entries[a];
        let eb = &entries[b];
        let rank = |p: Priority| match p {
            Priority::High => 0,
            Priority::Normal => 1,
        };
        rank(ea.priority).cmp(&rank(eb.priority)).then(
            eb.charging_needed
                .partial_cmp(&ea.charging_needed)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });

    for &idx in candidates.iter().skip(max_simultaneous) {
        let entry = &mut entries[idx];
        entry.action = PlanAction::QueueCharging;
        entry.reason = "waiting for a slot".to_string();
    }
}

/// Recommend raising the reserve floor when the storage is below it while
/// the site is net-exporting. The new floor is capped at 100.
pub fn storage_floor_action(
    site_id: &str,
    storage_level: f64,
    reserve_floor: u8,
    grid_power_w: f64,
) -> Option<StorageAction> {
    if storage_level < reserve_floor as f64 && grid_power_w < 0.0 {
        Some(StorageAction::RaiseReserveFloor {
            site_id: site_id.to_string(),
            from_percent: reserve_floor,
            to_percent: (reserve_floor + 10).min(100),
        })
    } else {
        None
    }
}

/// Advisory when solar production far exceeds load while storage is nearly
/// full; informational only.
pub fn surplus_advisory(
    storage_level: f64,
    solar_power_w: f64,
    load_power_w: f64,
    advisory_margin_w: f64,
) -> Option<Recommendation> {
    if solar_power_w > load_power_w + advisory_margin_w && storage_level > 95.0 {
        Some(Recommendation {
            message: format!(
                "Solar surplus of {:.0} W with storage at {:.0}%; consider exporting or adding load",
                solar_power_w - load_power_w,
                storage_level
            ),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(storage_level: f64, reserve_floor: f64, solar: f64, load: f64) -> SiteContext {
        SiteContext {
            storage_level,
            reserve_floor,
            solar_power_w: solar,
            load_power_w: load,
            grid_power_w: 0.0,
            storage_headroom: 30.0,
            solar_margin_w: 3000.0,
        }
    }

    fn entry(id: &str, needed: f64, priority: Priority, action: PlanAction) -> VehiclePlanEntry {
        VehiclePlanEntry {
            vehicle_id: id.to_string(),
            display_name: id.to_string(),
            current_charge: 80.0 - needed,
            target_charge: 80.0,
            charging_needed: needed,
            is_plugged_in: true,
            priority,
            action,
            reason: String::new(),
        }
    }

    #[test]
    fn high_storage_allows_charging() {
        // Storage 95%, floor 20%, 60 -> 80
        let (action, reason) = decide_action(20.0, true, &site(95.0, 20.0, 0.0, 0.0));
        assert_eq!(action, PlanAction::StartCharging);
        assert!(reason.contains("high storage level"));
    }

    #[test]
    fn low_storage_delays_charging() {
        let (action, reason) = decide_action(15.0, true, &site(18.0, 20.0, 0.0, 0.0));
        assert_eq!(action, PlanAction::DelayCharging);
        assert_eq!(reason, "preserve reserve");
    }

    #[test]
    fn storage_branch_wins_over_solar_branch() {
        // Storage 60 > 20+30 and solar 6000 > 1000+3000: both branches hold,
        // first match wins, so the storage-level reason must be cited.
        let (action, reason) = decide_action(20.0, true, &site(60.0, 20.0, 6000.0, 1000.0));
        assert_eq!(action, PlanAction::StartCharging);
        assert!(reason.contains("high storage level"));
    }

    #[test]
    fn solar_excess_branch_fires_when_storage_is_middling() {
        let (action, reason) = decide_action(20.0, true, &site(40.0, 20.0, 6000.0, 1000.0));
        assert_eq!(action, PlanAction::StartCharging);
        assert_eq!(reason, "excess solar available");
    }

    #[test]
    fn middling_everything_defers_to_off_peak() {
        let (action, reason) = decide_action(20.0, true, &site(30.0, 20.0, 500.0, 1000.0));
        assert_eq!(action, PlanAction::ScheduleOffPeak);
        assert_eq!(reason, "deferred to off-peak window");
    }

    #[test]
    fn not_plugged_in_or_at_target_yields_none() {
        let ctx = site(95.0, 20.0, 0.0, 0.0);
        assert_eq!(decide_action(20.0, false, &ctx).0, PlanAction::None);
        assert_eq!(decide_action(0.0, true, &ctx).0, PlanAction::None);
        assert_eq!(decide_action(-5.0, true, &ctx).0, PlanAction::None);
    }

    #[test]
    fn admission_control_caps_start_charging() {
        let mut entries = vec![
            entry("a", 40.0, Priority::Normal, PlanAction::StartCharging),
            entry("b", 30.0, Priority::Normal, PlanAction::StartCharging),
            entry("c", 20.0, Priority::Normal, PlanAction::StartCharging),
        ];
        apply_admission_control(&mut entries, 2);
        let started = entries
            .iter()
            .filter(|e| e.action == PlanAction::StartCharging)
            .count();
        assert_eq!(started, 2);
        assert_eq!(entries[2].action, PlanAction::QueueCharging);
        assert_eq!(entries[2].reason, "waiting for a slot");
    }

    #[test]
    fn admission_control_keeps_priority_vehicle_with_least_need() {
        // Three eligible, cap 2; the high-priority vehicle has the least
        // need but must be kept; among the normals the larger need wins.
        let mut entries = vec![
            entry("normal_big", 40.0, Priority::Normal, PlanAction::StartCharging),
            entry("high_small", 5.0, Priority::High, PlanAction::StartCharging),
            entry("normal_small", 20.0, Priority::Normal, PlanAction::StartCharging),
        ];
        apply_admission_control(&mut entries, 2);
        assert_eq!(entries[1].action, PlanAction::StartCharging, "high priority kept");
        assert_eq!(entries[0].action, PlanAction::StartCharging, "larger normal kept");
        assert_eq!(entries[2].action, PlanAction::QueueCharging);
    }

    #[test]
    fn admission_control_noop_when_under_cap() {
        let mut entries = vec![
            entry("a", 40.0, Priority::Normal, PlanAction::StartCharging),
            entry("b", 30.0, Priority::Normal, PlanAction::DelayCharging),
        ];
        apply_admission_control(&mut entries, 2);
        assert_eq!(entries[0].action, PlanAction::StartCharging);
        assert_eq!(entries[1].action, PlanAction::DelayCharging);
    }

    #[test]
    fn storage_floor_raised_only_on_net_export_while_low() {
        let action = storage_floor_action("site1", 15.0, 20, -500.0);
        match action {
            Some(StorageAction::RaiseReserveFloor {
                from_percent,
                to_percent,
                ..
            }) => {
                assert_eq!(from_percent, 20);
                assert_eq!(to_percent, 30);
            }
            None => panic!("expected a reserve floor action"),
        }

        assert!(storage_floor_action("site1", 15.0, 20, 500.0).is_none());
        assert!(storage_floor_action("site1", 50.0, 20, -500.0).is_none());
    }

    #[test]
    fn storage_floor_capped_at_hundred() {
        let action = storage_floor_action("site1", 90.0, 95, -500.0);
        match action {
            Some(StorageAction::RaiseReserveFloor { to_percent, .. }) => {
                assert_eq!(to_percent, 100)
            }
            None => panic!("expected a reserve floor action"),
        }
    }

    #[test]
    fn surplus_advisory_needs_full_storage_and_big_margin() {
        assert!(surplus_advisory(96.0, 7000.0, 1000.0, 5000.0).is_some());
        assert!(surplus_advisory(90.0, 7000.0, 1000.0, 5000.0).is_none());
        assert!(surplus_advisory(96.0, 5500.0, 1000.0, 5000.0).is_none());
    }

    #[test]
    fn plan_action_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(PlanAction::ScheduleOffPeak).unwrap(),
            serde_json::json!("schedule_off_peak")
        );
        assert_eq!(
            serde_json::to_value(PlanAction::StartCharging).unwrap(),
            serde_json::json!("start_charging")
        );
    }
}
