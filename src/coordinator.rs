//! Charging coordination for Hestia
//!
//! The coordinator orchestrates reads (vehicle and storage state), decisions
//! (the charging plan) and writes (plan execution), optionally on a
//! recurring timer. Per-item failures during computation and execution are
//! isolated; only credential and signer misconfiguration are fatal.

use crate::api::{EnergyApi, ProductKind, SiteStatus, VehicleApi, VehicleCommand, VehicleSnapshot, VehicleState};
use crate::config::ChargingConfig;
use crate::error::{HestiaError, Result};
use crate::logging::get_logger;
use crate::plan::{
    ChargingPlan, ExecutionRecord, ExecutionResult, PlanAction, Priority, SiteContext,
    StorageAction, VehiclePlanEntry, apply_admission_control, decide_action,
    storage_floor_action, surplus_advisory,
};
use crate::token::{Credential, TokenLifecycleManager};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::time::Duration;

/// Per-call planning options
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Target charge level per vehicle; falls back to the configured default
    pub target_charge_levels: HashMap<String, u8>,

    /// Vehicles that must win admission-control slots first
    pub priority_vehicles: HashSet<String>,

    /// Cap on concurrently charging vehicles; falls back to config
    pub max_simultaneous_charging: Option<usize>,

    /// Reserve floor override in percent; falls back to config
    pub reserve_floor_percent: Option<u8>,
}

/// Options for the scheduled coordination loop
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    pub plan: PlanOptions,

    /// Minutes between cycles; falls back to config
    pub interval_minutes: Option<u64>,

    /// Execute each computed plan instead of only logging it
    pub auto_execute: bool,
}

/// Observable state of the scheduled loop
#[derive(Debug, Clone, Default)]
pub struct LoopStatus {
    pub active: bool,
    pub interval_minutes: u64,
    pub auto_execute: bool,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_error: Option<String>,
}

/// Point-in-time view of everything the coordinator can see
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub vehicles: Vec<VehicleSnapshot>,
    pub site: Option<SiteStatus>,
    pub credential_present: bool,
}

#[derive(Default)]
struct LoopStats {
    cycles_completed: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    last_cycle_error: Option<String>,
    interval_minutes: u64,
    auto_execute: bool,
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Orchestrates plan computation, plan execution and the recurring loop
pub struct ChargingCoordinator {
    vehicle_api: Arc<dyn VehicleApi>,
    energy_api: Arc<dyn EnergyApi>,
    tokens: Arc<TokenLifecycleManager>,
    charging: ChargingConfig,
    tz: Tz,

    /// Sole shared flag guarding loop re-entry
    active: AtomicBool,
    loop_handle: Mutex<Option<LoopHandle>>,
    stats: Arc<StdMutex<LoopStats>>,

    logger: crate::logging::StructuredLogger,
}

impl ChargingCoordinator {
    pub fn new(
        vehicle_api: Arc<dyn VehicleApi>,
        energy_api: Arc<dyn EnergyApi>,
        tokens: Arc<TokenLifecycleManager>,
        charging: ChargingConfig,
        tz: Tz,
    ) -> Self {
        let logger = get_logger("coordinator");
        Self {
            vehicle_api,
            energy_api,
            tokens,
            charging,
            tz,
            active: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
            stats: Arc::new(StdMutex::new(LoopStats::default())),
            logger,
        }
    }

    /// Assign the credential used for all provider calls
    pub async fn set_credential(&self, credential: Credential) {
        self.tokens.set_credential(credential).await;
    }

    /// Fetch a point-in-time view of vehicles and the storage site
    pub async fn get_system_status(&self) -> Result<SystemStatus> {
        let vehicles = self.vehicle_api.fetch_vehicles().await?;
        let site = match self.battery_site_id().await {
            Ok(site_id) => self.energy_api.fetch_site_status(&site_id).await.ok(),
            Err(_) => None,
        };
        Ok(SystemStatus {
            vehicles,
            site,
            credential_present: self.tokens.credential().await.is_some(),
        })
    }

    async fn battery_site_id(&self) -> Result<String> {
        let products = self.energy_api.fetch_products().await?;
        products
            .into_iter()
            .find(|p| p.kind == ProductKind::Battery)
            .map(|p| p.id)
            .ok_or_else(|| HestiaError::generic("No storage battery registered to the account"))
    }

    /// Compute a charging plan from current vehicle and storage state.
    ///
    /// The vehicle list and energy products are the two required reads; a
    /// per-vehicle detail failure only excludes that vehicle.
    pub async fn create_plan(&self, options: &PlanOptions) -> Result<ChargingPlan> {
        let (vehicles, products) = tokio::join!(
            self.vehicle_api.fetch_vehicles(),
            self.energy_api.fetch_products()
        );
        let vehicles = vehicles?;
        let products = products?;

        let site_id = products
            .into_iter()
            .find(|p| p.kind == ProductKind::Battery)
            .map(|p| p.id)
            .ok_or_else(|| HestiaError::generic("No storage battery registered to the account"))?;
        let site = self.energy_api.fetch_site_status(&site_id).await?;

        let reserve_floor = options
            .reserve_floor_percent
            .unwrap_or(self.charging.reserve_floor_percent);
        let max_simultaneous = options
            .max_simultaneous_charging
            .unwrap_or(self.charging.max_simultaneous_charging);

        let ctx = SiteContext {
            storage_level: site.percentage_charged,
            reserve_floor: reserve_floor as f64,
            solar_power_w: site.solar_power_w,
            load_power_w: site.load_power_w,
            grid_power_w: site.grid_power_w,
            storage_headroom: self.charging.storage_headroom_percent,
            solar_margin_w: self.charging.solar_margin_w,
        };

        let mut entries = Vec::new();
        for vehicle in &vehicles {
            let logger = self.logger.with_vehicle(&vehicle.id);
            if vehicle.state != VehicleState::Online {
                logger.debug(&format!("Skipping vehicle in state {:?}", vehicle.state));
                continue;
            }

            let charge = match self.vehicle_api.fetch_charge_state(&vehicle.id).await {
                Ok(c) => c,
                Err(e) => {
                    // Exclude this vehicle rather than abort the whole plan
                    logger.warn(&format!("Failed to fetch charge state: {}", e));
                    continue;
                }
            };

            let target = *options
                .target_charge_levels
                .get(&vehicle.id)
                .unwrap_or(&self.charging.default_target_level) as f64;
            let charging_needed = target - charge.battery_level;
            let priority = if options.priority_vehicles.contains(&vehicle.id) {
                Priority::High
            } else {
                Priority::Normal
            };
            let (action, reason) = decide_action(charging_needed, charge.is_plugged_in, &ctx);

            entries.push(VehiclePlanEntry {
                vehicle_id: vehicle.id.clone(),
                display_name: vehicle.display_name.clone(),
                current_charge: charge.battery_level,
                target_charge: target,
                charging_needed,
                is_plugged_in: charge.is_plugged_in,
                priority,
                action,
                reason,
            });
        }

        apply_admission_control(&mut entries, max_simultaneous);

        let mut storage_actions = Vec::new();
        if let Some(action) = storage_floor_action(
            &site_id,
            site.percentage_charged,
            reserve_floor,
            site.grid_power_w,
        ) {
            storage_actions.push(action);
        }

        let mut recommendations = Vec::new();
        if let Some(rec) = surplus_advisory(
            site.percentage_charged,
            site.solar_power_w,
            site.load_power_w,
            self.charging.solar_advisory_margin_w,
        ) {
            recommendations.push(rec);
        }

        let plan = ChargingPlan {
            id: uuid::Uuid::new_v4(),
            created_at: Utc::now(),
            vehicles: entries,
            storage_actions,
            recommendations,
        };
        self.logger.info(&format!(
            "Plan {} computed: {} vehicle entries, {} storage actions",
            plan.id,
            plan.vehicles.len(),
            plan.storage_actions.len()
        ));
        Ok(plan)
    }

    /// Execute a plan, accumulating per-item outcomes independently so one
    /// failure never prevents subsequent items from running. Storage-level
    /// actions execute after all vehicle actions.
    pub async fn execute_plan(&self, plan: &ChargingPlan) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();

        for entry in &plan.vehicles {
            let command = match entry.action {
                PlanAction::StartCharging => Some(VehicleCommand::StartCharging),
                PlanAction::DelayCharging => Some(VehicleCommand::StopCharging),
                PlanAction::ScheduleOffPeak => Some(VehicleCommand::ScheduleCharging {
                    start_at: next_off_peak_timestamp(
                        Utc::now(),
                        self.tz,
                        self.charging.off_peak_hour,
                    ),
                }),
                PlanAction::QueueCharging | PlanAction::None => None,
            };

            let Some(command) = command else {
                result.skipped.push(ExecutionRecord::ok(
                    &entry.vehicle_id,
                    format!("{:?}: {}", entry.action, entry.reason),
                ));
                continue;
            };

            let description = format!("{} ({})", command.name(), entry.reason);
            match self
                .vehicle_api
                .send_command(&entry.vehicle_id, command)
                .await
            {
                Ok(()) => {
                    result
                        .executed
                        .push(ExecutionRecord::ok(&entry.vehicle_id, description));
                }
                Err(e) => {
                    self.logger
                        .with_vehicle(&entry.vehicle_id)
                        .warn(&format!("Command failed: {}", e));
                    result.failed.push(ExecutionRecord::failed(
                        &entry.vehicle_id,
                        description,
                        e.to_string(),
                    ));
                }
            }
        }

        for action in &plan.storage_actions {
            match action {
                StorageAction::RaiseReserveFloor {
                    site_id,
                    from_percent,
                    to_percent,
                } => {
                    let description =
                        format!("raise reserve floor {} -> {}", from_percent, to_percent);
                    match self.energy_api.set_reserve_floor(site_id, *to_percent).await {
                        Ok(()) => result.executed.push(ExecutionRecord::ok(site_id, description)),
                        Err(e) => {
                            self.logger
                                .warn(&format!("Storage action failed for {}: {}", site_id, e));
                            result.failed.push(ExecutionRecord::failed(
                                site_id,
                                description,
                                e.to_string(),
                            ));
                        }
                    }
                }
            }
        }

        self.logger.info(&format!(
            "Plan {} executed: {} ok, {} failed, {} skipped",
            plan.id,
            result.executed.len(),
            result.failed.len(),
            result.skipped.len()
        ));
        Ok(result)
    }

    /// Start the recurring coordination loop. Runs one cycle immediately,
    /// then reschedules after the configured interval. Fails with
    /// `AlreadyActive` when a loop is running.
    pub async fn start_loop(self: Arc<Self>, options: LoopOptions) -> Result<()> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(HestiaError::AlreadyActive);
        }

        let interval_minutes = options
            .interval_minutes
            .unwrap_or(self.charging.interval_minutes);
        {
            let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
            *stats = LoopStats {
                interval_minutes,
                auto_execute: options.auto_execute,
                ..LoopStats::default()
            };
        }

        let auto_execute = options.auto_execute;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let coordinator = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let interval = Duration::from_secs(interval_minutes * 60);
            loop {
                coordinator.run_cycle(&options).await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            coordinator.logger.info("Coordination loop stopped");
        });

        let mut guard = self.loop_handle.lock().await;
        *guard = Some(LoopHandle { stop_tx, task });
        self.logger.info(&format!(
            "Coordination loop started, interval {} min, auto_execute={}",
            interval_minutes, auto_execute
        ));
        Ok(())
    }

    /// One loop cycle; its own errors are logged and recorded, never
    /// propagated, so a bad cycle does not terminate the loop.
    async fn run_cycle(&self, options: &LoopOptions) {
        let outcome = async {
            let plan = self.create_plan(&options.plan).await?;
            if options.auto_execute {
                let result = self.execute_plan(&plan).await?;
                if !result.failed.is_empty() {
                    self.logger.warn(&format!(
                        "Cycle finished with {} failed items",
                        result.failed.len()
                    ));
                }
            }
            Ok::<(), HestiaError>(())
        }
        .await;

        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.cycles_completed += 1;
        stats.last_cycle_at = Some(Utc::now());
        stats.last_cycle_error = match outcome {
            Ok(()) => None,
            Err(e) => {
                self.logger.error(&format!("Coordination cycle failed: {}", e));
                Some(e.to_string())
            }
        };
    }

    /// Stop the loop. The in-flight cycle is allowed to finish; no further
    /// cycle is scheduled. Fails with `NotActive` when no loop is running.
    pub async fn stop_loop(&self) -> Result<()> {
        let mut guard = self.loop_handle.lock().await;
        let Some(handle) = guard.take() else {
            return Err(HestiaError::NotActive);
        };
        let _ = handle.stop_tx.send(true);
        self.active.store(false, Ordering::SeqCst);
        // Detach rather than abort: cancellation is cooperative
        drop(handle.task);
        self.logger.info("Coordination loop stop requested");
        Ok(())
    }

    /// Observable state of the scheduled loop
    pub fn loop_status(&self) -> LoopStatus {
        let stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        LoopStatus {
            active: self.active.load(Ordering::SeqCst),
            interval_minutes: stats.interval_minutes,
            auto_execute: stats.auto_execute,
            cycles_completed: stats.cycles_completed,
            last_cycle_at: stats.last_cycle_at,
            last_cycle_error: stats.last_cycle_error.clone(),
        }
    }

    /// Whether a loop is currently active
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Next occurrence of the off-peak hour in the given timezone, as a Unix
/// timestamp. Rolls to the next day when the hour has already passed.
pub fn next_off_peak_timestamp(now: DateTime<Utc>, tz: Tz, hour: u32) -> i64 {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    // DST gaps can make a wall-clock hour nonexistent; try up to three days
    for _ in 0..3 {
        if let Some(naive) = date.and_hms_opt(hour, 0, 0)
            && let Some(candidate) = tz.from_local_datetime(&naive).earliest()
        {
            let utc = candidate.with_timezone(&Utc);
            if utc > now {
                return utc.timestamp();
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
    (now + chrono::Duration::days(1)).timestamp()
}
