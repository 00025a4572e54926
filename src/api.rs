//! Provider API abstraction for Hestia
//!
//! The coordinator depends on these traits, not on vendor REST shapes. The
//! concrete client routes every call through the rate-limited dispatcher,
//! attaches a bearer token from the token manager, and signs privileged
//! vehicle commands when a key pair is registered.

use crate::dispatch::{ApiRequest, RateLimitedDispatcher};
use crate::error::{HestiaError, Result};
use crate::logging::get_logger;
use crate::signing::CommandSigner;
use crate::token::TokenLifecycleManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reachability of a vehicle as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleState {
    Online,
    Asleep,
    Offline,
}

/// Read-only vehicle projection, fetched per coordination cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub id: String,
    pub display_name: String,
    pub state: VehicleState,
}

/// Detailed charge state of one vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeState {
    /// Battery level in percent
    pub battery_level: f64,

    /// Provider charging state string (e.g. "Charging", "Stopped")
    pub charging_state: String,

    /// Whether the charge port reports a connected cable
    pub is_plugged_in: bool,
}

/// Site-level energy storage status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteStatus {
    /// Storage battery level in percent
    pub percentage_charged: f64,

    /// Current solar production in watts
    pub solar_power_w: f64,

    /// Current home load in watts
    pub load_power_w: f64,

    /// Grid power in watts; negative means net export
    pub grid_power_w: f64,
}

/// Kind of an energy product registered to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Battery,
    Solar,
}

/// An energy product (storage battery or solar installation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyProduct {
    pub id: String,
    pub kind: ProductKind,
}

/// Remote command issued to a vehicle
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCommand {
    StartCharging,
    StopCharging,
    /// Schedule charging at a Unix timestamp (seconds)
    ScheduleCharging { start_at: i64 },
}

impl VehicleCommand {
    pub fn name(&self) -> &'static str {
        match self {
            VehicleCommand::StartCharging => "charging_start",
            VehicleCommand::StopCharging => "charging_stop",
            VehicleCommand::ScheduleCharging { .. } => "scheduled_charging",
        }
    }

    pub fn parameters(&self) -> serde_json::Value {
        match self {
            VehicleCommand::StartCharging | VehicleCommand::StopCharging => {
                serde_json::json!({})
            }
            VehicleCommand::ScheduleCharging { start_at } => {
                serde_json::json!({ "enable": true, "time": start_at })
            }
        }
    }
}

/// Vehicle-side provider operations
#[async_trait::async_trait]
pub trait VehicleApi: Send + Sync {
    async fn fetch_vehicles(&self) -> Result<Vec<VehicleSnapshot>>;
    async fn fetch_charge_state(&self, vehicle_id: &str) -> Result<ChargeState>;
    async fn send_command(&self, vehicle_id: &str, command: VehicleCommand) -> Result<()>;
}

/// Energy-storage-side provider operations
#[async_trait::async_trait]
pub trait EnergyApi: Send + Sync {
    async fn fetch_products(&self) -> Result<Vec<EnergyProduct>>;
    async fn fetch_site_status(&self, site_id: &str) -> Result<SiteStatus>;
    async fn set_reserve_floor(&self, site_id: &str, percent: u8) -> Result<()>;
}

/// Concrete provider client over the rate-limited dispatcher
pub struct FleetClient {
    dispatcher: RateLimitedDispatcher,
    tokens: Arc<TokenLifecycleManager>,
    signer: Arc<CommandSigner>,
    logger: crate::logging::StructuredLogger,
}

impl FleetClient {
    pub fn new(
        dispatcher: RateLimitedDispatcher,
        tokens: Arc<TokenLifecycleManager>,
        signer: Arc<CommandSigner>,
    ) -> Self {
        let logger = get_logger("fleet");
        Self {
            dispatcher,
            tokens,
            signer,
            logger,
        }
    }

    async fn get(&self, path: String) -> Result<serde_json::Value> {
        let bearer = self.tokens.bearer().await?;
        let resp = self
            .dispatcher
            .submit(ApiRequest::get(path).with_bearer(bearer))
            .await?;
        Ok(resp.body)
    }

    async fn post(&self, path: String, body: serde_json::Value) -> Result<serde_json::Value> {
        let bearer = self.tokens.bearer().await?;
        let resp = self
            .dispatcher
            .submit(ApiRequest::post(path, body).with_bearer(bearer))
            .await?;
        Ok(resp.body)
    }
}

/// Providers wrap payloads in a `response` envelope; accept both wrapped
/// and bare shapes.
fn unwrap_response(body: serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(mut map) => {
            map.remove("response").unwrap_or(serde_json::Value::Object(map))
        }
        other => other,
    }
}

#[derive(Deserialize)]
struct VehicleWire {
    id: serde_json::Value,
    #[serde(default)]
    display_name: String,
    #[serde(default = "default_state")]
    state: String,
}

fn default_state() -> String {
    "offline".to_string()
}

impl VehicleWire {
    fn into_snapshot(self) -> VehicleSnapshot {
        let id = match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let state = match self.state.as_str() {
            "online" => VehicleState::Online,
            "asleep" => VehicleState::Asleep,
            _ => VehicleState::Offline,
        };
        VehicleSnapshot {
            id,
            display_name: self.display_name,
            state,
        }
    }
}

#[derive(Deserialize)]
struct ChargeStateWire {
    #[serde(default)]
    battery_level: f64,
    #[serde(default)]
    charging_state: String,
    #[serde(default)]
    charge_port_latch: String,
}

#[derive(Deserialize)]
struct ProductWire {
    #[serde(default)]
    energy_site_id: Option<serde_json::Value>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    battery_type: Option<String>,
    #[serde(default)]
    solar_type: Option<String>,
}

#[async_trait::async_trait]
impl VehicleApi for FleetClient {
    async fn fetch_vehicles(&self) -> Result<Vec<VehicleSnapshot>> {
        let body = self.get("api/1/vehicles".to_string()).await?;
        let items: Vec<VehicleWire> = serde_json::from_value(unwrap_response(body))?;
        Ok(items.into_iter().map(VehicleWire::into_snapshot).collect())
    }

    async fn fetch_charge_state(&self, vehicle_id: &str) -> Result<ChargeState> {
        let body = self
            .get(format!("api/1/vehicles/{}/vehicle_data", vehicle_id))
            .await?;
        let data = unwrap_response(body);
        let wire: ChargeStateWire = serde_json::from_value(
            data.get("charge_state")
                .cloned()
                .ok_or_else(|| HestiaError::generic("Vehicle data missing charge_state"))?,
        )?;
        Ok(ChargeState {
            battery_level: wire.battery_level,
            is_plugged_in: wire.charge_port_latch == "Engaged",
            charging_state: wire.charging_state,
        })
    }

    async fn send_command(&self, vehicle_id: &str, command: VehicleCommand) -> Result<()> {
        let body = if self.signer.is_configured() {
            let envelope = self
                .signer
                .sign(command.name(), vehicle_id, command.parameters())?;
            let payload = serde_json::to_value(&envelope)?;
            self.post(
                format!("api/1/vehicles/{}/signed_command", vehicle_id),
                payload,
            )
            .await?
        } else {
            self.post(
                format!("api/1/vehicles/{}/command/{}", vehicle_id, command.name()),
                command.parameters(),
            )
            .await?
        };

        let result = unwrap_response(body);
        if let Some(false) = result.get("result").and_then(|v| v.as_bool()) {
            let reason = result
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("command rejected");
            return Err(HestiaError::remote(200, reason, result.to_string()));
        }
        self.logger
            .with_vehicle(vehicle_id)
            .debug(&format!("Command {} acknowledged", command.name()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl EnergyApi for FleetClient {
    async fn fetch_products(&self) -> Result<Vec<EnergyProduct>> {
        let body = self.get("api/1/products".to_string()).await?;
        let items: Vec<ProductWire> = serde_json::from_value(unwrap_response(body))?;
        let mut products = Vec::new();
        for wire in items {
            let id_val = wire.energy_site_id.or(wire.id);
            let Some(id_val) = id_val else { continue };
            let id = match &id_val {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let kind = if wire.battery_type.is_some() {
                ProductKind::Battery
            } else if wire.solar_type.is_some() {
                ProductKind::Solar
            } else {
                continue;
            };
            products.push(EnergyProduct { id, kind });
        }
        Ok(products)
    }

    async fn fetch_site_status(&self, site_id: &str) -> Result<SiteStatus> {
        let body = self
            .get(format!("api/1/energy_sites/{}/live_status", site_id))
            .await?;
        let data = unwrap_response(body);
        Ok(SiteStatus {
            percentage_charged: data
                .get("percentage_charged")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            solar_power_w: data
                .get("solar_power")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            load_power_w: data
                .get("load_power")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            grid_power_w: data
                .get("grid_power")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
        })
    }

    async fn set_reserve_floor(&self, site_id: &str, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(HestiaError::validation(
                "backup_reserve_percent",
                "Must be between 0 and 100",
            ));
        }
        self.post(
            format!("api/1/energy_sites/{}/backup", site_id),
            serde_json::json!({ "backup_reserve_percent": percent }),
        )
        .await?;
        Ok(())
    }
}
