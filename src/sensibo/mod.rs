//! Sensibo cloud API integration module
//!
//! - `client`: HTTP client (single choke point for outbound requests)
//! - `retry`: Bounded fixed-floor retry policy
//! - `patch`: acState merge
//! - `translate`: Inbound message → command patch

pub mod client;
pub mod patch;
pub mod retry;
pub mod translate;

pub use client::SensiboClient;
pub use retry::RetryPolicy;
pub use translate::translate_command;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SensiboError;
use crate::models::{AcState, DeviceOption, Envelope, MeasurementReport, Patch};

/// Operations the nodes and the admin API need from Sensibo
#[async_trait]
pub trait SensiboApi: Send + Sync {
    async fn list_devices(&self, api_key: &str) -> Result<Vec<DeviceOption>, SensiboError>;

    async fn get_measurements(
        &self,
        api_key: &str,
        device_id: &str,
    ) -> Result<MeasurementReport, SensiboError>;

    async fn get_config(&self, api_key: &str, device_id: &str) -> Result<Envelope<Value>, SensiboError>;

    /// Read-merge-write; returns the merged acState that was submitted
    async fn patch_device(
        &self,
        api_key: &str,
        device_id: &str,
        patch: &Patch,
    ) -> Result<AcState, SensiboError>;
}
