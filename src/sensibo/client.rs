//! Sensibo cloud API client
//!
//! Every outbound call goes through [`SensiboClient::request`], which applies
//! the retry policy and turns replies into [`Envelope`]s.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::patch::merged;
use super::retry::{RetryMode, RetryPolicy};
use super::SensiboApi;
use crate::config::SensiboConfig;
use crate::error::SensiboError;
use crate::models::{
    AcState, AcStateRecord, AcStateWrite, Device, DeviceOption, Envelope, Measurement,
    MeasurementReport, Patch,
};

pub struct SensiboClient {
    http_client: Client,
    api_root: String,
    retry: RetryPolicy,
    patch_read_timeout: Duration,
}

impl SensiboClient {
    pub fn new(config: &SensiboConfig) -> Result<Self, SensiboError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(SensiboError::from)?;

        let retry = config.retry_policy();
        let api_root = config.api_root.trim_end_matches('/').to_string();
        tracing::info!(
            "[Sensibo] Client ready: {} (up to {} attempts per request)",
            api_root,
            retry.max_attempts()
        );

        Ok(Self {
            http_client,
            api_root,
            retry,
            patch_read_timeout: config.patch_read_timeout(),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        timeout: Option<Duration>,
        mode: RetryMode,
    ) -> Result<Envelope<T>, SensiboError> {
        let what = format!("{} {}", method, path);
        self.retry
            .run(&what, mode, move || {
                self.try_request(method.clone(), path, query, body, timeout)
            })
            .await
    }

    async fn try_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Envelope<T>, SensiboError> {
        let url = format!("{}{}", self.api_root, path);
        tracing::debug!("[Sensibo] {} {}", method, path);

        let mut req = self.http_client.request(method, &url).query(query);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(SensiboError::RemoteRejection {
                status: status.as_u16(),
                message: rejection_message(&text).unwrap_or_else(|| status.to_string()),
            });
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| SensiboError::MalformedResponse(format!("{}: {}", path, e)))?;

        let envelope_status = value.get("status").and_then(Value::as_str).unwrap_or("");
        if envelope_status != "success" {
            return Err(SensiboError::RemoteRejection {
                status: status.as_u16(),
                message: rejection_message(&text)
                    .unwrap_or_else(|| format!("status '{}'", envelope_status)),
            });
        }

        serde_json::from_value(value)
            .map_err(|e| SensiboError::MalformedResponse(format!("{}: {}", path, e)))
    }

    /// All pods of the account, projected to `{value: id, label: room name}`
    pub async fn list_devices(&self, api_key: &str) -> Result<Vec<DeviceOption>, SensiboError> {
        let envelope: Envelope<Vec<Device>> = self
            .request(
                Method::GET,
                "/users/me/pods",
                &[("apiKey", api_key), ("fields", "id,room")],
                None,
                None,
                RetryMode::Read,
            )
            .await?;

        Ok(envelope.result.into_iter().map(DeviceOption::from).collect())
    }

    /// Most recent measurement of a pod
    pub async fn get_measurements(
        &self,
        api_key: &str,
        device_id: &str,
    ) -> Result<MeasurementReport, SensiboError> {
        let envelope: Envelope<Vec<Measurement>> = self
            .request(
                Method::GET,
                &format!("/pods/{}/measurements/", device_id),
                &[("apiKey", api_key)],
                None,
                None,
                RetryMode::Read,
            )
            .await?;

        let measurement = envelope.result.into_iter().next().ok_or_else(|| {
            SensiboError::MalformedResponse(format!("no measurements reported for pod {}", device_id))
        })?;

        Ok(MeasurementReport {
            status: envelope.status,
            measurement,
        })
    }

    /// Full pod record (`fields=*`), returned untouched
    pub async fn get_config(
        &self,
        api_key: &str,
        device_id: &str,
    ) -> Result<Envelope<Value>, SensiboError> {
        self.request(
            Method::GET,
            &format!("/pods/{}", device_id),
            &[("apiKey", api_key), ("fields", "*")],
            None,
            None,
            RetryMode::Read,
        )
        .await
    }

    async fn fetch_ac_state(&self, api_key: &str, device_id: &str) -> Result<AcState, SensiboError> {
        let envelope: Envelope<AcStateRecord> = self
            .request(
                Method::GET,
                &format!("/pods/{}", device_id),
                &[("apiKey", api_key), ("fields", "acState")],
                None,
                Some(self.patch_read_timeout),
                RetryMode::Read,
            )
            .await?;

        Ok(envelope.result.ac_state)
    }

    /// Submit a complete acState. Not retried once the request may have
    /// reached the vendor.
    async fn change_state(
        &self,
        api_key: &str,
        device_id: &str,
        ac_state: &AcState,
    ) -> Result<Value, SensiboError> {
        let body = serde_json::to_value(AcStateWrite { ac_state })
            .map_err(|e| SensiboError::MalformedResponse(e.to_string()))?;

        let envelope: Envelope<Value> = self
            .request(
                Method::POST,
                &format!("/pods/{}/acStates", device_id),
                &[("apiKey", api_key)],
                Some(&body),
                None,
                RetryMode::Write,
            )
            .await?;

        Ok(envelope.result)
    }

    /// Read the pod's acState, merge `patch` into it and write it back.
    pub async fn patch_device(
        &self,
        api_key: &str,
        device_id: &str,
        patch: &Patch,
    ) -> Result<AcState, SensiboError> {
        tracing::info!("[Sensibo] Patching pod {} ({} attributes)", device_id, patch.len());

        if patch.is_empty() {
            tracing::debug!("[Sensibo] Pod {} patch has no attributes, rewriting current state", device_id);
        }

        let current = self.fetch_ac_state(api_key, device_id).await?;
        tracing::debug!("[Sensibo] Pod {} old state: {:?}", device_id, current);

        let ac_state = merged(&current, patch);
        tracing::debug!("[Sensibo] Pod {} new state: {:?}", device_id, ac_state);

        let accepted = self.change_state(api_key, device_id, &ac_state).await?;
        tracing::debug!("[Sensibo] Pod {} accepted: {}", device_id, accepted);

        Ok(ac_state)
    }
}

/// Human-readable reason from a Sensibo error body, if it carries one
fn rejection_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "reason"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl SensiboApi for SensiboClient {
    async fn list_devices(&self, api_key: &str) -> Result<Vec<DeviceOption>, SensiboError> {
        SensiboClient::list_devices(self, api_key).await
    }

    async fn get_measurements(
        &self,
        api_key: &str,
        device_id: &str,
    ) -> Result<MeasurementReport, SensiboError> {
        SensiboClient::get_measurements(self, api_key, device_id).await
    }

    async fn get_config(&self, api_key: &str, device_id: &str) -> Result<Envelope<Value>, SensiboError> {
        SensiboClient::get_config(self, api_key, device_id).await
    }

    async fn patch_device(
        &self,
        api_key: &str,
        device_id: &str,
        patch: &Patch,
    ) -> Result<AcState, SensiboError> {
        SensiboClient::patch_device(self, api_key, device_id, patch).await
    }
}
