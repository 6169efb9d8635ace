//! HTTP uplink to the control plane.
//!
//! One blocking client per uplink, built once; every request carries an
//! explicit deadline (telemetry and reports 5 s, pending poll and firmware
//! fetch 10 s). There is no retry queue anywhere — the scheduler's next
//! pass retries the semantics.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Uplink configuration.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Control-plane base URL, e.g. `http://hub.local:8000`.
    pub base_url: String,
    /// Sent as `X-API-Key` when present.
    pub api_key: Option<String>,
    /// Deadline for telemetry posts and OTA status reports.
    pub report_timeout: Duration,
    /// Deadline for the pending-update poll and firmware range fetches.
    pub fetch_timeout: Duration,
}

impl UplinkConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            report_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// A firmware update pending on the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub update_id: i64,
    pub firmware_id: i64,
    /// Role the firmware targets.
    pub node_type: String,
    pub version: String,
    pub hardware: String,
    pub md5: String,
    pub num_parts: u32,
    pub size_bytes: u64,
    /// Empty or absent means every node of the type.
    #[serde(default)]
    pub target_node_id: Option<String>,
    #[serde(default)]
    pub force: bool,
}

/// Per-node transfer progress reported to the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct OtaProgress {
    pub current_part: u32,
    pub total_parts: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The HTTP surface the gateway calls.
///
/// A trait so the telemetry relay and OTA distributor can be exercised
/// against a recording fake.
pub trait Uplink {
    /// `POST /api/v1/nodes/{hex}/telemetry`.
    fn post_telemetry(&mut self, node_hex: &str, report: &Value) -> Result<()>;

    /// `GET /api/v1/ota/updates/pending`.
    fn pending_updates(&mut self) -> Result<Vec<PendingUpdate>>;

    /// `POST /api/v1/ota/updates/{id}/start`.
    fn report_start(&mut self, update_id: i64) -> Result<()>;

    /// `POST /api/v1/ota/updates/{id}/complete`.
    fn report_complete(&mut self, update_id: i64) -> Result<()>;

    /// `POST /api/v1/ota/updates/{id}/fail?error_message=…`.
    fn report_fail(&mut self, update_id: i64, message: &str) -> Result<()>;

    /// `POST /api/v1/ota/updates/{id}/node/{hex}/progress`.
    fn report_progress(
        &mut self,
        update_id: i64,
        node_hex: &str,
        progress: &OtaProgress,
    ) -> Result<()>;

    /// Ranged `GET /api/v1/firmware/{id}/download`, filling `buf` from
    /// `offset`. Returns the bytes actually read; fewer than `buf.len()`
    /// is a short read the caller treats as a per-part failure.
    fn fetch_firmware(&mut self, firmware_id: i64, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Production uplink over a blocking HTTP client.
pub struct HttpUplink {
    config: UplinkConfig,
    client: Client,
}

impl HttpUplink {
    pub fn new(config: UplinkConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.report_timeout).build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn keyed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    fn check(url: &str, status: StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }

    fn post_empty(&self, url: &str) -> Result<()> {
        let response = self
            .keyed(self.client.post(url))
            .timeout(self.config.report_timeout)
            .send()?;
        Self::check(url, response.status())
    }
}

impl Uplink for HttpUplink {
    fn post_telemetry(&mut self, node_hex: &str, report: &Value) -> Result<()> {
        let url = self.url(&format!("/api/v1/nodes/{node_hex}/telemetry"));
        let response = self
            .keyed(self.client.post(&url))
            .timeout(self.config.report_timeout)
            .json(report)
            .send()?;
        Self::check(&url, response.status())
    }

    fn pending_updates(&mut self) -> Result<Vec<PendingUpdate>> {
        let url = self.url("/api/v1/ota/updates/pending");
        let response = self
            .keyed(self.client.get(&url))
            .timeout(self.config.fetch_timeout)
            .send()?;
        Self::check(&url, response.status())?;
        let updates = response.json::<Vec<PendingUpdate>>()?;
        debug!(target: "ota", pending = updates.len(), "polled control plane");
        Ok(updates)
    }

    fn report_start(&mut self, update_id: i64) -> Result<()> {
        self.post_empty(&self.url(&format!("/api/v1/ota/updates/{update_id}/start")))
    }

    fn report_complete(&mut self, update_id: i64) -> Result<()> {
        self.post_empty(&self.url(&format!("/api/v1/ota/updates/{update_id}/complete")))
    }

    fn report_fail(&mut self, update_id: i64, message: &str) -> Result<()> {
        let url = self.url(&format!("/api/v1/ota/updates/{update_id}/fail"));
        let response = self
            .keyed(self.client.post(&url))
            .timeout(self.config.report_timeout)
            .query(&[("error_message", message)])
            .send()?;
        Self::check(&url, response.status())
    }

    fn report_progress(
        &mut self,
        update_id: i64,
        node_hex: &str,
        progress: &OtaProgress,
    ) -> Result<()> {
        let url = self.url(&format!(
            "/api/v1/ota/updates/{update_id}/node/{node_hex}/progress"
        ));
        let response = self
            .keyed(self.client.post(&url))
            .timeout(self.config.report_timeout)
            .json(progress)
            .send()?;
        Self::check(&url, response.status())
    }

    fn fetch_firmware(&mut self, firmware_id: i64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let url = self.url(&format!("/api/v1/firmware/{firmware_id}/download"));
        let end = offset + buf.len() as u64 - 1;
        let response = self
            .keyed(self.client.get(&url))
            .timeout(self.config.fetch_timeout)
            .header(reqwest::header::RANGE, format!("bytes={offset}-{end}"))
            .send()?;

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            return Err(Error::Status {
                status: status.as_u16(),
                url,
            });
        }

        let mut reader = response;
        let mut read = 0;
        while read < buf.len() {
            let n = reader.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let uplink = HttpUplink::new(UplinkConfig::new("http://hub.local:8000/")).unwrap();
        assert_eq!(
            uplink.url("/api/v1/ota/updates/pending"),
            "http://hub.local:8000/api/v1/ota/updates/pending"
        );
    }

    #[test]
    fn pending_update_parses_control_plane_document() {
        let raw = r#"{
            "update_id": 12, "firmware_id": 4, "node_type": "sensor",
            "version": "1.2.0", "hardware": "esp32", "md5": "d41d8cd9",
            "num_parts": 3, "size_bytes": 2560
        }"#;
        let update: PendingUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(update.update_id, 12);
        assert_eq!(update.num_parts, 3);
        assert_eq!(update.target_node_id, None);
        assert!(!update.force);
    }

    #[test]
    fn progress_omits_absent_error() {
        let progress = OtaProgress {
            current_part: 1,
            total_parts: 3,
            status: "downloading".into(),
            error_message: None,
        };
        let raw = serde_json::to_value(&progress).unwrap();
        assert!(raw.get("error_message").is_none());
        assert_eq!(raw["current_part"], 1);
    }
}
