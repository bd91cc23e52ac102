//! Blocking REST client for the simulator's HTTP API, bridged onto the
//! runtime with `spawn_blocking`.
//!
//! Call volume is tiny (metadata downloads on connect and aircraft change,
//! occasional one-shot reads/writes), so a blocking agent on the worker pool
//! is simpler than carrying an async HTTP stack.

use std::io::Read as _;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::error::{Result, XplinkError};
use crate::metadata::{CommandRecord, DatarefRecord, Ident};

/// API generation negotiated with the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn segment(self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }

    /// Pick the newest generation the reported simulator build speaks.
    /// Builds older than the v1 cutoff get v1 anyway, with a warning, rather
    /// than a refusal.
    pub fn for_sim_version(version: i32) -> Self {
        if version >= 121_400 {
            ApiVersion::V2
        } else {
            if version < 121_100 {
                warn!("simulator build {version} predates the HTTP API, trying v1 regardless");
            }
            ApiVersion::V1
        }
    }
}

/// Payload of `GET /api/capabilities`.
#[derive(Debug, Clone, Deserialize)]
pub struct Capabilities {
    pub api: ApiCapabilities,
    #[serde(rename = "x-plane")]
    pub simulator: SimulatorInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCapabilities {
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorInfo {
    pub version: String,
}

impl Capabilities {
    /// Builds that predate the capabilities route only speak v1.
    fn v1_fallback() -> Self {
        Self {
            api: ApiCapabilities { versions: vec!["v1".to_string()] },
            simulator: SimulatorInfo { version: String::new() },
        }
    }

    pub fn supports(&self, version: ApiVersion) -> bool {
        self.api.versions.iter().any(|v| v == version.segment())
    }
}

/// Standard response envelope wrapping every payload.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct WriteBody {
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ActivateBody {
    duration: f64,
}

/// One REST endpoint, pinned to a host, port, and API generation.
#[derive(Debug, Clone)]
pub struct RestClient {
    agent: ureq::Agent,
    host: IpAddr,
    port: u16,
    api_path: String,
    version: ApiVersion,
}

impl RestClient {
    pub fn new(host: IpAddr, port: u16, api_path: &str, version: ApiVersion) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .build();
        Self { agent, host, port, api_path: api_path.to_string(), version }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.api_path)
    }

    fn versioned_url(&self, route: &str) -> String {
        format!("{}/{}/{}", self.base_url(), self.version.segment(), route)
    }

    /// Websocket endpoint for the same host and API generation.
    pub fn ws_url(&self) -> String {
        format!(
            "ws://{}:{}{}/{}",
            self.host,
            self.port,
            self.api_path,
            self.version.segment()
        )
    }

    async fn get_json<T>(&self, url: String, context: &'static str) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        spawn_blocking(move || {
            let response = agent.get(&url).call().map_err(|e| rest_error(context, e))?;
            let envelope: DataEnvelope<T> = response
                .into_json()
                .map_err(|e| XplinkError::protocol(context, e.to_string()))?;
            Ok(envelope.data)
        })
        .await
        .map_err(|e| XplinkError::transport(format!("{context} task: {e}")))?
    }

    /// Cheap reachability check, always against v1.
    pub async fn probe(&self) -> Result<()> {
        let url = format!("{}/v1/datarefs/count", self.base_url());
        let agent = self.agent.clone();
        spawn_blocking(move || {
            let mut body = String::new();
            agent
                .get(&url)
                .call()
                .map_err(|e| rest_error("probe", e))?
                .into_reader()
                .read_to_string(&mut body)?;
            debug!("api reachable, dataref count {}", body.trim());
            Ok(())
        })
        .await
        .map_err(|e| XplinkError::transport(format!("probe task: {e}")))?
    }

    /// Fetch the advertised capabilities. A 404 means an old build without
    /// the route, which implies plain v1.
    pub async fn capabilities(&self) -> Result<Capabilities> {
        let url = format!("{}/capabilities", self.base_url());
        let agent = self.agent.clone();
        spawn_blocking(move || match agent.get(&url).call() {
            Ok(response) => response
                .into_json()
                .map_err(|e| XplinkError::protocol("capabilities", e.to_string())),
            Err(ureq::Error::Status(404, _)) => {
                debug!("no capabilities route, assuming v1 only");
                Ok(Capabilities::v1_fallback())
            }
            Err(e) => Err(rest_error("capabilities", e)),
        })
        .await
        .map_err(|e| XplinkError::transport(format!("capabilities task: {e}")))?
    }

    /// Download the full dataref list.
    pub async fn fetch_datarefs(&self) -> Result<Vec<DatarefRecord>> {
        self.get_json(self.versioned_url("datarefs"), "fetch datarefs").await
    }

    /// Download the full command list.
    pub async fn fetch_commands(&self) -> Result<Vec<CommandRecord>> {
        self.get_json(self.versioned_url("commands"), "fetch commands").await
    }

    /// One-shot read of a dataref's current value, returned raw.
    pub async fn dataref_value(&self, ident: Ident) -> Result<serde_json::Value> {
        self.get_json(self.versioned_url(&format!("datarefs/{ident}/value")), "read dataref")
            .await
    }

    /// Write a dataref over REST. `name` is only used for error reporting.
    pub async fn write_dataref(
        &self,
        ident: Ident,
        name: &str,
        value: serde_json::Value,
        index: Option<usize>,
    ) -> Result<()> {
        let mut url = self.versioned_url(&format!("datarefs/{ident}/value"));
        if let Some(index) = index {
            url.push_str(&format!("?index={index}"));
        }
        let name = name.to_string();
        let agent = self.agent.clone();
        spawn_blocking(move || {
            match agent.patch(&url).send_json(&WriteBody { data: value }) {
                Ok(_) => Ok(()),
                Err(ureq::Error::Status(403, _)) => Err(XplinkError::NotWritable { name }),
                Err(e) => Err(rest_error("write dataref", e)),
            }
        })
        .await
        .map_err(|e| XplinkError::transport(format!("write task: {e}")))?
    }

    /// Fire a command over REST with the given hold duration.
    pub async fn activate_command(&self, ident: Ident, duration: f64) -> Result<()> {
        let url = self.versioned_url(&format!("command/{ident}/activate"));
        let agent = self.agent.clone();
        spawn_blocking(move || {
            agent
                .post(&url)
                .send_json(&ActivateBody { duration })
                .map_err(|e| rest_error("activate command", e))?;
            Ok(())
        })
        .await
        .map_err(|e| XplinkError::transport(format!("activate task: {e}")))?
    }
}

fn rest_error(context: &'static str, err: ureq::Error) -> XplinkError {
    match err {
        ureq::Error::Status(code, _) => XplinkError::api(context, code),
        ureq::Error::Transport(t) => XplinkError::transport(t.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_negotiation_by_sim_build() {
        assert_eq!(ApiVersion::for_sim_version(121_400), ApiVersion::V2);
        assert_eq!(ApiVersion::for_sim_version(121_499), ApiVersion::V2);
        assert_eq!(ApiVersion::for_sim_version(121_300), ApiVersion::V1);
        // ancient builds degrade to v1 instead of failing
        assert_eq!(ApiVersion::for_sim_version(120_000), ApiVersion::V1);
    }

    #[test]
    fn urls_carry_api_generation() {
        let client = RestClient::new("192.168.1.40".parse().unwrap(), 8080, "/api", ApiVersion::V2);
        assert_eq!(client.base_url(), "http://192.168.1.40:8080/api");
        assert_eq!(client.versioned_url("datarefs"), "http://192.168.1.40:8080/api/v2/datarefs");
        assert_eq!(client.ws_url(), "ws://192.168.1.40:8080/api/v2");
    }

    #[test]
    fn capabilities_parse_and_fallback() {
        let raw = r#"{"api":{"versions":["v1","v2"]},"x-plane":{"version":"12.1.4-r3"}}"#;
        let caps: Capabilities = serde_json::from_str(raw).unwrap();
        assert!(caps.supports(ApiVersion::V2));
        assert_eq!(caps.simulator.version, "12.1.4-r3");

        let fallback = Capabilities::v1_fallback();
        assert!(fallback.supports(ApiVersion::V1));
        assert!(!fallback.supports(ApiVersion::V2));
    }

    #[test]
    fn record_envelope_shape() {
        let raw = r#"{"data":[{"id":3,"name":"sim/alt","value_type":"float","is_writable":true}]}"#;
        let envelope: DataEnvelope<Vec<DatarefRecord>> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.data[0].name, "sim/alt");
        assert!(envelope.data[0].is_writable);
    }
}
