//! External service layer: process-boundary NLP analyzer integration
//!
//! Delegates to a locally running analyzer with broader entity coverage
//! over a narrow HTTP contract, with support for liveness probes, memory
//! driven mode selection, and response parsing. Timeout is a first-class
//! outcome: the layer never extends a call beyond its configured deadline
//! and never propagates transport errors to the pipeline.

use crate::config::{ExternalConfig, ExternalMode};
use crate::entity::{Entity, EntityType, Layer};
use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Mode after resolving `ExternalMode::Auto` against available memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Disabled,
    Lite,
    Full,
}

impl ResolvedMode {
    fn profile(&self) -> &'static str {
        match self {
            ResolvedMode::Disabled => "disabled",
            ResolvedMode::Lite => "lite",
            ResolvedMode::Full => "full",
        }
    }
}

/// Available system memory in MiB, probed once at startup.
pub fn probe_available_mib() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.available_memory() / (1024 * 1024)
}

pub fn resolve_mode(config: &ExternalConfig, available_mib: u64) -> ResolvedMode {
    match config.mode {
        ExternalMode::Disabled => ResolvedMode::Disabled,
        ExternalMode::Lite => ResolvedMode::Lite,
        ExternalMode::Full => ResolvedMode::Full,
        ExternalMode::Auto => {
            if available_mib >= config.full_budget_mib {
                ResolvedMode::Full
            } else if available_mib >= config.lite_budget_mib {
                ResolvedMode::Lite
            } else {
                ResolvedMode::Disabled
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    profile: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    entities: Vec<WireEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub text: String,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
    #[serde(default = "default_score")]
    pub score: f64,
}

fn default_score() -> f64 {
    0.8
}

/// Soft outcome of one external call. Unavailable covers disabled mode,
/// timeout, transport failure, and malformed payloads alike.
#[derive(Debug)]
pub enum ExternalOutcome {
    Entities(Vec<Entity>),
    Unavailable,
}

pub struct ExternalLayer {
    client: Client,
    limiter: Semaphore,
    endpoint: String,
    mode: ResolvedMode,
    timeout: Duration,
}

impl ExternalLayer {
    pub fn new(config: &ExternalConfig, available_mib: u64) -> Self {
        let mode = resolve_mode(config, available_mib);
        info!(
            "external analyzer mode {} ({} MiB available)",
            mode.profile(),
            available_mib
        );

        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            limiter: Semaphore::new(config.pool_size.max(1)),
            endpoint: config.endpoint.clone(),
            mode,
            timeout,
        }
    }

    pub fn mode(&self) -> ResolvedMode {
        self.mode
    }

    /// Bounded call to the external analyzer. Concurrent callers are
    /// pooled through a semaphore so the analyzer process is not
    /// overloaded; the wait counts against the same deadline, so an
    /// unavailable analyzer can never deadlock callers.
    pub async fn detect(&self, text: &str, min_score: f64) -> ExternalOutcome {
        if self.mode == ResolvedMode::Disabled {
            return ExternalOutcome::Unavailable;
        }

        let call = async {
            let _permit = self.limiter.acquire().await?;
            self.request(text).await
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(wire)) => ExternalOutcome::Entities(self.parse_entities(wire, text, min_score)),
            Ok(Err(e)) => {
                warn!("external analyzer unavailable: {e:#}");
                ExternalOutcome::Unavailable
            }
            Err(_) => {
                warn!(
                    "external analyzer timed out after {}ms",
                    self.timeout.as_millis()
                );
                ExternalOutcome::Unavailable
            }
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<WireEntity>> {
        let request = AnalyzeRequest {
            text,
            profile: self.mode.profile(),
        };

        debug!(
            "sending {} characters to {}/v1/analyze",
            text.len(),
            self.endpoint
        );

        let response = self
            .client
            .post(format!("{}/v1/analyze", self.endpoint))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("analyzer returned status {}", status);
        }

        let parsed: AnalyzeResponse = response.json().await?;
        debug!("analyzer returned {} raw entities", parsed.entities.len());
        Ok(parsed.entities)
    }

    /// Validate wire spans against the original text, falling back to
    /// substring search when the analyzer's offsets are off.
    fn parse_entities(
        &self,
        wire: Vec<WireEntity>,
        original_text: &str,
        min_score: f64,
    ) -> Vec<Entity> {
        let mut entities = Vec::new();

        for item in wire {
            if item.score < min_score {
                continue;
            }

            let span = if item.start < item.end
                && item.end <= original_text.len()
                && original_text.is_char_boundary(item.start)
                && original_text.is_char_boundary(item.end)
                && &original_text[item.start..item.end] == item.text
            {
                Some((item.start, item.end))
            } else {
                find_entity_position(original_text, &item.text)
            };

            let Some((start, end)) = span else {
                warn!("could not locate analyzer entity '{}' in text", item.text);
                continue;
            };

            entities.push(Entity::new(
                map_wire_type(&item.entity_type),
                start,
                end,
                &original_text[start..end],
                item.score,
                Layer::External,
            ));
        }

        entities
    }

    pub async fn health_check(&self) -> bool {
        if self.mode == ResolvedMode::Disabled {
            return false;
        }

        let probe = self.client.get(format!("{}/health", self.endpoint)).send();
        match tokio::time::timeout(self.timeout, probe).await {
            Ok(Ok(response)) if response.status().is_success() => {
                info!("external analyzer liveness probe passed");
                true
            }
            _ => {
                warn!("external analyzer liveness probe failed");
                false
            }
        }
    }
}

/// Map the analyzer's type vocabulary onto canonical entity types. The
/// analyzer covers more categories than the engine tracks; the rest
/// collapse into Other.
fn map_wire_type(wire: &str) -> EntityType {
    match wire.to_ascii_lowercase().as_str() {
        "person" | "person_name" | "per" => EntityType::PersonName,
        "org" | "organization" | "company" => EntityType::Organization,
        "location" | "loc" | "gpe" | "place" | "address" => EntityType::Location,
        "email" | "email_address" => EntityType::Email,
        "phone" | "phone_number" => EntityType::Phone,
        "ssn" | "us_ssn" => EntityType::Ssn,
        "credit_card" | "card_number" => EntityType::CreditCard,
        "ip" | "ip_address" => EntityType::IpAddress,
        "case_number" | "docket" => EntityType::CaseNumber,
        "medical_record_number" | "mrn" => EntityType::MedicalRecordNumber,
        _ => EntityType::Other,
    }
}

fn find_entity_position(text: &str, value: &str) -> Option<(usize, usize)> {
    if value.is_empty() {
        return None;
    }
    text.find(value).map(|start| (start, start + value.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ExternalConfig {
        ExternalConfig {
            mode: ExternalMode::Lite,
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            pool_size: 2,
            full_budget_mib: 8_192,
            lite_budget_mib: 3_072,
        }
    }

    #[test]
    fn test_mode_resolution_auto() {
        let mut config = test_config();
        config.mode = ExternalMode::Auto;

        assert_eq!(resolve_mode(&config, 16_000), ResolvedMode::Full);
        assert_eq!(resolve_mode(&config, 4_000), ResolvedMode::Lite);
        assert_eq!(resolve_mode(&config, 1_000), ResolvedMode::Disabled);
    }

    #[test]
    fn test_mode_resolution_override_wins() {
        let mut config = test_config();
        config.mode = ExternalMode::Full;
        // Explicit user choice ignores the probe.
        assert_eq!(resolve_mode(&config, 512), ResolvedMode::Full);

        config.mode = ExternalMode::Disabled;
        assert_eq!(resolve_mode(&config, 64_000), ResolvedMode::Disabled);
    }

    #[test]
    fn test_wire_type_mapping() {
        assert_eq!(map_wire_type("person"), EntityType::PersonName);
        assert_eq!(map_wire_type("PERSON"), EntityType::PersonName);
        assert_eq!(map_wire_type("gpe"), EntityType::Location);
        assert_eq!(map_wire_type("us_ssn"), EntityType::Ssn);
        assert_eq!(map_wire_type("date_time"), EntityType::Other);
        assert_eq!(map_wire_type("passport"), EntityType::Other);
    }

    #[test]
    fn test_parse_entities_valid_span() {
        let layer = ExternalLayer::new(&test_config(), 4_000);
        let text = "Contact Sarah Johnson today";
        let wire = vec![WireEntity {
            entity_type: "person".to_string(),
            text: "Sarah Johnson".to_string(),
            start: 8,
            end: 21,
            score: 0.92,
        }];

        let entities = layer.parse_entities(wire, text, 0.5);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, EntityType::PersonName);
        assert_eq!(entities[0].start, 8);
        assert_eq!(entities[0].end, 21);
        assert_eq!(entities[0].text, "Sarah Johnson");
    }

    #[test]
    fn test_parse_entities_bad_offsets_fall_back_to_search() {
        let layer = ExternalLayer::new(&test_config(), 4_000);
        let text = "Contact Sarah Johnson today";
        let wire = vec![WireEntity {
            entity_type: "person".to_string(),
            text: "Sarah Johnson".to_string(),
            start: 3,
            end: 9,
            score: 0.92,
        }];

        let entities = layer.parse_entities(wire, text, 0.5);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].start, 8);
        assert_eq!(entities[0].end, 21);
    }

    #[test]
    fn test_parse_entities_unlocatable_dropped() {
        let layer = ExternalLayer::new(&test_config(), 4_000);
        let wire = vec![WireEntity {
            entity_type: "person".to_string(),
            text: "Nobody Here".to_string(),
            start: 0,
            end: 0,
            score: 0.92,
        }];

        let entities = layer.parse_entities(wire, "completely different text", 0.5);
        assert!(entities.is_empty());
    }

    #[test]
    fn test_parse_entities_score_filter() {
        let layer = ExternalLayer::new(&test_config(), 4_000);
        let text = "Contact Sarah Johnson today";
        let wire = vec![WireEntity {
            entity_type: "person".to_string(),
            text: "Sarah Johnson".to_string(),
            start: 8,
            end: 21,
            score: 0.3,
        }];

        assert!(layer.parse_entities(wire, text, 0.5).is_empty());
    }

    #[test]
    fn test_disabled_mode_is_soft_unavailable() {
        let mut config = test_config();
        config.mode = ExternalMode::Disabled;
        let layer = ExternalLayer::new(&config, 64_000);

        tokio_test::block_on(async {
            assert!(matches!(
                layer.detect("some text", 0.5).await,
                ExternalOutcome::Unavailable
            ));
            assert!(!layer.health_check().await);
        });
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_soft_unavailable() {
        // Port 1 refuses connections immediately.
        let layer = ExternalLayer::new(&test_config(), 4_000);
        let outcome = layer.detect("Contact Sarah Johnson", 0.5).await;
        assert!(matches!(outcome, ExternalOutcome::Unavailable));
    }

    #[tokio::test]
    async fn test_hung_analyzer_times_out() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        // Accepts the connection and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if let Ok((mut socket, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        while let Ok(n) = socket.read(&mut buf).await {
                            if n == 0 {
                                break;
                            }
                        }
                    });
                }
            }
        });

        let mut config = test_config();
        config.endpoint = format!("http://{}", addr);
        config.timeout_ms = 150;
        let layer = ExternalLayer::new(&config, 4_000);

        let started = std::time::Instant::now();
        let outcome = layer.detect("Contact Sarah Johnson", 0.5).await;
        assert!(matches!(outcome, ExternalOutcome::Unavailable));
        // Bounded by the configured timeout, with scheduling slack.
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
