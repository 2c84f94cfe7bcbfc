use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One of the three backend pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Scrape,
    Enrich,
    Validate,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Scrape, Phase::Enrich, Phase::Validate];

    pub fn index(self) -> usize {
        match self {
            Phase::Scrape => 0,
            Phase::Enrich => 1,
            Phase::Validate => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Scrape => "scrape",
            Phase::Enrich => "enrich",
            Phase::Validate => "validate",
        };
        f.write_str(s)
    }
}

/// Backend-reported progress of a single phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub progress: u64,
    #[serde(default)]
    pub total: u64,
    // The backend reports an empty string when nothing is in flight.
    #[serde(
        rename = "current_company",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_item: Option<String>,
    #[serde(default)]
    pub validated_count: u64,
    #[serde(default)]
    pub removed_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

/// Scrape phase status; the only phase that carries the cumulative result list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeStatus {
    #[serde(flatten)]
    pub state: PhaseState,
    #[serde(default)]
    pub results: Vec<Lead>,
}

/// Point-in-time read of all three phases as returned by `GET /status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub scraping: ScrapeStatus,
    #[serde(default)]
    pub agent: PhaseState,
    #[serde(default)]
    pub validation: PhaseState,
}

impl StatusSnapshot {
    pub fn phase(&self, phase: Phase) -> &PhaseState {
        match phase {
            Phase::Scrape => &self.scraping.state,
            Phase::Enrich => &self.agent,
            Phase::Validate => &self.validation,
        }
    }
}

/// A discovered company, kept exactly as the backend sent it.
///
/// Records go back to `/enrich` and `/validate` verbatim, so nothing is typed here,
/// not even `business_id` or `name`: a missing or `null` key must stay that way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lead {
    pub fields: Map<String, Value>,
}

impl Lead {
    /// True when the record has at least one email or contact person.
    pub fn has_contacts(&self) -> bool {
        let Some(info) = self.fields.get("contact_info") else {
            return false;
        };
        let non_empty = |key: &str| {
            info.get(key)
                .and_then(|v| v.as_array())
                .map(|a| !a.is_empty())
                .unwrap_or(false)
        };
        non_empty("emails") || non_empty("contacts")
    }

    pub fn verified_on_finder(&self) -> bool {
        self.fields
            .get("finder_data")
            .and_then(|f| f.get("verified_on_finder"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    #[serde(default)]
    pub entries: u64,
    #[serde(default)]
    pub size_kb: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessLine {
    pub code: String,
    pub name: String,
}

/// Parameters for `POST /scrape`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeParams {
    pub main_business_line: String,
    pub location: String,
    pub company_form: String,
    pub max_companies: u32,
    pub output_file: String,
}

impl Default for ScrapeParams {
    fn default() -> Self {
        Self {
            main_business_line: "6201".into(),
            location: "Kuopio".into(),
            company_form: "OY".into(),
            max_companies: 15,
            output_file: "companies_leads.json".into(),
        }
    }
}

pub const RETRY_DELAY_PRESETS: [u32; 5] = [0, 3, 5, 10, 15];
pub const BETWEEN_DELAY_PRESETS: [u32; 4] = [2, 4, 6, 10];

/// Backoff knobs for the rate-limited validation phase, in seconds.
///
/// Values are restricted to the preset lists above; the backend receives them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationConfig {
    retry_delay: u32,
    between_delay: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("retry delay {0}s is not one of {presets:?}", presets = RETRY_DELAY_PRESETS)]
    RetryDelay(u32),
    #[error("between delay {0}s is not one of {presets:?}", presets = BETWEEN_DELAY_PRESETS)]
    BetweenDelay(u32),
}

impl ValidationConfig {
    pub fn new(retry_delay: u32, between_delay: u32) -> Result<Self, ConfigError> {
        if !RETRY_DELAY_PRESETS.contains(&retry_delay) {
            return Err(ConfigError::RetryDelay(retry_delay));
        }
        if !BETWEEN_DELAY_PRESETS.contains(&between_delay) {
            return Err(ConfigError::BetweenDelay(between_delay));
        }
        Ok(Self {
            retry_delay,
            between_delay,
        })
    }

    pub fn retry_delay(&self) -> u32 {
        self.retry_delay
    }

    pub fn between_delay(&self) -> u32 {
        self.between_delay
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            retry_delay: 5,
            between_delay: 4,
        }
    }
}

/// Events emitted by the poller and consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum PollEvent {
    StatusApplied,
    CacheApplied,
    StaleDiscarded,
    TickFailed { track: PollTrack, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTrack {
    Status,
    Cache,
}

impl fmt::Display for PollTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTrack::Status => f.write_str("status"),
            PollTrack::Cache => f.write_str("cache stats"),
        }
    }
}
