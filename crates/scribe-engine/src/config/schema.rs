use scribe_common::protocol::ActionKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the recording engine. The timing defaults were tuned by
/// observation and are not load-bearing invariants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScribeConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_rapid_fire_window_ms")]
    pub rapid_fire_window_ms: u64,
    #[serde(default = "default_rapid_fire_distance_px")]
    pub rapid_fire_distance_px: f64,
    #[serde(default = "default_proximity_window_ms")]
    pub proximity_window_ms: u64,
    #[serde(default = "default_proximity_distance_px")]
    pub proximity_distance_px: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            rapid_fire_window_ms: default_rapid_fire_window_ms(),
            rapid_fire_distance_px: default_rapid_fire_distance_px(),
            proximity_window_ms: default_proximity_window_ms(),
            proximity_distance_px: default_proximity_distance_px(),
        }
    }
}

fn default_rapid_fire_window_ms() -> u64 {
    200
}

fn default_rapid_fire_distance_px() -> f64 {
    10.0
}

fn default_proximity_window_ms() -> u64 {
    500
}

fn default_proximity_distance_px() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_value_len")]
    pub max_value_len: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_value_len: default_max_value_len(),
        }
    }
}

impl InputConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_max_value_len() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// A navigation this soon after the previous accepted one is dropped.
    #[serde(default = "default_repeat_window_ms")]
    pub repeat_window_ms: u64,
    /// How long a navigating click's flag suppresses the next `page_load`.
    #[serde(default = "default_flag_validity_ms")]
    pub flag_validity_ms: u64,
    /// Delay between persisting a navigating click and performing it.
    #[serde(default = "default_grace_delay_ms")]
    pub grace_delay_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            repeat_window_ms: default_repeat_window_ms(),
            flag_validity_ms: default_flag_validity_ms(),
            grace_delay_ms: default_grace_delay_ms(),
        }
    }
}

impl NavigationConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

fn default_repeat_window_ms() -> u64 {
    1000
}

fn default_flag_validity_ms() -> u64 {
    5000
}

fn default_grace_delay_ms() -> u64 {
    150
}

/// Timing policy for one screenshot acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePolicy {
    /// Upper bound on waiting for the document ready signal; `None` skips the wait.
    #[serde(default)]
    pub ready_wait_ms: Option<u64>,
    #[serde(default)]
    pub pre_delay_ms: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    pub timeout_ms: u64,
    /// Backoff before attempt `n + 1` is `backoff_ms * n`.
    #[serde(default)]
    pub backoff_ms: u64,
}

impl CapturePolicy {
    pub fn ready_wait(&self) -> Option<Duration> {
        self.ready_wait_ms.map(Duration::from_millis)
    }

    pub fn pre_delay(&self) -> Duration {
        Duration::from_millis(self.pre_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before `attempt` (1-based). Zero for the first attempt.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms * u64::from(attempt.saturating_sub(1)))
    }
}

fn default_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_click_policy")]
    pub click: CapturePolicy,
    /// Used for `navigation` and `page_load`.
    #[serde(default = "default_navigation_policy")]
    pub navigation: CapturePolicy,
    /// Used for `input`, `change` and `submit`.
    #[serde(default = "default_other_policy")]
    pub other: CapturePolicy,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            click: default_click_policy(),
            navigation: default_navigation_policy(),
            other: default_other_policy(),
        }
    }
}

impl ScreenshotConfig {
    pub fn policy_for(&self, kind: ActionKind) -> &CapturePolicy {
        match kind {
            ActionKind::Click => &self.click,
            ActionKind::Navigation | ActionKind::PageLoad => &self.navigation,
            ActionKind::Input | ActionKind::Change | ActionKind::Submit => &self.other,
        }
    }
}

fn default_click_policy() -> CapturePolicy {
    CapturePolicy {
        ready_wait_ms: None,
        pre_delay_ms: 0,
        attempts: 1,
        timeout_ms: 3000,
        backoff_ms: 0,
    }
}

fn default_navigation_policy() -> CapturePolicy {
    CapturePolicy {
        ready_wait_ms: Some(500),
        pre_delay_ms: 300,
        attempts: 3,
        timeout_ms: 10_000,
        backoff_ms: 300,
    }
}

fn default_other_policy() -> CapturePolicy {
    CapturePolicy {
        ready_wait_ms: None,
        pre_delay_ms: 100,
        attempts: 1,
        timeout_ms: 5000,
        backoff_ms: 0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Mask values typed into password fields and fields with sensitive names.
    #[serde(default = "default_redact_sensitive_values")]
    pub redact_sensitive_values: bool,
    /// Extra field-name fragments treated as sensitive.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            redact_sensitive_values: default_redact_sensitive_values(),
            sensitive_fields: Vec::new(),
        }
    }
}

fn default_redact_sensitive_values() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
    #[serde(default = "default_max_attribute_len")]
    pub max_attribute_len: usize,
    #[serde(default = "default_max_classes")]
    pub max_classes: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_text_len: default_max_text_len(),
            max_attribute_len: default_max_attribute_len(),
            max_classes: default_max_classes(),
        }
    }
}

fn default_max_text_len() -> usize {
    100
}

fn default_max_attribute_len() -> usize {
    200
}

fn default_max_classes() -> usize {
    10
}
