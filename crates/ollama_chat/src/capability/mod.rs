//! Model capability negotiation.
//!
//! The backend's describe-model call is the source of truth when it answers; when
//! it does not (old server, missing field, transport failure) every feature is
//! assumed available and the request is sent as configured.

mod cache;

use std::collections::BTreeSet;
use std::sync::Arc;

use chat_provider::{ChatBackend, ModelDescription};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use cache::{CachedCapabilities, CapabilityCache, CAPABILITY_CACHE_FILE, DEFAULT_CACHE_MAX_AGE};

pub const THINKING: &str = "thinking";
pub const TOOLS: &str = "tools";
pub const VISION: &str = "vision";

/// Capability strings reported for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityReport {
    caps: BTreeSet<String>,
    known: bool,
}

impl CapabilityReport {
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn known<I, S>(caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            caps: caps
                .into_iter()
                .filter_map(|cap| normalize_cap(cap.as_ref()))
                .collect(),
            known: true,
        }
    }

    /// Parses the `capabilities` field of a describe-model response.
    ///
    /// Accepts a list of names, a map of name to flag, or a comma/space separated
    /// string. An absent or null field means the server did not say.
    #[must_use]
    pub fn from_description(description: &ModelDescription) -> Self {
        let Some(raw) = description.capabilities.as_ref() else {
            return Self::unknown();
        };

        match raw {
            Value::Null => Self::unknown(),
            Value::Array(items) => Self::known(items.iter().map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })),
            Value::Object(map) => Self::known(
                map.iter()
                    .filter(|(_, enabled)| is_truthy(enabled))
                    .map(|(name, _)| name.as_str()),
            ),
            Value::String(text) => Self::known(text.replace(',', " ").split_whitespace()),
            _ => Self::known(std::iter::empty::<&str>()),
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        self.known
    }

    #[must_use]
    pub fn caps(&self) -> &BTreeSet<String> {
        &self.caps
    }

    /// Unknown reports support everything.
    #[must_use]
    pub fn supports(&self, capability: &str) -> bool {
        !self.known || self.caps.contains(capability)
    }
}

fn normalize_cap(raw: &str) -> Option<String> {
    let value = raw.trim().to_lowercase();
    (!value.is_empty()).then_some(value)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// What the user asked for, independent of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityPreferences {
    pub show_thinking: bool,
    pub web_search_enabled: bool,
    pub max_tool_iterations: usize,
}

impl Default for CapabilityPreferences {
    fn default() -> Self {
        Self {
            show_thinking: true,
            web_search_enabled: false,
            max_tool_iterations: 10,
        }
    }
}

/// Model support combined with user preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveCapabilities {
    pub think: bool,
    pub show_thinking: bool,
    pub tools_enabled: bool,
    pub vision_enabled: bool,
    pub web_search_enabled: bool,
    pub max_tool_iterations: usize,
}

impl EffectiveCapabilities {
    fn compute(report: &CapabilityReport, preferences: &CapabilityPreferences) -> Self {
        Self {
            think: report.supports(THINKING),
            show_thinking: preferences.show_thinking,
            tools_enabled: report.supports(TOOLS),
            vision_enabled: report.supports(VISION),
            web_search_enabled: preferences.web_search_enabled,
            max_tool_iterations: preferences.max_tool_iterations,
        }
    }
}

/// Tracks what the active model can do.
///
/// Lookups go memory, then the persistent cache, then the backend. Only reports
/// the backend actually answered are written to the persistent cache; an unknown
/// result is remembered for the session so the next attempt can ask again.
pub struct CapabilityManager {
    backend: Arc<dyn ChatBackend>,
    cache: CapabilityCache,
    current: Option<CachedCapabilities>,
    report: CapabilityReport,
    preferences: CapabilityPreferences,
    effective: EffectiveCapabilities,
}

impl CapabilityManager {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        cache: CapabilityCache,
        preferences: CapabilityPreferences,
    ) -> Self {
        let report = CapabilityReport::unknown();
        let effective = EffectiveCapabilities::compute(&report, &preferences);
        Self {
            backend,
            cache,
            current: None,
            report,
            preferences,
            effective,
        }
    }

    #[must_use]
    pub fn report(&self) -> &CapabilityReport {
        &self.report
    }

    #[must_use]
    pub fn effective(&self) -> &EffectiveCapabilities {
        &self.effective
    }

    #[must_use]
    pub fn preferences(&self) -> &CapabilityPreferences {
        &self.preferences
    }

    #[must_use]
    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    /// Asks the backend what `model` supports. A failed call yields an unknown report.
    pub async fn detect(&mut self, model: &str) -> CapabilityReport {
        let report = match self.backend.show_model(model).await {
            Ok(description) => CapabilityReport::from_description(&description),
            Err(error) => {
                debug!(
                    event = "chat.model.show.failed",
                    model = %model,
                    error = %error
                );
                CapabilityReport::unknown()
            }
        };

        self.apply_report(report.clone());
        info!(
            event = "capability.detected",
            model = %model,
            known = report.is_known(),
            tools = self.effective.tools_enabled,
            vision = self.effective.vision_enabled,
            thinking = self.effective.think
        );
        report
    }

    /// Capability flags for `model`, resolved through memory, disk, then the backend.
    pub async fn ensure_support(&mut self, model: &str) -> CachedCapabilities {
        if let Some(current) = self.current.as_ref().filter(|entry| entry.model_name == model) {
            return current.clone();
        }

        if let Some(cached) = self.cache.get(model, DEFAULT_CACHE_MAX_AGE).cloned() {
            info!(event = "capability_cache.hit", model = %model);
            self.apply_report(CapabilityReport::known(&cached.raw_capabilities));
            self.current = Some(cached.clone());
            return cached;
        }

        info!(event = "capability_cache.miss", model = %model);
        let report = self.detect(model).await;
        let entry = CachedCapabilities::from_report(model, &report);
        if report.is_known() {
            self.cache.set(entry.clone());
        }
        self.current = Some(entry.clone());
        entry
    }

    /// Forgets session-level knowledge when the active model changes.
    pub fn set_model(&mut self, model: &str) {
        let changed = self
            .current
            .as_ref()
            .is_some_and(|entry| entry.model_name != model);
        if changed {
            self.current = None;
            self.apply_report(CapabilityReport::unknown());
        }
    }

    /// Drops both the session and persisted entries for `model`.
    pub fn invalidate(&mut self, model: &str) {
        if self
            .current
            .as_ref()
            .is_some_and(|entry| entry.model_name == model)
        {
            self.current = None;
        }
        self.cache.invalidate(model);
    }

    /// Names of features the model is known not to support, in the order
    /// thinking, tools, vision. Empty while capabilities are unknown.
    #[must_use]
    pub fn unsupported_features(&self) -> Vec<&'static str> {
        if !self.report.is_known() {
            return Vec::new();
        }

        [
            (self.effective.think, THINKING),
            (self.effective.tools_enabled, TOOLS),
            (self.effective.vision_enabled, VISION),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| (!enabled).then_some(name))
        .collect()
    }

    pub fn update_preferences(&mut self, preferences: CapabilityPreferences) {
        self.preferences = preferences;
        self.effective = EffectiveCapabilities::compute(&self.report, &self.preferences);
    }

    fn apply_report(&mut self, report: CapabilityReport) {
        if !report.is_known() {
            warn!(
                event = "capability.unknown",
                "model capabilities unknown, assuming every feature is available"
            );
        }
        self.effective = EffectiveCapabilities::compute(&report, &self.preferences);
        self.report = report;
    }
}
