use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db;

pub const SETTINGS_KEY: &str = "engine.config";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Quiet window after a qualifying edit before the queue is flushed.
    pub debounce_ms: u64,
    /// How long DONE stays visible before reverting to READY.
    pub done_display_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub grades_collection: String,
    pub locks_collection: String,
    pub cache_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 4000,
            done_display_ms: 3000,
            retry_base_ms: 5000,
            retry_max_ms: 60_000,
            grades_collection: "grades".to_string(),
            locks_collection: "grading_locks".to_string(),
            cache_key: "offline_grades_cache".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn done_display(&self) -> Duration {
        Duration::from_millis(self.done_display_ms)
    }

    /// Backoff before retry number `attempt` (1-based), doubling up to the cap.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .retry_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.retry_max_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grades_collection.trim().is_empty() || self.locks_collection.trim().is_empty() {
            return Err(anyhow!("collection names must not be empty"));
        }
        if self.grades_collection == self.locks_collection {
            return Err(anyhow!("grades and locks must use different collections"));
        }
        if self.cache_key.trim().is_empty() {
            return Err(anyhow!("cacheKey must not be empty"));
        }
        if self.retry_base_ms == 0 || self.retry_max_ms < self.retry_base_ms {
            return Err(anyhow!("retryBaseMs must be > 0 and <= retryMaxMs"));
        }
        Ok(())
    }

    /// Overlays the keys of `patch` onto this config. Unknown keys are rejected.
    pub fn patched(&self, patch: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        let mut current = serde_json::to_value(self)?;
        let obj = current
            .as_object_mut()
            .ok_or_else(|| anyhow!("config must serialize to an object"))?;
        for (k, v) in patch {
            if !obj.contains_key(k) {
                return Err(anyhow!("unknown config key: {k}"));
            }
            obj.insert(k.clone(), v.clone());
        }
        let next: EngineConfig =
            serde_json::from_value(current).context("invalid config value")?;
        next.validate()?;
        Ok(next)
    }
}

pub fn load(conn: &Connection) -> anyhow::Result<EngineConfig> {
    match db::settings_get_json(conn, SETTINGS_KEY)? {
        Some(v) => {
            let cfg: EngineConfig =
                serde_json::from_value(v).context("stored engine config is invalid")?;
            cfg.validate()?;
            Ok(cfg)
        }
        None => Ok(EngineConfig::default()),
    }
}

pub fn save(conn: &Connection, cfg: &EngineConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(cfg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_delay_doubles_up_to_cap() {
        let cfg = EngineConfig {
            retry_base_ms: 1000,
            retry_max_ms: 5000,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(cfg.retry_delay(2), Duration::from_millis(2000));
        assert_eq!(cfg.retry_delay(3), Duration::from_millis(4000));
        assert_eq!(cfg.retry_delay(4), Duration::from_millis(5000));
        assert_eq!(cfg.retry_delay(40), Duration::from_millis(5000));
    }

    #[test]
    fn patch_overlays_known_keys_only() {
        let cfg = EngineConfig::default();
        let patch = json!({ "debounceMs": 250, "gradesCollection": "grades_v2" });
        let next = cfg.patched(patch.as_object().unwrap()).expect("patch");
        assert_eq!(next.debounce_ms, 250);
        assert_eq!(next.grades_collection, "grades_v2");
        assert_eq!(next.done_display_ms, cfg.done_display_ms);

        let bad = json!({ "debounce": 1 });
        assert!(cfg.patched(bad.as_object().unwrap()).is_err());
        let wrong_type = json!({ "debounceMs": "soon" });
        assert!(cfg.patched(wrong_type.as_object().unwrap()).is_err());
        let clash = json!({ "locksCollection": "grades" });
        assert!(cfg.patched(clash.as_object().unwrap()).is_err());
    }
}
