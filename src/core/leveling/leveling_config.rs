// Tunables for the leveling engine.
//
// Every XP amount and timing lives here instead of being sprinkled through
// the ingest code. Defaults match the classic bot; a JSON file
// (LEVELING_CONFIG_FILE) and LEVELING_* environment variables can override them.

use rand::Rng;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid leveling config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid leveling config: {0}")]
    Invalid(String),
}

/// Configuration for the leveling engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelingConfig {
    /// Inclusive range rolled for every qualifying message.
    pub message_xp_min: u64,
    pub message_xp_max: u64,

    /// Flat award per reaction, followed by a suppression window.
    pub reaction_xp: u64,
    pub reaction_cooldown_secs: u64,

    /// Flat award per voice scan for members with company.
    pub voice_xp: u64,
    pub voice_cooldown_secs: u64,
    pub voice_scan_interval_secs: u64,
    pub voice_min_members: usize,

    /// Inclusive range rolled for each drop.
    pub drop_xp_min: u64,
    pub drop_xp_max: u64,
    /// Chance (0.0 to 1.0) that a guild gets a drop on a spawn tick.
    pub drop_spawn_chance: f64,
    pub drop_lifetime_secs: u64,
    /// Bounds for the wait between spawn ticks, re-rolled every tick.
    pub drop_interval_min_secs: u64,
    pub drop_interval_max_secs: u64,
    pub drop_sweep_interval_secs: u64,
    pub drop_id_length: usize,

    pub leaderboard_page_size: u64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            message_xp_min: 15,
            message_xp_max: 25,
            reaction_xp: 5,
            reaction_cooldown_secs: 30,
            voice_xp: 10,
            voice_cooldown_secs: 60,
            voice_scan_interval_secs: 5 * 60,
            voice_min_members: 2,
            drop_xp_min: 100,
            drop_xp_max: 500,
            drop_spawn_chance: 0.3,
            drop_lifetime_secs: 5 * 60,
            drop_interval_min_secs: 30 * 60,
            drop_interval_max_secs: 60 * 60,
            drop_sweep_interval_secs: 60,
            drop_id_length: 8,
            leaderboard_page_size: 10,
        }
    }
}

impl LevelingConfig {
    /// Load the config for the running bot: defaults, then the optional JSON
    /// file named by `LEVELING_CONFIG_FILE`, then `LEVELING_*` env variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("LEVELING_CONFIG_FILE") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path, source })?;
                Self::from_json(&raw)?
            }
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a (possibly partial) JSON document; missing keys keep defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply `LEVELING_<FIELD>` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        override_from(&lookup, "LEVELING_MESSAGE_XP_MIN", &mut self.message_xp_min)?;
        override_from(&lookup, "LEVELING_MESSAGE_XP_MAX", &mut self.message_xp_max)?;
        override_from(&lookup, "LEVELING_REACTION_XP", &mut self.reaction_xp)?;
        override_from(
            &lookup,
            "LEVELING_REACTION_COOLDOWN_SECS",
            &mut self.reaction_cooldown_secs,
        )?;
        override_from(&lookup, "LEVELING_VOICE_XP", &mut self.voice_xp)?;
        override_from(
            &lookup,
            "LEVELING_VOICE_COOLDOWN_SECS",
            &mut self.voice_cooldown_secs,
        )?;
        override_from(
            &lookup,
            "LEVELING_VOICE_SCAN_INTERVAL_SECS",
            &mut self.voice_scan_interval_secs,
        )?;
        override_from(
            &lookup,
            "LEVELING_VOICE_MIN_MEMBERS",
            &mut self.voice_min_members,
        )?;
        override_from(&lookup, "LEVELING_DROP_XP_MIN", &mut self.drop_xp_min)?;
        override_from(&lookup, "LEVELING_DROP_XP_MAX", &mut self.drop_xp_max)?;
        override_from(
            &lookup,
            "LEVELING_DROP_SPAWN_CHANCE",
            &mut self.drop_spawn_chance,
        )?;
        override_from(
            &lookup,
            "LEVELING_DROP_LIFETIME_SECS",
            &mut self.drop_lifetime_secs,
        )?;
        override_from(
            &lookup,
            "LEVELING_DROP_INTERVAL_MIN_SECS",
            &mut self.drop_interval_min_secs,
        )?;
        override_from(
            &lookup,
            "LEVELING_DROP_INTERVAL_MAX_SECS",
            &mut self.drop_interval_max_secs,
        )?;
        override_from(
            &lookup,
            "LEVELING_DROP_SWEEP_INTERVAL_SECS",
            &mut self.drop_sweep_interval_secs,
        )?;
        override_from(&lookup, "LEVELING_DROP_ID_LENGTH", &mut self.drop_id_length)?;
        override_from(
            &lookup,
            "LEVELING_LEADERBOARD_PAGE_SIZE",
            &mut self.leaderboard_page_size,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_xp_min == 0 || self.message_xp_min > self.message_xp_max {
            return Err(ConfigError::Invalid(
                "message XP range must be non-empty and positive".into(),
            ));
        }
        if self.drop_xp_min == 0 || self.drop_xp_min > self.drop_xp_max {
            return Err(ConfigError::Invalid(
                "drop XP range must be non-empty and positive".into(),
            ));
        }
        if self.reaction_xp == 0 || self.voice_xp == 0 {
            return Err(ConfigError::Invalid(
                "reaction and voice XP must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.drop_spawn_chance) {
            return Err(ConfigError::Invalid(
                "drop spawn chance must be between 0.0 and 1.0".into(),
            ));
        }
        if self.drop_interval_min_secs == 0
            || self.drop_interval_min_secs > self.drop_interval_max_secs
        {
            return Err(ConfigError::Invalid(
                "drop interval bounds must be positive and ordered".into(),
            ));
        }
        if self.voice_scan_interval_secs == 0 || self.drop_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "background intervals must be positive".into(),
            ));
        }
        if self.drop_id_length < 4 {
            return Err(ConfigError::Invalid(
                "drop ids need at least 4 characters".into(),
            ));
        }
        if self.leaderboard_page_size == 0 {
            return Err(ConfigError::Invalid(
                "leaderboard page size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn reaction_cooldown(&self) -> Duration {
        Duration::from_secs(self.reaction_cooldown_secs)
    }

    pub fn voice_cooldown(&self) -> Duration {
        Duration::from_secs(self.voice_cooldown_secs)
    }

    pub fn voice_scan_interval(&self) -> Duration {
        Duration::from_secs(self.voice_scan_interval_secs)
    }

    pub fn drop_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.drop_lifetime_secs as i64)
    }

    pub fn drop_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.drop_sweep_interval_secs)
    }

    /// Wait before the next spawn tick, drawn fresh for every tick.
    pub fn roll_drop_interval(&self, rng: &mut impl Rng) -> Duration {
        let secs = rng.gen_range(self.drop_interval_min_secs..=self.drop_interval_max_secs);
        Duration::from_secs(secs)
    }
}

fn override_from<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = LevelingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.message_xp_min, 15);
        assert_eq!(config.message_xp_max, 25);
        assert_eq!(config.reaction_cooldown(), Duration::from_secs(30));
        assert_eq!(config.voice_scan_interval(), Duration::from_secs(300));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = LevelingConfig::from_json(r#"{ "reaction_xp": 8, "drop_spawn_chance": 1.0 }"#)
            .unwrap();
        assert_eq!(config.reaction_xp, 8);
        assert_eq!(config.drop_spawn_chance, 1.0);
        assert_eq!(config.voice_xp, 10);
    }

    #[test]
    fn env_overrides_are_applied() {
        let env: HashMap<&str, &str> = [
            ("LEVELING_VOICE_XP", "12"),
            ("LEVELING_DROP_SPAWN_CHANCE", "0.5"),
            ("LEVELING_VOICE_MIN_MEMBERS", "3"),
            ("LEVELING_DROP_SWEEP_INTERVAL_SECS", "15"),
            ("LEVELING_DROP_ID_LENGTH", "6"),
            ("LEVELING_LEADERBOARD_PAGE_SIZE", "25"),
        ]
        .into_iter()
        .collect();

        let mut config = LevelingConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.voice_xp, 12);
        assert_eq!(config.drop_spawn_chance, 0.5);
        assert_eq!(config.voice_min_members, 3);
        assert_eq!(config.drop_sweep_interval_secs, 15);
        assert_eq!(config.drop_id_length, 6);
        assert_eq!(config.leaderboard_page_size, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unparsable_override_is_reported() {
        let mut config = LevelingConfig::default();
        let err = config
            .apply_overrides(|key| (key == "LEVELING_REACTION_XP").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LEVELING_REACTION_XP"));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let config = LevelingConfig {
            message_xp_min: 30,
            message_xp_max: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LevelingConfig {
            drop_spawn_chance: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn drop_interval_stays_within_bounds() {
        let config = LevelingConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let wait = config.roll_drop_interval(&mut rng);
            assert!(wait >= Duration::from_secs(30 * 60));
            assert!(wait <= Duration::from_secs(60 * 60));
        }
    }
}
