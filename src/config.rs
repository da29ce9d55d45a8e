use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::provider::Credential;

/// Playback speed bounds, in frames per second.
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 12;

/// Prompt sent when the user leaves the motion description empty.
pub const DEFAULT_MOTION: &str = "Simple idle motion";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Image-generation provider connection settings.
    pub provider: ProviderConfig,
    /// Session defaults for prompt, frame count and playback speed.
    pub animation: AnimationConfig,
    /// Timeout applied to remote image fetches.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub model: String,
    /// Low values favor consistent frames.
    pub temperature: f32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Name of the environment variable holding the access credential.
    pub credential_env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct AnimationConfig {
    pub prompt: String,
    pub frame_count: usize,
    pub frame_count_choices: Vec<usize>,
    pub fps: u32,
}

/// Session-scoped, user-editable settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationSettings {
    pub prompt: String,
    pub frame_count: usize,
    pub fps: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            animation: AnimationConfig::default(),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            temperature: 0.2,
            request_timeout: Duration::from_secs(90),
            credential_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            prompt: "Sending a heart".to_string(),
            frame_count: 6,
            frame_count_choices: vec![2, 4, 6],
            fps: 6,
        }
    }
}

impl Default for AnimationSettings {
    fn default() -> Self {
        AnimationConfig::default().initial_settings()
    }
}

impl AnimationConfig {
    pub fn initial_settings(&self) -> AnimationSettings {
        AnimationSettings {
            prompt: self.prompt.clone(),
            frame_count: self.frame_count,
            fps: self.fps,
        }
    }

    pub fn allows_frame_count(&self, count: usize) -> bool {
        self.frame_count_choices.contains(&count)
    }
}

impl AnimationSettings {
    /// Prompt to send, substituting [`DEFAULT_MOTION`] for blank input.
    pub fn effective_prompt(&self) -> &str {
        let trimmed = self.prompt.trim();
        if trimmed.is_empty() { DEFAULT_MOTION } else { trimmed }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.provider.endpoint.trim().is_empty(),
            "provider.endpoint must not be empty"
        );
        ensure!(
            !self.provider.model.trim().is_empty(),
            "provider.model must not be empty"
        );
        ensure!(
            self.provider.temperature.is_finite() && (0.0..=2.0).contains(&self.provider.temperature),
            "provider.temperature must be within 0.0..=2.0"
        );
        ensure!(
            !self.provider.request_timeout.is_zero(),
            "provider.request-timeout must be greater than zero"
        );
        ensure!(
            !self.fetch_timeout.is_zero(),
            "fetch-timeout must be greater than zero"
        );
        let animation = &self.animation;
        ensure!(
            !animation.frame_count_choices.is_empty(),
            "animation.frame-count-choices must list at least one option"
        );
        ensure!(
            animation.frame_count_choices.iter().all(|&n| n >= 1),
            "animation.frame-count-choices entries must be at least 1"
        );
        ensure!(
            animation.allows_frame_count(animation.frame_count),
            "animation.frame-count {} is not one of {:?}",
            animation.frame_count,
            animation.frame_count_choices
        );
        ensure!(
            (MIN_FPS..=MAX_FPS).contains(&animation.fps),
            "animation.fps must be within {MIN_FPS}..={MAX_FPS}"
        );
        Ok(self)
    }

    /// Look up the provider credential in the environment. An unset or blank
    /// variable yields `None`.
    pub fn credential_from_env(&self) -> Option<Credential> {
        std::env::var(&self.provider.credential_env)
            .ok()
            .map(Credential::new)
            .filter(|cred| !cred.is_empty())
    }
}
