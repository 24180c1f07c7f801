//! Prompt enrichment with configured style presets

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::StylePresetConfig;
use crate::domain::UserId;
use crate::error::{AppError, Result};

/// Transforms a raw user prompt into the prompt sent to the provider.
#[async_trait]
pub trait PromptProcessor: Send + Sync {
    async fn process(
        &self,
        prompt: &str,
        user_id: UserId,
        style_preset_id: Option<i64>,
    ) -> Result<String>;

    /// Fail fast on a preset the user cannot use.
    fn check_preset(&self, user_id: UserId, style_preset_id: Option<i64>) -> Result<()>;
}

/// Appends the suffix of a global or user-owned style preset.
pub struct PresetPromptProcessor {
    presets: HashMap<i64, StylePresetConfig>,
}

impl PresetPromptProcessor {
    pub fn new(presets: impl IntoIterator<Item = StylePresetConfig>) -> Self {
        Self {
            presets: presets.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    fn accessible(&self, user_id: UserId, preset_id: i64) -> Result<&StylePresetConfig> {
        let preset = self
            .presets
            .get(&preset_id)
            .ok_or_else(|| AppError::InvalidRequest(format!("style preset {} not found", preset_id)))?;

        match preset.owner_id {
            Some(owner) if owner != user_id => Err(AppError::InvalidRequest(format!(
                "style preset {} is not accessible",
                preset_id
            ))),
            _ => Ok(preset),
        }
    }
}

#[async_trait]
impl PromptProcessor for PresetPromptProcessor {
    async fn process(
        &self,
        prompt: &str,
        user_id: UserId,
        style_preset_id: Option<i64>,
    ) -> Result<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::InvalidRequest("prompt is empty".to_string()));
        }

        let Some(preset_id) = style_preset_id else {
            return Ok(prompt.to_string());
        };

        let preset = self.accessible(user_id, preset_id)?;
        if !preset.enabled {
            warn!(preset = %preset.code, "Style preset is disabled, skipping");
            return Ok(prompt.to_string());
        }
        if preset.prompt_suffix.trim().is_empty() {
            return Ok(prompt.to_string());
        }

        debug!(
            preset = %preset.code,
            suffix_len = preset.prompt_suffix.len(),
            "Applied style preset"
        );
        Ok(format!("{}{}", prompt, preset.prompt_suffix))
    }

    fn check_preset(&self, user_id: UserId, style_preset_id: Option<i64>) -> Result<()> {
        match style_preset_id {
            Some(id) => self.accessible(user_id, id).map(|_| ()),
            None => Ok(()),
        }
    }
}
