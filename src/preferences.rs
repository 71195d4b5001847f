//! Settings Store
//!
//! Scalar user preferences persisted under fixed keys in a `PreferenceStorage`.

use std::sync::Arc;

use crate::config::ChatConfig;
use crate::storage::{PreferenceStorage, StorageResult};

pub const KEY_API_KEY: &str = "apiKey";
pub const KEY_TEMPERATURE: &str = "temperature";
pub const KEY_SYSTEM_PROMPT: &str = "systemPrompt";
pub const KEY_SELECTED_MODEL: &str = "selectedModel";

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub api_key: Option<String>,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Preferences {
    pub fn from_defaults(defaults: &ChatConfig) -> Self {
        Self {
            api_key: None,
            temperature: clamp_temperature(defaults.default_temperature),
            system_prompt: defaults.default_system_prompt.clone(),
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

pub fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        return MIN_TEMPERATURE;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

#[derive(Clone)]
pub struct PreferenceStore {
    storage: Arc<dyn PreferenceStorage>,
}

impl PreferenceStore {
    pub fn new(storage: Arc<dyn PreferenceStorage>) -> Self {
        Self { storage }
    }

    /// Stored values over configured defaults
    pub async fn load(&self, defaults: &ChatConfig) -> StorageResult<Preferences> {
        let mut preferences = Preferences::from_defaults(defaults);

        preferences.api_key = self
            .storage
            .get_pref(KEY_API_KEY)
            .await?
            .filter(|key| !key.trim().is_empty());

        if let Some(raw) = self.storage.get_pref(KEY_TEMPERATURE).await? {
            match raw.trim().parse::<f32>() {
                Ok(value) => preferences.temperature = clamp_temperature(value),
                Err(e) => tracing::warn!(
                    "[PreferenceStore] Ignoring stored temperature '{}': {}",
                    raw,
                    e
                ),
            }
        }

        if let Some(prompt) = self.storage.get_pref(KEY_SYSTEM_PROMPT).await? {
            preferences.system_prompt = prompt;
        }

        Ok(preferences)
    }

    /// An empty or absent key removes the stored credential
    pub async fn save_api_key(&self, api_key: Option<&str>) -> StorageResult<()> {
        match api_key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => self.storage.set_pref(KEY_API_KEY, key).await,
            None => self.storage.remove_pref(KEY_API_KEY).await,
        }
    }

    pub async fn save_temperature(&self, temperature: f32) -> StorageResult<()> {
        self.storage
            .set_pref(KEY_TEMPERATURE, &temperature.to_string())
            .await
    }

    pub async fn save_system_prompt(&self, prompt: &str) -> StorageResult<()> {
        self.storage.set_pref(KEY_SYSTEM_PROMPT, prompt).await
    }

    pub async fn load_selected_model(&self) -> StorageResult<Option<String>> {
        Ok(self
            .storage
            .get_pref(KEY_SELECTED_MODEL)
            .await?
            .filter(|model| !model.trim().is_empty()))
    }

    pub async fn save_selected_model(&self, model: &str) -> StorageResult<()> {
        self.storage.set_pref(KEY_SELECTED_MODEL, model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn defaults() -> ChatConfig {
        ChatConfig {
            default_model: "gpt-4o".to_string(),
            default_temperature: 0.7,
            default_system_prompt: "Be helpful".to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_falls_back_to_defaults() {
        let store = PreferenceStore::new(Arc::new(InMemoryStorage::new()));

        let preferences = store.load(&defaults()).await.unwrap();

        assert_eq!(preferences, Preferences::from_defaults(&defaults()));
        assert!(!preferences.has_credential());
        assert!(store.load_selected_model().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saved_values_round_trip() {
        let store = PreferenceStore::new(Arc::new(InMemoryStorage::new()));
        store.save_api_key(Some(" sk-abc ")).await.unwrap();
        store.save_temperature(1.25).await.unwrap();
        store.save_system_prompt("").await.unwrap();
        store.save_selected_model("gpt-4o-mini").await.unwrap();

        let preferences = store.load(&defaults()).await.unwrap();

        assert_eq!(preferences.api_key.as_deref(), Some("sk-abc"));
        assert_eq!(preferences.temperature, 1.25);
        assert_eq!(preferences.system_prompt, "");
        assert_eq!(
            store.load_selected_model().await.unwrap().as_deref(),
            Some("gpt-4o-mini")
        );
    }

    #[tokio::test]
    async fn test_clearing_api_key_removes_it() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = PreferenceStore::new(storage.clone());
        store.save_api_key(Some("sk-abc")).await.unwrap();

        store.save_api_key(Some("   ")).await.unwrap();

        assert!(storage.get_pref(KEY_API_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_temperature_is_ignored_and_range_clamped() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = PreferenceStore::new(storage.clone());

        storage.set_pref(KEY_TEMPERATURE, "warm").await.unwrap();
        assert_eq!(store.load(&defaults()).await.unwrap().temperature, 0.7);

        storage.set_pref(KEY_TEMPERATURE, "9").await.unwrap();
        assert_eq!(store.load(&defaults()).await.unwrap().temperature, MAX_TEMPERATURE);
    }
}
