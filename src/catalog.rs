//! Model Catalog
//!
//! The list of selectable completion models and the active selection.

use crate::core::llm::{ApiError, ModelInfo};

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
    selected: String,
    is_loading: bool,
    error: Option<String>,
}

impl ModelCatalog {
    pub fn new(selected: impl Into<String>) -> Self {
        Self {
            models: Vec::new(),
            selected: selected.into(),
            is_loading: false,
            error: None,
        }
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn selected(&self) -> &str {
        &self.selected
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn begin_refresh(&mut self) {
        self.is_loading = true;
    }

    /// Apply the outcome of a model listing; a failure keeps the previous list
    pub fn finish_refresh(&mut self, result: Result<Vec<ModelInfo>, ApiError>) {
        self.is_loading = false;
        match result {
            Ok(mut models) => {
                models.sort_by(|a, b| a.id.cmp(&b.id));
                models.dedup_by(|a, b| a.id == b.id);
                tracing::info!("[ModelCatalog] {} models available", models.len());
                self.models = models;
                self.error = None;
            }
            Err(e) => {
                tracing::warn!("[ModelCatalog] Failed to list models: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }

    /// Returns false for a blank id
    pub fn select(&mut self, model: &str) -> bool {
        let model = model.trim();
        if model.is_empty() {
            return false;
        }
        if !self.models.is_empty() && !self.models.iter().any(|m| m.id == model) {
            tracing::warn!("[ModelCatalog] Selecting '{}', which is not in the listed models", model);
        }
        self.selected = model.to_string();
        true
    }
}
