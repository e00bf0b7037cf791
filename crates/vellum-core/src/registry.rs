use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::schema::CollectionDefinition;

/// Read-only map of collection name to resolved definition, plus the configured languages.
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    collections: HashMap<String, Arc<CollectionDefinition>>,
    languages: Vec<String>,
    primary_language: String,
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new(vec!["en".to_string()], "en")
    }
}

impl CollectionRegistry {
    /// Creates an empty registry. The primary language is added to `languages` if missing.
    pub fn new(mut languages: Vec<String>, primary_language: impl Into<String>) -> Self {
        let primary_language = primary_language.into();
        if !languages.contains(&primary_language) {
            languages.insert(0, primary_language.clone());
        }
        Self {
            collections: HashMap::new(),
            languages,
            primary_language,
        }
    }

    pub fn register(&mut self, definition: CollectionDefinition) -> Arc<CollectionDefinition> {
        let definition = Arc::new(definition);
        self.collections
            .insert(definition.name.clone(), Arc::clone(&definition));
        definition
    }

    #[must_use]
    pub fn with_collection(mut self, definition: CollectionDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.collections.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<CollectionDefinition>> {
        self.get(name)
            .ok_or_else(|| CoreError::unknown_collection(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn primary_language(&self) -> &str {
        &self.primary_language
    }

    pub fn is_language(&self, code: &str) -> bool {
        self.languages.iter().any(|l| l == code)
    }
}
