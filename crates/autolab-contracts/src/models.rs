use indexmap::IndexMap;

/// Capability tag for models that can return inline image payloads.
pub const CAP_IMAGE: &str = "image";
/// Capability tag for plain text generation (prompt rewriting).
pub const CAP_TEXT: &str = "text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Ordered table of the models the session can address. Insertion order is
/// display order, so the first entry per capability is the default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            models: default_models(),
        }
    }
}

impl ModelRegistry {
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<&ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .collect()
    }

    /// Returns the model only when it exists and carries the capability.
    pub fn ensure(&self, name: &str, capability: &str) -> Option<&ModelSpec> {
        self.get(name).filter(|model| model.supports(capability))
    }

    pub fn default_for(&self, capability: &str) -> Option<&ModelSpec> {
        self.models
            .values()
            .find(|model| model.supports(capability))
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();
    for (name, provider, capabilities) in [
        ("gemini-2.5-flash-image-preview", "gemini", &[CAP_IMAGE][..]),
        ("gemini-2.0-flash", "gemini", &[CAP_TEXT][..]),
        ("offline-image-1", "offline", &[CAP_IMAGE][..]),
        ("offline-text-1", "offline", &[CAP_TEXT][..]),
    ] {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.iter().map(|item| (*item).to_string()).collect(),
            },
        );
    }
    map
}
