use std::collections::BTreeMap;

use thiserror::Error;

use super::{GcContentModel, ModelError, Trainable};

/// Inputs every architecture builder receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArchitectureParams {
    /// Number of output tasks.
    pub outputs: usize,
    /// Input window length in bases.
    pub window: usize,
}

/// Builder function registered under an architecture name.
pub type ArchitectureBuilder = fn(&ArchitectureParams) -> Result<Box<dyn Trainable>, ModelError>;

/// Registry lookup failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No builder under this name.
    #[error("unknown architecture '{name}' (available: {available:?})")]
    Unknown {
        /// Requested name.
        name: String,
        /// Registered names.
        available: Vec<String>,
    },
    /// A builder is already registered under this name.
    #[error("architecture '{0}' is already registered")]
    Duplicate(String),
}

/// Metadata describing a registered architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureInfo {
    /// Registered name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

#[derive(Debug, Clone)]
struct ArchitectureEntry {
    build: ArchitectureBuilder,
    description: String,
}

/// Architectures resolved by name, registered at startup.
#[derive(Debug, Clone, Default)]
pub struct ArchitectureRegistry {
    entries: BTreeMap<String, ArchitectureEntry>,
}

impl ArchitectureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in architectures.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.entries.insert(
            GcContentModel::NAME.to_string(),
            ArchitectureEntry {
                build: GcContentModel::build,
                description: "Per-task linear response to window GC fraction".to_string(),
            },
        );
        registry
    }

    /// Register a builder under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        build: ArchitectureBuilder,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.entries.insert(
            name,
            ArchitectureEntry {
                build,
                description: description.into(),
            },
        );
        Ok(())
    }

    /// Look up a builder by name.
    pub fn get(&self, name: &str) -> Result<ArchitectureBuilder, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| entry.build)
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_string(),
                available: self.entries.keys().cloned().collect(),
            })
    }

    /// Build the architecture registered under `name`.
    pub fn build(
        &self,
        name: &str,
        params: &ArchitectureParams,
    ) -> Result<Box<dyn Trainable>, ModelError> {
        let build = self
            .get(name)
            .map_err(|err| ModelError::Failed(err.to_string()))?;
        build(params)
    }

    /// List registered architectures in name order.
    pub fn list(&self) -> Vec<ArchitectureInfo> {
        self.entries
            .iter()
            .map(|(name, entry)| ArchitectureInfo {
                name: name.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }
}
