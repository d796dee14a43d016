//! Emulators, their EaaS environments and the converters each accepts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use asec_core::error::CoreError;
use asec_core::media::ArtefactType;
use serde::Deserialize;
use uuid::Uuid;

use super::converters::{Converter, ConverterConfig};
use crate::config::{self, ConfigError, ConfigurationList};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorConfig {
    pub name: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    pub id: Uuid,
    pub version: String,
    pub eaas_id: String,
    #[serde(default)]
    pub converters: Vec<ConverterConfig>,
}

/// One emulator version available as an EaaS environment.
#[derive(Debug)]
pub struct EmulationEnvironment {
    pub id: Uuid,
    pub emulator: String,
    pub version: String,
    pub eaas_id: String,
    converters: Vec<Arc<Converter>>,
}

impl EmulationEnvironment {
    pub fn converters(&self) -> &[Arc<Converter>] {
        &self.converters
    }

    /// First converter accepting `artefact_type`.
    pub fn converter_for(&self, artefact_type: ArtefactType) -> Option<Arc<Converter>> {
        self.converters
            .iter()
            .find(|c| c.supports(artefact_type))
            .cloned()
    }
}

#[derive(Debug, Default)]
pub struct EmulatorRegistry {
    emulators: Vec<EmulatorConfig>,
    environments: HashMap<Uuid, EmulationEnvironment>,
}

impl EmulatorRegistry {
    pub fn from_configs(emulators: Vec<EmulatorConfig>) -> Result<Self, CoreError> {
        let mut environments = HashMap::new();
        for emulator in &emulators {
            for env in &emulator.environments {
                let environment = EmulationEnvironment {
                    id: env.id,
                    emulator: emulator.name.clone(),
                    version: env.version.clone(),
                    eaas_id: env.eaas_id.clone(),
                    converters: env
                        .converters
                        .iter()
                        .map(|c| Arc::new(c.construct()))
                        .collect(),
                };
                if environments.insert(env.id, environment).is_some() {
                    return Err(CoreError::InvalidInput(format!(
                        "Duplicate environment id {}",
                        env.id
                    )));
                }
            }
        }

        tracing::info!(
            emulators = emulators.len(),
            environments = environments.len(),
            "Emulators configured",
        );
        Ok(Self {
            emulators,
            environments,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let list: ConfigurationList<EmulatorConfig> = config::load_json(path)?;
        Self::from_configs(list.configurations).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Probe every converter once and log its version.
    pub async fn initialize_all(&self) {
        for environment in self.environments.values() {
            for converter in environment.converters() {
                converter.initialize().await;
                tracing::info!(
                    environment = %environment.eaas_id,
                    converter = converter.name(),
                    version = %converter.version(),
                    available = converter.is_available(),
                    "Converter probed",
                );
            }
        }
    }

    pub fn emulators(&self) -> &[EmulatorConfig] {
        &self.emulators
    }

    pub fn environment(&self, id: Uuid) -> Option<&EmulationEnvironment> {
        self.environments.get(&id)
    }

    pub fn environments(&self) -> impl Iterator<Item = &EmulationEnvironment> {
        self.environments.values()
    }

    pub fn converter_for(
        &self,
        environment_id: Uuid,
        artefact_type: ArtefactType,
    ) -> Option<Arc<Converter>> {
        self.environment(environment_id)?.converter_for(artefact_type)
    }
}
