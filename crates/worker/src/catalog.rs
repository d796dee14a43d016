//! File-backed package catalog.
//!
//! Maps converted packages to the EaaS environment they run in, read
//! from a `{ "configurations": [...] }` list.

use std::collections::HashMap;
use std::path::Path;

use asec_core::error::CoreError;
use asec_pipeline::config::{self, ConfigError, ConfigurationList};
use asec_pipeline::emulation::{PackageCatalog, ResolvedPackage};
use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageEntry {
    pub package_id: Uuid,
    pub environment_eaas_id: String,
}

#[derive(Debug, Default)]
pub struct JsonPackageCatalog {
    packages: HashMap<Uuid, String>,
}

impl JsonPackageCatalog {
    pub fn new(entries: Vec<PackageEntry>) -> Self {
        let packages = entries
            .into_iter()
            .map(|e| (e.package_id, e.environment_eaas_id))
            .collect();
        Self { packages }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let list: ConfigurationList<PackageEntry> = config::load_json(path)?;
        Ok(Self::new(list.configurations))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[async_trait]
impl PackageCatalog for JsonPackageCatalog {
    async fn resolve_package(&self, package_id: Uuid) -> Result<Option<ResolvedPackage>, CoreError> {
        Ok(self
            .packages
            .get(&package_id)
            .map(|environment| ResolvedPackage {
                package_id,
                environment_eaas_id: environment.clone(),
            }))
    }
}
