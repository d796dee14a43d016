//! The job host: one registry per job kind plus everything needed to
//! build jobs from identifiers.

use std::sync::Arc;

use asec_cloud::ObjectStore;
use asec_core::error::CoreError;
use asec_core::media::{Artefact, ArtefactType};
use asec_pipeline::conversion::{ConversionJob, EmulatorRegistry};
use asec_pipeline::digitization::{DigitizationJob, ToolRepository};
use asec_pipeline::emulation::{EmulationJob, EmulationServices};
use asec_pipeline::{Job, JobError, ProcessRegistry, RegistryError};
use uuid::Uuid;

use crate::config::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Unknown digitization tool: {0}")]
    UnknownTool(String),

    #[error("Unknown emulation environment: {0}")]
    UnknownEnvironment(Uuid),

    /// The environment has no converter for the artefacts' type.
    #[error("Environment {environment_id} cannot convert {artefact_type:?} artefacts")]
    NoConverter {
        environment_id: Uuid,
        artefact_type: ArtefactType,
    },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct Host {
    config: WorkerConfig,
    tools: ToolRepository,
    emulators: EmulatorRegistry,
    storage: Arc<dyn ObjectStore>,
    services: EmulationServices,
    pub digitization: ProcessRegistry<DigitizationJob>,
    pub conversion: ProcessRegistry<ConversionJob>,
    pub emulation: ProcessRegistry<EmulationJob>,
}

impl Host {
    pub fn new(
        config: WorkerConfig,
        tools: ToolRepository,
        emulators: EmulatorRegistry,
        storage: Arc<dyn ObjectStore>,
        services: EmulationServices,
    ) -> Self {
        Self {
            config,
            tools,
            emulators,
            storage,
            services,
            digitization: ProcessRegistry::new(),
            conversion: ProcessRegistry::new(),
            emulation: ProcessRegistry::new(),
        }
    }

    /// Probe every configured tool and converter.
    pub async fn initialize(&self) {
        self.tools.initialize_all().await;
        self.emulators.initialize_all().await;

        let available = self.tools.list().iter().filter(|t| t.is_available()).count();
        tracing::info!(
            tools = self.tools.len(),
            available,
            environments = self.emulators.environments().count(),
            "Host initialized",
        );
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRepository {
        &self.tools
    }

    pub fn emulators(&self) -> &EmulatorRegistry {
        &self.emulators
    }

    /// Start capturing a physical medium with the tool `tool_slug`.
    pub async fn start_digitization(
        &self,
        tool_slug: &str,
        version_id: Uuid,
    ) -> Result<Arc<DigitizationJob>, HostError> {
        let tool = self
            .tools
            .get(tool_slug)
            .ok_or_else(|| HostError::UnknownTool(tool_slug.to_string()))?;

        let job = Arc::new(DigitizationJob::new(
            tool,
            version_id,
            &self.config.digitization_dirs_base(),
        )?);
        self.digitization.start(Arc::clone(&job)).await?;
        tracing::info!(job_id = %job.core().id(), tool = %tool_slug, "Digitization started");
        Ok(job)
    }

    /// Convert `artefacts` for the environment `environment_id`, using
    /// its converter for the artefacts' type.
    pub async fn start_conversion(
        &self,
        environment_id: Uuid,
        version_id: Uuid,
        artefacts: Vec<Artefact>,
    ) -> Result<Arc<ConversionJob>, HostError> {
        let environment = self
            .emulators
            .environment(environment_id)
            .ok_or(HostError::UnknownEnvironment(environment_id))?;
        let Some(artefact_type) = artefacts.first().map(|a| a.artefact_type) else {
            return Err(JobError::from(CoreError::InvalidInput(
                "Conversion needs at least one artefact".to_string(),
            ))
            .into());
        };
        let converter = environment
            .converter_for(artefact_type)
            .ok_or(HostError::NoConverter {
                environment_id,
                artefact_type,
            })?;

        let job = Arc::new(ConversionJob::new(
            environment_id,
            version_id,
            converter,
            artefacts,
            Arc::clone(&self.storage),
            self.config.conversion(),
        )?);
        self.conversion.start(Arc::clone(&job)).await?;
        tracing::info!(
            job_id = %job.core().id(),
            environment = %environment.eaas_id,
            "Conversion started",
        );
        Ok(job)
    }

    /// Start an emulation session for a converted package.
    pub async fn start_emulation(&self, package_id: Uuid) -> Result<Arc<EmulationJob>, HostError> {
        let job = Arc::new(EmulationJob::new(
            package_id,
            self.services.clone(),
            self.config.emulation(),
        )?);
        self.emulation.start(Arc::clone(&job)).await?;
        tracing::info!(
            job_id = %job.core().id(),
            package_id = %package_id,
            stream_url = %job.stream_url(),
            "Emulation started",
        );
        Ok(job)
    }

    /// Cancel every running job and wait for all of them to exit.
    pub async fn shutdown(&self) {
        futures::join!(
            self.digitization.shutdown(),
            self.conversion.shutdown(),
            self.emulation.shutdown(),
        );
        tracing::info!("All jobs drained");
    }
}
