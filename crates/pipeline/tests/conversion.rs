#![cfg(unix)]

mod common;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use asec_cloud::{ObjectStore, StorageError};
use asec_core::error::CoreError;
use asec_core::media::{Artefact, ArtefactType, DeviceType};
use asec_core::status::JobStatus;
use asec_pipeline::conversion::{
    ConversionDetail, ConversionJob, ConversionSettings, Converter, ConverterKind,
};
use asec_pipeline::{Job, JobError, ProcessRegistry};
use assert_matches::assert_matches;
use tokio_util::sync::CancellationToken;
use async_trait::async_trait;
use uuid::Uuid;

use common::script;

/// Artefact bucket held in memory.
#[derive(Default)]
struct MemoryStore {
    objects: HashMap<String, Vec<u8>>,
    downloads: AtomicUsize,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let content = self.objects.get(key).ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        tokio::fs::write(dest, content).await?;
        Ok(())
    }

    async fn put_object(&self, _bucket: &str, _key: &str, _source: &Path) -> Result<(), StorageError> {
        Ok(())
    }
}

fn artefact(artefact_type: ArtefactType, filename: &str) -> Artefact {
    Artefact {
        id: Uuid::new_v4(),
        name: "Game disk".into(),
        original_filename: filename.into(),
        artefact_type,
    }
}

fn settings(dirs_base: &Path) -> ConversionSettings {
    ConversionSettings {
        dirs_base: dirs_base.to_path_buf(),
        artefact_bucket: "artefacts".into(),
        unzip_binary: PathBuf::from("unzip"),
    }
}

/// `gw convert --format ibm.scan <in> <out>`: copies input to output.
fn fake_gw(dir: &Path) -> PathBuf {
    script(dir, "gw", "cp \"$4\" \"$5\"\necho \"Converted $4\"")
}

fn store_with(artefacts: &[Artefact]) -> Arc<MemoryStore> {
    let mut store = MemoryStore::default();
    for a in artefacts {
        store
            .objects
            .insert(a.object_key(), format!("flux of {}", a.id).into_bytes());
    }
    Arc::new(store)
}

#[tokio::test]
async fn floppies_are_converted_with_unique_names() {
    let tools = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let artefacts = vec![
        artefact(ArtefactType::SfmFloppy, "disk.scp"),
        artefact(ArtefactType::SfmFloppy, "disk.scp"),
    ];
    let store = store_with(&artefacts);
    let converter = Arc::new(Converter::new(ConverterKind::Floppy, fake_gw(tools.path())));

    let job = Arc::new(
        ConversionJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            converter,
            artefacts.clone(),
            store.clone(),
            settings(base.path()),
        )
        .unwrap(),
    );
    let registry = ProcessRegistry::new();
    registry.start(Arc::clone(&job)).await.unwrap();

    let result = registry.finish(job.core().id()).await.unwrap().unwrap();
    let output = &job.core().dirs().output;
    assert_eq!(result.files.len(), 2);
    assert_eq!(result.files[0].filename, output.join("disk.img"));
    assert_eq!(result.files[1].filename, output.join("disk_1.img"));
    assert!(result.files.iter().all(|f| f.device_type == DeviceType::Floppy));
    assert_eq!(
        std::fs::read_to_string(&result.files[1].filename).unwrap(),
        format!("flux of {}", artefacts[1].id)
    );
    assert_eq!(store.downloads.load(Ordering::SeqCst), 2);
    assert_eq!(job.core().status(), JobStatus::Success);

    let log = tokio::fs::read_to_string(&job.core().dirs().log_path)
        .await
        .unwrap();
    assert!(log.contains(&format!(
        "Converting artefact: {} (name: Game disk)",
        artefacts[0].id
    )));
    assert!(log.contains("Conversion process finished successfully."));
}

#[tokio::test]
async fn converter_failure_aborts_the_job() {
    let tools = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let artefacts = vec![
        artefact(ArtefactType::SfmFloppy, "a.scp"),
        artefact(ArtefactType::SfmFloppy, "b.scp"),
    ];
    let store = store_with(&artefacts);
    let gw = script(tools.path(), "gw", "echo 'bad flux' >&2\nexit 1");
    let converter = Arc::new(Converter::new(ConverterKind::Floppy, gw));

    let job = Arc::new(
        ConversionJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            converter,
            artefacts,
            store.clone(),
            settings(base.path()),
        )
        .unwrap(),
    );
    let registry = ProcessRegistry::new();
    registry.start(Arc::clone(&job)).await.unwrap();

    assert_eq!(registry.finish(job.core().id()).await.unwrap(), None);
    assert_eq!(
        job.core().status_detail(),
        Some(ConversionDetail::FailedToConvertArtefact)
    );
    // The second artefact is never fetched.
    assert_eq!(store.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_object_fails_fetch() {
    let tools = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let converter = Arc::new(Converter::new(ConverterKind::Floppy, fake_gw(tools.path())));

    let job = Arc::new(
        ConversionJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            converter,
            vec![artefact(ArtefactType::SfmFloppy, "lost.scp")],
            Arc::new(MemoryStore::default()),
            settings(base.path()),
        )
        .unwrap(),
    );
    let registry = ProcessRegistry::new();
    registry.start(Arc::clone(&job)).await.unwrap();

    assert_eq!(registry.finish(job.core().id()).await.unwrap(), None);
    assert_eq!(job.core().status(), JobStatus::Failed);
    assert_eq!(
        job.core().status_detail(),
        Some(ConversionDetail::FailedToFetchArtefact)
    );
}

#[tokio::test]
async fn unsupported_type_never_touches_storage() {
    let base = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let converter = Arc::new(Converter::new(
        ConverterKind::AudioTape,
        PathBuf::from("/nonexistent/audio2tape"),
    ));

    let job = Arc::new(
        ConversionJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            converter,
            vec![artefact(ArtefactType::SfmFloppy, "disk.scp")],
            store.clone(),
            settings(base.path()),
        )
        .unwrap(),
    );
    let registry = ProcessRegistry::new();
    registry.start(Arc::clone(&job)).await.unwrap();

    assert_eq!(registry.finish(job.core().id()).await.unwrap(), None);
    assert_eq!(job.core().status_detail(), Some(ConversionDetail::InvalidInput));
    assert_eq!(store.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mixed_artefact_types_are_rejected_up_front() {
    let base = tempfile::tempdir().unwrap();
    let converter = Arc::new(Converter::new(ConverterKind::Floppy, PathBuf::from("gw")));

    let created = ConversionJob::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        converter,
        vec![
            artefact(ArtefactType::SfmFloppy, "a.scp"),
            artefact(ArtefactType::WavAudio, "b.wav"),
        ],
        Arc::new(MemoryStore::default()),
        settings(base.path()),
    );
    assert_matches!(created.err(), Some(JobError::Core(CoreError::InvalidInput(_))));
    assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn restart_runs_a_fresh_job() {
    let tools = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let artefacts = vec![artefact(ArtefactType::SfmFloppy, "disk.scp")];
    let store = store_with(&artefacts);
    let converter = Arc::new(Converter::new(ConverterKind::Floppy, fake_gw(tools.path())));

    let job = Arc::new(
        ConversionJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            converter,
            artefacts,
            store,
            settings(base.path()),
        )
        .unwrap(),
    );
    let registry = ProcessRegistry::new();
    registry.start(Arc::clone(&job)).await.unwrap();
    registry.finish(job.core().id()).await.unwrap();

    let fresh = registry.restart(job.core().id()).await.unwrap();
    assert_ne!(fresh.core().id(), job.core().id());
    assert_eq!(fresh.environment_id(), job.environment_id());
    assert!(registry.get(job.core().id()).await.unwrap().is_none());

    let result = registry.finish(fresh.core().id()).await.unwrap().unwrap();
    assert_eq!(result.files.len(), 1);
    assert_eq!(registry.len().await, 1);
}

/// `unzip <archive> -d <dir>`: unpacks two copies of the archive content.
fn fake_unzip(dir: &Path) -> PathBuf {
    script(
        dir,
        "unzip",
        "mkdir -p \"$3/disks\"\ncp \"$1\" \"$3/b.scp\"\ncp \"$1\" \"$3/disks/a.scp\"",
    )
}

#[tokio::test]
async fn zip_archives_are_unpacked_before_conversion() {
    let tools = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let artefacts = vec![artefact(ArtefactType::ZipArchive, "collection.zip")];
    let store = store_with(&artefacts);
    let converter = Arc::new(Converter::new(ConverterKind::Floppy, fake_gw(tools.path())));
    let settings = ConversionSettings {
        unzip_binary: fake_unzip(tools.path()),
        ..settings(base.path())
    };

    let job = Arc::new(
        ConversionJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            converter,
            artefacts.clone(),
            store,
            settings,
        )
        .unwrap(),
    );
    let registry = ProcessRegistry::new();
    registry.start(Arc::clone(&job)).await.unwrap();

    let result = registry.finish(job.core().id()).await.unwrap().unwrap();
    let output = &job.core().dirs().output;
    let names: Vec<_> = result.files.iter().map(|f| f.filename.clone()).collect();
    assert_eq!(names, vec![output.join("b.img"), output.join("a.img")]);
    assert_eq!(
        std::fs::read_to_string(output.join("a.img")).unwrap(),
        format!("flux of {}", artefacts[0].id)
    );

    let extracted = job
        .core()
        .dirs()
        .fetch
        .join(artefacts[0].id.to_string())
        .join("collection.zip_extracted");
    assert!(extracted.join("disks/a.scp").is_file());
}

#[tokio::test]
async fn failing_unzip_fails_fetch() {
    let tools = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let artefacts = vec![artefact(ArtefactType::ZipArchive, "broken.zip")];
    let store = store_with(&artefacts);
    let converter = Arc::new(Converter::new(ConverterKind::Floppy, fake_gw(tools.path())));
    let settings = ConversionSettings {
        unzip_binary: script(tools.path(), "unzip", "echo 'bad zipfile' >&2\nexit 9"),
        ..settings(base.path())
    };

    let job = Arc::new(
        ConversionJob::new(Uuid::new_v4(), Uuid::new_v4(), converter, artefacts, store, settings)
            .unwrap(),
    );
    let registry = ProcessRegistry::new();
    registry.start(Arc::clone(&job)).await.unwrap();

    assert_eq!(registry.finish(job.core().id()).await.unwrap(), None);
    assert_eq!(
        job.core().status_detail(),
        Some(ConversionDetail::FailedToFetchArtefact)
    );
    let log = tokio::fs::read_to_string(&job.core().dirs().log_path)
        .await
        .unwrap();
    assert!(log.contains("bad zipfile"));
}

#[tokio::test]
async fn only_zip_archives_can_be_extracted() {
    let tools = tempfile::tempdir().unwrap();
    let base = tempfile::tempdir().unwrap();
    let floppy = artefact(ArtefactType::SfmFloppy, "disk.scp");
    let store = store_with(std::slice::from_ref(&floppy));
    let settings = ConversionSettings {
        unzip_binary: fake_unzip(tools.path()),
        ..settings(base.path())
    };
    let job = ConversionJob::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Arc::new(Converter::new(ConverterKind::Floppy, fake_gw(tools.path()))),
        vec![floppy.clone()],
        store,
        settings,
    )
    .unwrap();

    let fetched = job
        .fetch_artefact(&floppy, true, &CancellationToken::new())
        .await;
    assert_matches!(
        fetched.err(),
        Some(JobError::Core(CoreError::InvalidOperation(_)))
    );

    let plain = job
        .fetch_artefact(&floppy, false, &CancellationToken::new())
        .await
        .unwrap();
    assert!(plain.ends_with("disk.scp"));
}
