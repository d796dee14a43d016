//! Converter tools turning captured artefacts into emulator media.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use asec_core::media::{ArtefactType, DeviceType};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::probe::{self, Availability, ProbeState};
use crate::process::ToolCommand;

static GW_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Host Tools: (\d+)\.(\d+)$").expect("valid regex"));

static AUDIO2TAPE_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^audio2tape \(fuse-utils\) (\d+)\.(\d+)\.(\d+)").expect("valid regex")
});

/// Converter configuration, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConverterConfig {
    #[serde(rename = "floppy")]
    Floppy(FloppyConverterConfig),
    #[serde(rename = "audiotape")]
    AudioTape(AudioTapeConverterConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloppyConverterConfig {
    pub gw_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTapeConverterConfig {
    #[serde(rename = "audio2TapePath")]
    pub audio2tape_path: PathBuf,
}

impl ConverterConfig {
    pub fn construct(&self) -> Converter {
        match self {
            ConverterConfig::Floppy(c) => Converter::new(ConverterKind::Floppy, c.gw_path.clone()),
            ConverterConfig::AudioTape(c) => {
                Converter::new(ConverterKind::AudioTape, c.audio2tape_path.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterKind {
    /// Greaseweazle flux image to raw IBM sector image.
    Floppy,
    /// fuse-utils `audio2tape`, WAV recording to ZX Spectrum tape.
    AudioTape,
}

#[derive(Debug)]
pub struct Converter {
    kind: ConverterKind,
    program: PathBuf,
    probe: ProbeState,
}

impl Converter {
    pub fn new(kind: ConverterKind, program: PathBuf) -> Self {
        Self {
            kind,
            program,
            probe: ProbeState::default(),
        }
    }

    pub fn kind(&self) -> ConverterKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            ConverterKind::Floppy => "Greaseweazle Floppy Converter",
            ConverterKind::AudioTape => "Fuse Utils Audio to Tape Converter",
        }
    }

    /// Accepted artefact types. A ZIP archive is expected to wrap files
    /// of the converter's native input type.
    pub fn supported_artefact_types(&self) -> &'static [ArtefactType] {
        match self.kind {
            ConverterKind::Floppy => &[ArtefactType::SfmFloppy, ArtefactType::ZipArchive],
            ConverterKind::AudioTape => &[ArtefactType::WavAudio, ArtefactType::ZipArchive],
        }
    }

    pub fn supports(&self, artefact_type: ArtefactType) -> bool {
        self.supported_artefact_types().contains(&artefact_type)
    }

    /// Device the produced files are attached as.
    pub fn device_type(&self) -> DeviceType {
        match self.kind {
            ConverterKind::Floppy => DeviceType::Floppy,
            ConverterKind::AudioTape => DeviceType::Files,
        }
    }

    pub fn output_extension(&self) -> &'static str {
        match self.kind {
            ConverterKind::Floppy => "img",
            ConverterKind::AudioTape => "tap",
        }
    }

    pub fn version(&self) -> String {
        self.probe.version_or_unknown()
    }

    pub fn is_available(&self) -> bool {
        self.probe.is_available()
    }

    /// Probe the converter binary for its version.
    pub async fn initialize(&self) {
        let (args, pattern): (&[&str], &Regex) = match self.kind {
            ConverterKind::Floppy => (&["info"][..], &*GW_VERSION_RE),
            ConverterKind::AudioTape => (&["--version"][..], &*AUDIO2TAPE_VERSION_RE),
        };

        let availability = match probe::run_probe(&self.program, args).await {
            Some(output) if output.success => Availability {
                available: true,
                version: probe::parse_version(pattern, output.lines()),
            },
            _ => Availability::default(),
        };
        self.probe.set(availability);
    }

    /// The invocation converting `input` into `output`.
    pub fn command(&self, input: &Path, output: &Path) -> ToolCommand {
        match self.kind {
            ConverterKind::Floppy => ToolCommand::new(&self.program)
                .args(["convert", "--format", "ibm.scan"])
                .arg(input)
                .arg(output),
            ConverterKind::AudioTape => ToolCommand::new(&self.program).arg(input).arg(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_config_selects_converter() {
        let floppy: ConverterConfig =
            serde_json::from_str(r#"{"type":"floppy","gwPath":"/usr/bin/gw"}"#).unwrap();
        let converter = floppy.construct();
        assert_eq!(converter.kind(), ConverterKind::Floppy);
        assert_eq!(converter.device_type(), DeviceType::Floppy);
        assert!(converter.supports(ArtefactType::SfmFloppy));
        assert!(converter.supports(ArtefactType::ZipArchive));
        assert!(!converter.supports(ArtefactType::WavAudio));

        let tape: ConverterConfig =
            serde_json::from_str(r#"{"type":"audiotape","audio2TapePath":"/usr/bin/audio2tape"}"#)
                .unwrap();
        let converter = tape.construct();
        assert_eq!(converter.device_type(), DeviceType::Files);
        assert_eq!(
            converter.supported_artefact_types(),
            &[ArtefactType::WavAudio, ArtefactType::ZipArchive]
        );
    }

    #[test]
    fn floppy_command_line() {
        let converter = Converter::new(ConverterKind::Floppy, PathBuf::from("gw"));
        let command = converter.command(Path::new("in.scp"), Path::new("out.img"));
        assert_eq!(command.to_string(), "gw convert --format ibm.scan in.scp out.img");
    }

    #[test]
    fn audio_tape_command_line() {
        let converter = Converter::new(ConverterKind::AudioTape, PathBuf::from("audio2tape"));
        let command = converter.command(Path::new("in.wav"), Path::new("out.tap"));
        assert_eq!(command.to_string(), "audio2tape in.wav out.tap");
    }

    #[test]
    fn version_patterns_match_tool_banners() {
        assert_eq!(
            probe::parse_version(&GW_VERSION_RE, ["Host Tools: 1.16"]),
            Some("1.16".to_string())
        );
        assert_eq!(
            probe::parse_version(&AUDIO2TAPE_VERSION_RE, ["audio2tape (fuse-utils) 1.4.3"]),
            Some("1.4.3".to_string())
        );
    }

    #[tokio::test]
    async fn missing_binary_reports_unknown_version() {
        let converter = Converter::new(ConverterKind::AudioTape, PathBuf::from("/nonexistent/a2t"));
        converter.initialize().await;
        assert!(!converter.is_available());
        assert_eq!(converter.version(), "N/A");
    }
}
