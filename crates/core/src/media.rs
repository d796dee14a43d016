//! Physical media, artefact and emulator device classifications.

use serde::{Deserialize, Serialize};

/// Declared type of a captured artefact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtefactType {
    IsoImage,
    ZipArchive,
    SfmFloppy,
    WindowsBinary,
    LinuxBinary,
    WavAudio,
    Unknown,
}

/// Physical carrier a digitization tool reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalMediaType {
    None,
    Floppy5QtInch,
    Floppy3HfInch,
    #[serde(rename = "CD")]
    Cd,
    #[serde(rename = "DVD")]
    Dvd,
    BluRay,
    AudioCassette,
}

impl PhysicalMediaType {
    pub fn is_floppy(self) -> bool {
        matches!(
            self,
            PhysicalMediaType::Floppy5QtInch | PhysicalMediaType::Floppy3HfInch
        )
    }
}

/// Emulated device a converted file is attached as.
///
/// The virtualization service identifies device kinds by Wikidata QIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "ISO")]
    Iso,
    Floppy,
    Files,
    Cartridge,
}

impl DeviceType {
    pub fn qid(self) -> &'static str {
        match self {
            DeviceType::Iso => "Q495265",
            DeviceType::Floppy => "Q493576",
            DeviceType::Files => "Q82753",
            DeviceType::Cartridge => "Q633454",
        }
    }

    pub fn from_qid(qid: &str) -> Option<Self> {
        match qid {
            "Q495265" => Some(DeviceType::Iso),
            "Q493576" => Some(DeviceType::Floppy),
            "Q82753" => Some(DeviceType::Files),
            "Q633454" => Some(DeviceType::Cartridge),
            _ => None,
        }
    }
}

/// A previously captured file stored in the artefact bucket under its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artefact {
    pub id: uuid::Uuid,
    pub name: String,
    pub original_filename: String,
    pub artefact_type: ArtefactType,
}

impl Artefact {
    /// Object-storage key of the artefact's content.
    pub fn object_key(&self) -> String {
        self.id.to_string()
    }
}
