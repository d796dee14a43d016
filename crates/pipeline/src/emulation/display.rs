//! Host display connection state.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;

/// Reports whether a display output currently has a monitor attached.
#[async_trait]
pub trait DisplayProbe: Send + Sync {
    async fn poll_display_connected(&self, display: &str) -> io::Result<bool>;
}

/// Reads DRM connector state from sysfs (`<root>/<display>/status`).
#[derive(Debug, Clone)]
pub struct SysfsDisplayProbe {
    root: PathBuf,
}

impl Default for SysfsDisplayProbe {
    fn default() -> Self {
        Self::new("/sys/class/drm")
    }
}

impl SysfsDisplayProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Connector names such as `card0-HDMI-A-1`.
    pub async fn list_displays(&self) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut displays = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if tokio::fs::try_exists(entry.path().join("status")).await? {
                displays.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        displays.sort();
        Ok(displays)
    }
}

#[async_trait]
impl DisplayProbe for SysfsDisplayProbe {
    async fn poll_display_connected(&self, display: &str) -> io::Result<bool> {
        let status = tokio::fs::read_to_string(self.root.join(display).join("status")).await?;
        Ok(status.trim() == "connected")
    }
}
