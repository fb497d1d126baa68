use crate::metrics::ApprovalList;
use anyhow::{Context, Result};
use log::debug;
use std::path::Path;

impl ApprovalList {
    /// One identifier or file name per line; blank and `#` lines are skipped.
    pub fn from_text(text: &str) -> Self {
        Self::from_names(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Read a list file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::from_text(&text))
    }

    /// Approved events are the recognisable file names in a curated directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut names = Vec::new();
        for entry in
            std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?
        {
            let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        let list = Self::from_names(&names);
        debug!(
            "{}: {} of {} files name an event",
            dir.display(),
            list.len(),
            names.len()
        );
        Ok(list)
    }

    /// Directory or list file, whichever `path` is.
    pub fn load(path: &Path) -> Result<Self> {
        if path.is_dir() {
            Self::from_dir(path)
        } else {
            Self::read(path)
        }
    }
}
