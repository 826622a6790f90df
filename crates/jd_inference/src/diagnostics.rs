use std::fs;
use std::path::PathBuf;

use tracing::warn;

/// Side channel for raw model output and provider errors, keyed by article
/// identifier. Write failures are logged and swallowed: losing a diagnostics
/// file must never fail the item itself.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record(&self, pmid: &str, stage: &str, kind: &str, content: &str) {
        let path = self.dir.join(format!("{pmid}_{stage}_{kind}.txt"));
        let result = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, content));
        if let Err(e) = result {
            warn!("failed to write diagnostics file {}: {e}", path.display());
        }
    }
}
