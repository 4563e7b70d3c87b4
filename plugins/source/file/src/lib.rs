use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use framing_lines::{FramedLineReader, LinesFraming};
use logpipe_api::{LineSource, LineSupplier, PluginError};

/// Line source over a local file. Accepts a plain path or a `file://` URI.
pub struct FileSource {
    path: PathBuf,
    framing: LinesFraming,
}

impl FileSource {
    pub fn new(location: &str, max_line_length: usize) -> Self {
        let path = location.strip_prefix("file://").unwrap_or(location);
        Self {
            path: PathBuf::from(path),
            framing: LinesFraming::new(max_line_length),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn LineSupplier>, PluginError>> + Send + '_>> {
        Box::pin(async move {
            let file = tokio::fs::File::open(&self.path)
                .await
                .map_err(|e| PluginError::from(e).context(format!("cannot open {}", self.path.display())))?;
            tracing::info!(path = %self.path.display(), "file source opened");
            Ok(Box::new(FramedLineReader::new(self.describe(), file, self.framing)) as Box<dyn LineSupplier>)
        })
    }
}
