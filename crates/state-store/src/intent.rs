use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tracing::warn;
use types::LoadRequest;

/// Source of the externally requested load state.
#[allow(async_fn_in_trait)]
pub trait LoadIntentSource {
    /// Never fails: an absent or unreadable signal is no request.
    async fn read_request(&self) -> LoadRequest;
}

/// A file whose content is `on` or `off`. The file is left in place after reading.
#[derive(Debug, Clone)]
pub struct FileLoadIntent {
    path: PathBuf,
}

impl FileLoadIntent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LoadIntentSource for FileLoadIntent {
    async fn read_request(&self) -> LoadRequest {
        match fs::read_to_string(&self.path).await {
            Ok(content) => LoadRequest::from_signal(Some(&content)),
            Err(err) if err.kind() == ErrorKind::NotFound => LoadRequest::None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "load intent unreadable");
                LoadRequest::None
            }
        }
    }
}

impl LoadIntentSource for LoadRequest {
    async fn read_request(&self) -> LoadRequest {
        *self
    }
}

/// Intent picked at runtime: the file signal, or a value fixed on the command line.
#[derive(Debug, Clone)]
pub enum IntentSignal {
    File(FileLoadIntent),
    Fixed(LoadRequest),
}

impl LoadIntentSource for IntentSignal {
    async fn read_request(&self) -> LoadRequest {
        match self {
            IntentSignal::File(file) => file.read_request().await,
            IntentSignal::Fixed(request) => *request,
        }
    }
}
