use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum PictureError {
    #[error("invalid picture name '{0}'")]
    InvalidName(String),
    #[error("unsupported picture extension for '{0}'")]
    UnsupportedExtension(String),
    #[error("picture '{0}' not found")]
    NotFound(String),
    #[error("picture io failed for '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read side of the picture storage used by the dispatcher.
#[async_trait]
pub trait PictureStore: Send + Sync {
    /// True when the file exists and can be opened for reading.
    async fn exists(&self, name: &str) -> bool;

    async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, PictureError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PictureStat {
    pub size_kb: f64,
    pub created_at: DateTime<Utc>,
}

/// Pictures kept as plain files in one directory, addressed by file name.
#[derive(Debug, Clone)]
pub struct LocalPictureStore {
    root: PathBuf,
}

impl LocalPictureStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, PictureError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), PictureError> {
        let path = self.resolve(name)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| io_error(name, source))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| io_error(name, source))
    }

    /// Size in kilobytes (bytes / 1000) and creation time of a stored picture.
    pub async fn stat(&self, name: &str) -> Result<PictureStat, PictureError> {
        let path = self.resolve(name)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| io_error(name, source))?;
        if !metadata.is_file() {
            return Err(PictureError::NotFound(name.to_string()));
        }

        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|source| io_error(name, source))?;

        Ok(PictureStat {
            size_kb: metadata.len() as f64 / 1000.0,
            created_at: DateTime::<Utc>::from(created),
        })
    }

    /// Names of the supported picture files in the directory, sorted.
    pub async fn list(&self) -> Result<Vec<String>, PictureError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&self.root.display().to_string(), source)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&self.root.display().to_string(), source))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_file = entry
                .file_type()
                .await
                .map(|kind| kind.is_file())
                .unwrap_or(false);
            if is_file && validate_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl PictureStore for LocalPictureStore {
    async fn exists(&self, name: &str) -> bool {
        let Ok(path) = self.resolve(name) else {
            return false;
        };
        match tokio::fs::File::open(&path).await {
            Ok(file) => file
                .metadata()
                .await
                .map(|metadata| metadata.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, PictureError> {
        let path = self.resolve(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(PictureError::NotFound(name.to_string()))
            }
            Err(source) => Err(io_error(name, source)),
        }
    }
}

fn io_error(name: &str, source: std::io::Error) -> PictureError {
    PictureError::Io {
        name: name.to_string(),
        source,
    }
}

/// Plain file names with a supported image extension.
pub fn validate_name(name: &str) -> Result<(), PictureError> {
    if name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.starts_with('.')
    {
        return Err(PictureError::InvalidName(name.to_string()));
    }

    let supported = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false);
    if !supported {
        return Err(PictureError::UnsupportedExtension(name.to_string()));
    }
    Ok(())
}
