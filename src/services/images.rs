use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Resolves listing image references to local files the browser can upload.
///
/// Local paths are used in place. `http(s)` URLs are downloaded into a
/// per-job directory under the staging root. Every image is sniffed so a
/// broken reference fails before any marketplace is touched.
pub struct ImageStager {
    http: Client,
    root: PathBuf,
}

/// Local image files for one job, in listing order.
#[derive(Debug)]
pub struct StagedImages {
    paths: Vec<PathBuf>,
    dir: Option<PathBuf>,
}

impl StagedImages {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove downloaded copies. Local originals are never touched.
    pub async fn cleanup(self) {
        if let Some(dir) = self.dir {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove staged images");
            }
        }
    }
}

fn is_remote(reference: &str) -> bool {
    reference.starts_with("https://") || reference.starts_with("http://")
}

impl ImageStager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ImageError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ImageError::Download {
                reference: "client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            root: root.into(),
        })
    }

    pub async fn stage(&self, job_id: Uuid, references: &[String]) -> Result<StagedImages, ImageError> {
        let mut staged = StagedImages {
            paths: Vec::with_capacity(references.len()),
            dir: None,
        };

        for (index, reference) in references.iter().enumerate() {
            let result = if is_remote(reference) {
                let dir = self.root.join(job_id.to_string());
                if staged.dir.is_none() {
                    tokio::fs::create_dir_all(&dir)
                        .await
                        .map_err(|source| ImageError::Io {
                            path: dir.clone(),
                            source,
                        })?;
                    staged.dir = Some(dir.clone());
                }
                self.download(reference, &dir, index).await
            } else {
                check_local(reference).await
            };

            match result {
                Ok(path) => staged.paths.push(path),
                Err(e) => {
                    staged.cleanup().await;
                    return Err(e);
                }
            }
        }

        tracing::debug!(job_id = %job_id, count = staged.paths.len(), "Listing images staged");
        Ok(staged)
    }

    async fn download(&self, url: &str, dir: &Path, index: usize) -> Result<PathBuf, ImageError> {
        let download_error = |reason: String| ImageError::Download {
            reference: url.to_string(),
            reason,
        };

        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| download_error(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let format = image::guess_format(&bytes)
            .map_err(|_| ImageError::Unrecognized(url.to_string()))?;
        let extension = format.extensions_str().first().copied().unwrap_or("img");

        let path = dir.join(format!("{:02}.{}", index, extension));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| ImageError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

async fn check_local(reference: &str) -> Result<PathBuf, ImageError> {
    let path = PathBuf::from(reference);
    let bytes = tokio::fs::read(&path).await.map_err(|source| ImageError::Io {
        path: path.clone(),
        source,
    })?;
    image::guess_format(&bytes).map_err(|_| ImageError::Unrecognized(reference.to_string()))?;
    Ok(path)
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to download image {reference}: {reason}")]
    Download { reference: String, reason: String },

    #[error("Image file {path} is not readable: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Not a recognizable image: {0}")]
    Unrecognized(String),
}
