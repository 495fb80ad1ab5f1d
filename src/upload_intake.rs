// Upload Intake - admission control for new corpus files (§4.4).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::supervisor::Supervisor;
use crate::types::{FileStatus, UploadedFile};
use crate::validation::upload as validate;

pub struct UploadIntake {
    input_dir: PathBuf,
    supervisor: Arc<Supervisor>,
}

impl UploadIntake {
    pub fn new(input_dir: PathBuf, supervisor: Arc<Supervisor>) -> Self {
        Self {
            input_dir,
            supervisor,
        }
    }

    /// Validate and persist an uploaded file, then asynchronously trigger
    /// indexing (§4.4 Side effect — the HTTP response does not wait for it).
    pub async fn upload(
        &self,
        filename: &str,
        content: &[u8],
        content_length: u64,
    ) -> Result<UploadedFile, AppError> {
        validate::validate_filename(filename)?;
        validate::validate_extension(filename)?;
        validate::validate_content_length(content_length)?;

        tokio::fs::create_dir_all(&self.input_dir).await?;

        let mut target_name = filename.to_string();
        let mut target_path = self.input_dir.join(&target_name);
        if tokio::fs::try_exists(&target_path).await.unwrap_or(false) {
            let (stem, ext) = split_extension(filename);
            let suffix = Utc::now().timestamp();
            target_name = if ext.is_empty() {
                format!("{stem}_{suffix}")
            } else {
                format!("{stem}_{suffix}.{ext}")
            };
            target_path = self.input_dir.join(&target_name);
        }

        tokio::fs::write(&target_path, content).await?;

        let metadata = tokio::fs::metadata(&target_path).await?;
        let upload_date: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let uploaded = UploadedFile {
            id: target_name.clone(),
            name: target_name,
            size: metadata.len(),
            upload_date,
            status: FileStatus::Pending,
        };

        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move {
            let result = supervisor.start();
            if !result.accepted {
                tracing::debug!(reason = ?result.reason, "indexing not triggered after upload");
            }
        });

        Ok(uploaded)
    }

    /// List uploaded files, joining status against the Supervisor's most
    /// recent run outcome relative to each file's modification time.
    pub async fn list(&self) -> Result<Vec<UploadedFile>, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.input_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let outcome = self.supervisor.last_outcome();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let upload_date: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let status = match outcome {
                Some(run) if upload_date <= run.finished_at => {
                    if run.succeeded {
                        FileStatus::Indexed
                    } else {
                        FileStatus::Error
                    }
                }
                _ => FileStatus::Pending,
            };

            files.push(UploadedFile {
                id: name.clone(),
                name,
                size: metadata.len(),
                upload_date,
                status,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Remove an uploaded file. Does not roll back existing artifacts
    /// (§3 UploadedFile lifecycle).
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        validate::validate_filename(id)?;
        let path = self.input_dir.join(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::not_found(format!("file not found: {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (filename, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_store::ParquetArtifactStore;
    use crate::metrics_cache::MetricsCache;

    fn make_intake(input_dir: PathBuf) -> UploadIntake {
        let output_dir = input_dir.parent().unwrap().join("output");
        std::fs::create_dir_all(&output_dir).unwrap();
        let store = Arc::new(ParquetArtifactStore::new(&output_dir));
        let cache = Arc::new(MetricsCache::new(store.clone()));
        let supervisor = Arc::new(Supervisor::new(
            input_dir.parent().unwrap().to_path_buf(),
            output_dir,
            "true".to_string(),
            store,
            cache,
            std::time::Duration::from_secs(3600),
        ));
        UploadIntake::new(input_dir, supervisor)
    }

    #[tokio::test]
    async fn upload_rejects_disallowed_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let intake = make_intake(dir.path().join("input"));
        let result = intake.upload("a.pdf", b"hello", 5).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn upload_rejects_empty_content_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let intake = make_intake(dir.path().join("input"));
        let result = intake.upload("a.txt", b"", 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn upload_then_list_round_trips_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input_dir = dir.path().join("input");
        let intake = make_intake(input_dir.clone());
        let uploaded = intake
            .upload("doc.txt", b"hello world", 11)
            .await
            .expect("upload succeeds");
        assert_eq!(uploaded.name, "doc.txt");

        let on_disk = tokio::fs::read(input_dir.join("doc.txt")).await.unwrap();
        assert_eq!(on_disk, b"hello world");

        let files = intake.list().await.expect("list succeeds");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].status, FileStatus::Pending);
    }

    #[tokio::test]
    async fn name_collision_appends_timestamp_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input_dir = dir.path().join("input");
        let intake = make_intake(input_dir.clone());
        intake
            .upload("doc.txt", b"first", 5)
            .await
            .expect("first upload");
        let second = intake
            .upload("doc.txt", b"second", 6)
            .await
            .expect("second upload");
        assert_ne!(second.name, "doc.txt");
        assert!(second.name.starts_with("doc_"));
        assert!(second.name.ends_with(".txt"));

        let files = intake.list().await.expect("list succeeds");
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let intake = make_intake(dir.path().join("input"));
        let result = intake.delete("missing.txt").await;
        assert!(result.is_err());
    }
}
