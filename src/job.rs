use std::{fmt, path::Path, sync::Arc};

use smol_str::SmolStr;
use teloxide::types::{ChatId, MessageId};
use tempfile::TempPath;
use thiserror::Error;
use uuid::Uuid;

use crate::constants::VIDEO_EXTENSIONS;

/// Who posted the link. Decides reply and broadcast behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    Admin,
    User,
    Channel,
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Channel => "channel",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub kind: OriginKind,
}

/// A file as described by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub url: String,
    pub filename: SmolStr,
    pub size: u64,
}

impl RemoteFile {
    pub fn extension(&self) -> Option<&str> {
        file_extension(&self.filename)
    }
}

pub fn file_extension(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

pub fn is_video_name(name: &str) -> bool {
    file_extension(name).is_some_and(|ext| {
        VIDEO_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed))
    })
}

/// A finished download. The file is removed once the last clone drops.
#[derive(Debug, Clone)]
pub struct DownloadedVideo {
    file: Arc<TempPath>,
    pub filename: SmolStr,
    pub size: u64,
}

impl DownloadedVideo {
    pub fn new(file: TempPath, filename: SmolStr, size: u64) -> Self {
        Self {
            file: Arc::new(file),
            filename,
            size,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.file
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Resolving,
    Validating,
    Downloading,
    Uploading,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to resolve link: {0}")]
    Resolution(String),
    #[error("unsupported file type: {filename}")]
    UnsupportedType { filename: SmolStr },
    #[error("file {filename} is too large ({size} bytes, limit {limit})")]
    TooLarge {
        filename: SmolStr,
        size: u64,
        limit: u64,
    },
    #[error("download failed: {0}")]
    Download(String),
    #[error("upload failed: {0}")]
    Upload(String),
}

/// One link's resolve, validate, download and upload cycle.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub link: String,
    pub origin: Origin,
    status: JobStatus,
    file: Option<RemoteFile>,
}

impl Job {
    pub fn new(link: String, origin: Origin) -> Self {
        Self {
            id: Uuid::new_v4(),
            link,
            origin,
            status: JobStatus::Resolving,
            file: None,
        }
    }

    #[inline]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Record the resolved file. Only the first call has an effect.
    pub fn resolved(&mut self, file: RemoteFile) -> &RemoteFile {
        self.file.get_or_insert(file)
    }

    /// Move to the next stage. Only the immediately following stage is
    /// accepted, and terminal states are sticky. Use [`Job::fail`] to fail.
    pub fn advance(&mut self, next: JobStatus) {
        let following = next != JobStatus::Failed && next as u8 == self.status as u8 + 1;
        if self.status.is_terminal() || !following {
            tracing::warn!(job = %self.id, from = ?self.status, to = ?next, "ignored job transition");
            return;
        }
        self.status = next;
    }

    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = JobStatus::Failed;
        }
    }
}

/// Check the resolved file against the allow-list and size ceiling, before any
/// byte is transferred.
pub fn validate(file: &RemoteFile, max_size: u64) -> Result<(), JobError> {
    if !is_video_name(&file.filename) {
        return Err(JobError::UnsupportedType {
            filename: file.filename.clone(),
        });
    }
    if file.size > max_size {
        return Err(JobError::TooLarge {
            filename: file.filename.clone(),
            size: file.size,
            limit: max_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MAX_FILE_SIZE;

    fn remote(name: &str, size: u64) -> RemoteFile {
        RemoteFile {
            url: "https://cdn.example/x".to_string(),
            filename: name.into(),
            size,
        }
    }

    fn origin() -> Origin {
        Origin {
            chat_id: ChatId(1),
            message_id: MessageId(2),
            kind: OriginKind::User,
        }
    }

    #[test]
    fn test_video_names() {
        assert!(is_video_name("x.mp4"));
        assert!(is_video_name("Movie.Part.1.MKV"));
        assert!(is_video_name("a.webm"));
        assert!(!is_video_name("archive.zip"));
        assert!(!is_video_name("mp4"));
        assert!(!is_video_name("trailing."));
        assert_eq!(remote("clip.mov", 1).extension(), Some("mov"));
    }

    #[test]
    fn test_validate() {
        assert!(validate(&remote("x.mp4", 500_000_000), DEFAULT_MAX_FILE_SIZE).is_ok());
        assert!(validate(&remote("x.mp4", DEFAULT_MAX_FILE_SIZE), DEFAULT_MAX_FILE_SIZE).is_ok());
        assert!(matches!(
            validate(&remote("x.zip", 10), DEFAULT_MAX_FILE_SIZE),
            Err(JobError::UnsupportedType { .. })
        ));
        assert!(matches!(
            validate(&remote("x.mkv", DEFAULT_MAX_FILE_SIZE + 1), DEFAULT_MAX_FILE_SIZE),
            Err(JobError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_resolved_file_is_immutable() {
        let mut job = Job::new("https://terabox.com/s/1".to_string(), origin());
        job.resolved(remote("first.mp4", 1));
        let file = job.resolved(remote("second.mp4", 2));
        assert_eq!(file.filename, "first.mp4");
        assert_eq!(file.size, 1);
    }

    #[test]
    fn test_full_run() {
        let mut job = Job::new("https://terabox.com/s/1".to_string(), origin());
        for next in [
            JobStatus::Validating,
            JobStatus::Downloading,
            JobStatus::Uploading,
            JobStatus::Done,
        ] {
            job.advance(next);
            assert_eq!(job.status(), next);
        }
        job.fail();
        assert_eq!(job.status(), JobStatus::Done);
    }

    #[test]
    fn test_transitions() {
        let mut job = Job::new("https://terabox.com/s/1".to_string(), origin());
        assert_eq!(job.status(), JobStatus::Resolving);
        // skipping a stage is ignored
        job.advance(JobStatus::Downloading);
        assert_eq!(job.status(), JobStatus::Resolving);
        job.advance(JobStatus::Validating);
        job.advance(JobStatus::Downloading);
        // going back is ignored
        job.advance(JobStatus::Validating);
        assert_eq!(job.status(), JobStatus::Downloading);
        job.advance(JobStatus::Done);
        assert_eq!(job.status(), JobStatus::Downloading);
        job.fail();
        job.advance(JobStatus::Done);
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.status().is_terminal());
    }
}
