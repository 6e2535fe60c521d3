//! The per-link job pipeline.
//!
//! Each link runs as its own task. Resolving holds an admission slot only
//! for the resolver call. Every video of the share then becomes its own job
//! that waits for a slot and goes through validating, downloading and
//! uploading. The slot is held by a [`GatePermit`] for the whole job, so
//! every exit path gives it back. Finished videos from eligible origins are
//! handed to the [`Broadcaster`] in the background after the slot is
//! released.

use std::{sync::Arc, time::Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use smol_str::SmolStr;
use teloxide::types::{ChatId, MessageId};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    broadcast::{BroadcastOutcome, Broadcaster},
    config::{DownloadConfig, Param},
    constants::PROGRESS_INTERVAL,
    fetch::{Fetch, Progress, ProgressSink},
    format::{
        MsgCaption, MsgDownloading, MsgFound, MsgJobFailed, MsgProcessing, MsgQueued,
        MsgUploading,
    },
    gate::{AdmissionGate, GatePermit},
    job::{validate, DownloadedVideo, Job, JobError, JobStatus, Origin, OriginKind, RemoteFile},
    resolver::Resolve,
    settings::SettingsService,
    surface::ChatSurface,
};

/// Outcome of one job.
#[derive(Debug)]
pub struct JobReport {
    pub id: Uuid,
    pub status: JobStatus,
    pub error: Option<JobError>,
    pub broadcast: Option<JoinHandle<BroadcastOutcome>>,
}

pub struct Pipeline {
    gate: AdmissionGate,
    resolver: Arc<dyn Resolve>,
    fetcher: Arc<dyn Fetch>,
    surface: Arc<dyn ChatSurface>,
    broadcaster: Arc<Broadcaster>,
    settings: Arc<SettingsService>,
    max_file_size: u64,
}

impl Pipeline {
    pub fn new<C: Param<DownloadConfig>>(
        cfg: &C,
        resolver: Arc<dyn Resolve>,
        fetcher: Arc<dyn Fetch>,
        surface: Arc<dyn ChatSurface>,
        broadcaster: Arc<Broadcaster>,
        settings: Arc<SettingsService>,
    ) -> Self {
        let download_config = cfg.param();
        Self {
            gate: AdmissionGate::new(download_config.max_concurrent_jobs),
            resolver,
            fetcher,
            surface,
            broadcaster,
            settings,
            max_file_size: download_config.max_file_size,
        }
    }

    #[inline]
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Handle `link` in the background.
    pub fn submit(self: &Arc<Self>, link: String, origin: Origin) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            for report in this.run(link, origin).await {
                tracing::debug!(job = %report.id, status = ?report.status, error = ?report.error, "Job finished");
                let Some(broadcast) = report.broadcast else {
                    continue;
                };
                match broadcast.await {
                    Ok(outcome) => tracing::debug!(job = %report.id, ?outcome, "Broadcast finished"),
                    Err(e) => tracing::error!(job = %report.id, "Broadcast task failed: {e}"),
                }
            }
        })
    }

    /// Resolve `link` and run one job per file of the share, each to a
    /// terminal state.
    pub async fn run(&self, link: String, origin: Origin) -> Vec<JobReport> {
        let job = Job::new(link, origin);
        tracing::info!(job = %job.id, link = %job.link, kind = %origin.kind, chat = origin.chat_id.0, "Processing link");

        let status = self
            .open_status(origin, MsgProcessing { link: &job.link }.into())
            .await;
        let resolved = {
            let _permit = self.admit(status.as_ref()).await;
            self.resolver.resolve(&job.link).await
        };
        let files = match resolved {
            Ok(files) => files,
            Err(error) => return vec![self.failed(job, status.as_ref(), error).await],
        };
        tracing::info!(job = %job.id, files = files.len(), "Link resolved");

        // the first file keeps the link's job and status message
        let link = job.link.clone();
        let mut lead = Some((job, status));
        let mut jobs = Vec::with_capacity(files.len());
        for file in files {
            let (job, status) = match lead.take() {
                Some(lead) => lead,
                None => {
                    let status = self
                        .open_status(origin, MsgProcessing { link: &file.filename }.into())
                        .await;
                    (Job::new(link.clone(), origin), status)
                }
            };
            jobs.push(self.run_file(job, file, status));
        }
        join_all(jobs).await
    }

    async fn run_file(
        &self,
        mut job: Job,
        file: RemoteFile,
        status: Option<StatusMessage>,
    ) -> JobReport {
        let file = job.resolved(file).clone();
        let permit = self.admit(status.as_ref()).await;
        tracing::debug!(job = %job.id, file = %file.filename, in_flight = self.gate.in_flight(), "Job admitted");

        let result = self.drive(&mut job, &file, status.as_ref()).await;
        match result {
            Ok(video) => {
                job.advance(JobStatus::Done);
                tracing::info!(job = %job.id, file = %video.filename, size = video.size, "Job done");
                if let Some(status) = status.as_ref() {
                    status.close().await;
                }
                drop(permit);
                JobReport {
                    id: job.id,
                    status: job.status(),
                    error: None,
                    broadcast: self.broadcaster.spawn(video, job.origin.kind),
                }
            }
            Err(error) => {
                let report = self.failed(job, status.as_ref(), error).await;
                drop(permit);
                report
            }
        }
    }

    async fn failed(&self, mut job: Job, status: Option<&StatusMessage>, error: JobError) -> JobReport {
        job.fail();
        tracing::error!(job = %job.id, link = %job.link, "Job failed: {error}");
        self.report_failure(&job, status, &error).await;
        JobReport {
            id: job.id,
            status: job.status(),
            error: Some(error),
            broadcast: None,
        }
    }

    async fn admit(&self, status: Option<&StatusMessage>) -> GatePermit {
        if let Some(permit) = self.gate.try_acquire() {
            return permit;
        }
        let ahead = self.gate.waiting();
        tracing::debug!(ahead, "Waiting for an admission slot");
        if let Some(status) = status {
            status.update(MsgQueued { ahead }.into()).await;
        }
        self.gate.acquire().await
    }

    async fn drive(
        &self,
        job: &mut Job,
        file: &RemoteFile,
        status: Option<&StatusMessage>,
    ) -> Result<DownloadedVideo, JobError> {
        // Validating
        job.advance(JobStatus::Validating);
        validate(file, self.max_file_size)?;
        if let Some(status) = status {
            status
                .update(
                    MsgFound {
                        filename: &file.filename,
                        size: file.size,
                    }
                    .into(),
                )
                .await;
        }

        // Downloading
        job.advance(JobStatus::Downloading);
        let temp = tempfile::Builder::new()
            .prefix("teradl-")
            .suffix(&format!(".{}", file.extension().unwrap_or("bin")))
            .tempfile()
            .map_err(|e| JobError::Download(e.to_string()))?
            .into_temp_path();
        let progress = StatusProgress::new(self.surface.clone(), status, file.filename.clone());
        let fetched = self
            .fetcher
            .fetch(file, &temp, self.max_file_size, &progress)
            .await;
        progress.finish();
        let size = fetched?;
        tracing::info!(job = %job.id, file = %file.filename, size, "Download completed");
        let video = DownloadedVideo::new(temp, file.filename.clone(), size);

        // Uploading
        job.advance(JobStatus::Uploading);
        if job.origin.kind != OriginKind::Channel {
            if let Some(status) = status {
                status
                    .update(
                        MsgUploading {
                            filename: &video.filename,
                        }
                        .into(),
                    )
                    .await;
            }
            self.surface
                .send_video(
                    job.origin.chat_id,
                    video.path(),
                    &video.filename,
                    Some(
                        MsgCaption {
                            filename: &video.filename,
                        }
                        .into(),
                    ),
                    Some(job.origin.message_id),
                )
                .await
                .map_err(|e| JobError::Upload(e.to_string()))?;
            tracing::info!(job = %job.id, file = %video.filename, chat = job.origin.chat_id.0, "Sent video");
        }
        Ok(video)
    }

    // Channel posts only get notices when channel broadcasting is on.
    fn notices_enabled(&self, kind: OriginKind) -> bool {
        kind != OriginKind::Channel || self.settings.snapshot().channel_broadcast_enabled
    }

    async fn open_status(&self, origin: Origin, text: String) -> Option<StatusMessage> {
        if !self.notices_enabled(origin.kind) {
            return None;
        }
        match self
            .surface
            .send_text(origin.chat_id, Some(origin.message_id), text)
            .await
        {
            Ok(message_id) => Some(StatusMessage {
                surface: self.surface.clone(),
                chat_id: origin.chat_id,
                message_id,
            }),
            Err(e) => {
                tracing::warn!(chat = origin.chat_id.0, "Failed to send status message: {e}");
                None
            }
        }
    }

    async fn report_failure(&self, job: &Job, status: Option<&StatusMessage>, error: &JobError) {
        if !self.notices_enabled(job.origin.kind) {
            return;
        }
        let text: String = MsgJobFailed {
            link: &job.link,
            error,
        }
        .into();
        if let Some(status) = status {
            if status.try_update(text.clone()).await.is_ok() {
                return;
            }
        }
        if let Err(e) = self
            .surface
            .send_text(job.origin.chat_id, Some(job.origin.message_id), text)
            .await
        {
            tracing::warn!(job = %job.id, "Failed to report job failure: {e}");
        }
    }
}

/// The message a job keeps editing while it runs.
struct StatusMessage {
    surface: Arc<dyn ChatSurface>,
    chat_id: ChatId,
    message_id: MessageId,
}

impl StatusMessage {
    async fn try_update(&self, text: String) -> anyhow::Result<()> {
        self.surface
            .edit_text(self.chat_id, self.message_id, text)
            .await
    }

    async fn update(&self, text: String) {
        if let Err(e) = self.try_update(text).await {
            tracing::warn!(chat = self.chat_id.0, "Failed to edit status message: {e}");
        }
    }

    async fn close(&self) {
        if let Err(e) = self.surface.delete(self.chat_id, self.message_id).await {
            tracing::debug!(chat = self.chat_id.0, "Failed to delete status message: {e}");
        }
    }
}

/// Throttled progress edits. Each edit runs in its own task so the transfer
/// never waits on Telegram, and at most one edit is in flight.
struct StatusProgress {
    target: Option<(Arc<dyn ChatSurface>, ChatId, MessageId)>,
    filename: SmolStr,
    last: Mutex<Instant>,
    inflight: Mutex<Option<JoinHandle<()>>>,
}

impl StatusProgress {
    fn new(surface: Arc<dyn ChatSurface>, status: Option<&StatusMessage>, filename: SmolStr) -> Self {
        Self {
            target: status.map(|s| (surface, s.chat_id, s.message_id)),
            filename,
            last: Mutex::new(Instant::now()),
            inflight: Mutex::new(None),
        }
    }

    fn finish(&self) {
        if let Some(handle) = self.inflight.lock().take() {
            handle.abort();
        }
    }
}

impl ProgressSink for StatusProgress {
    fn report(&self, progress: Progress) {
        let Some((surface, chat_id, message_id)) = &self.target else {
            return;
        };
        {
            let mut last = self.last.lock();
            if last.elapsed() < PROGRESS_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        let mut inflight = self.inflight.lock();
        if inflight.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let text: String = MsgDownloading {
            filename: &self.filename,
            progress,
        }
        .into();
        let (surface, chat_id, message_id) = (surface.clone(), *chat_id, *message_id);
        *inflight = Some(tokio::spawn(async move {
            if let Err(e) = surface.edit_text(chat_id, message_id, text).await {
                tracing::warn!(chat = chat_id.0, "Telegram update error: {e}");
            }
        }));
    }
}
