//! Export of one filter loop to GIF: capture feeding the encoder.

use crate::capture::{CaptureState, FrameCapture};
use crate::encoder::{Disposal, EncodeEvent, EncodeJob, EncoderOptions, GifEncoder};
use crate::input::DEFAULT_OUTPUT_NAME;
use crate::shader::{CompiledProgram, Rasterizer};
use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Encoder tuning for exports.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportSettings {
    /// Quantizer sample interval, 1 (best) to 30 (fastest)
    pub quality: u32,
    /// Number of quantizer threads
    pub workers: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            quality: 10,
            workers: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportStatus {
    Capturing,
    Encoding,
    Finished(Vec<u8>),
    Aborted,
    Failed(String),
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportStatus::Capturing | ExportStatus::Encoding)
    }
}

/// How an export ended, with the file name chosen when it started.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub file_name: String,
    pub status: ExportStatus,
}

/// One export run. Capture is driven one frame per [`ExportJob::step`];
/// encoding then runs on the encoder's threads and is polled.
pub struct ExportJob {
    capture: FrameCapture,
    encoder: Option<GifEncoder>,
    job: Option<EncodeJob>,
    encode_progress: f32,
    status: ExportStatus,
    file_name: String,
}

impl ExportJob {
    pub fn new(program: CompiledProgram, size: (u32, u32), settings: &ExportSettings) -> Result<Self> {
        let options = EncoderOptions {
            quality: settings.quality,
            workers: settings.workers,
            ..EncoderOptions::new(size.0, size.1)
        }
        .with_transparent(program.chroma_key.color());
        let encoder = GifEncoder::new(options)?;
        info!("Export of {} started", program.name);
        Ok(Self {
            capture: FrameCapture::new(program, size),
            encoder: Some(encoder),
            job: None,
            encode_progress: 0.0,
            status: ExportStatus::Capturing,
            file_name: DEFAULT_OUTPUT_NAME.to_string(),
        })
    }

    /// Sets the name the finished GIF is saved under.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn filter(&self) -> &'static str {
        self.capture.program().name
    }

    pub fn status(&self) -> &ExportStatus {
        &self.status
    }

    /// Combined progress: capture covers 0 to 0.5, encoding 0.5 to 1.
    pub fn progress(&self) -> f32 {
        match self.status {
            ExportStatus::Capturing => self.capture.progress() * 0.5,
            ExportStatus::Encoding => 0.5 + self.encode_progress * 0.5,
            ExportStatus::Finished(_) => 1.0,
            ExportStatus::Aborted | ExportStatus::Failed(_) => 0.0,
        }
    }

    /// Captures one frame, or polls the encoder once capture is done.
    pub fn step<R: Rasterizer + ?Sized>(&mut self, rasterizer: &mut R) -> &ExportStatus {
        match self.status {
            ExportStatus::Capturing => self.step_capture(rasterizer),
            ExportStatus::Encoding => self.poll_encoder(),
            _ => {}
        }
        &self.status
    }

    fn step_capture<R: Rasterizer + ?Sized>(&mut self, rasterizer: &mut R) {
        let captured = match self.capture.next_frame(rasterizer) {
            Ok(captured) => captured,
            Err(e) => return self.fail(format!("capture failed: {:#}", e)),
        };
        match captured {
            Some(captured) => {
                let Some(encoder) = self.encoder.as_mut() else {
                    return self.fail("encoder already started".to_string());
                };
                if let Err(e) = encoder.add_frame(captured.frame, captured.delay_ms, Disposal::Background) {
                    self.fail(format!("{:#}", e));
                }
            }
            None if self.capture.state() == CaptureState::Finished => {
                if let Some(encoder) = self.encoder.take() {
                    debug!("Captured {} frames, encoding", encoder.frame_count());
                    self.job = Some(encoder.render());
                    self.status = ExportStatus::Encoding;
                }
            }
            None => self.abort(),
        }
    }

    fn poll_encoder(&mut self) {
        let Some(job) = self.job.as_mut() else {
            return self.fail("encoder is not running".to_string());
        };
        while let Some(event) = job.poll() {
            match event {
                EncodeEvent::Progress(p) => self.encode_progress = p,
                EncodeEvent::Finished(bytes) => {
                    info!("Export of {} finished ({} bytes)", self.filter(), bytes.len());
                    self.status = ExportStatus::Finished(bytes);
                    self.job = None;
                    return;
                }
                EncodeEvent::Aborted => {
                    self.status = ExportStatus::Aborted;
                    self.job = None;
                    return;
                }
                EncodeEvent::Failed(reason) => return self.fail(reason),
            }
        }
    }

    fn fail(&mut self, reason: String) {
        warn!("Export of {} failed: {}", self.filter(), reason);
        self.release();
        self.status = ExportStatus::Failed(reason);
    }

    fn release(&mut self) {
        self.capture.abort();
        self.encoder = None;
        if let Some(mut job) = self.job.take() {
            job.abort();
        }
    }

    /// Stops capture and encoding. No-op once the job has ended.
    pub fn abort(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        info!("Export of {} aborted", self.filter());
        self.release();
        self.status = ExportStatus::Aborted;
    }

    /// Drives the job to its end, blocking on the encoder.
    pub fn run_to_end<R: Rasterizer + ?Sized>(mut self, rasterizer: &mut R) -> ExportStatus {
        while self.status == ExportStatus::Capturing {
            self.step(rasterizer);
        }
        if self.status == ExportStatus::Encoding {
            match self.job.take().map(EncodeJob::wait) {
                Some(EncodeEvent::Finished(bytes)) => self.status = ExportStatus::Finished(bytes),
                Some(EncodeEvent::Failed(reason)) => self.fail(reason),
                _ => self.status = ExportStatus::Aborted,
            }
        }
        self.status
    }
}

/// Holds the single export of a canvas. Starting a new export aborts the
/// running one.
#[derive(Default)]
pub struct Exporter {
    active: Option<ExportJob>,
}

impl Exporter {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn start(&mut self, job: ExportJob) {
        self.abort();
        self.active = Some(job);
    }

    pub fn active(&self) -> Option<&ExportJob> {
        self.active.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Steps the active job. Returns its outcome once, when it ends.
    pub fn step<R: Rasterizer + ?Sized>(&mut self, rasterizer: &mut R) -> Option<ExportOutcome> {
        let job = self.active.as_mut()?;
        if !job.step(rasterizer).is_terminal() {
            return None;
        }
        self.active.take().map(|job| ExportOutcome {
            file_name: job.file_name,
            status: job.status,
        })
    }

    pub fn abort(&mut self) {
        if let Some(mut job) = self.active.take() {
            job.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use crate::shader::testing::MockRasterizer;
    use crate::shader::{load_program, AttributeBindings};

    fn job_for(name: &str, rasterizer: &mut MockRasterizer) -> ExportJob {
        let program = load_program(rasterizer, filters::lookup(name).unwrap(), &AttributeBindings::mesh()).unwrap();
        ExportJob::new(program, rasterizer.size(), &ExportSettings::default()).unwrap()
    }

    #[test]
    fn test_file_name_defaults_to_result() {
        let mut rasterizer = MockRasterizer::new(2, 2);
        let job = job_for("Hop", &mut rasterizer);
        assert_eq!(job.file_name(), "result.gif");
        assert_eq!(job.with_file_name("pog.gif").file_name(), "pog.gif");
    }

    #[test]
    fn test_export_runs_to_a_gif() {
        let mut rasterizer = MockRasterizer::new(4, 4);
        let job = job_for("Go", &mut rasterizer);
        let ExportStatus::Finished(bytes) = job.run_to_end(&mut rasterizer) else {
            panic!("export did not finish");
        };
        assert!(bytes.starts_with(b"GIF89a"));
        assert_eq!(rasterizer.read_count(), 9);
    }

    #[test]
    fn test_progress_is_split_between_capture_and_encoding() {
        let mut rasterizer = MockRasterizer::new(2, 2);
        let mut job = job_for("Go", &mut rasterizer);
        assert_eq!(job.progress(), 0.0);

        let mut last = 0.0;
        while *job.status() == ExportStatus::Capturing {
            job.step(&mut rasterizer);
            let progress = job.progress();
            assert!(progress >= last);
            if *job.status() == ExportStatus::Capturing {
                assert!(progress <= 0.5);
            }
            last = progress;
        }
        assert_eq!(*job.status(), ExportStatus::Encoding);
        assert!(job.progress() >= 0.5);

        while !job.status().is_terminal() {
            job.step(&mut rasterizer);
            std::thread::yield_now();
        }
        assert!(matches!(job.status(), ExportStatus::Finished(_)));
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn test_abort_mid_capture() {
        let mut rasterizer = MockRasterizer::new(2, 2);
        let mut job = job_for("Hop", &mut rasterizer);
        for _ in 0..3 {
            job.step(&mut rasterizer);
        }
        job.abort();
        job.abort();
        assert_eq!(*job.status(), ExportStatus::Aborted);
        job.step(&mut rasterizer);
        assert_eq!(rasterizer.read_count(), 3);
    }

    #[test]
    fn test_capture_failure_fails_export() {
        let mut rasterizer = MockRasterizer::new(2, 2);
        let mut job = job_for("Hop", &mut rasterizer);
        job.step(&mut rasterizer);
        rasterizer.fail_draws(true);
        assert!(matches!(job.step(&mut rasterizer), ExportStatus::Failed(_)));
        assert_eq!(job.progress(), 0.0);
    }

    #[test]
    fn test_exporter_keeps_one_job() {
        let mut rasterizer = MockRasterizer::new(2, 2);
        let mut exporter = Exporter::new();
        exporter.start(job_for("Hop", &mut rasterizer));
        exporter.step(&mut rasterizer);

        exporter.start(job_for("Go", &mut rasterizer).with_file_name("go.gif"));
        assert_eq!(exporter.active().map(|job| job.filter()), Some("Go"));

        let outcome = loop {
            if let Some(outcome) = exporter.step(&mut rasterizer) {
                break outcome;
            }
            std::thread::yield_now();
        };
        assert!(matches!(outcome.status, ExportStatus::Finished(_)));
        assert_eq!(outcome.file_name, "go.gif");
        assert!(!exporter.is_running());
        // One Hop frame plus every Go frame.
        assert_eq!(rasterizer.read_count(), 1 + 9);
    }
}
