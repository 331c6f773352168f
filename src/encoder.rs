//! Threaded animated GIF encoder.
//!
//! Frames are collected first, then [`GifEncoder::render`] starts a job:
//! worker threads quantize frames in parallel and a writer thread emits them
//! in order. The job reports through an event channel and can be aborted.

use crate::frame::{Frame, Rgb};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// What happens to a frame's area before the next one is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Keep,
    /// Restore to the background, so transparent pixels do not show the
    /// previous frame through.
    Background,
    Previous,
}

impl From<Disposal> for gif::DisposalMethod {
    fn from(disposal: Disposal) -> Self {
        match disposal {
            Disposal::Keep => gif::DisposalMethod::Keep,
            Disposal::Background => gif::DisposalMethod::Background,
            Disposal::Previous => gif::DisposalMethod::Previous,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub width: u32,
    pub height: u32,
    /// Pixels of exactly this color are written transparent.
    pub transparent: Option<Rgb>,
    /// Quantizer sample interval, 1 (best) to 30 (fastest).
    pub quality: u32,
    pub workers: usize,
    pub repeat: gif::Repeat,
}

impl EncoderOptions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            transparent: None,
            quality: 10,
            workers: 5,
            repeat: gif::Repeat::Infinite,
        }
    }

    pub fn with_transparent(mut self, transparent: Option<Rgb>) -> Self {
        self.transparent = transparent;
        self
    }
}

/// Converts a frame delay to the GIF's centisecond units.
pub fn delay_centis(delay_ms: f64) -> u16 {
    (delay_ms / 10.0).round().clamp(0.0, u16::MAX as f64) as u16
}

struct PendingFrame {
    rgba: Vec<u8>,
    delay: u16,
    dispose: gif::DisposalMethod,
}

/// Collects frames for one animation.
pub struct GifEncoder {
    options: EncoderOptions,
    frames: Vec<PendingFrame>,
}

impl GifEncoder {
    pub fn new(options: EncoderOptions) -> Result<Self> {
        if options.width == 0 || options.height == 0 {
            return Err(anyhow!("GIF canvas must not be empty"));
        }
        if options.width > u16::MAX as u32 || options.height > u16::MAX as u32 {
            return Err(anyhow!(
                "GIF canvas {}x{} exceeds the format limit",
                options.width,
                options.height
            ));
        }
        Ok(Self {
            options,
            frames: Vec::new(),
        })
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Queues a frame. Its size must match the canvas.
    pub fn add_frame(&mut self, frame: Frame, delay_ms: f64, disposal: Disposal) -> Result<()> {
        if (frame.width, frame.height) != (self.options.width, self.options.height) {
            return Err(anyhow!(
                "frame is {}x{}, canvas is {}x{}",
                frame.width,
                frame.height,
                self.options.width,
                self.options.height
            ));
        }
        let mut frame = frame.into_top_down();
        if let Some(key) = self.options.transparent {
            frame.apply_chroma_key(key);
        }
        self.frames.push(PendingFrame {
            rgba: frame.data,
            delay: delay_centis(delay_ms),
            dispose: disposal.into(),
        });
        Ok(())
    }

    /// Starts encoding on background threads.
    pub fn render(self) -> EncodeJob {
        EncodeJob::spawn(self.options, self.frames)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeEvent {
    /// Fraction of frames written, 0 to 1.
    Progress(f32),
    /// The complete GIF file.
    Finished(Vec<u8>),
    Aborted,
    Failed(String),
}

impl EncodeEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EncodeEvent::Progress(_))
    }
}

/// A running encode. Dropping it aborts the work.
pub struct EncodeJob {
    events: Receiver<EncodeEvent>,
    abort: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    done: bool,
}

type Quantized = (usize, gif::Frame<'static>);

impl EncodeJob {
    fn spawn(options: EncoderOptions, frames: Vec<PendingFrame>) -> Self {
        let abort = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::channel::<Quantized>();
        let total = frames.len();
        let workers = options.workers.clamp(1, total.max(1));

        info!(
            "Encoding {} frames at {}x{} on {} workers",
            total, options.width, options.height, workers
        );

        let queue = Arc::new(Mutex::new(frames.into_iter().enumerate().collect::<Vec<_>>()));
        // Workers pop from the back, so reverse to start with frame 0.
        if let Ok(mut queue) = queue.lock() {
            queue.reverse();
        }

        let mut threads = Vec::with_capacity(workers + 1);
        for _ in 0..workers {
            let queue = queue.clone();
            let frame_tx = frame_tx.clone();
            let abort = abort.clone();
            let (width, height, speed) = (options.width as u16, options.height as u16, options.quality.clamp(1, 30) as i32);
            threads.push(thread::spawn(move || {
                while !abort.load(Ordering::SeqCst) {
                    let next = match queue.lock() {
                        Ok(mut queue) => queue.pop(),
                        Err(_) => None,
                    };
                    let Some((index, mut pending)) = next else {
                        break;
                    };
                    let mut frame = gif::Frame::from_rgba_speed(width, height, &mut pending.rgba, speed);
                    frame.delay = pending.delay;
                    frame.dispose = pending.dispose;
                    if frame_tx.send((index, frame)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(frame_tx);

        let writer_abort = abort.clone();
        threads.push(thread::spawn(move || {
            let event = match write_frames(&options, total, frame_rx, &event_tx, &writer_abort) {
                Ok(Some(bytes)) => {
                    info!("GIF encoded ({} bytes)", bytes.len());
                    EncodeEvent::Finished(bytes)
                }
                Ok(None) => EncodeEvent::Aborted,
                Err(e) => {
                    error!("GIF encoding failed: {}", e);
                    EncodeEvent::Failed(e.to_string())
                }
            };
            let _ = event_tx.send(event);
        }));

        Self {
            events: event_rx,
            abort,
            threads,
            done: false,
        }
    }

    /// Returns the next pending event without blocking.
    pub fn poll(&mut self) -> Option<EncodeEvent> {
        if self.done {
            return None;
        }
        match self.events.try_recv() {
            Ok(event) => {
                self.done = event.is_terminal();
                if self.done {
                    self.join();
                }
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.done = true;
                self.join();
                Some(EncodeEvent::Failed("encoder threads exited".to_string()))
            }
        }
    }

    /// Blocks until the job ends and returns the terminal event.
    pub fn wait(mut self) -> EncodeEvent {
        loop {
            if self.done {
                return EncodeEvent::Aborted;
            }
            match self.events.recv() {
                Ok(event) if event.is_terminal() => {
                    self.done = true;
                    self.join();
                    return event;
                }
                Ok(_) => {}
                Err(_) => {
                    self.done = true;
                    self.join();
                    return EncodeEvent::Failed("encoder threads exited".to_string());
                }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Stops the workers and waits for them. Idempotent.
    pub fn abort(&mut self) {
        if self.done {
            return;
        }
        debug!("Aborting GIF encode");
        self.abort.store(true, Ordering::SeqCst);
        self.done = true;
        self.join();
    }

    fn join(&mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for EncodeJob {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Writes quantized frames in index order. Returns `None` when aborted.
fn write_frames(
    options: &EncoderOptions,
    total: usize,
    frames: Receiver<Quantized>,
    events: &Sender<EncodeEvent>,
    abort: &AtomicBool,
) -> Result<Option<Vec<u8>>> {
    let mut output = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut output, options.width as u16, options.height as u16, &[])?;
        encoder.set_repeat(options.repeat)?;

        let mut ready = BTreeMap::new();
        let mut written = 0;
        while written < total {
            if abort.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let Ok((index, frame)) = frames.recv() else {
                break;
            };
            ready.insert(index, frame);
            while let Some(frame) = ready.remove(&written) {
                encoder.write_frame(&frame)?;
                written += 1;
                let _ = events.send(EncodeEvent::Progress(written as f32 / total as f32));
            }
        }
        if abort.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if written < total {
            return Err(anyhow!("only {} of {} frames were quantized", written, total));
        }
    }
    Ok(Some(output))
}
