//! Deterministic frame capture of one filter loop.
//!
//! A capture sweeps `time` from 0 to the loop duration in fixed `1/30` s
//! steps, drawing and reading back one frame per step. Frames are produced
//! lazily so the caller can interleave capture with UI work.

use crate::clock::{capture_step, CAPTURE_FPS};
use crate::frame::Frame;
use crate::shader::{CompiledProgram, Rasterizer};
use anyhow::{anyhow, Result};
use tracing::{debug, info};

/// A captured frame and how long it is shown in the animation.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: Frame,
    pub delay_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Running,
    Finished,
    Aborted,
}

/// Number of frames needed to cover `duration` seconds at `fps`, including
/// both endpoints. Products within 1e-9 of an integer count as that integer.
pub fn frame_count(duration: f64, fps: u32) -> usize {
    let steps = duration * fps as f64;
    let rounded = steps.round();
    let steps = if (steps - rounded).abs() < 1e-9 { rounded } else { steps.ceil() };
    steps as usize + 1
}

/// One-shot capture of a compiled program. Not restartable: once finished or
/// aborted it yields nothing.
#[derive(Debug)]
pub struct FrameCapture {
    program: CompiledProgram,
    size: (u32, u32),
    step: f64,
    total: usize,
    next_index: usize,
    state: CaptureState,
}

impl FrameCapture {
    pub fn new(program: CompiledProgram, size: (u32, u32)) -> Self {
        let total = frame_count(program.loop_duration.as_secs(), CAPTURE_FPS);
        info!(
            "Capturing {} frames of {} ({} loop)",
            total, program.name, program.loop_duration
        );
        Self {
            program,
            size,
            step: capture_step(),
            total,
            next_index: 0,
            state: CaptureState::Running,
        }
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Total number of frames this capture produces if it runs to the end.
    pub fn total_frames(&self) -> usize {
        self.total
    }

    pub fn frames_produced(&self) -> usize {
        self.next_index
    }

    /// Delay of every frame in milliseconds.
    pub fn delay_ms(&self) -> f64 {
        self.step * 1000.0
    }

    /// Time of the next frame, `t / duration` once it has been produced.
    pub fn progress(&self) -> f32 {
        if self.state == CaptureState::Finished {
            return 1.0;
        }
        let t = self.next_index as f64 * self.step;
        (t / self.program.loop_duration.as_secs()).clamp(0.0, 1.0) as f32
    }

    /// Stops the capture. Calling it again, or after the capture finished,
    /// changes nothing.
    pub fn abort(&mut self) {
        if self.state == CaptureState::Running {
            debug!("Capture of {} aborted at frame {}", self.program.name, self.next_index);
            self.state = CaptureState::Aborted;
        }
    }

    /// Renders and reads back the next frame, normalized to top-down rows.
    /// Returns `Ok(None)` once finished or aborted. A rasterizer error
    /// aborts the capture.
    pub fn next_frame<R: Rasterizer + ?Sized>(&mut self, rasterizer: &mut R) -> Result<Option<CapturedFrame>> {
        if self.state != CaptureState::Running {
            return Ok(None);
        }
        if self.next_index >= self.total {
            self.state = CaptureState::Finished;
            return Ok(None);
        }
        match self.render(rasterizer) {
            Ok(frame) => {
                self.next_index += 1;
                if self.next_index == self.total {
                    self.state = CaptureState::Finished;
                    info!("Captured {} frames of {}", self.total, self.program.name);
                }
                Ok(Some(CapturedFrame {
                    frame,
                    delay_ms: self.delay_ms(),
                }))
            }
            Err(e) => {
                self.state = CaptureState::Aborted;
                Err(e)
            }
        }
    }

    fn render<R: Rasterizer + ?Sized>(&self, rasterizer: &mut R) -> Result<Frame> {
        if rasterizer.size() != self.size {
            return Err(anyhow!(
                "rasterizer is {:?}, capture expects {:?}",
                rasterizer.size(),
                self.size
            ));
        }
        let t = self.next_index as f64 * self.step;
        self.program.draw_at(rasterizer, t)?;
        Ok(rasterizer.read_pixels()?.into_top_down())
    }

    /// Iterates the remaining frames. The iterator ends after the first error.
    pub fn iter<'a, R: Rasterizer + ?Sized>(&'a mut self, rasterizer: &'a mut R) -> CaptureIter<'a, R> {
        CaptureIter {
            capture: self,
            rasterizer,
        }
    }
}

pub struct CaptureIter<'a, R: Rasterizer + ?Sized> {
    capture: &'a mut FrameCapture,
    rasterizer: &'a mut R,
}

impl<R: Rasterizer + ?Sized> Iterator for CaptureIter<'_, R> {
    type Item = Result<CapturedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.capture.next_frame(&mut *self.rasterizer).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use crate::frame::RowOrder;
    use crate::shader::testing::MockRasterizer;
    use crate::shader::{load_program, AttributeBindings};

    fn capture_of(name: &str, rasterizer: &mut MockRasterizer) -> FrameCapture {
        let program = load_program(rasterizer, filters::lookup(name).unwrap(), &AttributeBindings::mesh()).unwrap();
        FrameCapture::new(program, rasterizer.size())
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(1.7, 30), 52);
        assert_eq!(frame_count(0.85, 30), 27);
        assert_eq!(frame_count(1.0, 30), 31);
        assert_eq!(frame_count(0.25, 30), 9);
        assert_eq!(frame_count(std::f64::consts::PI / 5.0, 30), 20);
    }

    #[test]
    fn test_capture_produces_expected_frames() {
        let mut rasterizer = MockRasterizer::new(4, 3);
        let mut capture = capture_of("Hop", &mut rasterizer);
        assert_eq!(capture.total_frames(), 52);

        let frames: Vec<_> = capture.iter(&mut rasterizer).collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 52);
        for captured in &frames {
            assert!((captured.delay_ms - 1000.0 / 30.0).abs() < 1e-9);
            assert_eq!(captured.frame.rows, RowOrder::TopDown);
        }
        assert_eq!(capture.state(), CaptureState::Finished);
        assert_eq!(capture.progress(), 1.0);
        assert!(capture.next_frame(&mut rasterizer).unwrap().is_none());
        assert_eq!(rasterizer.read_count(), 52);
    }

    #[test]
    fn test_frames_are_flipped_to_top_down() {
        let mut rasterizer = MockRasterizer::new(2, 3);
        let mut capture = capture_of("Bounce", &mut rasterizer);
        let first = capture.next_frame(&mut rasterizer).unwrap().unwrap();
        // The mock writes its buffer row index into red; the last buffer row
        // is the top of the image.
        assert_eq!(first.frame.data[0], 2);
        assert_eq!(first.frame.data[first.frame.data.len() - 4], 0);
    }

    #[test]
    fn test_frames_sweep_time_from_zero() {
        let mut rasterizer = MockRasterizer::new(1, 1);
        let mut capture = capture_of("Go", &mut rasterizer);
        let times: Vec<_> = capture
            .iter(&mut rasterizer)
            .map(|f| f.unwrap().frame.data[1])
            .collect();
        // time * 100, rounded, for t = i / 30 and 9 frames.
        assert_eq!(times, vec![0, 3, 7, 10, 13, 17, 20, 23, 27]);
        assert_eq!(rasterizer.last_clear(), Some([0.0, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_abort_stops_production_and_is_idempotent() {
        let mut rasterizer = MockRasterizer::new(4, 4);
        let mut capture = capture_of("Hop", &mut rasterizer);
        for _ in 0..5 {
            capture.next_frame(&mut rasterizer).unwrap().unwrap();
        }
        let progress = capture.progress();
        assert!(progress > 0.0 && progress < 1.0);

        capture.abort();
        capture.abort();
        assert_eq!(capture.state(), CaptureState::Aborted);
        assert!(capture.next_frame(&mut rasterizer).unwrap().is_none());
        assert_eq!(capture.iter(&mut rasterizer).count(), 0);
        assert_eq!(rasterizer.read_count(), 5);
        assert_eq!(capture.frames_produced(), 5);
    }

    #[test]
    fn test_abort_after_finish_is_noop() {
        let mut rasterizer = MockRasterizer::new(1, 1);
        let mut capture = capture_of("Go", &mut rasterizer);
        assert_eq!(capture.iter(&mut rasterizer).count(), 9);
        capture.abort();
        assert_eq!(capture.state(), CaptureState::Finished);
    }

    #[test]
    fn test_rasterizer_error_aborts_capture() {
        let mut rasterizer = MockRasterizer::new(2, 2);
        let mut capture = capture_of("Hop", &mut rasterizer);
        capture.next_frame(&mut rasterizer).unwrap();
        rasterizer.fail_draws(true);
        assert!(capture.next_frame(&mut rasterizer).is_err());
        assert_eq!(capture.state(), CaptureState::Aborted);
        rasterizer.fail_draws(false);
        assert!(capture.next_frame(&mut rasterizer).unwrap().is_none());
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let mut rasterizer = MockRasterizer::new(2, 2);
        let program = load_program(&mut rasterizer, filters::lookup("Hop").unwrap(), &AttributeBindings::mesh()).unwrap();
        let mut capture = FrameCapture::new(program, (8, 8));
        assert!(capture.next_frame(&mut rasterizer).is_err());
    }
}
