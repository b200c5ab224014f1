//! The live session loop.
//!
//! Pulls frames from the camera, runs detection and encoding, resolves
//! each face against the roster, records first sightings in the ledger,
//! annotates the frame, and forwards it to the preview and the video
//! recording. Owns the run/stop lifecycle: every termination path funnels
//! through the same teardown.

use crate::ledger::AttendanceLedger;
use chrono::Local;
use rollcall_core::{Descriptor, FaceEngine, Matcher, NearestMatcher, Region, Roster};
use rollcall_hw::annotate;
use rollcall_hw::avi::{AviError, MjpegAviWriter};
use rollcall_hw::camera::{CameraError, CameraStream};
use rollcall_hw::{Frame, JpegPreview};
use std::io::{Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const UNKNOWN_LABEL: &str = "unknown";
const PROGRESS_EVERY_FRAMES: u64 = 100;
/// Gap between a face box and its label, in pixels.
const LABEL_MARGIN: i32 = 4;

/// Blocking frame producer. `Ok(None)` signals a clean end of stream.
pub trait FrameSource {
    type Error: std::fmt::Display;
    fn read(&mut self) -> Result<Option<Frame>, Self::Error>;
}

impl FrameSource for CameraStream<'_> {
    type Error = CameraError;

    fn read(&mut self) -> Result<Option<Frame>, Self::Error> {
        // A live camera has no end of stream; any failure is a read error.
        self.next_frame().map(Some)
    }
}

/// Recording sink. Every frame of the session goes through `write`; a
/// failure here is fatal to the session. `finish` is called exactly once
/// from teardown on every exit path.
pub trait VideoSink {
    type Error: std::fmt::Display;
    fn write(&mut self, frame: &Frame) -> Result<(), Self::Error>;
    fn finish(&mut self) -> Result<(), Self::Error>;
}

impl<W: Write + Seek> VideoSink for MjpegAviWriter<W> {
    type Error = AviError;

    fn write(&mut self, frame: &Frame) -> Result<(), Self::Error> {
        self.write_frame(&frame.data, frame.width, frame.height)
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        self.finalize()
    }
}

/// Live display. Fire-and-forget: implementations must never fail the
/// session.
pub trait DisplaySink {
    fn show(&mut self, frame: &Frame);
}

impl DisplaySink for JpegPreview {
    fn show(&mut self, frame: &Frame) {
        JpegPreview::show(self, frame);
    }
}

/// Display sink that drops every frame.
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _frame: &Frame) {}
}

impl DisplaySink for Box<dyn DisplaySink + Send> {
    fn show(&mut self, frame: &Frame) {
        (**self).show(frame);
    }
}

/// Why the session loop stopped. All variants share the same teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The source reported a clean end of stream.
    EndOfStream,
    /// The source failed to produce a frame.
    SourceFailure,
    /// The video sink rejected a frame.
    SinkFailure,
    /// The user requested a stop.
    Cancelled,
}

/// Summary returned after teardown.
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub end: SessionEnd,
    pub frames: u64,
    pub faces: u64,
    /// Identities marked present, in first-detection order.
    pub marked: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Maximum descriptor distance for a positive match.
    pub threshold: f32,
    /// Integer downscale factor applied before detection/encoding.
    pub downscale: u32,
}

pub struct Session<S, E, V, D, L>
where
    S: FrameSource,
    E: FaceEngine,
    V: VideoSink,
    D: DisplaySink,
    L: Write,
{
    id: Uuid,
    source: S,
    engine: E,
    roster: Roster,
    matcher: NearestMatcher,
    ledger: AttendanceLedger<L>,
    video: V,
    display: D,
    stop: Arc<AtomicBool>,
    opts: SessionOptions,
}

impl<S, E, V, D, L> Session<S, E, V, D, L>
where
    S: FrameSource,
    E: FaceEngine,
    V: VideoSink,
    D: DisplaySink,
    L: Write,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        engine: E,
        roster: Roster,
        ledger: AttendanceLedger<L>,
        video: V,
        display: D,
        stop: Arc<AtomicBool>,
        opts: SessionOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            engine,
            roster,
            matcher: NearestMatcher,
            ledger,
            video,
            display,
            stop,
            opts,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the loop until end of stream, a stream/sink failure, or a user
    /// stop, then tear down the sinks. Never panics out of a live session.
    pub fn run(&mut self) -> SessionReport {
        tracing::info!(session = %self.id, enrolled = self.roster.len(), "session started");

        let mut frames: u64 = 0;
        let mut faces: u64 = 0;

        let end = loop {
            let mut frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("end of stream");
                    break SessionEnd::EndOfStream;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to read frame");
                    break SessionEnd::SourceFailure;
                }
            };
            frames += 1;

            // A momentary detector/encoder failure must not end an
            // otherwise-valid recording: skip the analysis, keep the frame.
            match self.detect_and_encode(&frame) {
                Ok(detections) => {
                    faces += detections.len() as u64;
                    for (region, descriptor) in &detections {
                        self.process_face(&mut frame, region, descriptor);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, sequence = frame.sequence, "face analysis failed, skipping frame");
                }
            }

            self.display.show(&frame);
            if let Err(err) = self.video.write(&frame) {
                tracing::error!(error = %err, "video write failed");
                break SessionEnd::SinkFailure;
            }

            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("stop requested");
                break SessionEnd::Cancelled;
            }

            if frames % PROGRESS_EVERY_FRAMES == 0 {
                tracing::info!(
                    frames,
                    faces,
                    marked = self.ledger.records(),
                    "session progress"
                );
            }
        };

        // Single teardown path for every exit cause.
        if let Err(err) = self.video.finish() {
            tracing::warn!(error = %err, "video finalize failed");
        }
        if let Err(err) = self.ledger.flush() {
            tracing::warn!(error = %err, "ledger flush failed");
        }

        let report = SessionReport {
            id: self.id,
            end,
            frames,
            faces,
            marked: self.ledger.marked_names().to_vec(),
        };
        tracing::info!(
            session = %report.id,
            end = ?report.end,
            frames = report.frames,
            marked = report.marked.len(),
            "session ended"
        );
        report
    }

    /// Detect and encode on the (optionally downscaled) frame, returning
    /// regions mapped back to full-frame coordinates, paired with their
    /// descriptors.
    fn detect_and_encode(
        &mut self,
        frame: &Frame,
    ) -> Result<Vec<(Region, Descriptor)>, rollcall_core::EngineError> {
        let factor = self.opts.downscale.max(1);
        let small;
        let work = if factor > 1 {
            small = frame.downscale(factor);
            &small
        } else {
            frame
        };

        let regions = self.engine.detect(&work.data, work.width, work.height)?;
        let descriptors = self
            .engine
            .encode(&work.data, work.width, work.height, &regions)?;

        Ok(regions
            .into_iter()
            .zip(descriptors)
            .map(|(region, descriptor)| (region.scaled(factor as f32), descriptor))
            .collect())
    }

    /// Match one face, record a first sighting, and annotate the frame.
    fn process_face(&mut self, frame: &mut Frame, region: &Region, descriptor: &Descriptor) {
        let verdict = self
            .matcher
            .compare(descriptor, &self.roster, self.opts.threshold);

        if let Some(name) = verdict.name.as_deref() {
            match self.ledger.record_if_new(name, Local::now()) {
                Ok(true) => {
                    tracing::info!(name, distance = verdict.distance, "marked attendance");
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(name, error = %err, "attendance append failed, will retry on next sighting");
                }
            }
        }

        let label = verdict.name.as_deref().unwrap_or(UNKNOWN_LABEL);
        let x = region.x.round() as i32;
        let y = region.y.round() as i32;
        annotate::draw_box(
            frame,
            x,
            y,
            region.width.round() as i32,
            region.height.round() as i32,
        );
        annotate::draw_label(
            frame,
            x,
            (y - annotate::label_height() - LABEL_MARGIN).max(0),
            label,
        );
    }
}
