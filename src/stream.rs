use std::io::Write;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

use crate::pipeline::{FrameReport, FrameSink, FrameSource};

/// Index-only frames, for replaying a detection log without video.
#[derive(Debug, Clone)]
pub struct BlankFrames {
    next: u64,
    total: Option<u64>,
}

impl BlankFrames {
    pub fn new(total: u64) -> Self {
        Self {
            next: 0,
            total: Some(total),
        }
    }

    /// Never runs dry; stop it with a frame limit or cancellation.
    pub fn unbounded() -> Self {
        Self {
            next: 0,
            total: None,
        }
    }
}

impl FrameSource for BlankFrames {
    type Frame = u64;

    fn next_frame(&mut self) -> Result<Option<u64>> {
        if self.total.is_some_and(|total| self.next >= total) {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(index))
    }
}

/// Reads frames from another source on a dedicated thread.
///
/// Frames arrive in source order through a bounded channel, so the reader
/// blocks once `capacity` frames are waiting. A read error is delivered in
/// order and ends the stream.
///
/// Dropping before the stream ends detaches the reader instead of joining
/// it: a reader stuck inside the wrapped source's `next_frame` (a stalled
/// camera, say) cannot be interrupted and exits on its own once that call
/// returns and its next send fails.
pub struct ThreadedSource<F> {
    receiver: Option<Receiver<Result<F>>>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl<F: Send + 'static> ThreadedSource<F> {
    pub fn spawn<S>(mut source: S, capacity: usize) -> Result<Self>
    where
        S: FrameSource<Frame = F> + Send + 'static,
    {
        let (tx, rx) = bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("frame-reader".into())
            .spawn(move || {
                let mut read = 0u64;
                loop {
                    match source.next_frame() {
                        Ok(Some(frame)) => {
                            if tx.send(Ok(frame)).is_err() {
                                debug!("frame consumer went away after {} frames", read);
                                break;
                            }
                            read += 1;
                        }
                        Ok(None) => break,
                        Err(err) => {
                            let _ = tx.send(Err(err));
                            break;
                        }
                    }
                }
                debug!("frame reader done after {} frames", read);
            })
            .context("failed to spawn frame reader thread")?;

        Ok(Self {
            receiver: Some(rx),
            handle: Some(handle),
            finished: false,
        })
    }
}

impl<F> FrameSource for ThreadedSource<F> {
    type Frame = F;

    fn next_frame(&mut self) -> Result<Option<F>> {
        if self.finished {
            return Ok(None);
        }
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| anyhow!("frame reader already shut down"))?;
        match receiver.recv() {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(err)) => {
                self.finished = true;
                Err(err)
            }
            // Sender dropped: the reader hit the end of the stream
            Err(_) => {
                self.finished = true;
                Ok(None)
            }
        }
    }
}

impl<F> Drop for ThreadedSource<F> {
    fn drop(&mut self) {
        // Unblock a reader waiting on a full channel
        self.receiver.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.finished || handle.is_finished() {
            if handle.join().is_err() {
                warn!("frame reader thread panicked");
            }
        } else {
            debug!("detaching frame reader before end of stream");
        }
    }
}

/// Writes one JSON object per processed frame.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    /// Skip frames with no tracks and no crossings
    skip_empty: bool,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            skip_empty: false,
        }
    }

    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<F, W: Write> FrameSink<F> for JsonLinesSink<W> {
    fn write_frame(&mut self, _frame: &F, report: &FrameReport) -> Result<()> {
        if self.skip_empty && report.tracks.is_empty() && report.crossings.is_empty() {
            return Ok(());
        }
        serde_json::to_writer(&mut self.writer, report)
            .with_context(|| format!("failed to serialize report for frame {}", report.frame))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush report output")
    }
}
