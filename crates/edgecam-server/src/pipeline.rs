//! Per-session frame processing
//!
//! Applies the session's filter mode with the latest thresholds. A frame the
//! filter cannot handle is logged and forwarded unmodified so the stream
//! keeps running.

use edgecam_media::filter;
use edgecam_media::VideoFrame;
use edgecam_protocol::{FilterMode, FilterSettings};
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::watch;

pub struct FramePipeline {
    mode: FilterMode,
    settings: watch::Receiver<FilterSettings>,
    failures: u64,
}

impl FramePipeline {
    pub fn new(mode: FilterMode, settings: watch::Receiver<FilterSettings>) -> Self {
        Self {
            mode,
            settings,
            failures: 0,
        }
    }

    /// Frames that were forwarded unfiltered because processing failed
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn process(&mut self, frame: VideoFrame) -> VideoFrame {
        if self.mode == FilterMode::Passthrough {
            return frame;
        }

        let settings = *self.settings.borrow_and_update();
        let mode = self.mode;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            filter::apply(mode, &frame, &settings)
        }));

        match outcome {
            Ok(Ok(filtered)) => filtered,
            Ok(Err(e)) => {
                self.record_failure(&e.to_string());
                frame
            }
            Err(_) => {
                self.record_failure("filter panicked");
                frame
            }
        }
    }

    fn record_failure(&mut self, reason: &str) {
        self.failures += 1;
        // Full detail for the first failure, then a periodic reminder
        if self.failures == 1 || self.failures % 300 == 0 {
            tracing::error!(
                "Edge filter failed ({} so far), sending frame unfiltered: {}",
                self.failures,
                reason
            );
        }
    }
}
