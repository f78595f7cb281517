//! Presentation state shared between the processor and the display side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backend::Frame;

#[derive(Debug, Default)]
pub struct DisplayState {
    should_display: AtomicBool,
    present_count: AtomicU64,
    frame: Mutex<Option<Frame>>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set by every processed `NewFrame`.
    pub fn should_display(&self) -> bool {
        self.should_display.load(Ordering::Acquire)
    }

    /// Clears the flag and returns its previous value.
    pub fn take_should_display(&self) -> bool {
        self.should_display.swap(false, Ordering::AcqRel)
    }

    pub fn present_count(&self) -> u64 {
        self.present_count.load(Ordering::Acquire)
    }

    /// Records a presented frame. A `None` frame (backend without readback) keeps the previous
    /// one for [`DisplayState::dump_frame`].
    pub fn publish(&self, frame: Option<Frame>) {
        if let Some(frame) = frame {
            *self.frame.lock().unwrap() = Some(frame);
        }
        self.present_count.fetch_add(1, Ordering::AcqRel);
        self.should_display.store(true, Ordering::Release);
    }

    /// The last presented frame, as RGBA8.
    pub fn dump_frame(&self) -> Option<Frame> {
        self.frame.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_sets_the_flag_and_keeps_the_last_frame() {
        let display = DisplayState::new();
        assert!(!display.should_display());
        assert_eq!(display.dump_frame(), None);

        let frame = Frame {
            width: 1,
            height: 1,
            rgba8: vec![1, 2, 3, 4],
        };
        display.publish(Some(frame.clone()));
        assert!(display.take_should_display());
        assert!(!display.should_display());

        display.publish(None);
        assert!(display.should_display());
        assert_eq!(display.dump_frame(), Some(frame));
        assert_eq!(display.present_count(), 2);
    }
}
