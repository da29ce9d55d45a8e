use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::codec::EncodedImage;

static NEXT_FRAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stable identity of a generated frame, used for deletion and render keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId(String);

impl FrameId {
    /// Mint a fresh id. The process-wide counter keeps ids unique even when
    /// several frames are created within the same millisecond.
    pub fn mint(index: usize) -> Self {
        let seq = NEXT_FRAME_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "frame-{}-{seq}-{index}",
            Utc::now().timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One frame of a generated sequence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFrame {
    pub id: FrameId,
    pub image: EncodedImage,
}

impl GeneratedFrame {
    pub fn new(index: usize, image: EncodedImage) -> Self {
        Self {
            id: FrameId::mint(index),
            image,
        }
    }
}

/// Shared, read-only view of the session's ordered frames.
pub type FrameList = Arc<[GeneratedFrame]>;
