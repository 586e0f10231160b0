use std::time::Instant;

use anyhow::Result;

use crate::frame::Frame;
use crate::ingest::{SourceConfig, SourceStats};

/// Synthetic `stub://` source with a slowly shifting gradient.
pub(super) struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub(super) fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        log::info!("source {} connected (synthetic)", self.config.url);
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let width = self.config.width;
        let height = self.config.height;
        let mut pixels = vec![0u8; width as usize * height as usize * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (i as u32 % width) as u64;
            let y = (i as u32 / width) as u64;
            let shift = self.frame_count + self.scene_state as u64 * 17;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = self.scene_state.wrapping_mul(31);
        }
        Frame::rgb(pixels, width, height, Instant::now())
    }

    pub(super) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}
