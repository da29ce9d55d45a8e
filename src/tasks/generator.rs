use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::codec::{self, EncodedImage};
use crate::config::{DEFAULT_MOTION, ProviderConfig};
use crate::error::{Error, Result};
use crate::frames::GeneratedFrame;
use crate::provider::{Credential, ImageProvider, InlineImage, ProviderRequest};

/// Upper bound (exclusive) of the per-request consistency seed.
pub const SEED_RANGE: u32 = 1_000_000;

/// Turns one source image and a motion prompt into an ordered frame sequence.
///
/// Frames are requested strictly one after another: frame `i + 1` is only
/// issued once frame `i` has resolved, all frames share one seed, and the
/// first failure aborts the whole request.
pub struct FrameGenerator {
    provider: Arc<dyn ImageProvider>,
    model: String,
    temperature: f32,
}

impl FrameGenerator {
    pub fn new(provider: Arc<dyn ImageProvider>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }

    pub fn from_config(provider: Arc<dyn ImageProvider>, cfg: &ProviderConfig) -> Self {
        Self::new(provider, cfg.model.clone(), cfg.temperature)
    }

    pub async fn generate(
        &self,
        credential: &Credential,
        source: &EncodedImage,
        prompt: &str,
        frame_count: usize,
    ) -> Result<Vec<GeneratedFrame>> {
        if credential.is_empty() {
            return Err(Error::missing_credential());
        }
        if frame_count == 0 {
            return Err(Error::Configuration(
                "frame count must be at least 1".to_string(),
            ));
        }
        let decoded = codec::decode(source)?;
        let prompt = match prompt.trim() {
            "" => DEFAULT_MOTION,
            p => p,
        };
        let seed = rand::rng().random_range(0..SEED_RANGE);
        info!(frame_count, seed, mime = %decoded.mime_type, "generating animation frames");

        let inline = InlineImage {
            mime_type: decoded.mime_type,
            data: decoded.bytes,
        };
        let mut frames = Vec::new();
        for index in 0..frame_count {
            let request = ProviderRequest {
                model: self.model.clone(),
                source: inline.clone(),
                instruction: frame_instruction(index, frame_count, prompt),
                seed,
                temperature: self.temperature,
            };
            let frame = self
                .generate_one(credential, index, &request)
                .await
                .inspect_err(|err| warn!(index, error = %err, "frame generation failed; aborting request"))?;
            debug!(index, id = %frame.id, "frame generated");
            frames.push(frame);
        }
        Ok(frames)
    }

    async fn generate_one(
        &self,
        credential: &Credential,
        index: usize,
        request: &ProviderRequest,
    ) -> Result<GeneratedFrame> {
        let response = self
            .provider
            .generate_image(credential, request)
            .await
            .map_err(|source| Error::ProviderTransport { index, source })?;
        let (mime_type, data) = response
            .first_image()
            .ok_or(Error::NoImageReturned { index })?;
        Ok(GeneratedFrame::new(
            index,
            EncodedImage::from_base64(data, mime_type),
        ))
    }
}

/// Per-frame instruction carrying the identity, background, scale and style rules.
pub fn frame_instruction(index: usize, frame_count: usize, prompt: &str) -> String {
    format!(
        "You animate sprite sheets and follow instructions exactly.\n\
         \n\
         TASK: Draw frame {frame} of a {frame_count}-frame animation of the character in the attached image.\n\
         MOTION: {prompt}.\n\
         \n\
         RULES FOR EVERY FRAME:\n\
         1. IDENTITY: the character must match the source image exactly. Same eyes, ears, colors and \
         proportions. Never redesign it.\n\
         2. BACKGROUND: solid pure white (#FFFFFF) only. No transparency, patterns or shadows.\n\
         3. SCALE: the character keeps exactly the size it has in the source. No zooming in or out.\n\
         4. STYLE: keep the flat 2D look of the source. No 3D shading and no realistic lighting.\n\
         \n\
         Output only the character on the white background.",
        frame = index + 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_names_position_and_motion() {
        let text = frame_instruction(2, 6, "waves hello");
        assert!(text.contains("frame 3 of a 6-frame animation"));
        assert!(text.contains("MOTION: waves hello."));
        assert!(text.contains("#FFFFFF"));
    }
}
