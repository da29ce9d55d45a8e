//! Export a frame sequence as a looping GIF or a ZIP archive of frame images.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, ImageFormat, RgbaImage};
use tracing::info;
use zip::write::SimpleFileOptions;

use crate::codec;
use crate::config::{MAX_FPS, MIN_FPS};
use crate::error::{Error, Result};
use crate::frames::GeneratedFrame;

/// Encode the frames as an endlessly looping GIF played at `fps`.
///
/// Frames whose size differs from the first one are resized to match.
pub fn write_gif(frames: &[GeneratedFrame], fps: u32, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    ensure_frames(frames)?;
    let fps = fps.clamp(MIN_FPS, MAX_FPS);
    let delay = Delay::from_numer_denom_ms(1000, fps);

    // The encoder writes the trailer on drop and swallows errors there, so
    // encode in memory and write the file separately.
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder.set_repeat(Repeat::Infinite).map_err(export_err)?;

        let mut canvas: Option<(u32, u32)> = None;
        for (index, frame) in frames.iter().enumerate() {
            let mut rgba = frame_pixels(index, frame)?;
            match canvas {
                None => canvas = Some(rgba.dimensions()),
                Some((w, h)) if rgba.dimensions() != (w, h) => {
                    rgba = image::imageops::resize(&rgba, w, h, FilterType::Triangle);
                }
                Some(_) => {}
            }
            encoder
                .encode_frame(image::Frame::from_parts(rgba, 0, 0, delay))
                .map_err(export_err)?;
        }
    }
    std::fs::write(path, &buf)?;
    info!(frames = frames.len(), fps, path = %path.display(), "wrote GIF");
    Ok(())
}

/// Store every frame, unmodified, as `frame-NN.<ext>` inside a ZIP archive.
pub fn write_zip(frames: &[GeneratedFrame], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    ensure_frames(frames)?;
    let mut archive = zip::ZipWriter::new(BufWriter::new(File::create(path)?));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for (index, frame) in frames.iter().enumerate() {
        let decoded = codec::decode(&frame.image)?;
        let name = format!("frame-{:02}.{}", index + 1, extension_for(&decoded.mime_type));
        archive.start_file(name, options).map_err(export_err)?;
        archive.write_all(&decoded.bytes)?;
    }
    let mut writer = archive.finish().map_err(export_err)?;
    writer.flush()?;
    info!(frames = frames.len(), path = %path.display(), "wrote frame archive");
    Ok(())
}

fn ensure_frames(frames: &[GeneratedFrame]) -> Result<()> {
    if frames.is_empty() {
        return Err(Error::Export("no frames to export".to_string()));
    }
    Ok(())
}

fn frame_pixels(index: usize, frame: &GeneratedFrame) -> Result<RgbaImage> {
    let decoded = codec::decode(&frame.image)?;
    let img = image::load_from_memory(&decoded.bytes)
        .map_err(|err| Error::Decode(format!("frame {}: {err}", index + 1)))?;
    Ok(img.to_rgba8())
}

fn extension_for(mime_type: &str) -> &'static str {
    ImageFormat::from_mime_type(mime_type)
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

fn export_err(err: impl std::fmt::Display) -> Error {
    Error::Export(err.to_string())
}
