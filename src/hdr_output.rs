use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::Rgb;
use image::codecs::hdr::HdrEncoder;
use log::info;
use rayon::prelude::*;

use crate::error::{RenderError, RenderResult};
use crate::readback::PixelBuffer;

/// Writes `image` as a Radiance HDR file with the scanlines stored
/// bottom-to-top. Alpha, if any, is dropped.
///
/// The file is first written next to `path` and renamed into place, so a
/// failed encode never leaves a truncated image behind.
pub fn save_hdr(image: &PixelBuffer, path: impl AsRef<Path>) -> RenderResult<()> {
    let path = path.as_ref();
    let saving_start = chrono::Local::now();

    if image.channels < 3 {
        return Err(RenderError::Encode(format!(
            "HDR output needs at least 3 channels, got {}",
            image.channels
        )));
    }
    if image.width == 0 || image.height == 0 {
        return Err(RenderError::Encode("cannot encode an empty image".into()));
    }

    let pixels = flipped_rgb(image);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = Path::new(&partial);

    let written = File::create(partial)
        .map_err(RenderError::from)
        .and_then(|file| {
            HdrEncoder::new(BufWriter::new(file))
                .encode(&pixels, image.width as usize, image.height as usize)
                .map_err(RenderError::from)
        });
    if let Err(e) = written {
        let _ = std::fs::remove_file(partial);
        return Err(e);
    }
    std::fs::rename(partial, path)?;

    info!(
        "Saved image: {} ({}ms)",
        path.display(),
        chrono::Local::now().timestamp_millis() - saving_start.timestamp_millis()
    );
    Ok(())
}

/// RGB pixels with the row order reversed.
pub fn flipped_rgb(image: &PixelBuffer) -> Vec<Rgb<f32>> {
    let width = image.width as usize;
    let channels = image.channels as usize;
    let row_floats = width * channels;

    let mut pixels = vec![Rgb([0.0f32; 3]); width * image.height as usize];
    pixels
        .par_chunks_mut(width)
        .zip(image.data.par_chunks(row_floats).rev())
        .for_each(|(dst_row, src_row)| {
            for (dst, src) in dst_row.iter_mut().zip(src_row.chunks_exact(channels)) {
                *dst = Rgb([src[0], src[1], src[2]]);
            }
        });
    pixels
}
