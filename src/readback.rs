use log::debug;
use rayon::prelude::*;

use crate::error::{RenderError, RenderResult};
use crate::target::{OutputTarget, RowLayout};
use crate::wgpu_ctx::WgpuContext;
use crate::wgpu_utils::wait_idle;

/// Row-major float image, `channels` floats per pixel, first row on top.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<f32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, channels: u32, data: Vec<f32>) -> RenderResult<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(RenderError::readback(format!(
                "{}x{}x{} image needs {expected} floats, got {}",
                width,
                height,
                channels,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let c = self.channels as usize;
        let start = (y as usize * self.width as usize + x as usize) * c;
        &self.data[start..start + c]
    }

    pub fn pixels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.channels as usize)
    }
}

/// Maps the target's readback buffer and copies the image out of it.
///
/// Must only run after the final pass (which records the host-visibility
/// copy) has been submitted and waited on.
pub fn extract_pixels(ctx: &WgpuContext, target: &OutputTarget) -> RenderResult<PixelBuffer> {
    let buffer = target.readback_buffer();
    let slice = buffer.slice(..);

    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    wait_idle(&ctx.device)?;
    rx.recv()
        .map_err(|_| RenderError::readback("map_async channel closed"))?
        .map_err(|e| RenderError::readback(format!("map_async failed: {e}")))?;

    let data = {
        let mapped = slice.get_mapped_range();
        depad_rows(&mapped, target.row_layout(), target.height)
    };
    buffer.unmap();

    debug!("Read back {} floats", data.len());
    PixelBuffer::new(target.width, target.height, target.channels(), data)
}

/// Strips row padding and reinterprets the little-endian bytes as floats.
pub fn depad_rows(bytes: &[u8], layout: RowLayout, height: u32) -> Vec<f32> {
    let padded = layout.padded_bytes_per_row as usize;
    let row_bytes = layout.bytes_per_row as usize;
    let floats_per_row = row_bytes / std::mem::size_of::<f32>();

    let mut out = vec![0.0f32; floats_per_row * height as usize];
    out.par_chunks_mut(floats_per_row)
        .zip(bytes.par_chunks(padded))
        .for_each(|(dst_row, src_row)| {
            for (dst, src) in dst_row
                .iter_mut()
                .zip(src_row[..row_bytes].chunks_exact(4))
            {
                *dst = f32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn tight_rows_pass_through() {
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let layout = RowLayout {
            padded_bytes_per_row: 24,
            bytes_per_row: 24,
        };
        assert_eq!(depad_rows(&to_bytes(&values), layout, 2), values);
    }

    #[test]
    fn padding_is_dropped() {
        // Two rows of one RGBA pixel, each padded to 32 bytes.
        let mut bytes = to_bytes(&[1.0, 2.0, 3.0, 4.0]);
        bytes.extend_from_slice(&[0xAA; 16]);
        bytes.extend(to_bytes(&[5.0, 6.0, 7.0, 8.0]));
        bytes.extend_from_slice(&[0xAA; 16]);

        let layout = RowLayout {
            padded_bytes_per_row: 32,
            bytes_per_row: 16,
        };
        assert_eq!(
            depad_rows(&bytes, layout, 2),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn pixel_lookup_is_row_major() {
        let data: Vec<f32> = (0..2 * 3 * 3).map(|v| v as f32).collect();
        let image = PixelBuffer::new(3, 2, 3, data).unwrap();
        assert_eq!(image.pixel(0, 0), &[0.0, 1.0, 2.0]);
        assert_eq!(image.pixel(2, 1), &[15.0, 16.0, 17.0]);
        assert_eq!(image.pixels().count(), 6);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(PixelBuffer::new(2, 2, 3, vec![0.0; 11]).is_err());
    }
}
