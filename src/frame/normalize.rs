use anyhow::{anyhow, Result};

/// Pixel layouts the capture collaborator may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb24,
    Bgr24,
    Bgra32,
    Nv12,
}

impl PixelLayout {
    /// Expected buffer length for a `width` x `height` frame.
    pub fn byte_len(self, width: u32, height: u32) -> Result<usize> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self {
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => pixels.checked_mul(3),
            PixelLayout::Bgra32 => pixels.checked_mul(4),
            PixelLayout::Nv12 => pixels.checked_add(pixels / 2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
) -> Result<Vec<u8>> {
    let expected = layout.byte_len(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            layout,
            expected,
            pixels.len()
        ));
    }
    match layout {
        PixelLayout::Rgb24 => Ok(pixels.to_vec()),
        PixelLayout::Bgr24 => Ok(pixels
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect()),
        PixelLayout::Bgra32 => Ok(pixels
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect()),
        PixelLayout::Nv12 => Ok(nv12_to_rgb(pixels, width, height)),
    }
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelLayout::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn bgr_is_swapped_to_rgb() -> Result<()> {
        let rgb = normalize_to_rgb(&[1, 2, 3, 4, 5, 6], 2, 1, PixelLayout::Bgr24)?;
        assert_eq!(rgb, vec![3, 2, 1, 6, 5, 4]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() {
        assert!(normalize_to_rgb(&[1u8; 8], 1, 3, PixelLayout::Rgb24).is_err());
    }
}
