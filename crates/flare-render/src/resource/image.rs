use crate::error::{RendererError, Result};

/// Pixel formats accepted for texture uploads.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    /// Expanded to RGBA (alpha = 255) on upload; GPUs have no 3-byte texel format.
    Rgb8,
    R8,
}

impl TextureFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
            Self::R8 => 1,
        }
    }
}

/// Owned 8-bit image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, format: TextureFormat, data: Vec<u8>) -> Result<Self> {
        check_data_len([width, height], format, &data)?;
        Ok(Self { width, height, format, data })
    }

    /// Image filled with one RGBA value.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat((width * height) as usize);
        Self { width, height, format: TextureFormat::Rgba8, data }
    }

    pub fn size(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    /// RGBA value of the pixel at `(x, y)`, after format expansion.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel() as usize;
        let i = (y as usize * self.width as usize + x as usize) * bpp;
        let p = self.data.get(i..i + bpp)?;
        Some(match self.format {
            TextureFormat::Rgba8 => [p[0], p[1], p[2], p[3]],
            TextureFormat::Rgb8 => [p[0], p[1], p[2], 255],
            TextureFormat::R8 => [p[0], 0, 0, 255],
        })
    }
}

pub(crate) fn check_data_len(size: [u32; 2], format: TextureFormat, data: &[u8]) -> Result<()> {
    let expected = (size[0] as usize)
        .checked_mul(size[1] as usize)
        .and_then(|px| px.checked_mul(format.bytes_per_pixel() as usize));
    if expected != Some(data.len()) {
        let expected = expected.map_or_else(|| "more than usize::MAX".to_owned(), |n| n.to_string());
        return Err(RendererError::invalid(format!(
            "{}x{} {format:?} texture needs {expected} bytes, got {}",
            size[0],
            size[1],
            data.len()
        )));
    }
    Ok(())
}

/// Expands RGB data to RGBA. Other formats are returned unchanged.
pub(crate) fn expand_rgb(format: TextureFormat, data: &[u8]) -> (TextureFormat, Vec<u8>) {
    match format {
        TextureFormat::Rgb8 => {
            let mut out = Vec::with_capacity(data.len() / 3 * 4);
            for px in data.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
            (TextureFormat::Rgba8, out)
        }
        other => (other, data.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_length() {
        assert!(Image::new(2, 2, TextureFormat::Rgba8, vec![0; 15]).is_err());
        assert!(Image::new(2, 2, TextureFormat::Rgb8, vec![0; 12]).is_ok());
    }

    #[test]
    fn oversized_dimensions_are_rejected_without_overflow() {
        let err = check_data_len([u32::MAX, u32::MAX], TextureFormat::Rgba8, &[0; 4]).unwrap_err();
        assert!(matches!(err, RendererError::InvalidArgument(_)));
    }

    #[test]
    fn pixel_expands_formats() {
        let rgb = Image::new(1, 1, TextureFormat::Rgb8, vec![1, 2, 3]).unwrap();
        assert_eq!(rgb.pixel(0, 0), Some([1, 2, 3, 255]));

        let r = Image::new(1, 1, TextureFormat::R8, vec![9]).unwrap();
        assert_eq!(r.pixel(0, 0), Some([9, 0, 0, 255]));
        assert_eq!(r.pixel(1, 0), None);
    }

    #[test]
    fn expand_rgb_adds_opaque_alpha() {
        let (format, data) = expand_rgb(TextureFormat::Rgb8, &[10, 20, 30, 40, 50, 60]);
        assert_eq!(format, TextureFormat::Rgba8);
        assert_eq!(data, vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }
}
