use std::path::Path;

use nalgebra::Vector4;

use crate::error::RenderError;

/// RGBA 색상을 r << 24 | g << 16 | b << 8 | a 로 압축함.
///
/// 각 채널은 255를 곱한 뒤 버림(반올림 없음). 입력은 미리 [0, 1]로 잘려 있어야 함.
pub fn vec4_to_rgba(color: &Vector4<f32>) -> u32 {
    let r = (color.x * 255.0) as u8 as u32;
    let g = (color.y * 255.0) as u8 as u32;
    let b = (color.z * 255.0) as u8 as u32;
    let a = (color.w * 255.0) as u8 as u32;

    (r << 24) | (g << 16) | (b << 8) | a
}

/// 화면 크기만큼의 압축된 색상 배열. 한 줄씩 위에서 아래로 저장됨.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        let count = width as usize * height as usize;

        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(count)
            .map_err(|_| RenderError::HostAllocation {
                what: "frame buffer",
                bytes: count.saturating_mul(std::mem::size_of::<u32>()),
            })?;
        pixels.resize(count, 0);

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// 텍스쳐나 PNG에 바로 쓸 수 있는 RGBA 바이트 배열
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|pixel| pixel.to_be_bytes())
            .collect()
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<(), RenderError> {
        let bytes = self.to_rgba_bytes();
        let image = image::RgbaImage::from_raw(self.width, self.height, bytes).ok_or(
            RenderError::HostAllocation {
                what: "snapshot image",
                bytes: self.pixels.len() * 4,
            },
        )?;
        image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}
