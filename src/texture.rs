use wgpu::{
    Device, Extent3d, FilterMode, ImageCopyTexture, ImageDataLayout, Origin3d, Queue, Sampler,
    SamplerDescriptor, Texture, TextureAspect, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsages, TextureView, TextureViewDescriptor,
};
use winit::dpi::PhysicalSize;

use crate::tracer::pixel::FrameBuffer;

/// 트레이서가 만든 프레임을 화면에 올리기 위한 텍스쳐
pub struct Image {
    pub gpu_texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub name: String,
}

impl Image {
    pub fn new(device: &Device, width: u32, height: u32, label: &str) -> Image {
        let gpu_texture = device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            // 픽셀 값은 이미 0~255로 잘린 결과라 다시 감마 변환하지 않음
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = gpu_texture.create_view(&TextureViewDescriptor {
            label: Some(&format!("{} view", label)),
            ..Default::default()
        });

        // 창과 프레임 크기가 같으니 보간할 일이 없음
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some(&format!("{} sampler", label)),
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            gpu_texture,
            view,
            sampler,
            name: label.to_string(),
        }
    }

    /// 크기가 다른 프레임은 무시함. 다음 resize 뒤에 다시 맞춰짐.
    pub fn load_frame(&self, queue: &Queue, frame: &FrameBuffer) -> bool {
        let size = self.size();
        if size.width != frame.width() || size.height != frame.height() {
            return false;
        }

        queue.write_texture(
            ImageCopyTexture {
                texture: &self.gpu_texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            &frame.to_rgba_bytes(),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.gpu_texture.width()),
                rows_per_image: Some(self.gpu_texture.height()),
            },
            self.gpu_texture.size(),
        );
        true
    }

    /// 새 텍스쳐를 만들었으면 true. 바인드 그룹도 다시 만들어야 함.
    pub fn resize(&mut self, device: &Device, new_size: PhysicalSize<u32>) -> bool {
        if self.gpu_texture.width() == new_size.width
            && self.gpu_texture.height() == new_size.height
        {
            return false;
        }

        let new = Self::new(device, new_size.width, new_size.height, &self.name);
        self.sampler = new.sampler;
        self.view = new.view;
        self.gpu_texture = new.gpu_texture;
        true
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.gpu_texture.width(), self.gpu_texture.height())
    }
}
