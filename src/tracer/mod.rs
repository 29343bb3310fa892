use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use nalgebra::{Point3, Vector2};
use rayon::prelude::*;

use crate::camera::{Camera, CameraKey};
use crate::error::RenderError;
use crate::tracer::gpu::GpuTracer;
use crate::tracer::pixel::{vec4_to_rgba, FrameBuffer};
use crate::tracer::ray::Ray;
use crate::tracer::scene::{Scene, SimulationClock};
use crate::tracer::shade::{shade, Shading};

pub mod gpu;
pub mod hit;
pub mod pixel;
pub mod ray;
pub mod scene;
pub mod shade;

const MODE_VAR: &str = "TWINRAY_MODE";
const WORKGROUP_SIZE_VAR: &str = "TWINRAY_WORKGROUP_SIZE";

/// 한 프레임을 어디서 계산할지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Cpu,
    Gpu,
}

impl ExecutionMode {
    pub fn toggled(self) -> Self {
        match self {
            ExecutionMode::Cpu => ExecutionMode::Gpu,
            ExecutionMode::Gpu => ExecutionMode::Cpu,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Cpu => write!(f, "CPU"),
            ExecutionMode::Gpu => write!(f, "GPU"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ExecutionMode::Cpu),
            "gpu" => Ok(ExecutionMode::Gpu),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub mode: ExecutionMode,
    /// GPU 워크그룹(스레드 블록) 하나가 맡는 픽셀 수
    pub workgroup_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Cpu,
            workgroup_size: 256,
        }
    }
}

impl Settings {
    /// `TWINRAY_MODE`, `TWINRAY_WORKGROUP_SIZE` 환경 변수로 기본값을 덮어씀
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(value) = std::env::var(MODE_VAR) {
            match value.parse() {
                Ok(mode) => settings.mode = mode,
                Err(err) => warn!("ignoring {MODE_VAR}: {err}"),
            }
        }

        if let Ok(value) = std::env::var(WORKGROUP_SIZE_VAR) {
            match value.trim().parse::<u32>() {
                Ok(size) if size > 0 => settings.workgroup_size = size,
                _ => warn!("ignoring {WORKGROUP_SIZE_VAR}: '{value}' is not a positive integer"),
            }
        }

        settings
    }
}

/// 장면과 카메라로 매 프레임 픽셀 버퍼를 채움. CPU, GPU 두 방식 모두 같은 결과를 냄.
pub struct Renderer {
    pub scene: Scene,
    pub settings: Settings,
    pub shading: Shading,
    camera: Camera,
    clock: SimulationClock,
    frame: FrameBuffer,
    gpu: Option<GpuTracer>,
}

impl Renderer {
    pub fn new(scene: Scene, camera: Camera, settings: Settings) -> Result<Self, RenderError> {
        let frame = FrameBuffer::new(camera.width(), camera.height())?;
        let gpu = match settings.mode {
            ExecutionMode::Gpu => Some(GpuTracer::new(settings.workgroup_size)?),
            ExecutionMode::Cpu => None,
        };

        Ok(Self {
            scene,
            settings,
            shading: Shading::default(),
            camera,
            clock: SimulationClock::default(),
            frame,
            gpu,
        })
    }

    /// 크기가 바뀌면 모든 버퍼를 통째로 다시 할당함.
    ///
    /// 호스트 쪽 할당이 실패하면 프레임과 카메라 캐시는 이전 크기 그대로 남음.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            debug!("ignoring resize to {width}x{height}");
            return Ok(());
        }
        if self.frame.width() == width && self.frame.height() == height {
            return Ok(());
        }

        debug!("resizing frame to {width}x{height}");
        let frame = FrameBuffer::new(width, height)?;
        self.camera.on_resize(width, height)?;
        self.frame = frame;

        // 여기서 실패해도 GPU 버퍼는 다음 렌더에서 프레임 크기에 맞춰 다시 잡힘
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.resize(self.frame.pixels().len())?;
        }

        Ok(())
    }

    pub fn update(&mut self, delta_time: f32) {
        self.clock.advance(delta_time);
        self.scene.animate(&self.clock);
    }

    pub fn render(&mut self) -> Result<(), RenderError> {
        self.camera.calculate_ray_directions();

        match self.settings.mode {
            ExecutionMode::Cpu => {
                self.render_cpu();
                Ok(())
            }
            ExecutionMode::Gpu => self.render_gpu(),
        }
    }

    /// 마지막으로 완성된 프레임. 한 줄씩 위에서 아래로.
    pub fn image(&self) -> &[u32] {
        self.frame.pixels()
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn look_at(&mut self, position: Point3<f32>, target: Point3<f32>) {
        self.camera.look_at(position, target);
    }

    pub fn process_keyboard(&mut self, key: CameraKey, delta_time: f32) {
        self.camera.process_keyboard(key, delta_time);
    }

    pub fn process_mouse(&mut self, offset: Vector2<f32>, delta_time: f32) {
        self.camera.process_mouse(offset, delta_time);
    }

    fn render_cpu(&mut self) {
        let scene = &self.scene;
        let shading = &self.shading;
        let origin = self.camera.ray_origin();
        let directions = self.camera.ray_directions();

        // 픽셀끼리 공유하는 쓰기 상태가 없으니 그냥 픽셀 단위로 나눔
        self.frame
            .pixels_mut()
            .par_iter_mut()
            .zip(directions.par_iter())
            .for_each(|(pixel, direction)| {
                let ray = Ray::new(origin, direction.into_inner());
                *pixel = vec4_to_rgba(&shade(&ray, scene, &origin, shading));
            });
    }

    fn render_gpu(&mut self) -> Result<(), RenderError> {
        let gpu = match &mut self.gpu {
            Some(gpu) => gpu,
            slot @ None => {
                info!("starting GPU tracer on first GPU frame");
                slot.insert(GpuTracer::new(self.settings.workgroup_size)?)
            }
        };

        gpu.render(
            &self.scene,
            &self.camera,
            &self.shading,
            self.frame.pixels_mut(),
        )
    }
}
