use bytemuck::{Pod, Zeroable};
use futures_intrusive::channel::shared::oneshot_channel;
use log::{debug, info, warn};
use nalgebra::Point3;
use wgpu::{
    Backends, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, BufferDescriptor, BufferUsages,
    CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline, ComputePipelineDescriptor,
    Device, DeviceDescriptor, Dx12Compiler, ErrorFilter, Features, Instance, InstanceDescriptor,
    Limits, Maintain, MapMode, PipelineLayoutDescriptor, PowerPreference, Queue,
    RequestAdapterOptions, ShaderModuleDescriptor, ShaderSource, ShaderStages,
};

use crate::camera::Camera;
use crate::error::RenderError;
use crate::tracer::scene::{Light, Scene, Sphere, LIGHT_RADIUS};
use crate::tracer::shade::Shading;

const ENTRY_POINT: &str = "main";
const MIN_STORAGE_BYTES: u64 = 32;

/// 쉐이더의 `Frame` 구조체와 같은 배치 (vec3 다음에 u32 하나씩 끼워서 16바이트 정렬을 맞춤)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuFrame {
    eye: [f32; 3],
    pixel_count: u32,
    sky_color: [f32; 3],
    sphere_count: u32,
    ambient_color: [f32; 3],
    light_count: u32,
    ambient: f32,
    diffuse: f32,
    specular: f32,
    shininess: f32,
    light_radius: f32,
    shadow_bias: f32,
    _pad: [u32; 2],
}

impl GpuFrame {
    fn new(scene: &Scene, eye: &Point3<f32>, shading: &Shading, pixel_count: u32) -> Self {
        Self {
            eye: eye.coords.into(),
            pixel_count,
            sky_color: shading.sky_color.into(),
            sphere_count: scene.spheres.len() as u32,
            ambient_color: shading.ambient_color.into(),
            light_count: scene.lights.len() as u32,
            ambient: shading.ambient,
            diffuse: shading.diffuse,
            specular: shading.specular,
            shininess: shading.shininess,
            light_radius: LIGHT_RADIUS,
            shadow_bias: shading.shadow_bias,
            _pad: [0; 2],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuSphere {
    position: [f32; 3],
    radius: f32,
    albedo: [f32; 3],
    _pad: f32,
}

impl From<&Sphere> for GpuSphere {
    fn from(sphere: &Sphere) -> Self {
        Self {
            position: sphere.position.coords.into(),
            radius: sphere.radius,
            albedo: sphere.albedo.into(),
            _pad: 0.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuLight {
    position: [f32; 3],
    radius: f32,
    color: [f32; 3],
    _pad: f32,
}

impl From<&Light> for GpuLight {
    fn from(light: &Light) -> Self {
        Self {
            position: light.position.coords.into(),
            radius: LIGHT_RADIUS,
            color: light.color.into(),
            _pad: 0.0,
        }
    }
}

/// 크기 제한을 먼저 확인하고, 드라이버의 메모리 부족 에러를 잡아서 돌려줌
fn allocate_buffer(
    device: &Device,
    limits: &Limits,
    what: &'static str,
    size: u64,
    usage: BufferUsages,
) -> Result<Buffer, RenderError> {
    if size > limits.max_buffer_size {
        return Err(RenderError::DeviceAllocation {
            what,
            reason: format!("{size} bytes exceeds max_buffer_size {}", limits.max_buffer_size),
        });
    }
    if usage.contains(BufferUsages::STORAGE) && size > limits.max_storage_buffer_binding_size as u64
    {
        return Err(RenderError::DeviceAllocation {
            what,
            reason: format!(
                "{size} bytes exceeds max_storage_buffer_binding_size {}",
                limits.max_storage_buffer_binding_size
            ),
        });
    }

    device.push_error_scope(ErrorFilter::OutOfMemory);
    let buffer = device.create_buffer(&BufferDescriptor {
        label: Some(what),
        size,
        usage,
        mapped_at_creation: false,
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(RenderError::DeviceAllocation {
            what,
            reason: err.to_string(),
        });
    }

    Ok(buffer)
}

/// 장면 배열용 버퍼. 모자랄 때만 2의 거듭제곱 크기로 늘림.
struct StorageArray {
    what: &'static str,
    buffer: Buffer,
    capacity: u64,
}

impl StorageArray {
    fn new(device: &Device, limits: &Limits, what: &'static str) -> Result<Self, RenderError> {
        let buffer = allocate_buffer(
            device,
            limits,
            what,
            MIN_STORAGE_BYTES,
            BufferUsages::STORAGE | BufferUsages::COPY_DST,
        )?;

        Ok(Self {
            what,
            buffer,
            capacity: MIN_STORAGE_BYTES,
        })
    }

    fn upload<T: Pod>(
        &mut self,
        device: &Device,
        queue: &Queue,
        limits: &Limits,
        items: &[T],
    ) -> Result<(), RenderError> {
        let bytes: &[u8] = bytemuck::cast_slice(items);
        let needed = bytes.len() as u64;

        if needed > self.capacity {
            let capacity = needed.next_power_of_two();
            debug!("growing {} to {capacity} bytes", self.what);
            self.buffer = allocate_buffer(
                device,
                limits,
                self.what,
                capacity,
                BufferUsages::STORAGE | BufferUsages::COPY_DST,
            )?;
            self.capacity = capacity;
        }

        // 빈 장면이면 쓸 게 없음. 쉐이더는 개수만 보고 돌기 때문에 내용이 남아 있어도 됨
        if !bytes.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytes);
        }

        Ok(())
    }
}

/// 화면 크기에 따라 달라지는 버퍼들
struct Targets {
    rays: Buffer,
    pixels: Buffer,
    staging: Buffer,
    pixel_count: usize,
}

impl Targets {
    fn new(device: &Device, limits: &Limits, pixel_count: usize) -> Result<Self, RenderError> {
        let ray_bytes = (pixel_count * std::mem::size_of::<[f32; 4]>()) as u64;
        let pixel_bytes = (pixel_count * std::mem::size_of::<u32>()) as u64;

        let rays = allocate_buffer(
            device,
            limits,
            "ray directions",
            ray_bytes,
            BufferUsages::STORAGE | BufferUsages::COPY_DST,
        )?;
        let pixels = allocate_buffer(
            device,
            limits,
            "packed pixels",
            pixel_bytes,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        )?;
        let staging = allocate_buffer(
            device,
            limits,
            "pixel readback",
            pixel_bytes,
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        )?;

        Ok(Self {
            rays,
            pixels,
            staging,
            pixel_count,
        })
    }
}

/// 워크그룹 수가 한 축 제한을 넘으면 (x, y) 격자로 접음
fn dispatch_size(groups: u32, max_per_dimension: u32) -> (u32, u32) {
    if groups <= max_per_dimension {
        (groups, 1)
    } else {
        (max_per_dimension, (groups + max_per_dimension - 1) / max_per_dimension)
    }
}

fn clamp_workgroup_size(requested: u32, limits: &Limits) -> u32 {
    let max = limits
        .max_compute_invocations_per_workgroup
        .min(limits.max_compute_workgroup_size_x)
        .max(1);
    requested.clamp(1, max)
}

/// 컴퓨트 쉐이더로 픽셀 하나당 스레드 하나씩 돌리는 트레이서.
///
/// 화면과 상관없는 별도의 디바이스를 쓰고, 결과는 매 프레임 CPU로 다시 읽어옴.
pub struct GpuTracer {
    device: Device,
    queue: Queue,
    limits: Limits,
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    workgroup_size: u32,
    frame_uniform: Buffer,
    spheres: StorageArray,
    lights: StorageArray,
    targets: Option<Targets>,
}

impl GpuTracer {
    pub fn new(workgroup_size: u32) -> Result<Self, RenderError> {
        pollster::block_on(Self::new_async(workgroup_size))
    }

    async fn new_async(requested_workgroup_size: u32) -> Result<Self, RenderError> {
        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            dx12_shader_compiler: Dx12Compiler::default(),
        });

        // 화면에 그리지 않으니 surface 호환은 필요 없음
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        info!(
            "GPU tracer using {} ({:?})",
            adapter_info.name, adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Twinray compute"),
                    features: Features::empty(),
                    limits: adapter.limits(),
                },
                None,
            )
            .await?;
        let limits = device.limits();

        let workgroup_size = clamp_workgroup_size(requested_workgroup_size, &limits);
        if workgroup_size != requested_workgroup_size {
            warn!(
                "workgroup size {requested_workgroup_size} is not supported, using {workgroup_size}"
            );
        }

        let source = include_str!("../shaders/trace.wgsl")
            .replace("__WORKGROUP_SIZE__", &workgroup_size.to_string());
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Trace Shader"),
            source: ShaderSource::Wgsl(source.into()),
        });

        let buffer_entry = |binding: u32, ty: BufferBindingType| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Trace Bind Group Layout"),
            entries: &[
                buffer_entry(0, BufferBindingType::Uniform),
                buffer_entry(1, BufferBindingType::Storage { read_only: true }),
                buffer_entry(2, BufferBindingType::Storage { read_only: true }),
                buffer_entry(3, BufferBindingType::Storage { read_only: true }),
                buffer_entry(4, BufferBindingType::Storage { read_only: false }),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Trace Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Trace Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: ENTRY_POINT,
        });

        let frame_uniform = allocate_buffer(
            &device,
            &limits,
            "frame constants",
            std::mem::size_of::<GpuFrame>() as u64,
            BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        )?;
        let spheres = StorageArray::new(&device, &limits, "spheres")?;
        let lights = StorageArray::new(&device, &limits, "lights")?;

        Ok(Self {
            device,
            queue,
            limits,
            pipeline,
            bind_group_layout,
            workgroup_size,
            frame_uniform,
            spheres,
            lights,
            targets: None,
        })
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// 화면 크기가 바뀌면 이전 버퍼를 버리고 새로 잡음
    pub fn resize(&mut self, pixel_count: usize) -> Result<(), RenderError> {
        if matches!(&self.targets, Some(targets) if targets.pixel_count == pixel_count) {
            return Ok(());
        }

        // 새 버퍼를 잡기 전에 이전 것부터 놓음
        self.targets = None;
        if pixel_count > 0 {
            self.targets = Some(Targets::new(&self.device, &self.limits, pixel_count)?);
        }
        Ok(())
    }

    /// `output`의 길이가 곧 픽셀 수. 카메라의 광선 캐시는 이미 최신이어야 함.
    pub fn render(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        shading: &Shading,
        output: &mut [u32],
    ) -> Result<(), RenderError> {
        let pixel_count = output.len();
        if pixel_count == 0 {
            return Ok(());
        }
        debug_assert_eq!(camera.ray_directions().len(), pixel_count);

        let targets = match self.targets.take() {
            Some(targets) if targets.pixel_count == pixel_count => targets,
            _ => Targets::new(&self.device, &self.limits, pixel_count)?,
        };
        let result = self.dispatch(scene, camera, shading, &targets, output);
        self.targets = Some(targets);

        result
    }

    fn dispatch(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        shading: &Shading,
        targets: &Targets,
        output: &mut [u32],
    ) -> Result<(), RenderError> {
        let pixel_count = output.len();

        let spheres: Vec<GpuSphere> = scene.spheres.iter().map(GpuSphere::from).collect();
        let lights: Vec<GpuLight> = scene.lights.iter().map(GpuLight::from).collect();
        self.spheres
            .upload(&self.device, &self.queue, &self.limits, &spheres)?;
        self.lights
            .upload(&self.device, &self.queue, &self.limits, &lights)?;

        let rays: Vec<[f32; 4]> = camera
            .ray_directions()
            .iter()
            .take(pixel_count)
            .map(|direction| [direction.x, direction.y, direction.z, 0.0])
            .collect();
        self.queue
            .write_buffer(&targets.rays, 0, bytemuck::cast_slice(&rays));

        let frame = GpuFrame::new(scene, &camera.ray_origin(), shading, pixel_count as u32);
        self.queue
            .write_buffer(&self.frame_uniform, 0, bytemuck::bytes_of(&frame));

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Trace Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: self.frame_uniform.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: self.spheres.buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: self.lights.buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: targets.rays.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: targets.pixels.as_entire_binding(),
                },
            ],
        });

        let groups = (pixel_count as u32 + self.workgroup_size - 1) / self.workgroup_size;
        let (groups_x, groups_y) =
            dispatch_size(groups, self.limits.max_compute_workgroups_per_dimension);

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Trace Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("Trace Pass"),
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(
            &targets.pixels,
            0,
            &targets.staging,
            0,
            (pixel_count * std::mem::size_of::<u32>()) as u64,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // 커널이 끝날 때까지 기다렸다가 결과를 읽음
        let slice = targets.staging.slice(..);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(Maintain::Wait);
        pollster::block_on(receiver.receive()).ok_or(RenderError::ReadbackCancelled)??;

        {
            let data = slice.get_mapped_range();
            output.copy_from_slice(bytemuck::cast_slice(&data));
        }
        targets.staging.unmap();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<GpuFrame>(), 80);
        assert_eq!(std::mem::size_of::<GpuSphere>(), 32);
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
    }

    #[test]
    fn test_frame_constants() {
        let scene = Scene::demo();
        let shading = Shading::default();
        let frame = GpuFrame::new(&scene, &Point3::new(1.0, 2.0, 3.0), &shading, 480);

        assert_eq!(frame.eye, [1.0, 2.0, 3.0]);
        assert_eq!(frame.pixel_count, 480);
        assert_eq!(frame.sphere_count as usize, scene.spheres.len());
        assert_eq!(frame.light_count as usize, scene.lights.len());
        assert_eq!(frame.light_radius, LIGHT_RADIUS);
        assert_eq!(frame.shininess, shading.shininess);
    }

    #[test]
    fn test_sphere_conversion() {
        let sphere = Sphere::new(Point3::new(1.0, -2.0, 0.5), 0.75, Vector3::new(0.1, 0.2, 0.3));
        let gpu = GpuSphere::from(&sphere);
        assert_eq!(gpu.position, [1.0, -2.0, 0.5]);
        assert_eq!(gpu.radius, 0.75);
        assert_eq!(gpu.albedo, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_dispatch_folds_into_grid() {
        assert_eq!(dispatch_size(10, 65535), (10, 1));
        assert_eq!(dispatch_size(65535, 65535), (65535, 1));
        assert_eq!(dispatch_size(65536, 65535), (65535, 2));
        assert_eq!(dispatch_size(200_000, 65535), (65535, 4));
    }

    #[test]
    fn test_workgroup_size_is_clamped() {
        let limits = Limits::default();
        assert_eq!(clamp_workgroup_size(64, &limits), 64);
        assert_eq!(clamp_workgroup_size(0, &limits), 1);
        assert_eq!(
            clamp_workgroup_size(100_000, &limits),
            limits
                .max_compute_invocations_per_workgroup
                .min(limits.max_compute_workgroup_size_x)
        );
    }

    #[test]
    fn test_gpu_tracer_resize() {
        let mut tracer = match GpuTracer::new(64) {
            Ok(tracer) => tracer,
            Err(RenderError::NoAdapter) => return,
            Err(err) => panic!("failed to start GPU tracer: {err}"),
        };
        assert!(tracer.workgroup_size() >= 1);

        tracer.resize(128).unwrap();
        assert_eq!(tracer.targets.as_ref().map(|t| t.pixel_count), Some(128));
        tracer.resize(0).unwrap();
        assert!(tracer.targets.is_none());
    }
}
