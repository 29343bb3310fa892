use std::collections::HashSet;
use std::iter;
use std::time::Instant;

use log::{debug, error, info, warn};
use nalgebra::{Point3, Vector2};
use wgpu::{
    Backends, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, BlendState,
    Color, ColorTargetState, ColorWrites, CommandEncoderDescriptor, CompositeAlphaMode, Device,
    DeviceDescriptor, Dx12Compiler, Features, FragmentState, Instance, InstanceDescriptor, Limits,
    LoadOp, MultisampleState, Operations, PipelineLayoutDescriptor, PowerPreference,
    PresentMode, PrimitiveState, Queue, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipeline, RenderPipelineDescriptor, RequestAdapterOptions, SamplerBindingType,
    ShaderModuleDescriptor, ShaderSource, ShaderStages, Surface, SurfaceConfiguration,
    TextureSampleType, TextureUsages, TextureViewDescriptor, TextureViewDimension, VertexState,
};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, KeyboardInput, MouseButton, VirtualKeyCode, WindowEvent};
use winit::window::Window;

use crate::camera::{Camera, CameraKey};
use crate::error::{AppError, RenderError};
use crate::texture::Image;
use crate::tracer::scene::Scene;
use crate::tracer::{ExecutionMode, Renderer, Settings};

const SNAPSHOT_PATH: &str = "twinray.png";

fn camera_key(code: VirtualKeyCode) -> Option<CameraKey> {
    match code {
        VirtualKeyCode::W => Some(CameraKey::Forward),
        VirtualKeyCode::S => Some(CameraKey::Backward),
        VirtualKeyCode::A => Some(CameraKey::Left),
        VirtualKeyCode::D => Some(CameraKey::Right),
        VirtualKeyCode::Space => Some(CameraKey::Up),
        VirtualKeyCode::LShift => Some(CameraKey::Down),
        _ => None,
    }
}

fn create_renderer(size: PhysicalSize<u32>, settings: Settings) -> Result<Renderer, RenderError> {
    let (width, height) = (size.width.max(1), size.height.max(1));
    let mut camera = Camera::new(45f32.to_radians(), 0.1, 100.0, width, height)?;
    camera.look_at(Point3::new(0.0, 0.5, 8.0), Point3::origin());

    Renderer::new(Scene::demo(), camera, settings)
}

pub struct Application {
    surface: Surface,
    device: Device,
    queue: Queue,
    config: SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    // 무조건 winit의 Window를 쓸 것!
    pub window: Window,

    present_pipeline: RenderPipeline,
    present_layout: BindGroupLayout,
    frame_image: Image,
    frame_bind_group: BindGroup,

    renderer: Renderer,
    last_frame: Instant,

    held_keys: HashSet<CameraKey>,
    looking: bool,
    last_cursor: Option<PhysicalPosition<f64>>,
    mouse_offset: Vector2<f32>,
}

impl Application {
    pub async fn new(window: Window, settings: Settings) -> Result<Self, AppError> {
        let size = window.inner_size();

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            dx12_shader_compiler: Dx12Compiler::default(),
        });

        // &window가 surface보다 오래 살아 있어야 함. 둘 다 Application 안에 같이 들고 있음.
        let surface = unsafe { instance.create_surface(&window) }?;

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::default(),
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    features: Features::empty(),
                    limits: Limits::default(),
                    label: Some("Twinray viewer"),
                },
                None,
            )
            .await
            .map_err(RenderError::from)?;

        let capabilities = surface.get_capabilities(&adapter);

        // 프레임 값은 이미 최종 색이라 sRGB 변환이 한 번 더 들어가지 않는 포맷을 고름
        let surface_format = capabilities
            .formats
            .iter()
            .find(|format| !format.is_srgb())
            .or_else(|| capabilities.formats.first())
            .copied()
            .ok_or(AppError::NoSurfaceFormat)?;
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: PresentMode::AutoVsync,
            alpha_mode: CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let present_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Present Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Present Shader"),
            source: ShaderSource::Wgsl(include_str!("shaders/present.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Present Pipeline Layout"),
            bind_group_layouts: &[&present_layout],
            push_constant_ranges: &[],
        });
        // 정점 버퍼 없이 vertex_index로 화면 전체를 덮는 삼각형 하나를 그림
        let present_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Present Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(ColorTargetState {
                    format: surface_format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        });

        let frame_image = Image::new(&device, config.width, config.height, "Frame");
        let frame_bind_group = Self::create_frame_bind_group(&device, &present_layout, &frame_image);

        let renderer = match create_renderer(size, settings) {
            Err(RenderError::NoAdapter) if settings.mode == ExecutionMode::Gpu => {
                warn!("no GPU adapter for the tracer, starting in CPU mode");
                create_renderer(
                    size,
                    Settings {
                        mode: ExecutionMode::Cpu,
                        ..settings
                    },
                )?
            }
            other => other?,
        };

        let app = Self {
            surface,
            device,
            queue,
            config,
            size,
            window,
            present_pipeline,
            present_layout,
            frame_image,
            frame_bind_group,
            renderer,
            last_frame: Instant::now(),
            held_keys: HashSet::new(),
            looking: false,
            last_cursor: None,
            mouse_offset: Vector2::zeros(),
        };
        app.update_title();
        info!("rendering in {} mode", app.renderer.settings.mode);

        Ok(app)
    }

    fn create_frame_bind_group(device: &Device, layout: &BindGroupLayout, image: &Image) -> BindGroup {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&image.view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&image.sampler),
                },
            ],
        })
    }

    fn update_title(&self) {
        self.window
            .set_title(&format!("Twinray ({})", self.renderer.settings.mode));
    }

    fn set_mode(&mut self, mode: ExecutionMode) {
        self.renderer.settings.mode = mode;
        self.update_title();
        info!("switched to {mode} mode");
    }

    /// 최소화 등으로 크기가 0이 되면 아무것도 하지 않음
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) -> Result<(), AppError> {
        if new_size.width == 0 || new_size.height == 0 {
            return Ok(());
        }

        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);

        self.renderer.resize(new_size.width, new_size.height)?;
        if self.frame_image.resize(&self.device, new_size) {
            self.frame_bind_group =
                Self::create_frame_bind_group(&self.device, &self.present_layout, &self.frame_image);
        }

        Ok(())
    }

    pub fn update(&mut self) {
        let now = Instant::now();
        let delta_time = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        for key in &self.held_keys {
            self.renderer.process_keyboard(*key, delta_time);
        }

        if self.mouse_offset != Vector2::zeros() {
            self.renderer.process_mouse(self.mouse_offset, delta_time);
            self.mouse_offset = Vector2::zeros();
        }

        self.renderer.update(delta_time);
    }

    pub fn render(&mut self) -> Result<(), AppError> {
        let started = Instant::now();
        match self.renderer.render() {
            // GPU를 못 찾았으면 CPU로 돌아가서 같은 프레임을 다시 그림
            Err(RenderError::NoAdapter) => {
                warn!("no GPU adapter for the tracer, falling back to CPU mode");
                self.set_mode(ExecutionMode::Cpu);
                self.renderer.render()?;
            }
            other => other?,
        }
        debug!(
            "{} frame took {:.2} ms",
            self.renderer.settings.mode,
            started.elapsed().as_secs_f64() * 1000.0
        );

        self.frame_image.load_frame(&self.queue, self.renderer.frame());

        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });

            render_pass.set_pipeline(&self.present_pipeline);
            render_pass.set_bind_group(0, &self.frame_bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.queue.submit(iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    // true: 앱에서 입력 처리를 했으니 따로 관리할 필요 없음
    // false: 아래 event loop에서 처리 해야 함.
    pub fn input(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state,
                        virtual_keycode: Some(code),
                        ..
                    },
                ..
            } => self.keyboard_input(*code, *state),

            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.looking = *state == ElementState::Pressed;
                self.last_cursor = None;
                self.window.set_cursor_visible(!self.looking);
                true
            }

            WindowEvent::CursorMoved { position, .. } => {
                if self.looking {
                    if let Some(last) = self.last_cursor {
                        self.mouse_offset += Vector2::new(
                            (position.x - last.x) as f32,
                            (position.y - last.y) as f32,
                        );
                    }
                    self.last_cursor = Some(*position);
                }
                self.looking
            }

            _ => false,
        }
    }

    fn keyboard_input(&mut self, code: VirtualKeyCode, state: ElementState) -> bool {
        if let Some(key) = camera_key(code) {
            match state {
                ElementState::Pressed => self.held_keys.insert(key),
                ElementState::Released => self.held_keys.remove(&key),
            };
            return true;
        }

        if state != ElementState::Pressed {
            return false;
        }

        match code {
            VirtualKeyCode::G => {
                self.set_mode(self.renderer.settings.mode.toggled());
                true
            }
            VirtualKeyCode::P => {
                match self.renderer.frame().save_png(SNAPSHOT_PATH) {
                    Ok(()) => info!("saved frame to {SNAPSHOT_PATH}"),
                    Err(err) => error!("{err}"),
                }
                true
            }
            _ => false,
        }
    }
}
