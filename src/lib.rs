use log::{error, info, warn};
use wgpu::SurfaceError;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use crate::app::Application;

pub mod app;
pub mod camera;
pub mod error;
pub mod texture;
pub mod tracer;
pub mod util;

pub use camera::{Camera, CameraKey};
pub use error::{AppError, RenderError};
pub use tracer::pixel::{vec4_to_rgba, FrameBuffer};
pub use tracer::scene::{Light, Orbit, Scene, SimulationClock, Sphere};
pub use tracer::shade::Shading;
pub use tracer::{ExecutionMode, Renderer, Settings};

/// 뷰어를 띄우고 창이 닫힐 때까지 돌림. 창을 만들기 전에 실패한 경우에만 돌아옴.
pub fn run() -> Result<(), AppError> {
    // RUST_LOG로 로그 수준 조절
    env_logger::init();

    let settings = Settings::from_env();
    info!("starting with {settings:?}");

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("Twinray")
        .with_inner_size(PhysicalSize::new(800, 600))
        .build(&event_loop)?;

    let mut app = pollster::block_on(Application::new(window, settings))?;

    event_loop.run(move |event, _, control_flow| match event {
        Event::WindowEvent {
            ref event,
            window_id,
        } if window_id == app.window.id() => {
            // 앱이 처리한 입력이면 여기서는 무시
            if app.input(event) {
                return;
            }

            let resized = match event {
                // 만약 앱을 운영체제에서 닫으려고 하거나 ESC가 눌렸다면 나가기
                WindowEvent::CloseRequested
                | WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state: ElementState::Pressed,
                            virtual_keycode: Some(VirtualKeyCode::Escape),
                            ..
                        },
                    ..
                } => {
                    *control_flow = ControlFlow::ExitWithCode(0);
                    Ok(())
                }

                WindowEvent::Resized(physical_size) => app.resize(*physical_size),
                WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                    app.resize(**new_inner_size)
                }

                _ => Ok(()),
            };

            if let Err(err) = resized {
                error!("{err}");
                *control_flow = ControlFlow::ExitWithCode(1);
            }
        }

        Event::RedrawRequested(window_id) if window_id == app.window.id() => {
            app.update();
            match app.render() {
                Ok(()) => {}
                // surface가 날아가면 다시 설정
                Err(AppError::Surface(SurfaceError::Lost)) => {
                    let size = app.size;
                    if let Err(err) = app.resize(size) {
                        error!("{err}");
                        *control_flow = ControlFlow::ExitWithCode(1);
                    }
                }
                Err(AppError::Surface(SurfaceError::Timeout)) => {
                    warn!("surface timed out, skipping frame");
                }
                Err(err) => {
                    error!("{err}");
                    *control_flow = ControlFlow::ExitWithCode(1);
                }
            }
        }

        Event::MainEventsCleared => app.window.request_redraw(),

        _ => {}
    });
}
