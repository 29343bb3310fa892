use thiserror::Error;

/// 렌더러 코어에서 생길 수 있는 오류.
///
/// 버퍼 할당 실패(`HostAllocation`, `DeviceAllocation`)는 복구하지 않고 그대로 호출자에게 전달함.
/// 버퍼 없이는 렌더링을 계속할 수 없기 때문.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to allocate {bytes} bytes of host memory for {what}")]
    HostAllocation { what: &'static str, bytes: usize },

    #[error("failed to allocate device memory for {what}: {reason}")]
    DeviceAllocation { what: &'static str, reason: String },

    #[error("no compatible GPU adapter was found")]
    NoAdapter,

    #[error("failed to open the GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("failed to read the frame back from the GPU: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    #[error("frame readback was cancelled before the GPU finished")]
    ReadbackCancelled,

    #[error("failed to save the frame: {0}")]
    Snapshot(#[from] image::ImageError),
}

/// 뷰어(윈도우, 화면 출력) 쪽 오류.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to create the window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("failed to create the window surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("the window surface supports no texture format")]
    NoSurfaceFormat,

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error(transparent)]
    Render(#[from] RenderError),
}
