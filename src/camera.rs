use nalgebra::{Isometry3, Perspective3, Point3, Unit, UnitQuaternion, Vector2, Vector3, Vector4};
use rayon::prelude::*;

use crate::error::RenderError;

/// 카메라 이동 입력
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraKey {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

impl CameraKey {
    pub const ALL: [CameraKey; 6] = [
        CameraKey::Forward,
        CameraKey::Backward,
        CameraKey::Left,
        CameraKey::Right,
        CameraKey::Up,
        CameraKey::Down,
    ];
}

/// 핀홀 카메라. 모든 광선은 카메라 위치에서 출발하고, 픽셀별 광선 방향은 캐시해 둠.
///
/// 오른손 좌표계, 월드 위쪽은 +Y.
pub struct Camera {
    projection: Perspective3<f32>,
    view: Isometry3<f32>,

    vertical_fov: f32,
    near: f32,
    far: f32,

    position: Point3<f32>,
    forward: Unit<Vector3<f32>>,

    rays: Vec<Unit<Vector3<f32>>>,
    rays_dirty: bool,

    width: u32,
    height: u32,
}

impl Camera {
    pub fn new(
        vertical_fov: f32,
        near: f32,
        far: f32,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        // 크기가 0이면 종횡비를 계산할 수 없으니 최소 1픽셀로 만듦
        let (width, height) = (width.max(1), height.max(1));
        let aspect = width as f32 / height as f32;
        let projection = Perspective3::new(aspect, vertical_fov, near, far);
        let position = Point3::origin();
        let forward = Unit::new_unchecked(-Vector3::z());
        let view = Isometry3::look_at_rh(&position, &(position + forward.as_ref()), &Vector3::y());

        let mut camera = Self {
            projection,
            view,
            vertical_fov,
            near,
            far,
            position,
            forward,
            rays: vec![],
            rays_dirty: true,
            width,
            height,
        };
        camera.on_resize(width, height)?;

        Ok(camera)
    }

    pub fn look_at(&mut self, position: Point3<f32>, target: Point3<f32>) {
        self.position = position;
        self.forward = Unit::new_normalize(target - position);
        self.reevaluate_view();
    }

    pub fn ray_origin(&self) -> Point3<f32> {
        self.position
    }

    /// `calculate_ray_directions`를 먼저 불러야 최신 값이 나옴. 인덱스는 row * width + col.
    pub fn ray_directions(&self) -> &[Unit<Vector3<f32>>] {
        &self.rays
    }

    pub fn forward(&self) -> Unit<Vector3<f32>> {
        self.forward
    }

    pub fn right(&self) -> Unit<Vector3<f32>> {
        Unit::new_normalize(self.forward.cross(&Vector3::y()))
    }

    pub fn up(&self) -> Unit<Vector3<f32>> {
        Unit::new_normalize(self.right().cross(self.forward.as_ref()))
    }

    pub fn vertical_fov(&self) -> f32 {
        self.vertical_fov
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_dirty(&self) -> bool {
        self.rays_dirty
    }

    /// 크기가 0이면 아무것도 바꾸지 않음. 할당에 실패해도 이전 캐시는 그대로 남음.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let count = width as usize * height as usize;

        let mut rays = Vec::new();
        rays.try_reserve_exact(count)
            .map_err(|_| RenderError::HostAllocation {
                what: "camera ray directions",
                bytes: count.saturating_mul(std::mem::size_of::<Unit<Vector3<f32>>>()),
            })?;
        rays.resize(count, self.forward);

        self.rays = rays;
        self.width = width;
        self.height = height;
        self.reevaluate_projection();

        Ok(())
    }

    pub fn process_keyboard(&mut self, key: CameraKey, delta_time: f32) {
        let step = self.movement_speed() * delta_time;
        let up = Vector3::y_axis();
        let right = self.right();

        match key {
            CameraKey::Forward => self.position += self.forward.scale(step),
            CameraKey::Backward => self.position -= self.forward.scale(step),
            CameraKey::Left => self.position -= right.scale(step),
            CameraKey::Right => self.position += right.scale(step),
            CameraKey::Up => self.position += up.scale(step),
            CameraKey::Down => self.position -= up.scale(step),
        }

        self.reevaluate_view();
    }

    /// `offset`은 창 좌표 기준 마우스 이동량 (오른쪽, 아래쪽이 양수)
    pub fn process_mouse(&mut self, offset: Vector2<f32>, delta_time: f32) {
        if offset == Vector2::zeros() {
            return;
        }

        let up = Vector3::y_axis();
        let right = self.right();

        let pitch_delta = offset.y * self.rotation_speed() * delta_time; // positive when down
        let yaw_delta = offset.x * self.rotation_speed() * delta_time; // positive when right

        let yaw = UnitQuaternion::from_axis_angle(&up, -yaw_delta);
        let pitch = UnitQuaternion::from_axis_angle(&right, -pitch_delta);

        let mut forward = (pitch * yaw) * self.forward;
        // 거의 수직으로 보게 되면 right 축이 망가지니 그때는 좌우 회전만 적용
        if forward.y.abs() > 0.99 {
            forward = yaw * self.forward;
        }
        forward.renormalize_fast();

        self.forward = forward;
        self.reevaluate_view();
    }

    pub fn rotation_speed(&self) -> f32 {
        0.3
    }

    pub fn movement_speed(&self) -> f32 {
        5.0
    }

    /// 캐시가 더러울 때만 다시 계산함
    pub fn calculate_ray_directions(&mut self) {
        if !self.rays_dirty {
            return;
        }

        let inverse_projection = self.projection.inverse();
        let view = self.view;
        let (width, height) = (self.width, self.height);

        self.rays
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, ray_direction)| {
                let row = index as u32 / width;
                let col = index as u32 % width;

                // 픽셀 중앙을 지나도록 0.5를 더함
                let mut coord = Vector2::new(
                    (col as f32 + 0.5) / width as f32,
                    (row as f32 + 0.5) / height as f32,
                );
                coord *= 2.0;
                coord -= Vector2::new(1.0, 1.0);

                // 0번째 줄이 화면 위쪽
                let target = inverse_projection * Vector4::new(coord.x, -coord.y, 1.0, 1.0);
                let direction = (target.xyz() / target.w).normalize();

                *ray_direction = Unit::new_normalize(view.inverse_transform_vector(&direction));
            });

        self.rays_dirty = false;
    }

    fn reevaluate_projection(&mut self) {
        let aspect = self.width as f32 / self.height as f32;
        self.projection = Perspective3::new(aspect, self.vertical_fov, self.near, self.far);
        self.rays_dirty = true;
    }

    fn reevaluate_view(&mut self) {
        let target = self.position + self.forward.as_ref();
        self.view = Isometry3::look_at_rh(&self.position, &target, &Vector3::y());
        self.rays_dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(width: u32, height: u32) -> Camera {
        let mut camera = Camera::new(45f32.to_radians(), 0.1, 100.0, width, height).unwrap();
        camera.look_at(Point3::new(0.0, 0.0, 5.0), Point3::origin());
        camera
    }

    #[test]
    fn test_zero_size_keeps_previous_cache() {
        let mut camera = camera(8, 6);
        camera.on_resize(0, 10).unwrap();
        camera.on_resize(10, 0).unwrap();
        assert_eq!((camera.width(), camera.height()), (8, 6));

        camera.calculate_ray_directions();
        assert_eq!(camera.ray_directions().len(), 48);

        let tiny = Camera::new(45f32.to_radians(), 0.1, 100.0, 0, 0).unwrap();
        assert_eq!((tiny.width(), tiny.height()), (1, 1));
        assert_eq!(tiny.ray_directions().len(), 1);
    }

    #[test]
    fn test_failed_resize_reports_allocation_error() {
        let mut camera = camera(8, 6);
        let err = camera.on_resize(u32::MAX, u32::MAX).unwrap_err();
        assert!(matches!(err, RenderError::HostAllocation { bytes: usize::MAX, .. }));

        // 실패하면 이전 크기 그대로
        assert_eq!((camera.width(), camera.height()), (8, 6));
        camera.calculate_ray_directions();
        assert_eq!(camera.ray_directions().len(), 48);
    }

    #[test]
    fn test_basis_is_orthonormal() {
        let camera = camera(4, 4);
        let (forward, right, up) = (camera.forward(), camera.right(), camera.up());

        assert!(forward.dot(&right).abs() < 1e-5);
        assert!(forward.dot(&up).abs() < 1e-5);
        assert!(right.dot(&up).abs() < 1e-5);
        assert!(up.y > 0.99);
        assert_eq!(camera.vertical_fov(), 45f32.to_radians());
    }

    #[test]
    fn test_cache_matches_viewport() {
        let mut camera = camera(8, 6);
        camera.calculate_ray_directions();
        assert_eq!(camera.ray_directions().len(), 48);

        camera.on_resize(3, 11).unwrap();
        assert!(camera.is_dirty());
        camera.calculate_ray_directions();
        assert_eq!(camera.ray_directions().len(), 33);
    }

    #[test]
    fn test_center_ray_points_at_target() {
        let mut camera = camera(9, 9);
        camera.calculate_ray_directions();

        let center = camera.ray_directions()[4 * 9 + 4];
        assert!((center.into_inner() - Vector3::new(0.0, 0.0, -1.0)).magnitude() < 1e-4);
    }

    #[test]
    fn test_directions_are_unit_and_oriented() {
        let mut camera = camera(16, 9);
        camera.calculate_ray_directions();

        let rays = camera.ray_directions();
        assert!(rays.iter().all(|ray| (ray.magnitude() - 1.0).abs() < 1e-4));

        // 첫 픽셀은 왼쪽 위, 마지막 픽셀은 오른쪽 아래
        assert!(rays[0].x < 0.0 && rays[0].y > 0.0);
        assert!(rays[rays.len() - 1].x > 0.0 && rays[rays.len() - 1].y < 0.0);
    }

    #[test]
    fn test_aspect_widens_horizontal_spread() {
        let mut camera = camera(20, 10);
        camera.calculate_ray_directions();
        let rays = camera.ray_directions();

        let left = rays[5 * 20];
        let top = rays[10];
        assert!(left.x.abs() > top.y.abs());
    }

    #[test]
    fn test_keyboard_moves_and_invalidates() {
        let mut camera = camera(4, 4);
        camera.calculate_ray_directions();
        assert!(!camera.is_dirty());

        camera.process_keyboard(CameraKey::Forward, 0.1);
        assert!(camera.is_dirty());
        assert!((camera.ray_origin().z - 4.5).abs() < 1e-5);

        camera.process_keyboard(CameraKey::Right, 0.2);
        assert!((camera.ray_origin().x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mouse_turns_view() {
        let mut camera = camera(4, 4);
        camera.calculate_ray_directions();
        let before = camera.ray_directions()[0];

        camera.process_mouse(Vector2::new(10.0, 0.0), 0.1);
        assert!(camera.forward().x > 0.0);
        assert!(camera.is_dirty());

        camera.calculate_ray_directions();
        assert_ne!(camera.ray_directions()[0], before);
    }

    #[test]
    fn test_mouse_cannot_flip_over_pole() {
        let mut camera = camera(4, 4);
        for _ in 0..100 {
            camera.process_mouse(Vector2::new(0.0, -5.0), 0.1);
        }
        assert!(camera.forward().dot(&Vector3::y()).abs() <= 0.995);
    }
}
