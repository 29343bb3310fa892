use nalgebra::{Point3, Unit, Vector3};

use crate::tracer::ray::Ray;
use crate::tracer::scene::{Scene, LIGHT_RADIUS};

/// 교차 검사 결과. HitPayload는 빛의 경로에 대한 정보만 담고 색상 계산은 나중에 함.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitPayload {
    Miss,
    /// 광원 자체에 직접 닿음
    Light { index: usize },
    Surface {
        index: usize,
        distance: f32,
        position: Point3<f32>,
        normal: Unit<Vector3<f32>>,
    },
}

impl HitPayload {
    pub fn is_miss(&self) -> bool {
        matches!(self, HitPayload::Miss)
    }
}

/// 어떤 물체들을 검사할지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidates {
    SpheresAndLights,
    Spheres,
}

/// 광선과 구의 가까운 교점까지의 거리. 교점이 없거나 방향이 0이면 `None`.
///
/// (dx^2 + dy^2 + dz^2) * t^2 + 2 * (ox * dx + oy * dy + oz * dz) * t + (ox^2 + oy^2 + oz^2 - r^2) = 0
/// 이 식은 구가 원점에 있다고 가정함. 그래서 광선 시작점을 구 위치만큼 옮겨서 풂.
///
/// 가까운 근만 사용하므로 광선이 구 안에서 시작하면 그 구는 맞지 않음.
pub fn nearest_root(ray: &Ray, center: &Point3<f32>, radius: f32) -> Option<f32> {
    let origin = ray.origin - center;

    let a = ray.direction.magnitude_squared();
    let b = 2.0 * origin.dot(&ray.direction);
    let c = origin.magnitude_squared() - radius * radius;

    if a == 0.0 {
        return None;
    }

    // 판별식
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }

    Some((-b - discriminant.sqrt()) / (2.0 * a))
}

/// 가장 가까운 물체를 찾음. `max_distance`보다 먼 교점은 무시함 (경계값 미포함).
///
/// 구를 먼저 검사하므로 거리가 똑같으면 구가 광원보다 우선함.
pub fn trace(
    ray: &Ray,
    scene: &Scene,
    candidates: Candidates,
    max_distance: Option<f32>,
) -> HitPayload {
    enum Closest {
        Sphere(usize),
        Light(usize),
    }

    let mut closest = None;
    // 커널과 같은 상한값을 써야 두 경로 결과가 같음
    let mut closest_distance = max_distance.unwrap_or(f32::MAX);

    for (index, sphere) in scene.spheres.iter().enumerate() {
        match nearest_root(ray, &sphere.position, sphere.radius) {
            Some(distance) if distance > 0.0 && distance < closest_distance => {
                closest_distance = distance;
                closest = Some(Closest::Sphere(index));
            }
            _ => {}
        }
    }

    if candidates == Candidates::SpheresAndLights {
        for (index, light) in scene.lights.iter().enumerate() {
            match nearest_root(ray, &light.position, LIGHT_RADIUS) {
                Some(distance) if distance > 0.0 && distance < closest_distance => {
                    closest_distance = distance;
                    closest = Some(Closest::Light(index));
                }
                _ => {}
            }
        }
    }

    match closest {
        None => HitPayload::Miss,
        Some(Closest::Light(index)) => HitPayload::Light { index },
        Some(Closest::Sphere(index)) => closest_hit(ray, scene, index, closest_distance),
    }
}

/// 화면 픽셀에서 나가는 첫 광선. 구와 광원 모두 검사하고 거리 제한 없음.
pub fn trace_from_pixel(ray: &Ray, scene: &Scene) -> HitPayload {
    trace(ray, scene, Candidates::SpheresAndLights, None)
}

/// 그림자 광선. 구만 검사하고 광원까지의 거리 안쪽만 봄.
pub fn trace_from_hitpoint(ray: &Ray, scene: &Scene, max_distance: f32) -> HitPayload {
    trace(ray, scene, Candidates::Spheres, Some(max_distance))
}

fn closest_hit(ray: &Ray, scene: &Scene, index: usize, distance: f32) -> HitPayload {
    let sphere = &scene.spheres[index];
    let position = ray.at(distance);
    let normal = Unit::new_normalize(position - sphere.position);

    HitPayload::Surface {
        index,
        distance,
        position,
        normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::scene::{Light, Sphere};

    fn unit_sphere_scene() -> Scene {
        Scene::new(vec![Sphere::default()], vec![])
    }

    #[test]
    fn test_hit_point_and_outward_normal() {
        let scene = Scene::new(
            vec![Sphere::new(
                Point3::new(0.5, -0.25, -1.0),
                1.25,
                Vector3::new(1.0, 1.0, 1.0),
            )],
            vec![],
        );
        let origin = Point3::new(0.0, 0.0, 6.0);

        for i in -4..=4 {
            for j in -4..=4 {
                let direction = Vector3::new(i as f32 * 0.04, j as f32 * 0.04, -1.0);
                let ray = Ray::new(origin, direction);
                let HitPayload::Surface { distance, position, normal, .. } =
                    trace_from_pixel(&ray, &scene)
                else {
                    continue;
                };

                assert!(distance > 0.0);
                assert!((position - ray.at(distance)).magnitude() < 1e-5);
                assert!((normal.magnitude() - 1.0).abs() < 1e-5);
                assert!(normal.dot(&(position - scene.spheres[0].position)) > 0.0);
            }
        }
    }

    #[test]
    fn test_straight_hit_distance() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0));
        let HitPayload::Surface { index, distance, position, normal } =
            trace_from_pixel(&ray, &unit_sphere_scene())
        else {
            panic!("expected a surface hit");
        };
        assert_eq!(index, 0);
        assert!((distance - 2.0).abs() < 1e-5);
        assert!((position - Point3::new(0.0, 0.0, 1.0)).magnitude() < 1e-5);
        assert!((normal.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_origin_inside_sphere_misses() {
        let ray = Ray::new(Point3::origin(), Vector3::new(0.0, 0.0, -1.0));
        assert!(trace_from_pixel(&ray, &unit_sphere_scene()).is_miss());
    }

    #[test]
    fn test_sphere_behind_ray_misses() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, 1.0));
        assert!(trace_from_pixel(&ray, &unit_sphere_scene()).is_miss());
    }

    #[test]
    fn test_zero_direction_is_miss() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 3.0), Vector3::zeros());
        assert!(trace_from_pixel(&ray, &unit_sphere_scene()).is_miss());
    }

    #[test]
    fn test_shadow_ray_stops_before_max_distance() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0));
        let scene = unit_sphere_scene();
        assert!(trace_from_hitpoint(&ray, &scene, 1.5).is_miss());
        // 경계값 자체는 포함하지 않음
        assert!(trace_from_hitpoint(&ray, &scene, 2.0).is_miss());
        assert!(matches!(
            trace_from_hitpoint(&ray, &scene, 2.5),
            HitPayload::Surface { index: 0, .. }
        ));
    }

    #[test]
    fn test_shadow_ray_ignores_lights() {
        let scene = Scene::new(
            vec![],
            vec![Light::new(Point3::origin(), Vector3::new(1.0, 1.0, 1.0))],
        );
        let ray = Ray::new(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0));
        assert!(trace_from_hitpoint(&ray, &scene, 10.0).is_miss());
        assert_eq!(trace_from_pixel(&ray, &scene), HitPayload::Light { index: 0 });
    }

    #[test]
    fn test_nearest_category_wins() {
        let scene = Scene::new(
            vec![Sphere::new(
                Point3::new(0.0, 0.0, -5.0),
                1.0,
                Vector3::new(1.0, 1.0, 1.0),
            )],
            vec![Light::new(Point3::new(0.0, 0.0, -2.0), Vector3::new(1.0, 1.0, 1.0))],
        );
        let towards = Ray::new(Point3::origin(), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(trace_from_pixel(&towards, &scene), HitPayload::Light { index: 0 });

        let behind = Ray::new(Point3::new(0.0, 0.0, -10.0), Vector3::new(0.0, 0.0, 1.0));
        assert!(matches!(
            trace_from_pixel(&behind, &scene),
            HitPayload::Surface { index: 0, .. }
        ));
    }

    #[test]
    fn test_equal_distance_prefers_sphere() {
        let center = Point3::new(0.0, 0.0, -3.0);
        let scene = Scene::new(
            vec![Sphere::new(center, LIGHT_RADIUS, Vector3::new(1.0, 1.0, 1.0))],
            vec![Light::new(center, Vector3::new(1.0, 1.0, 1.0))],
        );
        let ray = Ray::new(Point3::origin(), Vector3::new(0.0, 0.0, -1.0));
        assert!(matches!(
            trace_from_pixel(&ray, &scene),
            HitPayload::Surface { index: 0, .. }
        ));
    }
}
