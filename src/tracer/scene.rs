use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::util::random_vec;

/// 광원은 반지름이 고정된 작은 구로 취급함. 화면에 광원 위치를 보여주기 위한 용도.
pub const LIGHT_RADIUS: f32 = 0.1;

const DEMO_SEED: u64 = 0x7477_696e;

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub spheres: Vec<Sphere>,
    pub lights: Vec<Light>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub position: Point3<f32>,
    pub radius: f32,
    pub albedo: Vector3<f32>,
}

impl Sphere {
    pub fn new(position: Point3<f32>, radius: f32, albedo: Vector3<f32>) -> Self {
        debug_assert!(radius > 0.0, "sphere radius must be positive");
        Self {
            position,
            radius,
            albedo,
        }
    }
}

impl Default for Sphere {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            radius: 1.0,
            albedo: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Point3<f32>,
    /// 1.0보다 커도 됨 (밝기)
    pub color: Vector3<f32>,
    pub orbit: Option<Orbit>,
}

impl Light {
    pub fn new(position: Point3<f32>, color: Vector3<f32>) -> Self {
        Self {
            position,
            color,
            orbit: None,
        }
    }

    pub fn orbiting(orbit: Orbit, color: Vector3<f32>) -> Self {
        Self {
            position: orbit.position_at(0.0),
            color,
            orbit: Some(orbit),
        }
    }
}

/// 시간에 따라 광원을 움직이는 궤도.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orbit {
    pub center: Point3<f32>,
    pub radii: Vector3<f32>,
}

impl Orbit {
    pub fn position_at(&self, time: f32) -> Point3<f32> {
        let (sin, cos) = time.sin_cos();
        self.center + Vector3::new(self.radii.x * sin, self.radii.y * cos, self.radii.z * sin)
    }
}

/// 애니메이션에 쓰이는 시뮬레이션 시간. `Renderer::update`가 매 프레임 전진시킴.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimulationClock {
    elapsed: f32,
}

impl SimulationClock {
    pub fn advance(&mut self, delta_time: f32) {
        self.elapsed += delta_time.max(0.0);
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}

impl Scene {
    pub fn new(spheres: Vec<Sphere>, lights: Vec<Light>) -> Self {
        Self { spheres, lights }
    }

    /// 뷰어의 기본 장면
    pub fn demo() -> Self {
        let mut spheres = vec![
            Sphere::new(Point3::origin(), 1.0, Vector3::new(1.0, 0.35, 0.25)),
            Sphere::new(Point3::new(-2.4, -0.3, 0.4), 0.7, Vector3::new(0.25, 0.45, 1.0)),
            Sphere::new(Point3::new(2.2, -0.4, -0.8), 0.6, Vector3::new(0.3, 0.9, 0.35)),
            Sphere::new(Point3::new(0.0, -3.0, -1.0), 1.6, Vector3::new(0.85, 0.85, 0.85)),
        ];

        // 시드가 고정이라 매번 같은 장면이 나옴
        let mut rng = StdRng::seed_from_u64(DEMO_SEED);
        spheres.extend(random_spheres(&mut rng, 6));

        let lights = vec![
            Light::orbiting(
                Orbit {
                    center: Point3::origin(),
                    radii: Vector3::new(2.5, 2.5, 1.5),
                },
                Vector3::new(1.0, 1.0, 1.0),
            ),
            Light::new(Point3::new(-4.0, 4.0, 3.0), Vector3::new(0.45, 0.45, 0.6)),
        ];

        Self { spheres, lights }
    }

    pub fn random<R: Rng>(rng: &mut R, sphere_count: usize, light_count: usize) -> Self {
        let spheres = random_spheres(rng, sphere_count);
        let lights = (0..light_count)
            .map(|_| {
                let position = Point3::from(random_vec(rng, -5.0..5.0));
                let color = random_vec(rng, 0.3..1.2);
                Light::new(position, color)
            })
            .collect();

        Self { spheres, lights }
    }

    /// 궤도가 있는 광원만 시간에 맞춰 옮김
    pub fn animate(&mut self, clock: &SimulationClock) {
        let time = clock.elapsed();
        for light in &mut self.lights {
            if let Some(orbit) = light.orbit {
                light.position = orbit.position_at(time);
            }
        }
    }
}

fn random_spheres<R: Rng>(rng: &mut R, count: usize) -> Vec<Sphere> {
    (0..count)
        .map(|_| {
            let mut position = random_vec(rng, -4.0..4.0);
            position.z = rng.gen_range(-4.0..-1.0);
            Sphere::new(
                Point3::from(position),
                rng.gen_range(0.15..0.6),
                random_vec(rng, 0.0..1.0),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_position() {
        let orbit = Orbit {
            center: Point3::origin(),
            radii: Vector3::new(2.5, 2.5, 1.5),
        };
        let time = 0.75_f32;
        let position = orbit.position_at(time);
        assert!((position.x - 2.5 * time.sin()).abs() < 1e-6);
        assert!((position.y - 2.5 * time.cos()).abs() < 1e-6);
        assert!((position.z - 1.5 * time.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_animate_moves_only_orbiting_lights() {
        let mut scene = Scene::demo();
        let fixed = scene.lights[1].position;
        let start = scene.lights[0].position;

        let mut clock = SimulationClock::default();
        clock.advance(1.0);
        scene.animate(&clock);

        assert_ne!(scene.lights[0].position, start);
        assert_eq!(scene.lights[1].position, fixed);
    }

    #[test]
    fn test_clock_ignores_negative_steps() {
        let mut clock = SimulationClock::default();
        clock.advance(0.5);
        clock.advance(-1.0);
        assert_eq!(clock.elapsed(), 0.5);
    }

    #[test]
    fn test_demo_scene_is_deterministic() {
        let a = Scene::demo();
        let b = Scene::demo();
        assert_eq!(a.spheres, b.spheres);
        assert_eq!(a.lights.len(), 2);
    }

    #[test]
    fn test_random_scene_is_valid() {
        let mut rng = StdRng::seed_from_u64(3);
        let scene = Scene::random(&mut rng, 20, 4);
        assert_eq!(scene.spheres.len(), 20);
        assert_eq!(scene.lights.len(), 4);
        for sphere in &scene.spheres {
            assert!(sphere.radius > 0.0);
            assert!(sphere.albedo.iter().all(|c| (0.0..=1.0).contains(c)));
        }
    }
}
