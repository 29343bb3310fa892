use nalgebra::{Point3, Reflection3, Unit, Vector3, Vector4};

use crate::tracer::hit::{trace_from_hitpoint, trace_from_pixel, HitPayload};
use crate::tracer::ray::Ray;
use crate::tracer::scene::Scene;

/// 조명 상수. 물체마다 다르지 않고 장면 전체에 고정.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shading {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
    pub ambient_color: Vector3<f32>,
    pub sky_color: Vector3<f32>,
    /// 그림자 광선이 자기 표면에 다시 맞지 않도록 법선 방향으로 띄우는 거리
    pub shadow_bias: f32,
}

impl Default for Shading {
    fn default() -> Self {
        Self {
            ambient: 0.15,
            diffuse: 0.8,
            specular: 0.5,
            shininess: 32.0,
            ambient_color: Vector3::new(1.0, 1.0, 1.0),
            sky_color: Vector3::new(0.6, 0.7, 0.9),
            shadow_bias: 1e-4,
        }
    }
}

/// DirectX의 RayGen + ClosestHit 쉐이더 역할. 결과는 언제나 [0, 1]로 잘림.
pub fn shade(ray: &Ray, scene: &Scene, eye: &Point3<f32>, shading: &Shading) -> Vector4<f32> {
    let (index, position, normal) = match trace_from_pixel(ray, scene) {
        HitPayload::Miss => return opaque(&shading.sky_color),
        // 광원은 빛나는 점으로만 보여줌
        HitPayload::Light { index } => return opaque(&scene.lights[index].color),
        HitPayload::Surface {
            index,
            position,
            normal,
            ..
        } => (index, position, normal),
    };

    let albedo = scene.spheres[index].albedo;
    let mut color = (shading.ambient_color * shading.ambient).component_mul(&albedo);

    // 표면에서 조금 띄워야 자기 자신에 맞지 않음
    let shadow_origin = position + normal.as_ref() * shading.shadow_bias;

    for (light_index, light) in scene.lights.iter().enumerate() {
        let to_light = light.position - position;
        let distance = to_light.magnitude();
        let shadow_ray = Ray::new(shadow_origin, to_light / distance);

        if trace_from_hitpoint(&shadow_ray, scene, distance).is_miss() {
            color += phong(scene, light_index, &position, &normal, eye, &albedo, shading);
        }
    }

    opaque(&color)
}

fn phong(
    scene: &Scene,
    light_index: usize,
    position: &Point3<f32>,
    normal: &Unit<Vector3<f32>>,
    eye: &Point3<f32>,
    albedo: &Vector3<f32>,
    shading: &Shading,
) -> Vector3<f32> {
    let light = &scene.lights[light_index];

    let to_light = light.position - position;
    let light_direction = to_light / to_light.magnitude();
    let cos_nl = normal.dot(&light_direction).max(0.0);

    // reflect(-L, N)
    let mut reflected = -light_direction;
    Reflection3::new(*normal, 0.0).reflect(&mut reflected);

    let to_eye = eye - position;
    let eye_direction = to_eye / to_eye.magnitude();
    let cos_vr = reflected.dot(&eye_direction).max(0.0);

    let specular = if cos_vr > 0.0 {
        cos_vr.powf(shading.shininess)
    } else {
        0.0
    };

    let color =
        light.color * (shading.diffuse * cos_nl) + light.color * (shading.specular * specular);
    color.component_mul(albedo)
}

fn opaque(color: &Vector3<f32>) -> Vector4<f32> {
    Vector4::new(color.x, color.y, color.z, 1.0).map(|channel| channel.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::scene::{Light, Sphere};

    fn white() -> Vector3<f32> {
        Vector3::new(1.0, 1.0, 1.0)
    }

    /// 원점에 반지름 1인 구, (0, 3, 0)에 광원, (0, 0, 5)에 카메라
    fn reference_scene() -> Scene {
        Scene::new(
            vec![Sphere::new(Point3::origin(), 1.0, white())],
            vec![Light::new(Point3::new(0.0, 3.0, 0.0), white())],
        )
    }

    #[test]
    fn test_miss_returns_opaque_sky() {
        let shading = Shading::default();
        let scene = reference_scene();
        let eye = Point3::new(0.0, 0.0, 5.0);
        let ray = Ray::new(eye, Vector3::new(0.0, 0.0, 1.0));

        let color = shade(&ray, &scene, &eye, &shading);
        assert_eq!(color.xyz(), shading.sky_color);
        assert_eq!(color.w, 1.0);
    }

    #[test]
    fn test_light_hit_returns_clamped_light_color() {
        let shading = Shading::default();
        let scene = Scene::new(
            vec![],
            vec![Light::new(Point3::origin(), Vector3::new(2.0, 0.5, 0.0))],
        );
        let eye = Point3::new(0.0, 0.0, 5.0);
        let ray = Ray::new(eye, Vector3::new(0.0, 0.0, -1.0));

        let color = shade(&ray, &scene, &eye, &shading);
        assert_eq!(color, Vector4::new(1.0, 0.5, 0.0, 1.0));
    }

    #[test]
    fn test_center_hit_is_lit_by_ambient() {
        let shading = Shading::default();
        let scene = reference_scene();
        let eye = Point3::new(0.0, 0.0, 5.0);
        let ray = Ray::new(eye, Vector3::new(0.0, 0.0, -1.0));

        assert!(matches!(
            trace_from_pixel(&ray, &scene),
            HitPayload::Surface { index: 0, .. }
        ));

        let color = shade(&ray, &scene, &eye, &shading);
        for channel in color.xyz().iter() {
            assert!(*channel >= shading.ambient - 1e-6);
            assert!(*channel > 0.0);
        }
        assert_eq!(color.w, 1.0);
    }

    #[test]
    fn test_surface_facing_light_is_not_self_occluded() {
        let shading = Shading::default();
        let scene = reference_scene();
        let eye = Point3::new(0.0, 0.0, 5.0);
        // (0, 0.6, 0.8)은 광원을 향하는 면 위의 점
        let ray = Ray::new(eye, Vector3::new(0.0, 0.6, -4.2));

        let HitPayload::Surface { position, normal, .. } = trace_from_pixel(&ray, &scene) else {
            panic!("expected a surface hit");
        };
        assert!((position - Point3::new(0.0, 0.6, 0.8)).magnitude() < 1e-4);

        let to_light = scene.lights[0].position - position;
        let shadow = Ray::new(
            position + normal.as_ref() * shading.shadow_bias,
            to_light.normalize(),
        );
        assert!(trace_from_hitpoint(&shadow, &scene, to_light.magnitude()).is_miss());

        let color = shade(&ray, &scene, &eye, &shading);
        assert!(color.x > shading.ambient + 0.1);
    }

    #[test]
    fn test_occluded_light_adds_nothing() {
        let shading = Shading::default();
        let eye = Point3::new(0.0, 0.0, 5.0);
        // (0.6, 0, 0.8)을 맞추는 광선
        let ray = Ray::new(eye, Vector3::new(0.6, 0.0, -4.2));

        let target = Sphere::new(Point3::origin(), 1.0, white());
        let blocker = Sphere::new(Point3::new(2.8, 0.0, 0.4), 0.5, white());
        let light = Light::new(Point3::new(5.0, 0.0, 0.0), white());

        let shadowed = Scene::new(vec![target, blocker], vec![light]);
        let without_light = Scene::new(vec![target, blocker], vec![]);
        let unblocked = Scene::new(vec![target], vec![light]);

        let shadowed_color = shade(&ray, &shadowed, &eye, &shading);
        let dark_color = shade(&ray, &without_light, &eye, &shading);
        let lit_color = shade(&ray, &unblocked, &eye, &shading);

        assert_eq!(shadowed_color, dark_color);
        assert!(lit_color.x > dark_color.x);
    }

    #[test]
    fn test_output_is_clamped() {
        let shading = Shading::default();
        let bright = Vector3::new(10.0, 10.0, 10.0);
        let scene = Scene::new(
            vec![Sphere::new(Point3::origin(), 1.0, white())],
            vec![
                Light::new(Point3::new(0.0, 0.0, 3.0), bright),
                Light::new(Point3::new(0.5, 0.5, 3.0), bright),
            ],
        );
        let eye = Point3::new(0.0, 0.0, 5.0);
        let ray = Ray::new(eye, Vector3::new(0.05, 0.05, -1.0));

        let color = shade(&ray, &scene, &eye, &shading);
        assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
    }
}
