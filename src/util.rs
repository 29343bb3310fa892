use nalgebra::Vector3;
use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::Rng;

pub fn random_vec<T, R, G>(rng: &mut G, range: R) -> Vector3<T>
where
    T: SampleUniform,
    R: SampleRange<T> + Clone,
    G: Rng + ?Sized,
{
    Vector3::new(
        rng.gen_range(range.clone()),
        rng.gen_range(range.clone()),
        rng.gen_range(range),
    )
}
