//! Distance metrics and their split rules.
//!
//! Tree building and search are generic over [`Metric`], so the metric is
//! chosen once per operation and the inner distance loops are monomorphized.
//!
//! Internally both metrics work with a squared distance (`2 - 2 cos` for
//! angular, squared L2 for Euclidean); [`Metric::normalized_distance`] turns
//! that into the public distance.

use crate::vector::node::SplitPlane;
use crate::vector::random::RandomSource;
use crate::vector::types::MetricKind;

/// Number of refinement steps when growing the two split centroids.
const TWO_MEANS_STEPS: usize = 200;

/// Distance metric together with its hyperplane construction.
pub trait Metric: Send + Sync + 'static {
    const KIND: MetricKind;

    /// Internal (squared) distance between two vectors.
    fn distance(a: &[f32], b: &[f32]) -> f32;

    /// Converts an internal distance into the public distance unit.
    fn normalized_distance(raw: f32) -> f32;

    /// Signed distance of `vector` from a split plane; positive routes to
    /// child 1.
    fn margin(normal: &[f32], bias: f32, vector: &[f32]) -> f32 {
        bias + dot(normal, vector)
    }

    /// Builds a hyperplane separating two centroids grown from `vectors`.
    fn create_split<R: RandomSource>(vectors: &[&[f32]], rng: &mut R) -> SplitPlane;

    /// Random hyperplane through a random member of `vectors`, used when
    /// [`Metric::create_split`] cannot separate the set.
    fn random_split<R: RandomSource>(vectors: &[&[f32]], rng: &mut R) -> SplitPlane;

    /// Priority of a child when the search descends through a split.
    ///
    /// Priority is `min(parent, signed margin)`: the side the query falls on
    /// ranks above the far side, which is penalized by the margin magnitude.
    fn child_priority(parent: f32, margin: f32, child: usize) -> f32 {
        let signed = if child == 0 { -margin } else { margin };
        parent.min(signed)
    }
}

/// Cosine-based metric: `sqrt(2 - 2 cos(a, b))`, within `[0, 2]`.
///
/// Zero-norm vectors are treated as orthogonal to everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Angular;

impl Metric for Angular {
    const KIND: MetricKind = MetricKind::Angular;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        let pp = dot(a, a);
        let qq = dot(b, b);
        let pq = dot(a, b);
        // pp * qq overflows f32 for large vectors
        let norms = pp.sqrt() * qq.sqrt();
        if norms > 0.0 {
            (2.0 - 2.0 * pq / norms).clamp(0.0, 4.0)
        } else {
            2.0
        }
    }

    fn normalized_distance(raw: f32) -> f32 {
        raw.max(0.0).sqrt()
    }

    fn create_split<R: RandomSource>(vectors: &[&[f32]], rng: &mut R) -> SplitPlane {
        if vectors.len() < 2 {
            return Self::random_split(vectors, rng);
        }
        let (p, q) = two_means::<Self, R>(vectors, rng, true);
        let mut normal: Vec<f32> = p.iter().zip(&q).map(|(a, b)| a - b).collect();
        normalize(&mut normal);
        SplitPlane { normal, bias: 0.0 }
    }

    fn random_split<R: RandomSource>(vectors: &[&[f32]], rng: &mut R) -> SplitPlane {
        let dimension = vectors.first().map_or(0, |v| v.len());
        SplitPlane {
            normal: random_direction(dimension, rng),
            bias: 0.0,
        }
    }
}

/// Standard L2 metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl Metric for Euclidean {
    const KIND: MetricKind = MetricKind::Euclidean;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum()
    }

    fn normalized_distance(raw: f32) -> f32 {
        raw.max(0.0).sqrt()
    }

    fn create_split<R: RandomSource>(vectors: &[&[f32]], rng: &mut R) -> SplitPlane {
        if vectors.len() < 2 {
            return Self::random_split(vectors, rng);
        }
        let (p, q) = two_means::<Self, R>(vectors, rng, false);
        let mut normal: Vec<f32> = p.iter().zip(&q).map(|(a, b)| a - b).collect();
        normalize(&mut normal);
        // Plane passes through the midpoint of the two centroids
        let bias = -normal
            .iter()
            .zip(p.iter().zip(&q))
            .map(|(n, (a, b))| n * (a + b) / 2.0)
            .sum::<f32>();
        SplitPlane { normal, bias }
    }

    fn random_split<R: RandomSource>(vectors: &[&[f32]], rng: &mut R) -> SplitPlane {
        let dimension = vectors.first().map_or(0, |v| v.len());
        let normal = random_direction(dimension, rng);
        let bias = if vectors.is_empty() {
            0.0
        } else {
            -dot(&normal, vectors[rng.index(vectors.len())])
        };
        SplitPlane { normal, bias }
    }
}

impl MetricKind {
    /// Public distance between two vectors under this metric.
    #[must_use]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Angular => Angular::normalized_distance(Angular::distance(a, b)),
            Self::Euclidean => Euclidean::normalized_distance(Euclidean::distance(a, b)),
        }
    }
}

#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Scales `v` to unit length; zero vectors are left as they are.
fn normalize(v: &mut [f32]) {
    let n = norm(v);
    if n > 0.0 {
        v.iter_mut().for_each(|x| *x /= n);
    }
}

fn random_direction<R: RandomSource>(dimension: usize, rng: &mut R) -> Vec<f32> {
    let mut direction: Vec<f32> = (0..dimension).map(|_| rng.gaussian()).collect();
    normalize(&mut direction);
    direction
}

/// Grows two centroids from two distinct random seeds by repeatedly pulling
/// the closer centroid towards a randomly drawn member.
///
/// With `cosine` set, members are projected onto the unit sphere first and
/// zero-norm members are skipped.
fn two_means<M: Metric, R: RandomSource>(
    vectors: &[&[f32]],
    rng: &mut R,
    cosine: bool,
) -> (Vec<f32>, Vec<f32>) {
    let count = vectors.len();
    let i = rng.index(count);
    let mut j = rng.index(count - 1);
    if j >= i {
        j += 1;
    }

    let mut p = vectors[i].to_vec();
    let mut q = vectors[j].to_vec();
    if cosine {
        normalize(&mut p);
        normalize(&mut q);
    }

    let (mut ic, mut jc) = (1.0f32, 1.0f32);
    for _ in 0..TWO_MEANS_STEPS {
        let k = vectors[rng.index(count)];
        let di = ic * M::distance(&p, k);
        let dj = jc * M::distance(&q, k);
        let scale = if cosine { norm(k) } else { 1.0 };
        if scale.is_nan() || scale <= 0.0 {
            continue;
        }

        if di < dj {
            for (c, x) in p.iter_mut().zip(k) {
                *c = (*c * ic + x / scale) / (ic + 1.0);
            }
            ic += 1.0;
        } else if dj < di {
            for (c, x) in q.iter_mut().zip(k) {
                *c = (*c * jc + x / scale) / (jc + 1.0);
            }
            jc += 1.0;
        }
    }
    (p, q)
}
