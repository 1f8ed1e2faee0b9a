// Collapses runs of near-identical positions caused by GPS jitter

use crate::telemetry::ValidatedPoint;

pub fn is_stationary(a: &ValidatedPoint, b: &ValidatedPoint, epsilon_deg: f64) -> bool {
    (a.lat - b.lat).abs() < epsilon_deg && (a.lng - b.lng).abs() < epsilon_deg
}

/// Iterator adapter that drops points too close to the last point it kept.
///
/// Comparing against the last *kept* point, rather than the previous raw
/// point, makes a long stationary run collapse into a single point instead
/// of being thinned out step by step.
pub struct StationaryFilter<I> {
    inner: I,
    epsilon_deg: f64,
    last_kept: Option<ValidatedPoint>,
}

impl<I> StationaryFilter<I>
where
    I: Iterator<Item = ValidatedPoint>,
{
    pub fn new(inner: I, epsilon_deg: f64) -> Self {
        Self {
            inner,
            epsilon_deg,
            last_kept: None,
        }
    }
}

impl<I> Iterator for StationaryFilter<I>
where
    I: Iterator<Item = ValidatedPoint>,
{
    type Item = ValidatedPoint;

    fn next(&mut self) -> Option<Self::Item> {
        for point in self.inner.by_ref() {
            let keep = match &self.last_kept {
                Some(last) => !is_stationary(&point, last, self.epsilon_deg),
                None => true,
            };
            if keep {
                self.last_kept = Some(point.clone());
                return Some(point);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}

pub trait StationaryFilterExt: Iterator<Item = ValidatedPoint> + Sized {
    fn filter_stationary(self, epsilon_deg: f64) -> StationaryFilter<Self> {
        StationaryFilter::new(self, epsilon_deg)
    }
}

impl<I: Iterator<Item = ValidatedPoint>> StationaryFilterExt for I {}

pub fn filter_stationary_points(points: &[ValidatedPoint], epsilon_deg: f64) -> Vec<ValidatedPoint> {
    if points.len() < 2 {
        return points.to_vec();
    }
    points
        .iter()
        .cloned()
        .filter_stationary(epsilon_deg)
        .collect()
}
