//! Forecast post-processing.
//!
//! Applied to the output of either model before anything is persisted.

use crate::error::PipelineError;
use crate::series::ForecastPoint;

/// Clip point and lower bound at zero and repair a collapsed interval.
///
/// Rules, in order:
/// 1. `point = max(point, 0)`, `lower = max(lower, 0)`
/// 2. if `lower > upper`, raise `upper` to `lower`
/// 3. `lower <= point <= upper` must then hold, all finite
///
/// A point that still violates rule 3 is an error, never silently clipped.
pub fn clip_and_verify(points: Vec<ForecastPoint>) -> Result<Vec<ForecastPoint>, PipelineError> {
    points
        .into_iter()
        .map(|mut p| {
            // f64::max would swallow NaN.
            let finite = p.point.is_finite() && p.lower.is_finite() && p.upper.is_finite();
            p.point = p.point.max(0.0);
            p.lower = p.lower.max(0.0);
            if p.lower > p.upper {
                p.upper = p.lower;
            }
            if finite && p.bounds_hold() {
                Ok(p)
            } else {
                Err(PipelineError::InvalidBounds {
                    slot: p.slot,
                    lower: p.lower,
                    point: p.point,
                    upper: p.upper,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::TimeSlot;

    fn p(point: f64, lower: f64, upper: f64) -> ForecastPoint {
        ForecastPoint {
            slot: TimeSlot::from_unix(0).unwrap(),
            point,
            lower,
            upper,
        }
    }

    #[test]
    fn test_negative_values_clip_to_zero() {
        let out = clip_and_verify(vec![p(-5.0, -9.0, -1.0)]).unwrap();
        assert_eq!(out[0], p(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_negative_lower_only() {
        let out = clip_and_verify(vec![p(3.0, -2.0, 8.0)]).unwrap();
        assert_eq!(out[0], p(3.0, 0.0, 8.0));
    }

    #[test]
    fn test_untouched_when_valid() {
        let out = clip_and_verify(vec![p(3.0, 1.0, 8.0)]).unwrap();
        assert_eq!(out[0], p(3.0, 1.0, 8.0));
    }

    #[test]
    fn test_point_outside_interval_is_an_error() {
        assert!(matches!(
            clip_and_verify(vec![p(10.0, 1.0, 8.0)]),
            Err(PipelineError::InvalidBounds { .. })
        ));
        assert!(clip_and_verify(vec![p(1.0, 0.0, f64::NAN)]).is_err());
        assert!(clip_and_verify(vec![p(f64::NAN, 0.0, 1.0)]).is_err());
    }
}
