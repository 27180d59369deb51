use crate::model::AccuracyMetrics;

/// Compute r², RMSE and range-normalised RMSE of `predicted` against
/// `observed`. Only index pairs where both values are present count, except
/// for the normalising range, which is taken over all of `observed`.
/// Returns `None` when there are no such pairs.
pub fn accuracy(observed: &[Option<f64>], predicted: &[Option<f64>]) -> Option<AccuracyMetrics> {
    let pairs: Vec<(f64, f64)> = observed
        .iter()
        .zip(predicted)
        .filter_map(|(y, p)| Some(((*y)?, (*p)?)))
        .filter(|(y, p)| y.is_finite() && p.is_finite())
        .collect();
    if pairs.is_empty() {
        return None;
    }

    let n = pairs.len() as f64;
    let mean = pairs.iter().map(|(y, _)| y).sum::<f64>() / n;
    let ss_res: f64 = pairs.iter().map(|(y, p)| (y - p).powi(2)).sum();
    let ss_tot: f64 = pairs.iter().map(|(y, _)| (y - mean).powi(2)).sum();
    let rmse = (ss_res / n).sqrt();

    // The range spans the whole observed column, predicted or not.
    let (min, max) = observed
        .iter()
        .flatten()
        .filter(|y| y.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| {
            (lo.min(*y), hi.max(*y))
        });
    let range = max - min;

    Some(AccuracyMetrics {
        r2: (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot),
        rmse: Some(rmse),
        nrmse: (range > 0.0).then(|| rmse / range),
    })
}
