use std::collections::HashMap;

use crate::sample::MetricSample;

/// Merges samples with the same name so that every name occurs at most once.
///
/// Counter deltas are summed. For gauges, the last sample in iteration order wins. Samples of
/// different kinds under the same name follow [`MetricValue::merge`](crate::MetricValue::merge),
/// so the last writer determines the resulting kind.
///
/// The result lists every name in the order of its first occurrence. Callers must not rely on
/// this across network boundaries.
pub fn optimize<I>(batch: I) -> Vec<MetricSample>
where
    I: IntoIterator<Item = MetricSample>,
{
    let batch = batch.into_iter();
    let mut positions = HashMap::<String, usize>::with_capacity(batch.size_hint().0);
    let mut optimized = Vec::<MetricSample>::with_capacity(batch.size_hint().0);

    for sample in batch {
        match positions.get(sample.name()) {
            Some(&index) => optimized[index] = optimized[index].merge(&sample),
            None => {
                positions.insert(sample.name().to_owned(), optimized.len());
                optimized.push(sample);
            }
        }
    }

    optimized
}
