use oxwatch_common::types::{AlertRule, MetricSample};

/// Returns the metric value that makes `rule` fire on `sample`, or `None`.
///
/// A metric absent from the sample never fires.
pub fn breach_value(rule: &AlertRule, sample: &MetricSample) -> Option<f64> {
    let value = sample.value(&rule.metric)?;
    rule.comparator.check(value, rule.threshold).then_some(value)
}

pub fn matches(rule: &AlertRule, sample: &MetricSample) -> bool {
    breach_value(rule, sample).is_some()
}

/// Checks that a breach held over a window anchored at `latest`.
///
/// `latest` must breach, and so must every sample in `history`. An empty
/// history leaves `latest` as the only evidence.
pub fn sustained(rule: &AlertRule, latest: &MetricSample, history: &[MetricSample]) -> bool {
    matches(rule, latest) && history.iter().all(|sample| matches(rule, sample))
}
