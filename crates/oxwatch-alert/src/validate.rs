use oxwatch_common::types::{Comparator, NewAlertRule, RuleDraft, Severity};

/// Reasons a rule draft is rejected at creation time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' must not be blank")]
    EmptyField(&'static str),

    #[error("unknown comparator '{0}' (expected one of >=, >, <=, <, ==, !=)")]
    UnknownComparator(String),

    #[error("unknown severity '{0}' (expected low, medium, high or critical)")]
    UnknownSeverity(String),

    #[error("duration must be positive, got {0}")]
    NonPositiveDuration(i64),

    #[error("threshold must be a finite number")]
    NonFiniteThreshold,
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, RuleValidationError> {
    let value = value.as_deref().ok_or(RuleValidationError::MissingField(field))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RuleValidationError::EmptyField(field));
    }
    Ok(trimmed)
}

/// Validates a draft and produces a rule ready for the rule store.
///
/// `enabled` defaults to true and `target_pattern` to `*` when omitted.
///
/// # Examples
///
/// ```
/// use oxwatch_alert::validate::{validate_rule, RuleValidationError};
/// use oxwatch_common::types::RuleDraft;
///
/// let draft = RuleDraft {
///     name: Some("High CPU".into()),
///     metric: Some("cpu_usage".into()),
///     comparator: Some("=>".into()),
///     threshold: Some(80.0),
///     duration_secs: Some(60),
///     severity: Some("high".into()),
///     ..Default::default()
/// };
/// assert_eq!(
///     validate_rule(&draft),
///     Err(RuleValidationError::UnknownComparator("=>".into()))
/// );
/// ```
pub fn validate_rule(draft: &RuleDraft) -> Result<NewAlertRule, RuleValidationError> {
    let name = required(&draft.name, "name")?;
    let metric = required(&draft.metric, "metric")?;

    let comparator_raw = required(&draft.comparator, "comparator")?;
    let comparator: Comparator = comparator_raw
        .parse()
        .map_err(|_| RuleValidationError::UnknownComparator(comparator_raw.to_string()))?;

    let threshold = draft
        .threshold
        .ok_or(RuleValidationError::MissingField("threshold"))?;
    if !threshold.is_finite() {
        return Err(RuleValidationError::NonFiniteThreshold);
    }

    let duration = draft
        .duration_secs
        .ok_or(RuleValidationError::MissingField("duration_secs"))?;
    if duration <= 0 {
        return Err(RuleValidationError::NonPositiveDuration(duration));
    }

    let severity_raw = required(&draft.severity, "severity")?;
    let severity: Severity = severity_raw
        .parse()
        .map_err(|_| RuleValidationError::UnknownSeverity(severity_raw.to_string()))?;

    let target_pattern = match draft.target_pattern.as_deref().map(str::trim) {
        None => "*".to_string(),
        Some("") => return Err(RuleValidationError::EmptyField("target_pattern")),
        Some(p) => p.to_string(),
    };

    Ok(NewAlertRule {
        name: name.to_string(),
        description: draft.description.clone(),
        metric: metric.to_string(),
        comparator,
        threshold,
        duration_secs: duration.unsigned_abs(),
        severity,
        enabled: draft.enabled.unwrap_or(true),
        target_pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> RuleDraft {
        RuleDraft {
            name: Some("High CPU Usage".into()),
            description: Some("cpu above 80%".into()),
            metric: Some("cpu_usage".into()),
            comparator: Some(">=".into()),
            threshold: Some(80.0),
            duration_secs: Some(60),
            severity: Some("high".into()),
            enabled: None,
            target_pattern: None,
        }
    }

    #[test]
    fn valid_draft_applies_defaults() {
        let rule = validate_rule(&draft()).unwrap();
        assert_eq!(rule.comparator, Comparator::GreaterEqual);
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.duration_secs, 60);
        assert!(rule.enabled);
        assert_eq!(rule.target_pattern, "*");
    }

    #[test]
    fn every_supported_comparator_is_accepted() {
        for symbol in [">=", ">", "<=", "<", "==", "!="] {
            let mut d = draft();
            d.comparator = Some(symbol.into());
            assert!(validate_rule(&d).is_ok(), "{symbol} rejected");
        }
    }

    #[test]
    fn missing_fields_are_reported_by_name() {
        let mut d = draft();
        d.metric = None;
        assert_eq!(validate_rule(&d), Err(RuleValidationError::MissingField("metric")));

        let mut d = draft();
        d.threshold = None;
        assert_eq!(validate_rule(&d), Err(RuleValidationError::MissingField("threshold")));

        let mut d = draft();
        d.name = Some("   ".into());
        assert_eq!(validate_rule(&d), Err(RuleValidationError::EmptyField("name")));
    }

    #[test]
    fn rejects_bad_severity_and_duration() {
        let mut d = draft();
        d.severity = Some("warning".into());
        assert_eq!(
            validate_rule(&d),
            Err(RuleValidationError::UnknownSeverity("warning".into()))
        );

        let mut d = draft();
        d.duration_secs = Some(0);
        assert_eq!(validate_rule(&d), Err(RuleValidationError::NonPositiveDuration(0)));

        let mut d = draft();
        d.duration_secs = Some(-30);
        assert_eq!(validate_rule(&d), Err(RuleValidationError::NonPositiveDuration(-30)));
    }

    #[test]
    fn rejects_non_finite_threshold() {
        let mut d = draft();
        d.threshold = Some(f64::NAN);
        assert_eq!(validate_rule(&d), Err(RuleValidationError::NonFiniteThreshold));
    }
}
