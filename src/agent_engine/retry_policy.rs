use crate::agent_engine::state::VerificationResult;

const LOW_CONFIDENCE: f64 = 0.3;
const HIGH_CONFIDENCE: f64 = 0.8;

const INCOMPLETE_KEYWORDS: &[&str] = &[
    "incomplete",
    "not finished",
    "didn't complete",
    "unfinished",
    "not done",
    "still needs",
    "requires",
    "missing",
    "not sent",
    "not typed",
    "not clicked",
    "not focused",
    "no clear indicator",
];

/// Returns `(should_retry, reason)`. The first matching rule wins.
pub fn should_retry_step(result: &VerificationResult) -> (bool, String) {
    if result.success {
        return (false, "Step verified successfully".into());
    }

    let c = result.confidence;
    if c < LOW_CONFIDENCE {
        return (true, format!("Low confidence ({c}) - step likely failed"));
    }
    if c < HIGH_CONFIDENCE {
        return (true, format!("Moderate confidence ({c}) - step may have failed"));
    }

    let reasoning = result.reasoning.to_lowercase();
    if reasoning.contains("error") {
        return (true, "Error detected in verification".into());
    }
    if reasoning.contains("not found") {
        return (true, "Expected element not found".into());
    }
    if reasoning.contains("failed") {
        return (true, "Step explicitly marked as failed".into());
    }
    if let Some(keyword) = INCOMPLETE_KEYWORDS.iter().find(|k| reasoning.contains(*k)) {
        return (true, format!("Step appears incomplete ('{keyword}')"));
    }

    if let Some(next) = result.suggested_next_action() {
        if next.to_lowercase().contains("try") {
            return (true, format!("Verifier suggests another attempt: {next}"));
        }
    }

    (true, "Verification failed - retrying for completion".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed(confidence: f64, reasoning: &str) -> VerificationResult {
        VerificationResult::new(false, confidence, reasoning)
    }

    #[test]
    fn success_never_retries() {
        for (confidence, reasoning) in [(0.0, "error everywhere"), (0.5, "failed"), (1.0, "")] {
            let result = VerificationResult::new(true, confidence, reasoning);
            assert_eq!(
                should_retry_step(&result),
                (false, "Step verified successfully".to_string())
            );
        }
    }

    #[test]
    fn low_confidence_retries() {
        let (retry, reason) = should_retry_step(&failed(0.2, "looks fine"));
        assert!(retry);
        assert!(reason.starts_with("Low confidence (0.2)"));
    }

    #[test]
    fn moderate_confidence_wins_over_keywords() {
        let (retry, reason) = should_retry_step(&failed(0.5, "Element not found"));
        assert!(retry);
        assert!(reason.starts_with("Moderate confidence (0.5)"));
    }

    #[test]
    fn keyword_rules_in_priority_order() {
        let cases = [
            ("An ERROR dialog appeared and it failed", "Error detected in verification"),
            ("Button not found, step failed", "Expected element not found"),
            ("The click failed", "Step explicitly marked as failed"),
        ];
        for (reasoning, expected) in cases {
            assert_eq!(should_retry_step(&failed(0.9, reasoning)).1, expected);
        }
        let (_, reason) = should_retry_step(&failed(0.9, "Text is Not Typed yet"));
        assert_eq!(reason, "Step appears incomplete ('not typed')");
    }

    #[test]
    fn suggestion_with_try_retries() {
        let mut result = failed(0.85, "The window looks unchanged");
        result.llm_response = Some(json!({"suggested_next_action": "Try clicking the OK button"}));
        let (retry, reason) = should_retry_step(&result);
        assert!(retry);
        assert!(reason.contains("Try clicking the OK button"));
    }

    #[test]
    fn confident_failure_without_signals_still_retries() {
        let (retry, reason) = should_retry_step(&failed(0.95, "looks fine"));
        assert!(retry);
        assert_eq!(reason, "Verification failed - retrying for completion");
    }
}
