use serde::Serialize;

/// Outcome of comparing one tick's decode result with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No code was found in the frame.
    Searching,
    /// A code was found and equals the target.
    Matching,
    /// A code was found but differs from the target.
    NotMatching,
}

/// Classify a decode result against the target.
///
/// Comparison is exact byte equality: no trimming, no case folding.
/// `"ok "` against `"ok"` is `NotMatching`.
pub fn evaluate(decoded: Option<&str>, target: &str) -> Verdict {
    match decoded {
        None => Verdict::Searching,
        Some(value) if value == target => Verdict::Matching,
        Some(_) => Verdict::NotMatching,
    }
}

/// What the presentation layer shows: a verdict, or nothing selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    NoTarget,
    Searching,
    Matching,
    NotMatching,
}

/// One-shot feedback emitted when the status changes into a decided state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCue {
    Accept,
    Reject,
}

impl From<Verdict> for MatchStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Searching => MatchStatus::Searching,
            Verdict::Matching => MatchStatus::Matching,
            Verdict::NotMatching => MatchStatus::NotMatching,
        }
    }
}

impl MatchStatus {
    /// Border color around the camera view, `None` when nothing is selected.
    pub fn border_color(&self) -> Option<&'static str> {
        match self {
            MatchStatus::NoTarget => None,
            MatchStatus::Searching => Some("yellow"),
            MatchStatus::Matching => Some("green"),
            MatchStatus::NotMatching => Some("red"),
        }
    }

    pub fn status_text(&self, target: &str) -> String {
        match self {
            MatchStatus::NoTarget => "Please select a size".to_string(),
            MatchStatus::Searching => format!("Searching for QR code {target}..."),
            MatchStatus::Matching => "OK".to_string(),
            MatchStatus::NotMatching => "Not matching".to_string(),
        }
    }

    pub fn cue(&self) -> Option<FeedbackCue> {
        match self {
            MatchStatus::Matching => Some(FeedbackCue::Accept),
            MatchStatus::NotMatching => Some(FeedbackCue::Reject),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_decode_is_searching_for_any_target() {
        for target in ["", "M", "L", " ok "] {
            assert_eq!(evaluate(None, target), Verdict::Searching);
        }
    }

    #[test]
    fn equal_value_matches() {
        assert_eq!(evaluate(Some("M"), "M"), Verdict::Matching);
    }

    #[test]
    fn different_value_does_not_match() {
        assert_eq!(evaluate(Some("L"), "M"), Verdict::NotMatching);
    }

    #[test]
    fn comparison_is_whitespace_and_case_sensitive() {
        assert_eq!(evaluate(Some("ok "), "ok"), Verdict::NotMatching);
        assert_eq!(evaluate(Some("OK"), "ok"), Verdict::NotMatching);
    }

    #[test]
    fn empty_target_is_total() {
        assert_eq!(evaluate(Some(""), ""), Verdict::Matching);
        assert_eq!(evaluate(Some("M"), ""), Verdict::NotMatching);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let first = evaluate(Some("L"), "M");
        for _ in 0..10 {
            assert_eq!(evaluate(Some("L"), "M"), first);
        }
    }

    #[test]
    fn presentation_mapping() {
        assert_eq!(MatchStatus::NoTarget.border_color(), None);
        assert_eq!(MatchStatus::Matching.border_color(), Some("green"));
        assert_eq!(
            MatchStatus::Searching.status_text("M"),
            "Searching for QR code M..."
        );
        assert_eq!(MatchStatus::NoTarget.status_text(""), "Please select a size");
        assert_eq!(MatchStatus::NotMatching.cue(), Some(FeedbackCue::Reject));
        assert_eq!(MatchStatus::Searching.cue(), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&MatchStatus::NotMatching).unwrap();
        assert_eq!(json, "\"not_matching\"");
    }
}
