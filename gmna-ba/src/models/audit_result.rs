//! Audit results
//!
//! An [`AuditResult`] is the business record plus the scoring fields returned
//! by the auditor. One is created per record and never mutated afterwards.

use serde::{Deserialize, Serialize};

use super::BusinessRecord;

/// Maximum number of improvement points kept per result
pub const MAX_IMPROVEMENT_POINTS: usize = 5;

/// Verification status written into error placeholders
pub const ERROR_VERIFICATION_STATUS: &str = "Erro na análise";

/// Single improvement point written into error placeholders
pub const ERROR_IMPROVEMENT_POINT: &str = "Erro ao processar: tente novamente";

/// Scoring fields as returned by the analysis provider
///
/// `has_gmn_profile` and `overall_score` are required; a completion missing
/// either is treated as malformed. Everything else defaults to zero/false.
/// A `null` reads as zero/false/empty and counts accept integral floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditScores {
    #[serde(deserialize_with = "lenient::or_default")]
    pub has_gmn_profile: bool,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub verification_status: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub nap_consistency_score: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub has_products: bool,
    #[serde(default, deserialize_with = "lenient::count")]
    pub images_count: u32,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub has_geotags: bool,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub posts_per_week: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub rating: f64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_reviews: u32,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub review_response_rate: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub seo_score: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub engagement_score: f64,
    #[serde(deserialize_with = "lenient::or_default")]
    pub overall_score: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub improvement_points: Vec<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub should_invite_for_optimization: bool,
}

/// Field readers for provider JSON, which is loosely typed
mod lenient {
    use serde::{Deserialize, Deserializer};

    pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    /// Non-negative count; `15.0` reads as 15, negatives as 0
    pub fn count<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
        if !value.is_finite() {
            return Ok(0);
        }
        Ok(value.round().clamp(0.0, f64::from(u32::MAX)) as u32)
    }
}

impl AuditScores {
    /// Scores used when the auditor fails for an item
    pub fn error_placeholder() -> Self {
        Self {
            has_gmn_profile: false,
            verification_status: ERROR_VERIFICATION_STATUS.to_string(),
            nap_consistency_score: 0.0,
            has_products: false,
            images_count: 0,
            has_geotags: false,
            posts_per_week: 0.0,
            rating: 0.0,
            total_reviews: 0,
            review_response_rate: 0.0,
            seo_score: 0.0,
            engagement_score: 0.0,
            overall_score: 0.0,
            improvement_points: vec![ERROR_IMPROVEMENT_POINT.to_string()],
            should_invite_for_optimization: true,
        }
    }
}

/// Audit of one business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    #[serde(flatten)]
    pub business: BusinessRecord,
    #[serde(flatten)]
    pub scores: AuditScores,
}

impl AuditResult {
    /// Combine a record with provider scores
    ///
    /// Improvement points beyond [`MAX_IMPROVEMENT_POINTS`] are dropped.
    pub fn new(business: BusinessRecord, mut scores: AuditScores) -> Self {
        scores.improvement_points.truncate(MAX_IMPROVEMENT_POINTS);
        Self { business, scores }
    }

    /// Placeholder appended when auditing `business` failed
    pub fn error_placeholder(business: &BusinessRecord) -> Self {
        Self {
            business: business.clone(),
            scores: AuditScores::error_placeholder(),
        }
    }

    /// True for results produced by [`AuditResult::error_placeholder`]
    pub fn is_error_placeholder(&self) -> bool {
        self.scores.verification_status == ERROR_VERIFICATION_STATUS
    }

    pub fn name(&self) -> &str {
        &self.business.name
    }

    pub fn overall_score(&self) -> f64 {
        self.scores.overall_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_placeholder_zeroes_scores() {
        let record = BusinessRecord::new("Oficina Y", "Campinas");
        let result = AuditResult::error_placeholder(&record);

        assert_eq!(result.business, record);
        assert_eq!(result.scores.overall_score, 0.0);
        assert_eq!(result.scores.seo_score, 0.0);
        assert_eq!(result.scores.engagement_score, 0.0);
        assert_eq!(result.scores.nap_consistency_score, 0.0);
        assert_eq!(result.scores.total_reviews, 0);
        assert!(result.scores.should_invite_for_optimization);
        assert_eq!(result.scores.improvement_points.len(), 1);
        assert!(result.is_error_placeholder());
    }

    #[test]
    fn test_improvement_points_are_truncated() {
        let mut scores = AuditScores::error_placeholder();
        scores.verification_status = "Verificado".to_string();
        scores.improvement_points = (1..=8).map(|i| format!("ponto {}", i)).collect();

        let result = AuditResult::new(BusinessRecord::new("A", "B"), scores);
        assert_eq!(result.scores.improvement_points.len(), MAX_IMPROVEMENT_POINTS);
        assert!(!result.is_error_placeholder());
    }

    #[test]
    fn test_scores_require_overall_score() {
        let missing = serde_json::json!({ "has_gmn_profile": true });
        assert!(serde_json::from_value::<AuditScores>(missing).is_err());

        let minimal = serde_json::json!({ "has_gmn_profile": true, "overall_score": 72 });
        let scores: AuditScores = serde_json::from_value(minimal).unwrap();
        assert_eq!(scores.overall_score, 72.0);
        assert_eq!(scores.images_count, 0);
    }

    #[test]
    fn test_scores_tolerate_null_and_float_counts() {
        let loose = serde_json::json!({
            "has_gmn_profile": false,
            "verification_status": null,
            "rating": null,
            "images_count": 15.0,
            "total_reviews": null,
            "seo_score": 40,
            "overall_score": 35,
            "improvement_points": null
        });
        let scores: AuditScores = serde_json::from_value(loose).unwrap();

        assert_eq!(scores.rating, 0.0);
        assert_eq!(scores.images_count, 15);
        assert_eq!(scores.total_reviews, 0);
        assert_eq!(scores.seo_score, 40.0);
        assert_eq!(scores.verification_status, "");
        assert!(scores.improvement_points.is_empty());
    }

    #[test]
    fn test_result_serializes_flat() {
        let result = AuditResult::error_placeholder(&BusinessRecord::new("A", "B"));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["company_name"], "A");
        assert_eq!(json["overall_score"], 0.0);
        assert_eq!(json["should_invite_for_optimization"], true);

        let back: AuditResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
