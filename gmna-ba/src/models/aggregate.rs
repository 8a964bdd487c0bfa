//! Audit aggregates derived from a result set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuditResult;

/// Traffic-light summary of an aggregate score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Green,
    Yellow,
    Red,
}

impl ComplianceStatus {
    /// green ≥ 80, yellow ≥ 50, red otherwise
    pub fn from_score(score: i64) -> Self {
        if score >= 80 {
            ComplianceStatus::Green
        } else if score >= 50 {
            ComplianceStatus::Yellow
        } else {
            ComplianceStatus::Red
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Green => "green",
            ComplianceStatus::Yellow => "yellow",
            ComplianceStatus::Red => "red",
        }
    }
}

/// How the audited set compares within its segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalComparison {
    pub segment_average: i64,
    pub position_in_segment: String,
    pub key_differentiators: Vec<String>,
}

/// Fixed recommendations attached to every aggregate
const SUGGESTIONS: [&str; 5] = [
    "Criar perfis GMN para empresas sem presença online",
    "Implementar estratégia de solicitação de avaliações",
    "Adicionar pelo menos 10 fotos de qualidade em cada perfil",
    "Responder todas as avaliações (meta: 80% de taxa de resposta)",
    "Publicar 2-3 vezes por semana no GMN",
];

/// Summary row written to `audits`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditAggregate {
    pub segment: String,
    pub city: String,
    pub state: Option<String>,
    /// Rounded mean of the results' overall scores
    pub overall_score: i64,
    pub compliance_status: ComplianceStatus,
    pub opportunities: Vec<String>,
    pub suggestions: Vec<String>,
    pub local_comparison: LocalComparison,
    pub analysis_summary: String,
    pub companies_analyzed: usize,
}

impl AuditAggregate {
    /// Derive the aggregate; `None` for an empty result set
    pub fn from_results(
        segment: &str,
        city: &str,
        state: Option<&str>,
        results: &[AuditResult],
    ) -> Option<Self> {
        if results.is_empty() {
            return None;
        }

        let count = results.len();
        let n = count as f64;
        let overall_score = mean(results, |r| r.scores.overall_score).round() as i64;
        let with_profile = results.iter().filter(|r| r.scores.has_gmn_profile).count();
        let profile_pct = (with_profile as f64 / n * 100.0).round() as i64;
        let needs_optimization = results
            .iter()
            .filter(|r| r.scores.overall_score < 70.0)
            .count();
        let low_response = results
            .iter()
            .filter(|r| r.scores.review_response_rate < 50.0)
            .count();

        let opportunities = vec![
            format!(
                "{} empresas sem perfil GMN ({}%)",
                count - with_profile,
                100 - profile_pct
            ),
            format!("{} empresas precisam de otimização urgente", needs_optimization),
            format!(
                "{} empresas com baixa taxa de resposta a avaliações",
                low_response
            ),
        ];

        let position_in_segment = if overall_score >= 70 {
            "Acima da média"
        } else {
            "Abaixo da média"
        };

        let local_comparison = LocalComparison {
            segment_average: overall_score,
            position_in_segment: position_in_segment.to_string(),
            key_differentiators: vec![
                format!("{}% das empresas possui perfil GMN", profile_pct),
                format!(
                    "Média de {} avaliações por empresa",
                    mean(results, |r| r.scores.total_reviews as f64).round() as i64
                ),
                format!(
                    "Nota média do segmento: {:.1}",
                    mean(results, |r| r.scores.rating)
                ),
            ],
        };

        let analysis_summary = format!(
            "Análise de {} empresas reais do segmento {} em {}. Score médio: {}/100. {} empresas possuem perfil GMN verificado.",
            count, segment, city, overall_score, with_profile
        );

        Some(Self {
            segment: segment.to_string(),
            city: city.to_string(),
            state: state.map(str::to_string),
            overall_score,
            compliance_status: ComplianceStatus::from_score(overall_score),
            opportunities,
            suggestions: SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
            local_comparison,
            analysis_summary,
            companies_analyzed: count,
        })
    }
}

fn mean(results: &[AuditResult], field: impl Fn(&AuditResult) -> f64) -> f64 {
    results.iter().map(field).sum::<f64>() / results.len() as f64
}

/// Aggregate as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAudit {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    #[serde(flatten)]
    pub aggregate: AuditAggregate,
    pub created_at: DateTime<Utc>,
}

/// Aggregate plus its companies, best score first
#[derive(Debug, Clone, Serialize)]
pub struct AuditDetail {
    pub audit: StoredAudit,
    pub companies: Vec<AuditResult>,
}

/// Listing entry for recent audits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub audit_id: Uuid,
    pub segment: String,
    pub city: String,
    pub overall_score: i64,
    pub companies_analyzed: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditScores, BusinessRecord};

    fn scored(name: &str, overall: f64, has_profile: bool, response_rate: f64) -> AuditResult {
        let mut scores = AuditScores::error_placeholder();
        scores.verification_status = "Verificado".to_string();
        scores.overall_score = overall;
        scores.has_gmn_profile = has_profile;
        scores.review_response_rate = response_rate;
        scores.total_reviews = 100;
        scores.rating = 4.2;
        AuditResult::new(BusinessRecord::new(name, "Recife"), scores)
    }

    #[test]
    fn test_empty_results_have_no_aggregate() {
        assert!(AuditAggregate::from_results("Diversos", "Recife", None, &[]).is_none());
    }

    #[test]
    fn test_aggregate_scores_and_opportunities() {
        let results = vec![
            scored("A", 90.0, true, 80.0),
            scored("B", 65.0, true, 30.0),
            scored("C", 40.0, false, 10.0),
        ];

        let aggregate =
            AuditAggregate::from_results("Padarias", "Recife", Some("PE"), &results).unwrap();

        // (90 + 65 + 40) / 3 = 65
        assert_eq!(aggregate.overall_score, 65);
        assert_eq!(aggregate.compliance_status, ComplianceStatus::Yellow);
        assert_eq!(aggregate.companies_analyzed, 3);
        assert_eq!(aggregate.opportunities[0], "1 empresas sem perfil GMN (33%)");
        assert_eq!(aggregate.opportunities[1], "2 empresas precisam de otimização urgente");
        assert_eq!(
            aggregate.opportunities[2],
            "2 empresas com baixa taxa de resposta a avaliações"
        );
        assert_eq!(aggregate.suggestions.len(), 5);
        assert_eq!(aggregate.local_comparison.position_in_segment, "Abaixo da média");
        assert_eq!(
            aggregate.local_comparison.key_differentiators[2],
            "Nota média do segmento: 4.2"
        );
        assert!(aggregate.analysis_summary.contains("3 empresas"));
    }

    #[test]
    fn test_compliance_thresholds() {
        assert_eq!(ComplianceStatus::from_score(80), ComplianceStatus::Green);
        assert_eq!(ComplianceStatus::from_score(79), ComplianceStatus::Yellow);
        assert_eq!(ComplianceStatus::from_score(50), ComplianceStatus::Yellow);
        assert_eq!(ComplianceStatus::from_score(49), ComplianceStatus::Red);
    }
}
