//! Per-item auditor
//!
//! One business record in, one [`AuditResult`] out. Implementations perform a
//! single request per call and never retry; retry policy belongs to callers.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AuditResult, AuditScores, BusinessRecord};

/// Auditor errors
#[derive(Debug, Error)]
pub enum AuditError {
    /// No credential available
    #[error("Auditor not configured: {0}")]
    Configuration(String),

    /// Provider answered with a non-success status
    #[error("Analysis provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Transport failure before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// Response missing content or not well-formed JSON
    #[error("Failed to parse analysis response: {0}")]
    Parse(String),
}

/// Produces an audit for a single business
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit(&self, business: &BusinessRecord) -> Result<AuditResult, AuditError>;

    /// False when a call is known to fail with [`AuditError::Configuration`]
    fn is_configured(&self) -> bool {
        true
    }
}

/// System instruction sent with every audit
pub const SYSTEM_PROMPT: &str = "Você é um especialista em auditoria de Google Meu Negócio. Responda SEMPRE em formato JSON válido, sem markdown ou texto adicional.";

/// Placeholder substituted for missing optional fields
pub const MISSING_FIELD: &str = "N/A";

const AUDIT_PROMPT_TEMPLATE: &str = r#"
Você é um especialista em auditoria de Google Meu Negócio (GMB/GMN).

Analise a seguinte empresa REAL e forneça uma auditoria completa baseada nos 12 critérios:

EMPRESA: {company_name}
CIDADE: {city}
ESTADO: {state}
CATEGORIA: {category}
TELEFONE: {phone}
ENDEREÇO: {address}
WEBSITE: {website}

📋 12 CRITÉRIOS DE AUDITORIA GMN:

1. Presença e verificação - Perfil existe e está verificado?
2. Consistência NAP - Nome, Endereço, Telefone consistentes?
3. Categorias - Categorias principais e secundárias corretas?
4. Horário de funcionamento - Horário atualizado e correto?
5. Fotos e vídeos - Mínimo de 10 fotos de qualidade?
6. Geotags nas imagens - Fotos com geolocalização?
7. Postagens recentes - Pelo menos 2 postagens por semana?
8. Avaliações - Quantidade e qualidade das avaliações?
9. Taxa de resposta - Proprietário responde avaliações?
10. Palavras-chave e SEO - Perfil otimizado para busca local?
11. Linkagem site/redes - Links para site e redes sociais?
12. Performance comparativa - Como está versus concorrentes?

IMPORTANTE: Retorne APENAS um JSON válido (sem markdown, sem texto adicional):

{
  "has_gmn_profile": true,
  "verification_status": "Verificado" | "Não verificado" | "Perfil não encontrado",
  "nap_consistency_score": 85,
  "has_products": true,
  "images_count": 15,
  "has_geotags": true,
  "posts_per_week": 2.5,
  "rating": 4.5,
  "total_reviews": 127,
  "review_response_rate": 85,
  "seo_score": 78,
  "engagement_score": 82,
  "overall_score": 75,
  "improvement_points": [
    "Adicionar mais 5 fotos de produtos",
    "Responder todas avaliações antigas",
    "Criar 2 postagens por semana",
    "Otimizar descrição com palavras-chave locais",
    "Adicionar horários especiais de feriados"
  ],
  "should_invite_for_optimization": true
}

REGRAS:
- has_gmn_profile: false se empresa NÃO tem perfil no GMN
- verification_status: "Perfil não encontrado" se não tiver perfil
- Todos os scores de 0 a 100
- overall_score: média ponderada de todos critérios
- improvement_points: 5 ações prioritárias e específicas
- should_invite_for_optimization: true se score < 70 ou não tem perfil
- rating: 0 a 5.0 (nota do Google)
- Se não tiver perfil, coloque valores baixos/zero nos campos numéricos
"#;

/// Fill the audit prompt for `business`
pub fn render_prompt(business: &BusinessRecord) -> String {
    let or_missing = |value: &Option<String>| -> String {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(MISSING_FIELD)
            .to_string()
    };

    // Substitute the business name last so a name containing a placeholder
    // token cannot be expanded.
    AUDIT_PROMPT_TEMPLATE
        .replace("{city}", &business.city)
        .replace("{state}", &or_missing(&business.state))
        .replace("{category}", &or_missing(&business.category))
        .replace("{phone}", &or_missing(&business.phone))
        .replace("{address}", &or_missing(&business.address))
        .replace("{website}", &or_missing(&business.website))
        .replace("{company_name}", &business.name)
}

/// Remove an optional Markdown code fence around a completion
///
/// Handles ```` ```json ```` and bare ```` ``` ```` fences; anything else is
/// returned trimmed.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse a completion into an audit of `business`
pub fn parse_completion(business: &BusinessRecord, content: &str) -> Result<AuditResult, AuditError> {
    let json = strip_code_fence(content);
    if json.is_empty() {
        return Err(AuditError::Parse("Empty completion".to_string()));
    }

    let scores: AuditScores =
        serde_json::from_str(json).map_err(|e| AuditError::Parse(e.to_string()))?;

    Ok(AuditResult::new(business.clone(), scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_substitutes_fields() {
        let business = BusinessRecord::new("Padaria X", "São Paulo").with_state("SP");
        let prompt = render_prompt(&business);

        assert!(prompt.contains("EMPRESA: Padaria X"));
        assert!(prompt.contains("CIDADE: São Paulo"));
        assert!(prompt.contains("ESTADO: SP"));
        assert!(prompt.contains("CATEGORIA: N/A"));
        assert!(prompt.contains("WEBSITE: N/A"));
        assert!(!prompt.contains("{phone}"));
    }

    #[test]
    fn test_render_prompt_does_not_expand_tokens_in_name() {
        let business = BusinessRecord::new("Loja {city}", "Recife");
        let prompt = render_prompt(&business);

        assert!(prompt.contains("EMPRESA: Loja {city}"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_completion() {
        let business = BusinessRecord::new("Padaria X", "São Paulo");
        let content = r#"```json
{"has_gmn_profile": true, "verification_status": "Verificado", "overall_score": 81,
 "rating": 4.6, "total_reviews": 210, "improvement_points": ["a", "b"]}
```"#;

        let result = parse_completion(&business, content).unwrap();
        assert_eq!(result.business, business);
        assert_eq!(result.scores.overall_score, 81.0);
        assert_eq!(result.scores.total_reviews, 210);
        assert_eq!(result.scores.improvement_points, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_completion_without_profile_keeps_real_scores() {
        let business = BusinessRecord::new("Bar Z", "Natal");
        let content = r#"{"has_gmn_profile": false, "verification_status": "Sem perfil",
 "rating": null, "images_count": 15.0, "total_reviews": 0, "overall_score": 12,
 "should_invite_for_optimization": true}"#;

        let result = parse_completion(&business, content).unwrap();
        assert!(!result.is_error_placeholder());
        assert_eq!(result.scores.rating, 0.0);
        assert_eq!(result.scores.images_count, 15);
        assert_eq!(result.scores.overall_score, 12.0);
    }

    #[test]
    fn test_parse_completion_rejects_prose() {
        let business = BusinessRecord::new("A", "B");
        let err = parse_completion(&business, "Desculpe, não posso ajudar.").unwrap_err();
        assert!(matches!(err, AuditError::Parse(_)));

        let err = parse_completion(&business, "```json\n```").unwrap_err();
        assert!(matches!(err, AuditError::Parse(_)));
    }
}
