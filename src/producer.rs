//! Intent producer
//!
//! Turns a free-text message into a raw intent batch. The production
//! implementation calls Gemini with the ledger read surface and the
//! recent conversation as context; a deterministic amount-plus-concept
//! parser covers producer outages so a plain "Arriendo 120000" still
//! lands. Everything a producer returns is untrusted and re-validated
//! by the normalizer and executors.

use crate::error::EngineError;
use crate::ledger::LedgerStore;
use crate::memory::{ConversationTurn, TurnRole};
use crate::models::{Category, Commitment, Expense, MonthlyBudget, RawIntent};
use crate::normalizer;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Ledger read surface handed to the producer (and exposed at
/// `/api/context` for external producers). Row ids are included so
/// UPDATE/DELETE intents can target them.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerContext {
    pub categories: Vec<Category>,
    pub recent_expenses: Vec<Expense>,
    pub recent_commitments: Vec<Commitment>,
    pub monthly_budget: Option<MonthlyBudget>,
}

/// Snapshot the read surface for one user.
pub async fn gather_context(
    ledger: &dyn LedgerStore,
    user_id: Uuid,
    month: &str,
) -> Result<LedgerContext> {
    Ok(LedgerContext {
        categories: ledger.list_categories(user_id).await?,
        recent_expenses: ledger.recent_expenses(user_id, 15).await?,
        recent_commitments: ledger.recent_commitments(user_id, 10).await?,
        monthly_budget: ledger.get_monthly_budget(user_id, month).await?,
    })
}

#[async_trait::async_trait]
pub trait IntentProducer: Send + Sync {
    async fn produce(
        &self,
        message: &str,
        context: &LedgerContext,
        turns: &[ConversationTurn],
    ) -> Result<Vec<RawIntent>>;
}

/// Deterministic fallback: first number in the message is the amount,
/// the remaining words are the concept. Produces a CREATE the engine
/// can still disambiguate, or nothing when no amount is present.
pub fn fallback_parse(message: &str) -> Vec<RawIntent> {
    let mut amount: Option<i64> = None;
    let mut words: Vec<&str> = Vec::new();

    for token in message.split_whitespace() {
        if amount.is_none() {
            if let Some(parsed) =
                normalizer::coerce_amount(&Value::String(token.to_string()))
            {
                amount = Some(parsed);
                continue;
            }
        }
        words.push(token);
    }

    let Some(amount) = amount else {
        return Vec::new();
    };
    let concept = words.join(" ").trim().to_string();
    if concept.is_empty() {
        return Vec::new();
    }

    vec![RawIntent {
        intent: Some("CREATE".to_string()),
        category: Some(concept.clone()),
        concept: Some(concept),
        amount: Some(json!(amount)),
        ..RawIntent::default()
    }]
}

/// Gemini-backed producer (connection-pooled).
pub struct GeminiProducer {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiProducer {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        }
    }

    fn build_prompt(
        message: &str,
        context: &LedgerContext,
        turns: &[ConversationTurn],
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("CONTEXTO DEL LIBRO:\n");
        prompt.push_str(
            &serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string()),
        );
        prompt.push_str("\n\nCONVERSACIÓN RECIENTE:\n");
        for turn in turns {
            let who = match turn.role {
                TurnRole::User => "usuario",
                TurnRole::Assistant => "asistente",
            };
            prompt.push_str(&format!("{}: {}\n", who, turn.text));
        }
        prompt.push_str("\nMENSAJE ACTUAL:\n");
        prompt.push_str(message);
        prompt
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(EngineError::Producer(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        info!("Calling Gemini API for intent production");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Producer(format!("Gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Producer(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Producer(format!("Gemini parse error: {}", e)))?;

        parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| EngineError::Producer("Empty response from Gemini".to_string()))
    }
}

/// Pull the action batch out of the model's answer, tolerating ```json
/// fences and surrounding prose.
fn extract_payload(text: &str) -> Option<Value> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            if let Ok(parsed) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(parsed);
            }
        }
    }

    let open = text.find(['{', '['])?;
    let close = text.rfind(['}', ']'])?;
    if close <= open {
        return None;
    }
    serde_json::from_str(text[open..=close].trim()).ok()
}

#[async_trait::async_trait]
impl IntentProducer for GeminiProducer {
    async fn produce(
        &self,
        message: &str,
        context: &LedgerContext,
        turns: &[ConversationTurn],
    ) -> Result<Vec<RawIntent>> {
        let prompt = Self::build_prompt(message, context, turns);

        let answer = match self.call_api(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Intent producer unavailable, using fallback parser: {}", e);
                return Ok(fallback_parse(message));
            }
        };

        let batch = extract_payload(&answer)
            .map(|payload| normalizer::parse_batch(&payload))
            .unwrap_or_default();

        if batch.is_empty() {
            warn!("Producer answer carried no parseable intents, using fallback parser");
            return Ok(fallback_parse(message));
        }
        Ok(batch)
    }
}

/// Canned producer for tests.
pub struct MockProducer {
    batch: Vec<RawIntent>,
}

impl MockProducer {
    pub fn new(batch: Vec<RawIntent>) -> Self {
        Self { batch }
    }
}

#[async_trait::async_trait]
impl IntentProducer for MockProducer {
    async fn produce(
        &self,
        _message: &str,
        _context: &LedgerContext,
        _turns: &[ConversationTurn],
    ) -> Result<Vec<RawIntent>> {
        Ok(self.batch.clone())
    }
}

const SYSTEM_PROMPT: &str = r#"Eres el intérprete de intenciones de un asistente de presupuesto personal en español (montos en CLP, sin decimales).

Devuelve SOLO un JSON: un array de acciones, o un objeto {"intent": "MULTI_ACTION", "actions": [...], "response_text": "..."}.

Cada acción tiene "intent" ∈ {CREATE, UPDATE, DELETE, CREATE_CATEGORY, UPDATE_CATEGORY, DELETE_CATEGORY, CREATE_COMMITMENT, MARK_PAID_COMMITMENT, DELETE_COMMITMENT, UPDATE_GLOBAL_BUDGET, IGNORE_PENDING, TALK} y los campos que apliquen: section, category, amount, concept, target_id, target_type, new_name, new_section, new_budget, commitment_type (DEBT|LOAN), payment_method, response_text.

Reglas:
- Usa los ids del contexto para UPDATE/DELETE.
- Si el usuario no indica carpeta (section), omítela; el motor la resuelve.
- Para deudas ("le debo a X") usa commitment_type DEBT; para préstamos ("X me debe") usa LOAN. El campo concept lleva el motivo.
- Si el mensaje es solo conversación, responde con una acción TALK y response_text.
- Usa el marcador literal <USER_MESSAGE> en concept cuando el concepto sea el mensaje completo."#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
