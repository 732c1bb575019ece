use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::AppError;

/// Maximum number of candidates the client ever shows.
pub const MAX_SUGGESTED_CANDIDATES: usize = 2;

/// Default when the model could not place the user.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Default when the model has no clear winner yet.
pub const UNDECIDED_CANDIDATE: &str = "Indeciso";

// ============ Conversation ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn of the conversation as exchanged with the browser and the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat*`.
///
/// The browser sends `messages`; older clients sent `history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "history", default)]
    pub messages: Vec<ChatMessage>,
}

// ============ LLM response ============

/// A recommended candidate with the computed affinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    /// 0..=100, rounded when the model answers with a fraction.
    #[serde(deserialize_with = "deserialize_affinity")]
    pub affinity: u8,
    pub summary: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
}

fn deserialize_affinity<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = f64::deserialize(deserializer)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(D::Error::custom(format!(
            "affinity must be between 0 and 100, got {}",
            value
        )));
    }
    Ok(value.round() as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positivo,
    Negativo,
    Neutro,
    Preocupado,
    Enojo,
    Esperanza,
    /// Anything outside the expected vocabulary (the model sometimes says "Miedo").
    #[serde(other)]
    Otro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Baja,
    Media,
    Alta,
    #[serde(other)]
    Otro,
}

/// A concern extracted from the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub topic: String,
    pub sentiment: Sentiment,
    pub urgency: Urgency,
}

/// The part of the model output that reaches the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub message: String,
    #[serde(default)]
    pub is_final_answer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_candidates: Option<Vec<Candidate>>,
}

/// Server-only extraction logged for analytics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HiddenAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_location_inferred: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_candidate: Option<String>,
    #[serde(default)]
    pub user_intents: Vec<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_summary: Option<String>,
}

/// Full structured answer expected from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub client_response: ClientResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_analysis: Option<HiddenAnalysis>,
}

impl LlmResponse {
    /// Answer used when no provider key is configured.
    pub fn development_mock() -> Self {
        Self {
            client_response: ClientResponse {
                message: "Modo de desarrollo: No se detectó API KEY. Por favor configura OPENAI_API_KEY o GOOGLE_API_KEY.".to_string(),
                is_final_answer: false,
                suggested_candidates: None,
            },
            hidden_analysis: Some(HiddenAnalysis {
                user_location_inferred: Some(UNKNOWN_LOCATION.to_string()),
                winning_candidate: Some("None".to_string()),
                user_intents: Vec::new(),
                conversation_summary: None,
            }),
        }
    }

    /// Answer used when the provider call failed. Carries no analysis so errors
    /// never end up in the analytics logs.
    pub fn fallback() -> Self {
        Self {
            client_response: ClientResponse {
                message: "Estamos trabajando por Colombia, intenta más tarde.".to_string(),
                is_final_answer: false,
                suggested_candidates: None,
            },
            hidden_analysis: None,
        }
    }

    /// Checks what serde cannot express and trims the candidate list.
    pub fn validate(mut self) -> Result<Self, AppError> {
        if self.client_response.message.trim().is_empty() {
            return Err(AppError::InvalidLlmResponse(
                "client_response.message is empty".to_string(),
            ));
        }

        if let Some(candidates) = self.client_response.suggested_candidates.as_mut() {
            if candidates.len() > MAX_SUGGESTED_CANDIDATES {
                tracing::warn!(
                    "Model suggested {} candidates, keeping the first {}",
                    candidates.len(),
                    MAX_SUGGESTED_CANDIDATES
                );
                candidates.truncate(MAX_SUGGESTED_CANDIDATES);
            }
        }

        Ok(self)
    }

    /// Candidates are only meaningful on the concluding turn.
    pub fn final_candidates(&self) -> Option<&[Candidate]> {
        if !self.client_response.is_final_answer {
            return None;
        }
        self.client_response.suggested_candidates.as_deref()
    }
}

// ============ Analytics ============

/// One persisted analytics record per answered turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsLog {
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the client IP.
    pub ip_hash: String,
    pub user_location: String,
    pub winning_candidate: String,
    pub user_intents: Vec<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_summary: Option<String>,
    pub conversation_length: i32,
}

/// A name/count pair for the dashboard aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub name: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_conversations: usize,
    pub top_concern: String,
    pub top_candidate: String,
    /// Five most mentioned intent topics.
    pub concerns: Vec<TallyEntry>,
    pub candidates: Vec<TallyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub stats: DashboardStats,
    pub logs: Vec<AnalyticsLog>,
}
