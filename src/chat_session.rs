//! Client-side conversation state for the terminal chat client.

use futures_core::Stream;
use std::fmt::Display;
use tokio_stream::StreamExt;

use crate::errors::AppError;
use crate::models::{Candidate, ChatMessage, ChatRequest};
use crate::partial_json::StreamAccumulator;

/// Topics a citizen can pick to open the interview.
pub const TOPICS: [&str; 10] = [
    "Seguridad",
    "Economía",
    "Salud",
    "Educación",
    "Ambiente",
    "Justicia",
    "Derechos Sociales",
    "Agro",
    "Movilidad",
    "Paz",
];

pub const REQUIRED_TOPICS: usize = 3;

/// Message shown when a turn could not be parsed at all.
pub const UNEXPECTED_ERROR_MESSAGE: &str =
    "Ocurrió un error inesperado al conectar con el servidor.";

/// Builds the opening message from exactly three known topics.
///
/// Topic names match case-insensitively and are echoed in canonical form.
pub fn priorities_message(selected: &[&str]) -> Result<String, AppError> {
    if selected.len() != REQUIRED_TOPICS {
        return Err(AppError::BadRequest(format!(
            "choose exactly {} topics, got {}",
            REQUIRED_TOPICS,
            selected.len()
        )));
    }

    let mut canonical: Vec<&str> = Vec::with_capacity(REQUIRED_TOPICS);
    for name in selected {
        let topic = *TOPICS
            .iter()
            .find(|t| t.to_lowercase() == name.trim().to_lowercase())
            .ok_or_else(|| AppError::BadRequest(format!("unknown topic '{}'", name.trim())))?;
        if canonical.contains(&topic) {
            return Err(AppError::BadRequest(format!("topic '{}' chosen twice", topic)));
        }
        canonical.push(topic);
    }

    Ok(format!(
        "Mis 3 prioridades para Colombia son: {}. ¿Cómo se alinean los candidatos con estas preocupaciones?",
        canonical.join(", ")
    ))
}

/// Drains a streamed answer body, calling `on_visible` with each newly visible
/// piece of the message.
///
/// A transport error ends the read early. Everything that arrived before it
/// stays in the accumulator, so the turn can still be closed with
/// [`ChatSession::complete_turn`].
pub async fn read_answer_stream<S, B, E, F>(body: S, mut on_visible: F) -> StreamAccumulator
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&str),
{
    tokio::pin!(body);
    let mut accumulator = StreamAccumulator::new();
    let mut shown = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(
                    "Answer stream interrupted after {} bytes: {}",
                    accumulator.text().len(),
                    e
                );
                break;
            }
        };
        accumulator.push_bytes(chunk.as_ref());

        if let Some(visible) = accumulator.visible_message() {
            let tail: String = visible.chars().skip(shown).collect();
            if !tail.is_empty() {
                shown += tail.chars().count();
                on_visible(&tail);
            }
        }
    }

    accumulator
}

/// What a finished turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub message: String,
    /// Present only on the concluding turn.
    pub candidates: Option<Vec<Candidate>>,
}

/// Conversation history kept by the client between turns.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    history: Vec<ChatMessage>,
    candidates: Option<Vec<Candidate>>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn has_started(&self) -> bool {
        !self.history.is_empty()
    }

    /// Final recommendation, once the interview concluded.
    pub fn candidates(&self) -> Option<&[Candidate]> {
        self.candidates.as_deref()
    }

    /// Records the user's message and returns the request body for this turn.
    pub fn begin_turn(&mut self, content: &str) -> Result<ChatRequest, AppError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::BadRequest("message must not be empty".to_string()));
        }
        self.history.push(ChatMessage::user(content));
        Ok(ChatRequest {
            messages: self.history.clone(),
        })
    }

    /// Closes a turn from the streamed body.
    ///
    /// A body that does not parse keeps whatever message was visible; with no
    /// visible message either the turn fails and the caller should
    /// [`abort_turn`](Self::abort_turn).
    pub fn complete_turn(&mut self, accumulator: &StreamAccumulator) -> Result<TurnOutcome, AppError> {
        let outcome = match accumulator.finish() {
            Ok(response) => TurnOutcome {
                candidates: response.final_candidates().map(<[Candidate]>::to_vec),
                message: response.client_response.message,
            },
            Err(e) => {
                let message = accumulator
                    .visible_message()
                    .filter(|m| !m.trim().is_empty())
                    .ok_or(e)?;
                tracing::warn!("Stream ended without a parseable object, keeping visible text");
                TurnOutcome {
                    message,
                    candidates: None,
                }
            }
        };

        self.history.push(ChatMessage::assistant(outcome.message.clone()));
        if let Some(ref candidates) = outcome.candidates {
            self.candidates = Some(candidates.clone());
        }
        Ok(outcome)
    }

    /// Drops the pending user message after a failed request.
    pub fn abort_turn(&mut self) {
        if let Some(last) = self.history.last() {
            if last.role == crate::models::Role::User {
                self.history.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_message() {
        let message = priorities_message(&["seguridad", "SALUD", "derechos sociales"]).unwrap();
        assert_eq!(
            message,
            "Mis 3 prioridades para Colombia son: Seguridad, Salud, Derechos Sociales. ¿Cómo se alinean los candidatos con estas preocupaciones?"
        );

        assert!(priorities_message(&["Seguridad", "Salud"]).is_err());
        assert!(priorities_message(&["Seguridad", "Salud", "Fútbol"]).is_err());
        assert!(priorities_message(&["Seguridad", "Salud", "salud"]).is_err());
    }

    #[test]
    fn test_turn_roundtrip_records_plain_assistant_text() {
        let mut session = ChatSession::new();
        let request = session.begin_turn("Hola").unwrap();
        assert_eq!(request.messages.len(), 1);

        let mut acc = StreamAccumulator::new();
        acc.push(r#"{"client_response":{"message":"¿Qué te preocupa?","is_final_answer":false}}"#);
        let outcome = session.complete_turn(&acc).unwrap();

        assert_eq!(outcome.message, "¿Qué te preocupa?");
        assert!(outcome.candidates.is_none());
        assert_eq!(session.history()[1], ChatMessage::assistant("¿Qué te preocupa?"));
    }

    #[test]
    fn test_final_turn_surfaces_candidates() {
        let mut session = ChatSession::new();
        session.begin_turn("Mano dura y mercado").unwrap();

        let mut acc = StreamAccumulator::new();
        acc.push(
            r#"{"client_response":{"message":"Tu candidato","is_final_answer":true,
            "suggested_candidates":[{"id":"abelardo_espriella","name":"Abelardo De La Espriella",
            "affinity":81,"summary":"Coinciden en seguridad","imageUrl":"/images/abelardo.jpg",
            "party":"Independiente"}]}}"#,
        );
        let outcome = session.complete_turn(&acc).unwrap();

        assert_eq!(outcome.candidates.as_ref().unwrap()[0].affinity, 81);
        assert_eq!(session.candidates().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_body_keeps_received_text() {
        let chunks: Vec<Result<&[u8], &str>> = vec![
            Ok(br#"{"client_response":{"message":"Entiendo tu preocupaci"#.as_slice()),
            Ok("ón por la seguridad".as_bytes()),
            Err("connection reset"),
            Ok(br#"","is_final_answer":false}}"#.as_slice()),
        ];

        let mut printed = String::new();
        let acc = read_answer_stream(tokio_stream::iter(chunks), |tail| printed.push_str(tail)).await;
        assert_eq!(printed, "Entiendo tu preocupación por la seguridad");

        let mut session = ChatSession::new();
        session.begin_turn("Me preocupa la seguridad").unwrap();
        let outcome = session.complete_turn(&acc).unwrap();

        assert_eq!(outcome.message, "Entiendo tu preocupación por la seguridad");
        assert_eq!(session.history().len(), 2);
        assert_eq!(
            session.history()[1],
            ChatMessage::assistant("Entiendo tu preocupación por la seguridad")
        );
    }

    #[tokio::test]
    async fn test_error_after_complete_answer_keeps_final_object() {
        let answer = r#"{"client_response":{"message":"Tu candidato","is_final_answer":true,
            "suggested_candidates":[{"id":"a","name":"A","affinity":100.6,"summary":"",
            "imageUrl":""}]}}"#;
        let chunks: Vec<Result<&[u8], &str>> = vec![Ok(answer.as_bytes()), Err("body aborted")];

        let acc = read_answer_stream(tokio_stream::iter(chunks), |_| {}).await;

        let mut session = ChatSession::new();
        session.begin_turn("Hola").unwrap();
        let outcome = session.complete_turn(&acc).unwrap();

        // The out-of-range affinity fails parsing; the visible text survives.
        assert_eq!(outcome.message, "Tu candidato");
        assert!(outcome.candidates.is_none());
        assert!(session.has_started());
    }

    #[test]
    fn test_truncated_stream_keeps_visible_message() {
        let mut session = ChatSession::new();
        session.begin_turn("Hola").unwrap();

        let mut acc = StreamAccumulator::new();
        acc.push(r#"{"client_response":{"message":"Cuéntame más"#);
        let outcome = session.complete_turn(&acc).unwrap();
        assert_eq!(outcome.message, "Cuéntame más");

        let mut empty_session = ChatSession::new();
        empty_session.begin_turn("Hola").unwrap();
        assert!(empty_session.complete_turn(&StreamAccumulator::new()).is_err());
        empty_session.abort_turn();
        assert!(!empty_session.has_started());
    }
}
