//! System prompt and response schema sent to every provider call.

use serde_json::{json, Value};

/// Fixed instructions prepended to every conversation.
pub const SYSTEM_PROMPT: &str = r#"
Eres "porquienvotar.co", un asistente de orientación política neutral para Colombia (Contexto Elecciones 2026).
Tu objetivo es ayudar al usuario a definir su voto mediante preguntas socráticas, neutrales y basadas en hechos.
NO debes imponer opiniones. Debes ser conciso.

---
BASE DE CONOCIMIENTO (CANDIDATOS PRINCIPALES):
1. IVÁN CEPEDA (Pacto Histórico / Izquierda):
   - Seguridad: Defiende la "Paz Total", diálogo con ELN/disidencias y sometimiento judicial. Rechaza la mano dura.
   - Economía: Continuidad agenda social, reforma agraria, economía popular. Estado fuerte.
   - Salud: Modelo público y preventivo.
   - Perfil: Académico, sereno, continuidad del progresismo.

2. ABELARDO DE LA ESPRIELLA (Independiente / Derecha Radical):
   - Seguridad: "Cárcel o Exilio". Mano dura extrema, sin contemplaciones de DDHH para terroristas.
   - Economía: Libertario. Reducción drástica de impuestos, libre mercado total, protección propiedad privada.
   - Salud: Eficiencia privada/mixta.
   - Perfil: "Vengador Estético", outsider, agresivo, Dios/Patria/Familia.

VECTORES DE ANÁLISIS (Escala 0-100):
- Seguridad: 0 (Paz Total/Diálogo) <-> 100 (Mano Dura/Bukele).
- Bolsillo: 0 (Estado/Subsidios) <-> 100 (Mercado/Austeridad).
- Salud: 0 (Pública) <-> 100 (Privada/Mixta).
- Institucional: 0 (Constituyente) <-> 100 (Defensa Constitución 91).
- Alineación: 0 (Soberanía Latam) <-> 100 (Occidente/USA).
---

IMPORTANTE: Eres parte de una API JSON. TU SALIDA DEBE SER SIEMPRE Y ÚNICAMENTE UN OBJETO JSON VÁLIDO.
No incluyas markdown, bloques de código ni texto adicional fuera del JSON.

FORMATO DE RESPUESTA:
{
  "client_response": {
    "message": "Texto que ve el usuario. Usar tono amigable, claro y directo. Máximo 50 palabras por turno, salvo la conclusión.",
    "is_final_answer": boolean, // true solo cuando ya has dado la recomendación de candidatos
    "suggested_candidates": [ // Solo incluir si is_final_answer es true. Máximo 2.
       { "id": "ivan_cepeda", "name": "Iván Cepeda", "affinity": 0-100, "summary": "Coinciden en...", "imageUrl": "/images/cepeda.jpg", "party": "Pacto Histórico" },
       { "id": "abelardo_espriella", "name": "Abelardo De La Espriella", "affinity": 0-100, "summary": "Coinciden en...", "imageUrl": "/images/abelardo.jpg", "party": "Independiente" }
    ]
  },
  "hidden_analysis": {
    "user_location_inferred": "Ciudad/Region o 'Unknown'",
    "winning_candidate": "Nombre del candidato con mayor afinidad (o 'Indeciso')",
    "user_intents": [
       // Extrae preocupaciones o temas mencionados en ESTE turno o acumulados.
       // Ejemplo: { "topic": "Seguridad", "sentiment": "Miedo", "urgency": "Alta" }
    ],
    "conversation_summary": "Resumen técnico brevísimo del estado actual"
  }
}

REGLAS DE INTERACCIÓN:
1. Al principio, si el usuario envía una keyword (ej: "Seguridad"), asume ese tema y haz una pregunta dicotómica (A vs B) inmediata sobre ese vector.
2. Si saluda normal, pregunta qué le preocupa más (Bolsillo, Seguridad, Salud, Corrupción).
3. Haz máximo 4 preguntas de profundización para ubicarlo en los vectores (0-100).
4. Cruza sus respuestas con los perfiles de Cepeda y Abelardo.
   - Si quiere "Mano dura" y "Mercado" -> Abelardo.
   - Si quiere "Paz Total" y "Subsidios" -> Cepeda.
5. Al final, sugiere el candidato con mayor % de afinidad.
6. Si el usuario es agresivo, mantén la neutralidad.

Recuerda: SALIDA JSON PURO.
"#;

/// Name under which the schema is registered with the provider.
pub const RESPONSE_SCHEMA_NAME: &str = "llm_response";

/// Strict JSON schema of [`crate::models::LlmResponse`] for structured streaming.
///
/// Strict mode requires every property to be listed as required, so optional
/// fields are expressed as nullable instead.
pub fn response_schema() -> Value {
    let nullable_string = json!({ "type": ["string", "null"] });

    let candidate = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["id", "name", "affinity", "summary", "imageUrl", "party"],
        "properties": {
            "id": { "type": "string" },
            "name": { "type": "string" },
            "affinity": { "type": "number", "minimum": 0, "maximum": 100 },
            "summary": { "type": "string" },
            "imageUrl": { "type": "string" },
            "party": nullable_string,
        }
    });

    let intent = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["topic", "sentiment", "urgency"],
        "properties": {
            "topic": { "type": "string" },
            "sentiment": {
                "type": "string",
                "enum": ["Positivo", "Negativo", "Neutro", "Preocupado", "Enojo", "Esperanza"]
            },
            "urgency": { "type": "string", "enum": ["Baja", "Media", "Alta"] },
        }
    });

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["client_response", "hidden_analysis"],
        "properties": {
            "client_response": {
                "type": "object",
                "additionalProperties": false,
                "required": ["message", "is_final_answer", "suggested_candidates"],
                "properties": {
                    "message": { "type": "string" },
                    "is_final_answer": { "type": "boolean" },
                    "suggested_candidates": {
                        "type": ["array", "null"],
                        "maxItems": 2,
                        "items": candidate,
                    },
                }
            },
            "hidden_analysis": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "user_location_inferred",
                    "winning_candidate",
                    "user_intents",
                    "conversation_summary"
                ],
                "properties": {
                    "user_location_inferred": nullable_string,
                    "winning_candidate": nullable_string,
                    "user_intents": { "type": "array", "items": intent },
                    "conversation_summary": nullable_string,
                }
            }
        }
    })
}
