//! Terminal chat client for the streaming endpoint.
//!
//! Usage: `chat-client [SERVER_URL]` (defaults to `CHAT_SERVER_URL`, then
//! `http://localhost:3000`). Start with `/temas Seguridad, Salud, Paz` or any
//! free text; `/salir` quits.

use std::io::Write;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use porquienvotar_api::core::chat_session::{
    priorities_message, read_answer_stream, ChatSession, TurnOutcome, TOPICS,
    UNEXPECTED_ERROR_MESSAGE,
};
use porquienvotar_api::core::errors::RATE_LIMITED_MESSAGE;
use porquienvotar_api::core::models::ChatRequest;

const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let server_url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CHAT_SERVER_URL").ok())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
    let endpoint = url::Url::parse(&server_url)
        .and_then(|base| base.join("/api/chat/stream"))
        .with_context(|| format!("invalid server url '{}'", server_url))?;

    let client = reqwest::Client::new();
    let mut session = ChatSession::new();

    println!("¿Por quién votar? Temas disponibles: {}", TOPICS.join(", "));
    println!("Escribe /temas seguido de 3 temas separados por comas, o tu mensaje.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/salir" {
            break;
        }

        let content = match line.strip_prefix("/temas") {
            Some(rest) => {
                let selected: Vec<&str> = rest.split(',').map(str::trim).collect();
                match priorities_message(&selected) {
                    Ok(message) => message,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                }
            }
            None => line.to_string(),
        };

        let request = match session.begin_turn(&content) {
            Ok(request) => request,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match run_turn(&client, endpoint.as_str(), &request, &mut session).await {
            Ok(outcome) => {
                if let Some(candidates) = outcome.candidates {
                    println!("\n\nTus candidatos:");
                    for candidate in candidates {
                        println!(
                            "  {} ({}%) - {}",
                            candidate.name, candidate.affinity, candidate.summary
                        );
                    }
                    break;
                }
            }
            Err(e) => {
                session.abort_turn();
                report_error(&e);
            }
        }
    }

    Ok(())
}

/// Sends one turn and prints the message field as it grows.
///
/// A body cut off midway still closes the turn with whatever was shown.
async fn run_turn(
    client: &reqwest::Client,
    endpoint: &str,
    request: &ChatRequest,
    session: &mut ChatSession,
) -> anyhow::Result<TurnOutcome> {
    let response = client
        .post(endpoint)
        .json(request)
        .send()
        .await
        .context("request failed")?;

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        anyhow::bail!(RATE_LIMITED_MESSAGE);
    }
    let response = response.error_for_status().context("server error")?;

    println!();
    let mut printed = 0usize;
    let accumulator = read_answer_stream(response.bytes_stream(), |tail| {
        print!("{}", tail);
        let _ = std::io::stdout().flush();
        printed += tail.chars().count();
    })
    .await;

    let outcome = session.complete_turn(&accumulator)?;
    let total = outcome.message.chars().count();
    if total > printed {
        let tail: String = outcome.message.chars().skip(printed).collect();
        print!("{}", tail);
    }
    println!();
    Ok(outcome)
}

fn report_error(error: &anyhow::Error) {
    if error.to_string() == RATE_LIMITED_MESSAGE {
        println!("\n{}", RATE_LIMITED_MESSAGE);
    } else {
        eprintln!("\n{} ({:#})", UNEXPECTED_ERROR_MESSAGE, error);
    }
}
