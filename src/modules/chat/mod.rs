//! Chat companion: the persisted conversation and one-shot daily check-in
//! replies. Messages are append-only and strictly ordered; the full history
//! is replayed to the generation endpoint on every new turn.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::{
    AppState, config,
    llm::{ChatTurn, LlmRequest, MessageRole},
    usage::{self, MODULE_CHAT, MODULE_CHECKIN},
    web::{ApiMessage, GeneratedText, json_error, llm_failure_response},
};

const SENDER_USER: &str = "user";
const SENDER_AI: &str = "ai";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat/messages", get(list_messages).post(send_message))
        .route("/api/chat/checkin", post(checkin_reply))
}

#[derive(Debug, sqlx::FromRow)]
struct ChatMessageRow {
    id: Uuid,
    sender: String,
    text: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageBody {
    pub id: Uuid,
    pub sender: String,
    pub text: String,
    pub created_at: String,
}

impl From<ChatMessageRow> for ChatMessageBody {
    fn from(row: ChatMessageRow) -> Self {
        Self {
            id: row.id,
            sender: row.sender,
            text: row.text,
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

/// A first-run empty history is seeded with the companion's greeting so the
/// conversation never starts blank.
async fn list_messages(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatMessageBody>>, (StatusCode, Json<ApiMessage>)> {
    let pool = state.pool();

    let rows = fetch_history(&pool).await.map_err(internal_error)?;
    if rows.is_empty() {
        let greeting = insert_message(&pool, SENDER_AI, config::GREETING)
            .await
            .map_err(internal_error)?;
        return Ok(Json(vec![greeting.into()]));
    }

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn fetch_history(pool: &PgPool) -> sqlx::Result<Vec<ChatMessageRow>> {
    sqlx::query_as::<_, ChatMessageRow>(
        "SELECT id, sender, text, created_at FROM chat_messages ORDER BY created_at, id",
    )
    .fetch_all(pool)
    .await
}

async fn insert_message(pool: &PgPool, sender: &str, text: &str) -> sqlx::Result<ChatMessageRow> {
    sqlx::query_as::<_, ChatMessageRow>(
        "INSERT INTO chat_messages (id, sender, text) VALUES ($1, $2, $3) \
         RETURNING id, sender, text, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(sender)
    .bind(text)
    .fetch_one(pool)
    .await
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ChatExchange {
    pub user: ChatMessageBody,
    pub ai: ChatMessageBody,
}

async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<ChatExchange>, (StatusCode, Json<ApiMessage>)> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "Message text is required."));
    }

    let pool = state.pool();

    // History is captured before the new turn so the model sees the prior
    // conversation plus exactly one fresh user message.
    let history = fetch_history(&pool).await.map_err(internal_error)?;
    let user_row = insert_message(&pool, SENDER_USER, text)
        .await
        .map_err(internal_error)?;

    let request = build_chat_request(&history, text);
    let response = state.llm_client().generate(request).await.map_err(|err| {
        error!(?err, "chat generation failed");
        llm_failure_response(&err)
    })?;

    if let Err(err) = usage::record_usage(&pool, MODULE_CHAT, &response.token_usage).await {
        error!(?err, "failed to record chat usage");
    }

    let ai_row = insert_message(&pool, SENDER_AI, &response.text)
        .await
        .map_err(internal_error)?;

    Ok(Json(ChatExchange {
        user: user_row.into(),
        ai: ai_row.into(),
    }))
}

fn build_chat_request(history: &[ChatMessageRow], text: &str) -> LlmRequest {
    let mut turns: Vec<ChatTurn> = history
        .iter()
        .map(|message| ChatTurn::new(role_for(&message.sender), message.text.clone()))
        .collect();
    turns.push(ChatTurn::new(MessageRole::User, text));

    LlmRequest::new(config::PERSONA).with_turns(turns)
}

fn role_for(sender: &str) -> MessageRole {
    if sender == SENDER_AI {
        MessageRole::Model
    } else {
        MessageRole::User
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckinBody {
    pub question: String,
    pub answer: String,
}

/// One-shot reply to a daily check-in answer; nothing is persisted.
async fn checkin_reply(
    State(state): State<AppState>,
    Json(body): Json<CheckinBody>,
) -> Result<Json<GeneratedText>, (StatusCode, Json<ApiMessage>)> {
    let answer = body.answer.trim();
    if answer.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "An answer is required."));
    }

    let prompt = build_checkin_prompt(body.question.trim(), answer);
    let request = LlmRequest::new(config::PERSONA).user(prompt);

    let response = state.llm_client().generate(request).await.map_err(|err| {
        error!(?err, "check-in generation failed");
        llm_failure_response(&err)
    })?;

    if let Err(err) =
        usage::record_usage(&state.pool(), MODULE_CHECKIN, &response.token_usage).await
    {
        error!(?err, "failed to record check-in usage");
    }

    Ok(Json(GeneratedText::new(response.text)))
}

fn build_checkin_prompt(question: &str, answer: &str) -> String {
    format!(
        "Soundous is answering a daily check-in. Her answer to \"{question}\" is \"{answer}\". Give her a short, caring, and informal reply in your usual persona."
    )
}

fn internal_error(err: sqlx::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "chat database error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, config::CONNECTION_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(sender: &str, text: &str) -> ChatMessageRow {
        ChatMessageRow {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            text: text.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 8, 6, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn history_replays_in_order_with_new_turn_last() {
        let history = vec![row(SENDER_AI, "hey"), row(SENDER_USER, "hi")];

        let request = build_chat_request(&history, "i had a long day");

        assert_eq!(request.system_instruction, config::PERSONA);
        assert_eq!(request.turns.len(), 3);
        assert_eq!(request.turns[0].role, MessageRole::Model);
        assert_eq!(request.turns[1].role, MessageRole::User);
        assert_eq!(request.turns[2].role, MessageRole::User);
        assert_eq!(request.turns[2].text, "i had a long day");
    }

    #[test]
    fn unknown_senders_are_treated_as_user() {
        assert_eq!(role_for(SENDER_AI), MessageRole::Model);
        assert_eq!(role_for(SENDER_USER), MessageRole::User);
        assert_eq!(role_for("something-else"), MessageRole::User);
    }

    #[test]
    fn checkin_prompt_quotes_question_and_answer() {
        let prompt = build_checkin_prompt("How did you sleep last night, Soundous?", "pretty well");

        assert_eq!(
            prompt,
            "Soundous is answering a daily check-in. Her answer to \"How did you sleep last night, Soundous?\" is \"pretty well\". Give her a short, caring, and informal reply in your usual persona."
        );
    }
}
