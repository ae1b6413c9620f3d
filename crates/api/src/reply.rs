//! The in-band reply envelope.
//!
//! Every business outcome travels as HTTP 200 with a `code` field (plus
//! `error` on failure), so conflicts and not-found replies stay
//! distinguishable from transport failures. Only malformed requests and
//! failures below the business layer surface as HTTP errors.

use axum::Json;
use coordinator::{CoordinatorError, ReplyCode};
use serde::Serialize;

/// Envelope wrapping every coordinator reply.
#[derive(Debug, Serialize)]
pub struct Reply<T: Serialize> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Success payload, flattened into the envelope; absent on failure.
    #[serde(flatten)]
    pub body: Option<T>,
}

/// Body-less success reply.
#[derive(Debug, Serialize)]
pub struct Ack {}

/// Wraps a successful reply body.
pub fn ok<T: Serialize>(body: T) -> Json<Reply<T>> {
    Json(Reply {
        code: ReplyCode::Ok.as_i32(),
        error: None,
        body: Some(body),
    })
}

/// A success reply with no payload fields.
pub fn ack() -> Json<Reply<Ack>> {
    ok(Ack {})
}

/// Maps a coordinator error onto the envelope.
pub fn fail<T: Serialize>(e: &CoordinatorError) -> Json<Reply<T>> {
    Json(Reply {
        code: e.reply_code().as_i32(),
        error: Some(e.to_string()),
        body: None,
    })
}

/// Collapses a coordinator result into an envelope, mapping the success
/// value through `f`.
pub fn from_result<T, U, F>(result: coordinator::Result<T>, f: F) -> Json<Reply<U>>
where
    U: Serialize,
    F: FnOnce(T) -> U,
{
    match result {
        Ok(value) => ok(f(value)),
        Err(e) => fail(&e),
    }
}
