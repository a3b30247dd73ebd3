use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use skillswap_crypto::TextCipher;
use skillswap_db::models::FeedbackRow;
use skillswap_db::{Database, now_rfc3339};
use skillswap_gateway::ApiError;
use skillswap_types::api::{Claims, FeedbackRequest, FeedbackView};
use skillswap_types::models::ExchangeStatus;

use crate::AppState;
use crate::exchanges::{blocking, promote_if_both_confirmed};

// -- Handlers --

pub async fn submit(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let view = blocking(move || submit_feedback(&db, &cipher, claims.sub, exchange_id, req))
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "feedback": view }))))
}

pub async fn list(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let views = blocking(move || list_feedback(&db, &cipher, claims.sub, exchange_id)).await?;
    Ok(Json(json!({ "success": true, "feedback": views })))
}

// -- Service --

/// Insert-or-update the caller's rating of the other participant. Gated on
/// effective completion; an accepted exchange with both confirmations in is
/// promoted to completed on the way through.
pub fn submit_feedback(
    db: &Database,
    cipher: &TextCipher,
    user_id: i64,
    exchange_id: i64,
    req: FeedbackRequest,
) -> Result<FeedbackView, ApiError> {
    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::Validation("rating must be between 1 and 5".into()));
    }

    let row = db
        .get_exchange(exchange_id)?
        .ok_or_else(|| ApiError::NotFound("Exchange not found".into()))?;
    if !row.is_participant(user_id) {
        return Err(ApiError::Forbidden("Forbidden".into()));
    }
    if row.effective_status() != ExchangeStatus::Completed {
        return Err(ApiError::InvalidState(
            "Feedback is available once the exchange is completed".into(),
        ));
    }
    promote_if_both_confirmed(db, exchange_id)?;

    let to_user_id = row.other_participant(user_id);
    let comment = cipher.encrypt(req.comment.as_deref().unwrap_or("").trim());
    let saved = db.upsert_feedback(
        exchange_id,
        user_id,
        to_user_id,
        req.rating,
        &comment,
        &now_rfc3339(),
    )?;

    let names = db.user_names(&[user_id, to_user_id])?;
    Ok(build_view(cipher, saved, &names))
}

pub fn list_feedback(
    db: &Database,
    cipher: &TextCipher,
    user_id: i64,
    exchange_id: i64,
) -> Result<Vec<FeedbackView>, ApiError> {
    let row = db
        .get_exchange(exchange_id)?
        .ok_or_else(|| ApiError::NotFound("Exchange not found".into()))?;
    if !row.is_participant(user_id) {
        return Err(ApiError::Forbidden("Forbidden".into()));
    }

    let rows = db.feedback_for_exchange(exchange_id)?;
    let names = db.user_names(&[row.requester_id, row.owner_id])?;
    Ok(rows
        .into_iter()
        .map(|fb| build_view(cipher, fb, &names))
        .collect())
}

fn build_view(
    cipher: &TextCipher,
    row: FeedbackRow,
    names: &HashMap<i64, String>,
) -> FeedbackView {
    FeedbackView {
        id: row.id,
        exchange_id: row.exchange_id,
        from_name: names.get(&row.from_user_id).cloned().unwrap_or_default(),
        to_name: names.get(&row.to_user_id).cloned().unwrap_or_default(),
        from_user_id: row.from_user_id,
        to_user_id: row.to_user_id,
        rating: row.rating,
        comment: cipher.decrypt(&row.comment),
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillswap_crypto::keys::generate_key;
    use skillswap_db::models::ParticipantSide;
    use skillswap_types::api::{CreateExchangeRequest, RespondRequest};

    struct Fixture {
        db: Database,
        cipher: TextCipher,
        alice: i64,
        bob: i64,
        exchange_id: i64,
    }

    fn accepted_fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let cipher = TextCipher::new(generate_key());
        let alice = db.insert_user("Alice").unwrap();
        let bob = db.insert_user("Bob").unwrap();
        let guitar = db.insert_skill(alice, "Guitar", "").unwrap();
        let sketching = db.insert_skill(bob, "Sketching", "").unwrap();

        let req = CreateExchangeRequest {
            receiver: Some(bob),
            offered_skills: Some(vec![guitar]),
            interested_skills: Some(vec![sketching]),
            ..Default::default()
        };
        let view = crate::exchanges::create_exchange(&db, &cipher, alice, req).unwrap();
        let respond = RespondRequest {
            status: "accepted".into(),
            skill_offered: Some(guitar),
            skill_requested: Some(sketching),
        };
        crate::exchanges::respond_to_exchange(&db, &cipher, bob, view.id, respond).unwrap();

        Fixture { db, cipher, alice, bob, exchange_id: view.id }
    }

    fn rating(value: i64, comment: &str) -> FeedbackRequest {
        FeedbackRequest { rating: value, comment: Some(comment.into()) }
    }

    #[test]
    fn feedback_requires_effective_completion() {
        let f = accepted_fixture();

        let err = submit_feedback(&f.db, &f.cipher, f.alice, f.exchange_id, rating(5, "great"))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));

        let err = submit_feedback(&f.db, &f.cipher, f.alice, f.exchange_id, rating(0, ""))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn feedback_promotes_a_doubly_confirmed_exchange() {
        let f = accepted_fixture();
        // Both confirmations landed but the promotion has not: the exchange
        // is effectively completed, so feedback goes through and promotes.
        f.db.confirm_completion(f.exchange_id, ParticipantSide::Requester, &now_rfc3339())
            .unwrap();
        f.db.confirm_completion(f.exchange_id, ParticipantSide::Owner, &now_rfc3339())
            .unwrap();

        let view =
            submit_feedback(&f.db, &f.cipher, f.alice, f.exchange_id, rating(4, "solid")).unwrap();
        assert_eq!(view.to_user_id, f.bob);
        assert_eq!(view.to_name, "Bob");
        assert_eq!(view.comment, "solid");

        let row = f.db.get_exchange(f.exchange_id).unwrap().unwrap();
        assert_eq!(row.status, ExchangeStatus::Completed);
    }

    #[test]
    fn resubmission_overwrites_in_place() {
        let f = accepted_fixture();
        f.db.confirm_completion(f.exchange_id, ParticipantSide::Requester, &now_rfc3339())
            .unwrap();
        f.db.confirm_completion(f.exchange_id, ParticipantSide::Owner, &now_rfc3339())
            .unwrap();

        let first =
            submit_feedback(&f.db, &f.cipher, f.alice, f.exchange_id, rating(2, "rough")).unwrap();
        let second =
            submit_feedback(&f.db, &f.cipher, f.alice, f.exchange_id, rating(5, "got better"))
                .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.rating, 5);

        let listed = list_feedback(&f.db, &f.cipher, f.bob, f.exchange_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].comment, "got better");

        // Comment is opaque at rest.
        let raw = f.db.feedback_for_exchange(f.exchange_id).unwrap();
        assert!(raw[0].comment.starts_with("enc:v1:"));

        let outsider = f.db.insert_user("Carol").unwrap();
        let err = list_feedback(&f.db, &f.cipher, outsider, f.exchange_id).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
