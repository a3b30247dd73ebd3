use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use skillswap_crypto::TextCipher;
use skillswap_db::models::{ExchangeRow, ParticipantSide, SkillRow};
use skillswap_db::{Database, is_unique_violation, now_rfc3339};
use skillswap_gateway::ApiError;
use skillswap_types::api::{
    Claims, CreateExchangeRequest, ExchangeSummary, ExchangeView, RespondRequest, SkillRef,
};
use skillswap_types::models::ExchangeStatus;

use crate::AppState;

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateExchangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let view = blocking(move || create_exchange(&db, &cipher, claims.sub, req)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "exchange": view }))))
}

pub async fn respond(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RespondRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let view = blocking(move || respond_to_exchange(&db, &cipher, claims.sub, exchange_id, req))
        .await?;
    Ok(Json(json!({ "success": true, "exchange": view })))
}

pub async fn complete(
    State(state): State<AppState>,
    Path(exchange_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let view = blocking(move || complete_exchange(&db, &cipher, claims.sub, exchange_id)).await?;
    Ok(Json(json!({ "success": true, "exchange": view })))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let views = blocking(move || list_for_user(&db, &cipher, claims.sub)).await?;
    Ok(Json(json!({ "success": true, "exchanges": views })))
}

/// `GET /exchanges/learning`: open exchanges where the caller is learning,
/// i.e. is the requester.
pub async fn learning(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let views =
        blocking(move || list_by_role(&db, &cipher, claims.sub, ParticipantSide::Requester))
            .await?;
    Ok(Json(json!({ "success": true, "exchanges": views })))
}

/// `GET /exchanges/teaching`: open exchanges where the caller is the owner
/// of the requested skill.
pub async fn teaching(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let cipher = state.chat.cipher.clone();
    let views = blocking(move || list_by_role(&db, &cipher, claims.sub, ParticipantSide::Owner))
        .await?;
    Ok(Json(json!({ "success": true, "exchanges": views })))
}

pub(crate) async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, ApiError> + Send + 'static,
) -> Result<T, ApiError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("blocking task join error: {e}")))?
}

// -- Negotiation service --

/// Merge the array form with the legacy singular field, keep positive ids
/// only, and de-duplicate preserving first occurrence.
fn normalize_skill_ids(list: Option<Vec<i64>>, legacy: Option<i64>) -> Vec<i64> {
    let raw = match (list, legacy) {
        (Some(list), _) if !list.is_empty() => list,
        (_, Some(single)) => vec![single],
        (Some(list), None) => list,
        (None, None) => vec![],
    };

    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|id| *id > 0 && seen.insert(*id))
        .collect()
}

pub fn create_exchange(
    db: &Database,
    cipher: &TextCipher,
    user_id: i64,
    req: CreateExchangeRequest,
) -> Result<ExchangeView, ApiError> {
    let owner_id = req
        .receiver
        .ok_or_else(|| ApiError::Validation("receiver is required".into()))?;
    if owner_id == user_id {
        return Err(ApiError::Validation(
            "You cannot open an exchange with yourself".into(),
        ));
    }

    let offered = normalize_skill_ids(req.offered_skills, req.skill_offered);
    let interested = normalize_skill_ids(req.interested_skills, req.skill_requested);
    if offered.is_empty() {
        return Err(ApiError::Validation("offeredSkills is required".into()));
    }
    if interested.is_empty() {
        return Err(ApiError::Validation("interestedSkills is required".into()));
    }

    if db.user_name(owner_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".into()));
    }

    // All-or-nothing skill validation: every id must resolve to the right owner.
    check_skill_ownership(db, &offered, user_id, "You can only offer your own skills")?;
    check_skill_ownership(
        db,
        &interested,
        owner_id,
        "You can only request skills owned by the other user",
    )?;

    // Friendly pre-check naming the existing status. The pair is directional:
    // the same two users with roles reversed is a different exchange.
    if let Some((_, status)) = db.find_live_exchange(user_id, owner_id)? {
        return Err(ApiError::Conflict(format!(
            "An exchange with this user already exists ({status})"
        )));
    }

    let message = cipher.encrypt(req.message.as_deref().unwrap_or("").trim());
    let exchange_id =
        match db.create_exchange(user_id, owner_id, &message, &offered, &interested, &now_rfc3339())
        {
            Ok(id) => id,
            // Lost the race past the pre-check: the partial unique index wins.
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::Conflict(
                    "An exchange with this user already exists".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

    load_view(db, cipher, exchange_id)
}

fn check_skill_ownership(
    db: &Database,
    skill_ids: &[i64],
    expected_owner: i64,
    wrong_owner_message: &str,
) -> Result<(), ApiError> {
    let skills = db.skills_by_ids(skill_ids)?;
    if skills.len() != skill_ids.len() {
        return Err(ApiError::NotFound("Skill not found".into()));
    }
    if skills.iter().any(|s| s.user_id != expected_owner) {
        return Err(ApiError::Validation(wrong_owner_message.into()));
    }
    Ok(())
}

pub fn respond_to_exchange(
    db: &Database,
    cipher: &TextCipher,
    user_id: i64,
    exchange_id: i64,
    req: RespondRequest,
) -> Result<ExchangeView, ApiError> {
    let row = db
        .get_exchange(exchange_id)?
        .ok_or_else(|| ApiError::NotFound("Exchange not found".into()))?;
    let side = row
        .side_of(user_id)
        .ok_or_else(|| ApiError::Forbidden("Forbidden".into()))?;

    let applied = match req.status.as_str() {
        "accepted" => {
            if side != ParticipantSide::Owner {
                return Err(ApiError::Forbidden(
                    "Only the recipient can accept or reject".into(),
                ));
            }
            let chosen_offered = req
                .skill_offered
                .ok_or_else(|| ApiError::Validation("skillOffered is required when accepting".into()))?;
            let chosen_requested = req.skill_requested.ok_or_else(|| {
                ApiError::Validation("skillRequested is required when accepting".into())
            })?;

            // The final pairing must come from the negotiation arrays.
            let (offered, interested) = db.negotiation_skills(exchange_id)?;
            if !offered.contains(&chosen_offered) {
                return Err(ApiError::Validation(
                    "skillOffered must be one of the proposed skills".into(),
                ));
            }
            if !interested.contains(&chosen_requested) {
                return Err(ApiError::Validation(
                    "skillRequested must be one of the requested skills".into(),
                ));
            }

            db.accept_exchange(exchange_id, chosen_offered, chosen_requested)?
        }
        "rejected" => {
            if side != ParticipantSide::Owner {
                return Err(ApiError::Forbidden(
                    "Only the recipient can accept or reject".into(),
                ));
            }
            db.resolve_exchange(exchange_id, ExchangeStatus::Rejected)?
        }
        "cancelled" => {
            if side != ParticipantSide::Requester {
                return Err(ApiError::Forbidden("Only the requester can cancel".into()));
            }
            db.resolve_exchange(exchange_id, ExchangeStatus::Cancelled)?
        }
        _ => {
            return Err(ApiError::Validation(
                "status must be accepted, rejected or cancelled".into(),
            ));
        }
    };

    // The conditional update only fires while the exchange is still pending.
    if !applied {
        return Err(ApiError::InvalidState(
            "This exchange has already been resolved".into(),
        ));
    }

    load_view(db, cipher, exchange_id)
}

// -- Completion service --

pub fn complete_exchange(
    db: &Database,
    cipher: &TextCipher,
    user_id: i64,
    exchange_id: i64,
) -> Result<ExchangeView, ApiError> {
    let row = db
        .get_exchange(exchange_id)?
        .ok_or_else(|| ApiError::NotFound("Exchange not found".into()))?;
    let side = row
        .side_of(user_id)
        .ok_or_else(|| ApiError::Forbidden("Forbidden".into()))?;

    // Already completed: return the current state, not an error.
    if row.status == ExchangeStatus::Completed {
        return load_view(db, cipher, exchange_id);
    }
    if row.status != ExchangeStatus::Accepted {
        return Err(ApiError::InvalidState(
            "Only accepted exchanges can be completed".into(),
        ));
    }

    // Set-if-null: repeat confirmations by the same party are no-ops.
    db.confirm_completion(exchange_id, side, &now_rfc3339())?;
    promote_if_both_confirmed(db, exchange_id)?;

    load_view(db, cipher, exchange_id)
}

/// Promote accepted -> completed once both confirmations are in. The update
/// is guarded, so of two racing callers only one flips the status; the other
/// just observes the completed row.
pub(crate) fn promote_if_both_confirmed(db: &Database, exchange_id: i64) -> Result<(), ApiError> {
    if let Some(row) = db.get_exchange(exchange_id)? {
        if row.status == ExchangeStatus::Accepted
            && row.effective_status() == ExchangeStatus::Completed
        {
            db.promote_completed(exchange_id, &now_rfc3339())?;
        }
    }
    Ok(())
}

// -- Listings --

pub fn list_for_user(
    db: &Database,
    cipher: &TextCipher,
    user_id: i64,
) -> Result<Vec<ExchangeView>, ApiError> {
    let rows = db.list_exchanges_for_user(user_id)?;
    Ok(build_views(db, cipher, rows)?)
}

pub fn list_by_role(
    db: &Database,
    cipher: &TextCipher,
    user_id: i64,
    side: ParticipantSide,
) -> Result<Vec<ExchangeSummary>, ApiError> {
    let rows: Vec<ExchangeRow> = db
        .list_open_exchanges_for_user(user_id)?
        .into_iter()
        .filter(|row| row.side_of(user_id) == Some(side))
        .collect();

    let exchange_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

    // The counterpart's feedback about the caller, keyed by exchange.
    let mut feedback_by_exchange = HashMap::new();
    for fb in db.feedback_for_exchanges(&exchange_ids)? {
        if fb.to_user_id == user_id {
            feedback_by_exchange.insert(fb.exchange_id, fb);
        }
    }

    let pairing_ids: Vec<i64> = rows
        .iter()
        .flat_map(|r| [r.skill_offered_id, r.skill_requested_id])
        .flatten()
        .collect();
    let descriptions: HashMap<i64, String> = db
        .skills_by_ids(&pairing_ids)?
        .into_iter()
        .map(|s| (s.id, s.description))
        .collect();

    let views = build_views(db, cipher, rows)?;
    Ok(views
        .into_iter()
        .map(|view| {
            let feedback = feedback_by_exchange.remove(&view.id);
            let requested_description = view
                .skill_requested_id
                .and_then(|id| descriptions.get(&id).cloned());
            let offered_description = view
                .skill_offered_id
                .and_then(|id| descriptions.get(&id).cloned());
            ExchangeSummary {
                requested_description,
                offered_description,
                feedback_rating: feedback.as_ref().map(|f| f.rating),
                feedback_comment: feedback.as_ref().map(|f| cipher.decrypt(&f.comment)),
                feedback_at: feedback.map(|f| f.created_at),
                exchange: view,
            }
        })
        .collect())
}

// -- View assembly --

pub(crate) fn load_view(
    db: &Database,
    cipher: &TextCipher,
    exchange_id: i64,
) -> Result<ExchangeView, ApiError> {
    let row = db
        .get_exchange(exchange_id)?
        .ok_or_else(|| ApiError::NotFound("Exchange not found".into()))?;
    let mut views = build_views(db, cipher, vec![row])?;
    views
        .pop()
        .ok_or_else(|| ApiError::NotFound("Exchange not found".into()))
}

/// Decorate raw rows for serialization: joined names and skill titles, the
/// negotiation arrays, decrypted message, and the effective status. The raw
/// stored status never leaves here.
pub(crate) fn build_views(
    db: &Database,
    cipher: &TextCipher,
    rows: Vec<ExchangeRow>,
) -> Result<Vec<ExchangeView>, ApiError> {
    let mut user_ids: Vec<i64> = rows
        .iter()
        .flat_map(|r| [r.requester_id, r.owner_id])
        .collect();
    user_ids.sort_unstable();
    user_ids.dedup();
    let names = db.user_names(&user_ids)?;

    let mut negotiation = HashMap::new();
    let mut skill_ids: Vec<i64> = rows
        .iter()
        .flat_map(|r| [r.skill_offered_id, r.skill_requested_id])
        .flatten()
        .collect();
    for row in &rows {
        let (offered, interested) = db.negotiation_skills(row.id)?;
        skill_ids.extend(&offered);
        skill_ids.extend(&interested);
        negotiation.insert(row.id, (offered, interested));
    }
    skill_ids.sort_unstable();
    skill_ids.dedup();
    let skills: HashMap<i64, SkillRow> = db
        .skills_by_ids(&skill_ids)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let skill_ref = |id: i64| -> SkillRef {
        SkillRef {
            id,
            title: skills.get(&id).map(|s| s.title.clone()).unwrap_or_default(),
        }
    };

    Ok(rows
        .into_iter()
        .map(|row| {
            let (offered, interested) = negotiation.remove(&row.id).unwrap_or_default();
            ExchangeView {
                id: row.id,
                requester_id: row.requester_id,
                owner_id: row.owner_id,
                skill_offered_id: row.skill_offered_id,
                skill_requested_id: row.skill_requested_id,
                status: row.effective_status(),
                message: cipher.decrypt(&row.message),
                completed_by_requester_at: row.completed_by_requester_at.clone(),
                completed_by_owner_at: row.completed_by_owner_at.clone(),
                completed_at: row.completed_at.clone(),
                created_at: row.created_at.clone(),
                requester_name: names.get(&row.requester_id).cloned().unwrap_or_default(),
                owner_name: names.get(&row.owner_id).cloned().unwrap_or_default(),
                requested_title: row
                    .skill_requested_id
                    .and_then(|id| skills.get(&id).map(|s| s.title.clone())),
                offered_title: row
                    .skill_offered_id
                    .and_then(|id| skills.get(&id).map(|s| s.title.clone())),
                offered_skills: offered.into_iter().map(skill_ref).collect(),
                interested_skills: interested.into_iter().map(skill_ref).collect(),
            }
        })
        .collect())
}
