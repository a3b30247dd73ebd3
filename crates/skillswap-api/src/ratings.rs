use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;

use skillswap_db::models::{ExchangeRow, FeedbackRow};
use skillswap_gateway::ApiError;
use skillswap_types::api::{Claims, RatingStats};

use crate::AppState;
use crate::exchanges::blocking;

/// Attribute feedback rows to skills and aggregate.
///
/// The attribution is asymmetric: a rating written by the requester about
/// the owner scores the requested skill (the student rating what they
/// learned); a rating written by the owner about the requester scores the
/// offered skill (the teacher rating what they received in barter). A row
/// matching neither direction counts toward no skill.
pub fn compute_skill_stats(
    skill_ids: &[i64],
    exchanges: &[ExchangeRow],
    feedback: &[FeedbackRow],
) -> HashMap<i64, RatingStats> {
    let by_exchange: HashMap<i64, &ExchangeRow> =
        exchanges.iter().map(|e| (e.id, e)).collect();

    let mut sums: HashMap<i64, (i64, i64)> = HashMap::new();
    for fb in feedback {
        let Some(exchange) = by_exchange.get(&fb.exchange_id) else {
            continue;
        };
        let skill = if fb.from_user_id == exchange.requester_id
            && fb.to_user_id == exchange.owner_id
        {
            exchange.skill_requested_id
        } else if fb.from_user_id == exchange.owner_id && fb.to_user_id == exchange.requester_id {
            exchange.skill_offered_id
        } else {
            None
        };
        if let Some(skill_id) = skill.filter(|id| skill_ids.contains(id)) {
            let entry = sums.entry(skill_id).or_insert((0, 0));
            entry.0 += fb.rating;
            entry.1 += 1;
        }
    }

    skill_ids
        .iter()
        .map(|&skill_id| {
            let stats = match sums.get(&skill_id) {
                Some(&(sum, count)) => RatingStats {
                    average_rating: round2(sum as f64 / count as f64),
                    ratings_count: count,
                },
                None => RatingStats::default(),
            };
            (skill_id, stats)
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// -- Handlers --

pub async fn skill_reputation(
    State(state): State<AppState>,
    Path(skill_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let stats = blocking(move || {
        if db.skills_by_ids(&[skill_id])?.is_empty() {
            return Err(ApiError::NotFound("Skill not found".into()));
        }
        let exchanges = db.completed_exchanges_for_skills(&[skill_id])?;
        let exchange_ids: Vec<i64> = exchanges.iter().map(|e| e.id).collect();
        let feedback = db.feedback_for_exchanges(&exchange_ids)?;
        let mut stats = compute_skill_stats(&[skill_id], &exchanges, &feedback);
        Ok(stats.remove(&skill_id).unwrap_or_default())
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "skill_id": skill_id,
        "average_rating": stats.average_rating,
        "ratings_count": stats.ratings_count,
    })))
}

pub async fn user_reputation(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let (average, count) = blocking(move || {
        if db.user_name(user_id)?.is_none() {
            return Err(ApiError::NotFound("User not found".into()));
        }
        let (average, count) = db.user_reputation(user_id)?;
        Ok((round2(average), count))
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "user_id": user_id,
        "average_rating": average,
        "ratings_count": count,
    })))
}

/// Deletion guard consumed by the skill catalog: is this skill tied to any
/// exchange that is not pending/rejected/cancelled?
pub async fn skill_usage(
    State(state): State<AppState>,
    Path(skill_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.chat.db.clone();
    let in_use = blocking(move || Ok(db.skill_in_active_exchange(skill_id)?)).await?;
    Ok(Json(json!({ "success": true, "in_use": in_use })))
}
