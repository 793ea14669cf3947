//! Request Handlers

use super::{errors::ApiError, middleware::RequestId, models::*};
use crate::{games::types::GameStateSnapshot, hub::BroadcastHub, lifecycle::GameController};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::warn;

/// Shared application state
pub struct AppState {
    pub controller: Arc<GameController>,
    pub hub: BroadcastHub,
    pub version: String,
}

impl AppState {
    pub fn new(controller: Arc<GameController>) -> Self {
        Self {
            hub: controller.hub().clone(),
            controller,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        running_games: state.controller.running_games(),
        seed_public_key: state.controller.seed_public_key().to_string(),
    })
}

/// POST /games
pub async fn create_game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateGameRequest>>,
) -> Result<(StatusCode, Json<CreateGameResponse>), ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let game_id = state
        .controller
        .create_game(request.is_special)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok((StatusCode::CREATED, Json(CreateGameResponse { game_id })))
}

/// GET /games/:game_id
pub async fn game_state_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Json<GameStateSnapshot>, ApiError> {
    state
        .controller
        .game_state(&game_id)
        .map(Json)
        .map_err(|e| ApiError::from_engine(request_id.0, e))
}

/// POST /games/:game_id/cards
pub async fn purchase_card_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    Json(request): Json<PurchaseCardRequest>,
) -> Result<(StatusCode, Json<CardResponse>), ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request(request_id.0, "user_id must not be empty".to_string()));
    }

    let card = state
        .controller
        .purchase_card(&request.user_id, &game_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok((StatusCode::CREATED, Json(card.into())))
}

/// GET /games/:game_id/cards/:user_id
pub async fn user_cards_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((game_id, user_id)): Path<(String, String)>,
) -> Result<Json<UserCardsResponse>, ApiError> {
    let cards = state
        .controller
        .user_cards(&user_id, &game_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(UserCardsResponse {
        game_id,
        user_id,
        cards: cards.into_iter().map(CardResponse::from).collect(),
    }))
}

/// GET /games/:game_id/verify
pub async fn verify_game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let outcome = state
        .controller
        .verify(&game_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    let response = match outcome {
        Ok(report) => VerificationResponse {
            game_id,
            valid: true,
            report: Some(report),
            error: None,
        },
        Err(e) => {
            warn!(game_id = %game_id, error = %e, "Game failed verification");
            VerificationResponse {
                game_id,
                valid: false,
                report: None,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(Json(response))
}

/// POST /users/:user_id/deposits
pub async fn deposit_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let change = state
        .controller
        .deposit(&user_id, request.amount)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(BalanceResponse {
        user_id,
        balance: change.balance,
    }))
}

/// GET /users/:user_id/transactions
pub async fn transactions_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let ledger = state.controller.ledger();
    let balance = ledger
        .balance(&user_id)
        .map_err(|e| ApiError::from_engine(request_id.0.clone(), e))?;
    let transactions = ledger
        .transactions(&user_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(TransactionsResponse {
        user_id,
        balance,
        transactions,
    }))
}
