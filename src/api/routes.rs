//! Route Definitions

use super::{
    handlers::*,
    websocket::{game_websocket_handler, user_websocket_handler},
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Games
        .route("/games", post(create_game_handler))
        .route("/games/:game_id", get(game_state_handler))
        .route("/games/:game_id/cards", post(purchase_card_handler))
        .route("/games/:game_id/cards/:user_id", get(user_cards_handler))
        .route("/games/:game_id/verify", get(verify_game_handler))
        // Accounts
        .route("/users/:user_id/deposits", post(deposit_handler))
        .route("/users/:user_id/transactions", get(transactions_handler))
        // Real-time subscriptions
        .route("/ws/games/:game_id", get(game_websocket_handler))
        .route("/ws/users/:user_id", get(user_websocket_handler))
        .with_state(state)
}
