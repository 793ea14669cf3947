//! API Request and Response Models

use crate::{
    common::types::{Amount, GameId, UserId},
    fairness::VerificationReport,
    games::types::{Card, CardGrid, Transaction},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub running_games: usize,
    /// Key that signs every game's draw seed
    pub seed_public_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGameRequest {
    #[serde(default)]
    pub is_special: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGameResponse {
    pub game_id: GameId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseCardRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardResponse {
    pub card_id: String,
    pub game_id: GameId,
    pub user_id: UserId,
    pub numbers: CardGrid,
    pub created_at: DateTime<Utc>,
}

impl From<Card> for CardResponse {
    fn from(card: Card) -> Self {
        Self {
            card_id: card.id,
            game_id: card.game_id,
            user_id: card.user_id,
            numbers: card.numbers,
            created_at: card.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCardsResponse {
    pub game_id: GameId,
    pub user_id: UserId,
    pub cards: Vec<CardResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub user_id: UserId,
    pub balance: Amount,
    pub transactions: Vec<Transaction>,
}

/// Replay result; `valid == false` carries the first discrepancy found
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResponse {
    pub game_id: GameId,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
