use crate::common::types::{Amount, CardId, GameId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 3 rows x 9 columns, 0 marks a blank cell
pub type CardGrid = [[u8; 9]; 3];

pub const ROWS: usize = 3;
pub const COLUMNS: usize = 9;
pub const NUMBERS_PER_ROW: usize = 5;
pub const POOL_SIZE: usize = 90;

/// Game lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Scheduled,
    Active,
    Completed,
    Canceled,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Completed | GameStatus::Canceled)
    }

    /// Transitions only move forward: scheduled -> active -> completed,
    /// with cancellation reachable from either non-terminal state
    pub fn can_transition_to(self, next: GameStatus) -> bool {
        matches!(
            (self, next),
            (GameStatus::Scheduled, GameStatus::Active)
                | (GameStatus::Scheduled, GameStatus::Canceled)
                | (GameStatus::Active, GameStatus::Completed)
                | (GameStatus::Active, GameStatus::Canceled)
        )
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameStatus::Scheduled => write!(f, "scheduled"),
            GameStatus::Active => write!(f, "active"),
            GameStatus::Completed => write!(f, "completed"),
            GameStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// VRF bundle committing to the draw seed of a game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VRFBundle {
    /// Hex-encoded VRF output (32 bytes), used as the permutation seed
    pub vrf_output: String,
    /// Hex-encoded VRF proof (64 bytes for schnorrkel)
    pub vrf_proof: String,
    /// Hex-encoded public key (32 bytes)
    pub public_key: String,
    /// Input message used for VRF
    pub input_message: String,
}

/// Per-tier split of the collected pool, fixed when the game starts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizeBreakdown {
    pub total_collected: Amount,
    pub bingo_prize: Amount,
    pub quine_prize: Amount,
    pub jackpot_contribution: Amount,
    pub platform_fee: Amount,
}

impl PrizeBreakdown {
    pub fn sum(&self) -> Amount {
        self.bingo_prize + self.quine_prize + self.jackpot_contribution + self.platform_fee
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PrizeTier {
    Quine,
    Bingo,
    Jackpot,
}

impl fmt::Display for PrizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrizeTier::Quine => write!(f, "quine"),
            PrizeTier::Bingo => write!(f, "bingo"),
            PrizeTier::Jackpot => write!(f, "jackpot"),
        }
    }
}

/// Outcome of one win race. `winner_user_ids[i]` owns `winning_card_ids[i]`,
/// so a user holding two winning cards appears twice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierWin {
    pub winner_user_ids: Vec<UserId>,
    pub winning_card_ids: Vec<CardId>,
    /// Number of draws made when the tier was won
    pub numbers_called: usize,
    pub amount_per_winner: Amount,
}

/// A single bingo game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Game {
    pub id: GameId,
    pub status: GameStatus,
    pub is_special: bool,
    pub card_price: Amount,
    pub scheduled_start: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cards_sold: u32,
    pub total_collected: Amount,
    /// Draw order is significant; append-only while active
    pub drawn_numbers: Vec<u8>,
    pub prizes: Option<PrizeBreakdown>,
    pub quine: Option<TierWin>,
    pub bingo: Option<TierWin>,
    pub jackpot_won: bool,
    pub jackpot_amount_per_winner: Amount,
    pub seed: Option<VRFBundle>,
    pub cancel_reason: Option<String>,
    pub refunded: bool,
    pub verification_hash: Option<String>,
    /// Bumped on every write so compare-and-swap never sees a stale equal value
    pub revision: u64,
}

impl Game {
    pub fn new(id: GameId, is_special: bool, card_price: Amount, scheduled_start: DateTime<Utc>) -> Self {
        Self {
            id,
            status: GameStatus::Scheduled,
            is_special,
            card_price,
            scheduled_start,
            started_at: None,
            ended_at: None,
            cards_sold: 0,
            total_collected: 0,
            drawn_numbers: Vec::new(),
            prizes: None,
            quine: None,
            bingo: None,
            jackpot_won: false,
            jackpot_amount_per_winner: 0,
            seed: None,
            cancel_reason: None,
            refunded: false,
            verification_hash: None,
            revision: 0,
        }
    }

    pub fn drawn_set(&self) -> DrawnSet {
        DrawnSet::from_numbers(&self.drawn_numbers)
    }

    pub fn called_count(&self) -> usize {
        self.drawn_numbers.len()
    }

    pub fn summary(&self) -> GameSummary {
        GameSummary {
            game_id: self.id.clone(),
            status: self.status,
            is_special: self.is_special,
            cards_sold: self.cards_sold,
            drawn_numbers: self.drawn_numbers.clone(),
            prizes: self.prizes,
            quine: self.quine.clone(),
            bingo: self.bingo.clone(),
            jackpot_won: self.jackpot_won,
            jackpot_amount_per_winner: self.jackpot_amount_per_winner,
            verification_hash: self.verification_hash.clone(),
        }
    }
}

/// Set of drawn numbers 1..=90 as a bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawnSet(u128);

impl DrawnSet {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_numbers(numbers: &[u8]) -> Self {
        let mut set = Self::new();
        for n in numbers {
            set.insert(*n);
        }
        set
    }

    /// Returns false when `number` is outside 1..=90 or already present
    pub fn insert(&mut self, number: u8) -> bool {
        if number == 0 || number as usize > POOL_SIZE || self.contains(number) {
            return false;
        }
        self.0 |= 1u128 << number;
        true
    }

    pub fn contains(&self, number: u8) -> bool {
        number != 0 && (number as usize) <= POOL_SIZE && self.0 & (1u128 << number) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Undrawn numbers in ascending order
    pub fn remaining(&self) -> Vec<u8> {
        (1..=POOL_SIZE as u8).filter(|n| !self.contains(*n)).collect()
    }
}

/// A purchased card; immutable once stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub game_id: GameId,
    pub user_id: UserId,
    pub numbers: CardGrid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Purchase,
    Win,
    Deposit,
    Withdrawal,
    Refund,
    Fee,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Win => "win",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Refund => "refund",
            TransactionType::Fee => "fee",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// Ledger row written together with every balance mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    pub kind: TransactionType,
    /// Negative for debits
    pub amount: i64,
    pub status: TransactionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// User balance as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Amount,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
            revision: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Global progressive jackpot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jackpot {
    pub amount: Amount,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for Jackpot {
    fn default() -> Self {
        Self {
            amount: 0,
            revision: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Platform fee wallet with a hash-chained digest over its history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizerWallet {
    pub balance: Amount,
    /// Hex SHA-256 over (previous digest, balance, revision)
    pub digest: String,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for OrganizerWallet {
    fn default() -> Self {
        Self {
            balance: 0,
            digest: hex::encode([0u8; 32]),
            revision: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Final results as broadcast in `GAME_ENDED`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSummary {
    pub game_id: GameId,
    pub status: GameStatus,
    pub is_special: bool,
    pub cards_sold: u32,
    pub drawn_numbers: Vec<u8>,
    pub prizes: Option<PrizeBreakdown>,
    pub quine: Option<TierWin>,
    pub bingo: Option<TierWin>,
    pub jackpot_won: bool,
    pub jackpot_amount_per_winner: Amount,
    pub verification_hash: Option<String>,
}

/// Read model for game state queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameStateSnapshot {
    pub game_id: GameId,
    pub status: GameStatus,
    pub is_special: bool,
    pub card_price: Amount,
    pub scheduled_start: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cards_sold: u32,
    pub drawn_numbers: Vec<u8>,
    pub last_number: Option<u8>,
    pub prizes: Option<PrizeBreakdown>,
    pub quine: Option<TierWin>,
    pub bingo: Option<TierWin>,
    pub jackpot_won: bool,
    /// Current global jackpot
    pub jackpot_amount: Amount,
    pub cancel_reason: Option<String>,
    pub verification_hash: Option<String>,
}

impl GameStateSnapshot {
    pub fn new(game: &Game, jackpot_amount: Amount) -> Self {
        Self {
            game_id: game.id.clone(),
            status: game.status,
            is_special: game.is_special,
            card_price: game.card_price,
            scheduled_start: game.scheduled_start,
            started_at: game.started_at,
            ended_at: game.ended_at,
            cards_sold: game.cards_sold,
            drawn_numbers: game.drawn_numbers.clone(),
            last_number: game.drawn_numbers.last().copied(),
            prizes: game.prizes,
            quine: game.quine.clone(),
            bingo: game.bingo.clone(),
            jackpot_won: game.jackpot_won,
            jackpot_amount,
            cancel_reason: game.cancel_reason.clone(),
            verification_hash: game.verification_hash.clone(),
        }
    }
}

/// Events fanned out by the broadcast hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BingoEvent {
    GameScheduled {
        game_id: GameId,
        scheduled_start: DateTime<Utc>,
        is_special: bool,
        card_price: Amount,
    },
    GameStarted {
        game_id: GameId,
        participant_count: u32,
        prize_breakdown: PrizeBreakdown,
    },
    NumberCalled {
        game_id: GameId,
        number: u8,
        called_count: usize,
    },
    QuineWon {
        game_id: GameId,
        winner_user_ids: Vec<UserId>,
        winning_card_ids: Vec<CardId>,
        numbers_called: usize,
        amount_per_winner: Amount,
    },
    BingoWon {
        game_id: GameId,
        winner_user_ids: Vec<UserId>,
        winning_card_ids: Vec<CardId>,
        numbers_called: usize,
        amount_per_winner: Amount,
        jackpot_won: bool,
        jackpot_amount_per_winner: Amount,
    },
    GameEnded {
        game_id: GameId,
        summary: GameSummary,
    },
    GameCanceled {
        game_id: GameId,
        reason: String,
    },
    BalanceChanged {
        user_id: UserId,
        balance: Amount,
        delta: i64,
        reason: TransactionType,
    },
    PrizeWon {
        user_id: UserId,
        game_id: GameId,
        tier: PrizeTier,
        amount: Amount,
    },
    Heartbeat {
        timestamp: u64,
    },
}

impl BingoEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BingoEvent::GameScheduled { .. } => "GAME_SCHEDULED",
            BingoEvent::GameStarted { .. } => "GAME_STARTED",
            BingoEvent::NumberCalled { .. } => "NUMBER_CALLED",
            BingoEvent::QuineWon { .. } => "QUINE_WON",
            BingoEvent::BingoWon { .. } => "BINGO_WON",
            BingoEvent::GameEnded { .. } => "GAME_ENDED",
            BingoEvent::GameCanceled { .. } => "GAME_CANCELED",
            BingoEvent::BalanceChanged { .. } => "BALANCE_CHANGED",
            BingoEvent::PrizeWon { .. } => "PRIZE_WON",
            BingoEvent::Heartbeat { .. } => "HEARTBEAT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use GameStatus::*;
        assert!(Scheduled.can_transition_to(Active));
        assert!(Scheduled.can_transition_to(Canceled));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Canceled));

        assert!(!Active.can_transition_to(Scheduled));
        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Canceled));
        assert!(!Canceled.can_transition_to(Active));
        assert!(Completed.is_terminal() && Canceled.is_terminal());
    }

    #[test]
    fn test_drawn_set() {
        let mut set = DrawnSet::new();
        assert!(set.is_empty());
        assert!(set.insert(1));
        assert!(set.insert(90));
        assert!(!set.insert(90));
        assert!(!set.insert(0));
        assert!(!set.insert(91));
        assert_eq!(set.len(), 2);
        assert!(set.contains(90));
        assert!(!set.contains(45));
        assert_eq!(set.remaining().len(), 88);
    }

    #[test]
    fn test_event_wire_tag() {
        let event = BingoEvent::NumberCalled {
            game_id: "g".to_string(),
            number: 7,
            called_count: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "NUMBER_CALLED");
        assert_eq!(json["number"], 7);
        assert_eq!(event.name(), "NUMBER_CALLED");

        let canceled = BingoEvent::GameCanceled {
            game_id: "g".to_string(),
            reason: "no cards".to_string(),
        };
        assert_eq!(serde_json::to_value(&canceled).unwrap()["type"], "GAME_CANCELED");
    }
}
