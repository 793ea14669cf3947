//! Verification of finished games.
//!
//! A completed game carries a VRF seed commitment and a verification hash.
//! Anyone holding the game record and its cards can check that:
//! - the seed was signed by the engine key over this game's identity,
//! - the drawn numbers are the seeded permutation played in order,
//! - the recorded quine/bingo winners are exactly the cards that completed
//!   first, at the recorded draw,
//! - the hash matches the canonical encoding of the final state.

use crate::{
    common::types::{sha256, Amount, CardId},
    games::{
        draw::shuffled_pool,
        types::{Card, CardGrid, DrawnSet, Game, GameStatus, PrizeBreakdown, TierWin, VRFBundle},
        verifier::{has_bingo, has_quine},
        vrf_engine::VRFSeedEngine,
    },
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum FairnessError {
    #[error("Game {game_id} has no seed commitment")]
    MissingSeed { game_id: String },

    #[error("Seed commitment for game {game_id} does not verify")]
    InvalidProof { game_id: String },

    #[error("Draw {index} of game {game_id} does not match the seeded order")]
    DrawMismatch { game_id: String, index: usize },

    #[error("Game {game_id} records {recorded} cards but {supplied} were supplied")]
    CardCountMismatch { game_id: String, recorded: u32, supplied: usize },

    #[error("Recorded {tier} result of game {game_id} does not match replay")]
    WinnerMismatch { game_id: String, tier: &'static str },

    #[error("Verification hash of game {game_id} does not match")]
    HashMismatch { game_id: String },

    #[error("Failed to encode game state: {0}")]
    Encoding(String),
}

/// Fields covered by the verification hash. Bookkeeping that changes after
/// the game ends (revision, refund flag) is left out.
#[derive(Serialize)]
struct CanonicalGame<'a> {
    id: &'a str,
    status: GameStatus,
    is_special: bool,
    card_price: Amount,
    scheduled_start_ms: i64,
    cards_sold: u32,
    total_collected: Amount,
    drawn_numbers: &'a [u8],
    prizes: Option<PrizeBreakdown>,
    quine: Option<&'a TierWin>,
    bingo: Option<&'a TierWin>,
    jackpot_won: bool,
    jackpot_amount_per_winner: Amount,
    seed: Option<&'a VRFBundle>,
}

/// Hex SHA-256 over the canonical bincode encoding of a game
pub fn verification_hash(game: &Game) -> Result<String, FairnessError> {
    let canonical = CanonicalGame {
        id: &game.id,
        status: game.status,
        is_special: game.is_special,
        card_price: game.card_price,
        scheduled_start_ms: game.scheduled_start.timestamp_millis(),
        cards_sold: game.cards_sold,
        total_collected: game.total_collected,
        drawn_numbers: &game.drawn_numbers,
        prizes: game.prizes,
        quine: game.quine.as_ref(),
        bingo: game.bingo.as_ref(),
        jackpot_won: game.jackpot_won,
        jackpot_amount_per_winner: game.jackpot_amount_per_winner,
        seed: game.seed.as_ref(),
    };

    let bytes = bincode::serialize(&canonical).map_err(|e| FairnessError::Encoding(e.to_string()))?;
    Ok(hex::encode(sha256(&[&bytes])))
}

/// Outcome of a successful replay
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub game_id: String,
    pub status: GameStatus,
    pub draws_replayed: usize,
    pub quine_draw: Option<usize>,
    pub bingo_draw: Option<usize>,
    pub verification_hash: Option<String>,
}

/// First draw at which any card satisfies `predicate`, with the cards that do
fn first_win(
    cards: &[Card],
    drawn: &[u8],
    predicate: fn(&CardGrid, &DrawnSet) -> bool,
) -> Option<(usize, Vec<CardId>)> {
    let mut set = DrawnSet::new();
    for (i, n) in drawn.iter().enumerate() {
        set.insert(*n);
        let mut winners: Vec<CardId> = cards
            .iter()
            .filter(|c| predicate(&c.numbers, &set))
            .map(|c| c.id.clone())
            .collect();
        if !winners.is_empty() {
            winners.sort();
            return Some((i + 1, winners));
        }
    }
    None
}

fn tier_matches(recorded: Option<&TierWin>, replayed: &Option<(usize, Vec<CardId>)>) -> bool {
    match (recorded, replayed) {
        (None, None) => true,
        (Some(win), Some((draw, cards))) => {
            let mut recorded_cards = win.winning_card_ids.clone();
            recorded_cards.sort();
            win.numbers_called == *draw && recorded_cards == *cards
        }
        _ => false,
    }
}

/// Replay a game from its seed and cards
pub fn verify_game(game: &Game, cards: &[Card]) -> Result<VerificationReport, FairnessError> {
    let game_id = game.id.clone();
    let bundle = game
        .seed
        .as_ref()
        .ok_or_else(|| FairnessError::MissingSeed { game_id: game_id.clone() })?;

    let expected_input = VRFSeedEngine::seed_input(&game.id, game.scheduled_start, game.cards_sold);
    let proof_ok = VRFSeedEngine::verify_vrf_proof(bundle, &expected_input).unwrap_or(false);
    if !proof_ok {
        return Err(FairnessError::InvalidProof { game_id });
    }

    let seed = VRFSeedEngine::seed_from_bundle(bundle).map_err(|_| FairnessError::InvalidProof {
        game_id: game_id.clone(),
    })?;
    let order = shuffled_pool(seed);
    if let Some(index) = game
        .drawn_numbers
        .iter()
        .zip(order.iter())
        .position(|(drawn, expected)| drawn != expected)
    {
        return Err(FairnessError::DrawMismatch { game_id, index });
    }
    if game.drawn_numbers.len() > order.len() {
        return Err(FairnessError::DrawMismatch {
            game_id,
            index: order.len(),
        });
    }

    if cards.len() != game.cards_sold as usize {
        return Err(FairnessError::CardCountMismatch {
            game_id,
            recorded: game.cards_sold,
            supplied: cards.len(),
        });
    }

    let quine = first_win(cards, &game.drawn_numbers, has_quine);
    if !tier_matches(game.quine.as_ref(), &quine) {
        return Err(FairnessError::WinnerMismatch { game_id, tier: "quine" });
    }

    let bingo = first_win(cards, &game.drawn_numbers, has_bingo);
    if !tier_matches(game.bingo.as_ref(), &bingo) {
        return Err(FairnessError::WinnerMismatch { game_id, tier: "bingo" });
    }
    // The loop stops at bingo, so nothing may be drawn after it
    if let Some((draw, _)) = &bingo {
        if *draw != game.drawn_numbers.len() {
            return Err(FairnessError::WinnerMismatch { game_id, tier: "bingo" });
        }
    }

    if let Some(recorded) = &game.verification_hash {
        if *recorded != verification_hash(game)? {
            return Err(FairnessError::HashMismatch { game_id });
        }
    }

    Ok(VerificationReport {
        game_id,
        status: game.status,
        draws_replayed: game.drawn_numbers.len(),
        quine_draw: quine.map(|(draw, _)| draw),
        bingo_draw: bingo.map(|(draw, _)| draw),
        verification_hash: game.verification_hash.clone(),
    })
}
