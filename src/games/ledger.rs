//! Prize ledger
//!
//! Money moves only through this module. Every balance mutation writes its
//! `Transaction` row inside the same [`Txn`], so a failed unit of work leaves
//! neither. The `*_in` methods compose into a caller's transaction (the
//! lifecycle controller uses them inside its per-draw unit); the others open
//! their own.
//!
//! Rounding policy: shares are floored, and every remainder (plus any tier
//! nobody claimed) is paid into the organizer wallet so the pool is always
//! fully accounted for.

use crate::{
    common::types::{new_id, sha256, Amount, GameId, UserId},
    config::{PrizeConfig, SplitPercentages},
    errors::{BingoResult, LedgerError},
    game_store::{GameStore, Txn},
    games::types::{
        Account, Card, Game, GameStatus, PrizeBreakdown, PrizeTier, Transaction, TransactionStatus,
        TransactionType,
    },
};
use chrono::Utc;
use std::collections::BTreeMap;

/// Split `total` by percentages; the integer residual goes to the platform fee
pub fn split_pool(total: Amount, split: &SplitPercentages) -> Result<PrizeBreakdown, LedgerError> {
    if split.total() != 100 {
        return Err(LedgerError::InvalidSplit(format!(
            "percentages sum to {}, expected 100",
            split.total()
        )));
    }

    let share = |pct: u8| -> Amount { ((total as u128 * pct as u128) / 100) as Amount };
    let bingo_prize = share(split.bingo);
    let quine_prize = share(split.quine);
    let jackpot_contribution = share(split.jackpot);

    Ok(PrizeBreakdown {
        total_collected: total,
        bingo_prize,
        quine_prize,
        jackpot_contribution,
        platform_fee: total - bingo_prize - quine_prize - jackpot_contribution,
    })
}

/// Per-share amount and undistributed remainder
pub fn split_evenly(amount: Amount, shares: usize) -> (Amount, Amount) {
    if shares == 0 {
        return (0, amount);
    }
    let per = amount / shares as Amount;
    (per, amount - per * shares as Amount)
}

/// Next organizer wallet digest in the hash chain
pub fn chain_digest(previous_hex: &str, balance: Amount, revision: u64) -> String {
    hex::encode(sha256(&[
        previous_hex.as_bytes(),
        &balance.to_be_bytes(),
        &revision.to_be_bytes(),
    ]))
}

fn to_signed(amount: Amount) -> Result<i64, LedgerError> {
    i64::try_from(amount).map_err(|_| LedgerError::InvalidAmount(format!("{} exceeds ledger range", amount)))
}

/// A committed balance mutation, used for user notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub user_id: UserId,
    pub game_id: Option<GameId>,
    pub kind: TransactionType,
    pub delta: i64,
    pub balance: Amount,
}

/// Result of paying one prize tier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPayout {
    pub amount_per_winner: Amount,
    pub remainder: Amount,
    /// One entry per distinct user, amounts summed over their winning cards
    pub awards: Vec<(UserId, Amount)>,
    pub changes: Vec<BalanceChange>,
}

#[derive(Clone)]
pub struct PrizeLedger {
    store: GameStore,
    prizes: PrizeConfig,
}

impl PrizeLedger {
    pub fn new(store: GameStore, prizes: PrizeConfig) -> Self {
        Self { store, prizes }
    }

    pub fn compute_prize_split(&self, total_collected: Amount, is_special: bool) -> Result<PrizeBreakdown, LedgerError> {
        split_pool(total_collected, &self.prizes.split_for(is_special))
    }

    /// Apply a signed delta to a balance and write its transaction row
    fn apply(
        txn: &mut Txn<'_>,
        user_id: &str,
        game_id: Option<&str>,
        kind: TransactionType,
        delta: i64,
        description: String,
    ) -> BingoResult<BalanceChange> {
        let mut account: Account = txn.account(user_id)?;
        let balance = if delta >= 0 {
            account
                .balance
                .checked_add(delta as Amount)
                .ok_or_else(|| LedgerError::BalanceOverflow(user_id.to_string()))?
        } else {
            let required = delta.unsigned_abs();
            account.balance.checked_sub(required).ok_or_else(|| LedgerError::InsufficientBalance {
                user_id: user_id.to_string(),
                balance: account.balance,
                required,
            })?
        };

        account.balance = balance;
        txn.put_account(&mut account)?;
        txn.append_transaction(&Transaction {
            id: new_id(),
            user_id: user_id.to_string(),
            game_id: game_id.map(str::to_string),
            kind,
            amount: delta,
            status: TransactionStatus::Completed,
            description,
            created_at: Utc::now(),
        })?;

        Ok(BalanceChange {
            user_id: user_id.to_string(),
            game_id: game_id.map(str::to_string),
            kind,
            delta,
            balance,
        })
    }

    /// Debit a card purchase; fails with `InsufficientBalance` leaving the balance untouched
    pub fn debit_purchase_in(txn: &mut Txn<'_>, user_id: &str, game_id: &str, price: Amount) -> BingoResult<BalanceChange> {
        let delta = -to_signed(price)?;
        Self::apply(
            txn,
            user_id,
            Some(game_id),
            TransactionType::Purchase,
            delta,
            format!("Card purchase for game {}", game_id),
        )
    }

    /// Credit one tier to its winners, one share per winning card.
    /// Users holding several winning cards get a single aggregated credit.
    pub fn credit_winners_in(
        txn: &mut Txn<'_>,
        game_id: &str,
        winner_user_ids: &[UserId],
        tier_amount: Amount,
        tier: PrizeTier,
    ) -> BingoResult<TierPayout> {
        let (per_winner, remainder) = split_evenly(tier_amount, winner_user_ids.len());

        let mut totals: BTreeMap<&str, Amount> = BTreeMap::new();
        for user_id in winner_user_ids {
            *totals.entry(user_id.as_str()).or_default() += per_winner;
        }

        let mut payout = TierPayout {
            amount_per_winner: per_winner,
            remainder,
            ..Default::default()
        };
        for (user_id, amount) in totals {
            if amount == 0 {
                continue;
            }
            let change = Self::apply(
                txn,
                user_id,
                Some(game_id),
                TransactionType::Win,
                to_signed(amount)?,
                format!("{} prize in game {}", tier, game_id),
            )?;
            payout.awards.push((user_id.to_string(), amount));
            payout.changes.push(change);
        }

        Self::add_platform_fee_in(txn, remainder)?;
        Ok(payout)
    }

    /// Pay the whole current jackpot to the bingo winners and reset it to zero
    pub fn award_jackpot_in(txn: &mut Txn<'_>, game_id: &str, winner_user_ids: &[UserId]) -> BingoResult<TierPayout> {
        let mut jackpot = txn.jackpot()?;
        let amount = jackpot.amount;
        let payout = Self::credit_winners_in(txn, game_id, winner_user_ids, amount, PrizeTier::Jackpot)?;

        jackpot.amount = 0;
        txn.put_jackpot(&mut jackpot)?;
        Ok(payout)
    }

    pub fn contribute_jackpot_in(txn: &mut Txn<'_>, amount: Amount) -> BingoResult<Amount> {
        let mut jackpot = txn.jackpot()?;
        jackpot.amount = jackpot
            .amount
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow("jackpot".to_string()))?;
        txn.put_jackpot(&mut jackpot)?;
        Ok(jackpot.amount)
    }

    pub fn add_platform_fee_in(txn: &mut Txn<'_>, amount: Amount) -> BingoResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut wallet = txn.wallet()?;
        wallet.balance = wallet
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow("organizer wallet".to_string()))?;
        wallet.digest = chain_digest(&wallet.digest, wallet.balance, wallet.revision + 1);
        txn.put_wallet(&mut wallet)
    }

    /// Credit a user's account from an external funding source
    pub fn deposit(&self, user_id: &str, amount: Amount) -> BingoResult<BalanceChange> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("deposit must be > 0".to_string()).into());
        }
        let delta = to_signed(amount)?;
        let change = self.store.transact("deposit", |txn| {
            Self::apply(txn, user_id, None, TransactionType::Deposit, delta, "Deposit".to_string())
        })?;
        tracing::info!(user_id, amount, balance = change.balance, "Deposit credited");
        Ok(change)
    }

    /// Take back up to `amount` of a game's jackpot contribution. Returns what was reclaimed.
    fn reclaim_jackpot_in(txn: &mut Txn<'_>, amount: Amount) -> BingoResult<Amount> {
        let mut jackpot = txn.jackpot()?;
        let taken = amount.min(jackpot.amount);
        if taken > 0 {
            jackpot.amount -= taken;
            txn.put_jackpot(&mut jackpot)?;
        }
        Ok(taken)
    }

    /// Take back up to `amount` from the organizer wallet. Returns what was reclaimed.
    fn reclaim_platform_fee_in(txn: &mut Txn<'_>, amount: Amount) -> BingoResult<Amount> {
        let mut wallet = txn.wallet()?;
        let taken = amount.min(wallet.balance);
        if taken > 0 {
            wallet.balance -= taken;
            wallet.digest = chain_digest(&wallet.digest, wallet.balance, wallet.revision + 1);
            txn.put_wallet(&mut wallet)?;
        }
        Ok(taken)
    }

    /// Return a canceled game's undistributed money to its card holders.
    ///
    /// A game canceled before its start refunds every card in full. Once
    /// started, the jackpot contribution and platform fee are pulled back and
    /// shared per card together with every tier not yet paid; prizes already
    /// credited stay with their winners. The caller persists `game`.
    pub fn refund_game_in(txn: &mut Txn<'_>, game: &mut Game, cards: &[Card]) -> BingoResult<Vec<BalanceChange>> {
        if game.refunded || cards.is_empty() {
            return Ok(Vec::new());
        }

        let per_card = match game.prizes {
            None => game.card_price,
            Some(prizes) => {
                let mut pool: Amount = 0;
                if game.quine.is_none() {
                    pool += prizes.quine_prize;
                }
                if game.bingo.is_none() {
                    pool += prizes.bingo_prize;
                }
                pool += Self::reclaim_jackpot_in(txn, prizes.jackpot_contribution)?;
                pool += Self::reclaim_platform_fee_in(txn, prizes.platform_fee)?;

                let (per_card, remainder) = split_evenly(pool, cards.len());
                Self::add_platform_fee_in(txn, remainder)?;
                per_card
            }
        };

        let mut per_user: BTreeMap<&str, Amount> = BTreeMap::new();
        for card in cards {
            *per_user.entry(card.user_id.as_str()).or_default() += per_card;
        }

        let mut changes = Vec::with_capacity(per_user.len());
        for (user_id, amount) in per_user {
            if amount == 0 {
                continue;
            }
            changes.push(Self::apply(
                txn,
                user_id,
                Some(game.id.as_str()),
                TransactionType::Refund,
                to_signed(amount)?,
                format!("Refund for canceled game {}", game.id),
            )?);
        }

        game.refunded = true;
        Ok(changes)
    }

    /// Refund a canceled game in its own transaction; a second call is a no-op
    pub fn refund_game(&self, game_id: &str) -> BingoResult<Vec<BalanceChange>> {
        let changes = self.store.transact("refund", |txn| {
            let mut game: Game = txn.require_game(game_id)?;
            if game.status != GameStatus::Canceled || game.refunded {
                return Ok(Vec::new());
            }
            // Read after the game so a racing purchase conflicts on the game record
            let cards = self.store.cards_for_game(game_id)?;
            let changes = Self::refund_game_in(txn, &mut game, &cards)?;
            txn.put_game(&mut game)?;
            Ok(changes)
        })?;

        if !changes.is_empty() {
            tracing::info!(game_id, users = changes.len(), "Refunded canceled game");
        }
        Ok(changes)
    }

    pub fn balance(&self, user_id: &str) -> BingoResult<Amount> {
        Ok(self.store.account(user_id)?.map(|a| a.balance).unwrap_or(0))
    }

    pub fn transactions(&self, user_id: &str) -> BingoResult<Vec<Transaction>> {
        self.store.transactions(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::BingoError, storage::MemoryStorage};
    use std::sync::Arc;

    fn ledger() -> (GameStore, PrizeLedger) {
        let store = GameStore::new(Arc::new(MemoryStorage::new()), 3);
        (store.clone(), PrizeLedger::new(store, PrizeConfig::default()))
    }

    fn history_sum(store: &GameStore, user: &str) -> i64 {
        store.transactions(user).unwrap().iter().map(|t| t.amount).sum()
    }

    #[test]
    fn test_standard_split_of_300() {
        let (_, ledger) = ledger();
        let split = ledger.compute_prize_split(300, false).unwrap();
        assert_eq!(split.bingo_prize, 150);
        assert_eq!(split.quine_prize, 60);
        assert_eq!(split.jackpot_contribution, 30);
        assert_eq!(split.platform_fee, 60);
        assert_eq!(split.sum(), 300);
    }

    #[test]
    fn test_split_residual_goes_to_platform() {
        let standard = PrizeConfig::default().standard;
        let split = split_pool(7, &standard).unwrap();
        assert_eq!(split.sum(), 7);
        assert_eq!((split.bingo_prize, split.quine_prize, split.jackpot_contribution), (3, 1, 0));
        assert_eq!(split.platform_fee, 3);

        let bad = SplitPercentages { bingo: 50, quine: 50, jackpot: 10, platform: 0 };
        assert!(split_pool(100, &bad).is_err());
    }

    #[test]
    fn test_split_evenly() {
        assert_eq!(split_evenly(60, 2), (30, 0));
        assert_eq!(split_evenly(100, 3), (33, 1));
        assert_eq!(split_evenly(5, 0), (0, 5));
    }

    #[test]
    fn test_purchase_debit_rejects_insufficient_balance() {
        let (store, ledger) = ledger();
        ledger.deposit("alice", 50).unwrap();

        let err = store
            .transact("purchase", |txn| PrizeLedger::debit_purchase_in(txn, "alice", "g1", 100))
            .unwrap_err();
        assert!(matches!(
            err,
            BingoError::Ledger(LedgerError::InsufficientBalance { balance: 50, required: 100, .. })
        ));
        assert_eq!(ledger.balance("alice").unwrap(), 50);
        assert_eq!(store.transactions("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_credit_winners_aggregates_per_user_and_keeps_remainder() {
        let (store, ledger) = ledger();
        let winners = vec!["alice".to_string(), "bob".to_string(), "alice".to_string()];

        let payout = store
            .transact("credit", |txn| PrizeLedger::credit_winners_in(txn, "g1", &winners, 100, PrizeTier::Quine))
            .unwrap();

        assert_eq!(payout.amount_per_winner, 33);
        assert_eq!(payout.remainder, 1);
        assert_eq!(payout.changes.len(), 2);
        assert_eq!(ledger.balance("alice").unwrap(), 66);
        assert_eq!(ledger.balance("bob").unwrap(), 33);
        assert_eq!(store.wallet().unwrap().balance, 1);

        // Balance and ledger never diverge
        for user in ["alice", "bob"] {
            assert_eq!(history_sum(&store, user), ledger.balance(user).unwrap() as i64);
        }
    }

    #[test]
    fn test_jackpot_award_resets_to_zero() {
        let (store, _ledger) = ledger();
        store
            .transact("seed", |txn| PrizeLedger::contribute_jackpot_in(txn, 5000))
            .unwrap();

        let winners = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let payout = store
            .transact("jackpot", |txn| PrizeLedger::award_jackpot_in(txn, "g1", &winners))
            .unwrap();

        assert_eq!(payout.amount_per_winner, 1666);
        assert_eq!(payout.remainder, 2);
        assert_eq!(store.jackpot().unwrap().amount, 0);
        assert_eq!(store.wallet().unwrap().balance, 2);
    }

    #[test]
    fn test_wallet_digest_chains() {
        let (store, _ledger) = ledger();
        let genesis = store.wallet().unwrap().digest;

        store.transact("fee", |txn| PrizeLedger::add_platform_fee_in(txn, 10)).unwrap();
        let first = store.wallet().unwrap();
        assert_eq!(first.digest, chain_digest(&genesis, 10, 1));

        store.transact("fee", |txn| PrizeLedger::add_platform_fee_in(txn, 5)).unwrap();
        let second = store.wallet().unwrap();
        assert_eq!(second.balance, 15);
        assert_eq!(second.digest, chain_digest(&first.digest, 15, 2));
    }

    #[test]
    fn test_deposit_rejects_zero() {
        let (_, ledger) = ledger();
        let err = ledger.deposit("alice", 0).unwrap_err();
        assert!(err.is_validation());
    }
}
