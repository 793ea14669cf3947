//! Game lifecycle controller
//!
//! One task per game drives `scheduled -> active -> completed`, with
//! `canceled` reachable when nobody bought a card or the draw loop fails.
//! Each draw is one storage transaction (append number, detect winners
//! against a single drawn-set snapshot, credit them, persist the game) and
//! its events are published only after that transaction commits.

use crate::{
    common::types::{new_id, Amount, CardId, GameId, UserId},
    config::BingoConfig,
    errors::{BingoError, BingoResult, GameError, LedgerError},
    fairness::{self, VerificationReport},
    game_store::{GameStore, Txn},
    games::{
        card::generate_card,
        draw::DrawSequence,
        ledger::{BalanceChange, PrizeLedger, TierPayout},
        types::{
            BingoEvent, Card, CardGrid, DrawnSet, Game, GameStateSnapshot, GameStatus, PrizeTier,
            TierWin,
        },
        verifier::{has_bingo, has_quine, winning_cards},
        vrf_engine::VRFSeedEngine,
    },
    hub::BroadcastHub,
};
use chrono::Utc;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Sent to the scheduler whenever a game reaches a terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameFinished {
    pub game_id: GameId,
    pub status: GameStatus,
}

/// Committed result of one draw
#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub game: Game,
    pub number: u8,
    pub quine: Option<TierPayout>,
    pub bingo: Option<TierPayout>,
    pub jackpot: Option<TierPayout>,
}

fn transition(game: &mut Game, to: GameStatus) -> Result<(), GameError> {
    if !game.status.can_transition_to(to) {
        return Err(GameError::InvalidTransition {
            game_id: game.id.clone(),
            from: game.status.to_string(),
            to: to.to_string(),
        });
    }
    game.status = to;
    Ok(())
}

pub struct GameController {
    store: GameStore,
    ledger: PrizeLedger,
    hub: BroadcastHub,
    seeder: Arc<VRFSeedEngine>,
    seed_key: String,
    config: Arc<BingoConfig>,
    finished_tx: mpsc::UnboundedSender<GameFinished>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: DashMap<GameId, JoinHandle<()>>,
}

impl GameController {
    pub fn new(
        store: GameStore,
        hub: BroadcastHub,
        seeder: Arc<VRFSeedEngine>,
        config: Arc<BingoConfig>,
        finished_tx: mpsc::UnboundedSender<GameFinished>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            ledger: PrizeLedger::new(store.clone(), config.prizes.clone()),
            store,
            hub,
            seed_key: seeder.public_key_hex(),
            seeder,
            config,
            finished_tx,
            shutdown_tx,
            shutdown_rx,
            tasks: DashMap::new(),
        })
    }

    pub fn store(&self) -> &GameStore {
        &self.store
    }

    pub fn ledger(&self) -> &PrizeLedger {
        &self.ledger
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn seed_public_key(&self) -> &str {
        &self.seed_key
    }

    /// Persist a new scheduled game and arm its start timer
    pub fn create_game(self: &Arc<Self>, is_special: bool) -> BingoResult<GameId> {
        let window = chrono::Duration::milliseconds(self.config.game.purchase_window_ms as i64);
        let mut game = Game::new(
            new_id(),
            is_special,
            self.config.card_price(is_special),
            Utc::now() + window,
        );

        self.store.transact("create_game", |txn| txn.put_game(&mut game))?;

        info!(
            game_id = %game.id,
            is_special,
            scheduled_start = %game.scheduled_start,
            "Game scheduled"
        );
        self.hub.publish_game(
            &game.id,
            BingoEvent::GameScheduled {
                game_id: game.id.clone(),
                scheduled_start: game.scheduled_start,
                is_special,
                card_price: game.card_price,
            },
        );

        self.spawn_game_task(game.id.clone());
        Ok(game.id)
    }

    /// Buy one card: debit, card, and game counters commit together
    pub fn purchase_card(&self, user_id: &str, game_id: &str) -> BingoResult<Card> {
        let grid = generate_card(&mut rand::thread_rng());

        let (card, change) = self.store.transact("purchase_card", |txn| {
            let mut game = txn.require_game(game_id)?;
            if game.status != GameStatus::Scheduled {
                return Err(GameError::NotJoinable {
                    game_id: game_id.to_string(),
                    status: game.status.to_string(),
                }
                .into());
            }

            let change = PrizeLedger::debit_purchase_in(txn, user_id, game_id, game.card_price)?;
            let card = Card {
                id: new_id(),
                game_id: game_id.to_string(),
                user_id: user_id.to_string(),
                numbers: grid,
                created_at: Utc::now(),
            };
            txn.insert_card(&card)?;

            game.cards_sold += 1;
            game.total_collected = game
                .total_collected
                .checked_add(game.card_price)
                .ok_or_else(|| LedgerError::BalanceOverflow(format!("game {}", game_id)))?;
            txn.put_game(&mut game)?;
            Ok((card, change))
        })?;

        info!(game_id, user_id, card_id = %card.id, "Card purchased");
        self.publish_balance_changes(&[change]);
        Ok(card)
    }

    /// Fund a user account and notify the user's subscribers
    pub fn deposit(&self, user_id: &str, amount: Amount) -> BingoResult<BalanceChange> {
        let change = self.ledger.deposit(user_id, amount)?;
        self.publish_balance_changes(std::slice::from_ref(&change));
        Ok(change)
    }

    pub fn game_state(&self, game_id: &str) -> BingoResult<GameStateSnapshot> {
        let game = self.store.require_game(game_id)?;
        let jackpot = self.store.jackpot()?;
        Ok(GameStateSnapshot::new(&game, jackpot.amount))
    }

    pub fn user_cards(&self, user_id: &str, game_id: &str) -> BingoResult<Vec<Card>> {
        self.store.require_game(game_id)?;
        self.store.cards_for_user(user_id, game_id)
    }

    /// Replay a game from its seed commitment and stored cards
    pub fn verify(&self, game_id: &str) -> BingoResult<Result<VerificationReport, fairness::FairnessError>> {
        let game = self.store.require_game(game_id)?;
        let cards = self.store.cards_for_game(game_id)?;
        Ok(fairness::verify_game(&game, &cards))
    }

    /// Re-arm every non-terminal game found in storage. Returns how many tasks were started.
    pub fn recover(self: &Arc<Self>) -> BingoResult<usize> {
        let mut resumed = 0;
        for game in self.store.games()? {
            if game.status.is_terminal() || self.tasks.contains_key(&game.id) {
                continue;
            }
            info!(game_id = %game.id, status = %game.status, drawn = game.drawn_numbers.len(), "Recovering game");
            self.spawn_game_task(game.id);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Flips to `true` when `shutdown` is called
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Games whose task is still running
    pub fn running_games(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every game task at its next suspension point; state stays
    /// persisted for `recover`
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let ids: Vec<GameId> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.tasks.remove(&id) {
                if let Err(e) = handle.await {
                    warn!(game_id = %id, error = %e, "Game task ended abnormally");
                }
            }
        }
    }

    fn spawn_game_task(self: &Arc<Self>, game_id: GameId) {
        let controller = Arc::clone(self);
        let id = game_id.clone();
        // The task waits until its handle is registered, so its own removal always comes after
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if registered_rx.await.is_ok() {
                controller.run_game(id).await;
            }
        });
        self.tasks.insert(game_id, handle);
        let _ = registered_tx.send(());
    }

    async fn run_game(self: Arc<Self>, game_id: GameId) {
        match self.drive(&game_id).await {
            Ok(Some(status)) => self.notify_finished(&game_id, status),
            Ok(None) => debug!(game_id = %game_id, "Game task interrupted by shutdown"),
            Err(e) => {
                error!(game_id = %game_id, error = %e, "Game failed, canceling");
                let reason = e.to_string();
                if let Err(cancel_err) = self.cancel_game(&game_id, &reason) {
                    // Storage still holds the game as active, so the next recovery resumes it
                    error!(game_id = %game_id, error = %cancel_err, "Failed to persist cancellation");
                    self.publish_canceled(&game_id, &reason);
                }
                self.notify_finished(&game_id, GameStatus::Canceled);
            }
        }
        self.tasks.remove(&game_id);
    }

    fn notify_finished(&self, game_id: &str, status: GameStatus) {
        let finished = GameFinished {
            game_id: game_id.to_string(),
            status,
        };
        if self.finished_tx.send(finished).is_err() {
            debug!(game_id, "No scheduler listening for finished games");
        }
    }

    /// Run a game to a terminal state. `None` means shutdown interrupted it.
    async fn drive(&self, game_id: &str) -> BingoResult<Option<GameStatus>> {
        let mut game = self.store.require_game(game_id)?;

        if game.status == GameStatus::Scheduled {
            let wait = (game.scheduled_start - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if !self.pause(wait).await {
                return Ok(None);
            }
            game = self.start_game(game_id)?;
        }

        if game.status != GameStatus::Active {
            return Ok(Some(game.status));
        }

        let bundle = game
            .seed
            .as_ref()
            .ok_or_else(|| GameError::SeedFailed(format!("game {} has no seed commitment", game_id)))?;
        let seed = VRFSeedEngine::seed_from_bundle(bundle)?;
        let mut sequence = DrawSequence::resume(seed, &game.drawn_numbers)?;
        // Cards are immutable and purchases closed at start, so one snapshot serves the whole loop
        let cards = self.store.cards_for_game(game_id)?;
        let interval = self.config.draw_interval();

        while game.bingo.is_none() {
            if !self.pause(interval).await {
                return Ok(None);
            }
            let number = match sequence.next() {
                Ok(n) => n,
                Err(GameError::DrawPoolExhausted) => {
                    info!(game_id, "Draw pool exhausted without bingo");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let outcome = self.process_draw(game_id, number, &cards)?;
            self.publish_draw(&outcome);
            game = outcome.game;
        }

        self.finish_game(game_id)?;
        Ok(Some(GameStatus::Completed))
    }

    /// Wait for `duration` unless shutdown is requested first
    async fn pause(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown_rx.clone();
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.changed() => false,
        }
    }

    /// Timer fired: cancel an empty game or fix prizes, seed the draw, and activate
    pub fn start_game(&self, game_id: &str) -> BingoResult<Game> {
        let (game, transitioned) = self.store.transact("start_game", |txn| {
            let mut game = txn.require_game(game_id)?;
            if game.status != GameStatus::Scheduled {
                return Ok((game, false));
            }

            let now = Utc::now();
            if game.cards_sold == 0 {
                transition(&mut game, GameStatus::Canceled)?;
                game.cancel_reason = Some("no cards were purchased".to_string());
                game.ended_at = Some(now);
                txn.put_game(&mut game)?;
                return Ok((game, true));
            }

            let prizes = self.ledger.compute_prize_split(game.total_collected, game.is_special)?;
            PrizeLedger::contribute_jackpot_in(txn, prizes.jackpot_contribution)?;
            PrizeLedger::add_platform_fee_in(txn, prizes.platform_fee)?;

            game.seed = Some(self.seeder.commit_seed(&game.id, game.scheduled_start, game.cards_sold)?);
            game.prizes = Some(prizes);
            game.started_at = Some(now);
            transition(&mut game, GameStatus::Active)?;
            txn.put_game(&mut game)?;
            Ok((game, true))
        })?;
        if !transitioned {
            return Ok(game);
        }

        match game.status {
            GameStatus::Canceled => {
                info!(game_id, "No cards sold, game canceled");
                self.hub.publish_game(
                    game_id,
                    BingoEvent::GameCanceled {
                        game_id: game_id.to_string(),
                        reason: game.cancel_reason.clone().unwrap_or_default(),
                    },
                );
            }
            GameStatus::Active => {
                let prize_breakdown = game.prizes.unwrap_or_default();
                info!(
                    game_id,
                    participants = game.cards_sold,
                    pool = prize_breakdown.total_collected,
                    "Game started"
                );
                self.hub.publish_game(
                    game_id,
                    BingoEvent::GameStarted {
                        game_id: game_id.to_string(),
                        participant_count: game.cards_sold,
                        prize_breakdown,
                    },
                );
            }
            _ => {}
        }
        Ok(game)
    }

    /// Append one number and settle any wins it produces, atomically.
    ///
    /// Quine is checked before bingo. All cards are judged against the
    /// same drawn set, so every card completing on this draw shares the tier.
    pub fn process_draw(&self, game_id: &str, number: u8, cards: &[Card]) -> BingoResult<DrawOutcome> {
        let threshold = self.config.game.jackpot_draw_threshold;

        self.store.transact("draw", |txn| {
            let mut game = txn.require_game(game_id)?;
            if game.status != GameStatus::Active {
                return Err(GameError::InvalidTransition {
                    game_id: game_id.to_string(),
                    from: game.status.to_string(),
                    to: "draw".to_string(),
                }
                .into());
            }

            let mut drawn = game.drawn_set();
            if !drawn.insert(number) {
                return Err(GameError::DuplicateNumber(number).into());
            }
            game.drawn_numbers.push(number);
            let called = game.drawn_numbers.len();
            let prizes = game.prizes.unwrap_or_default();

            let (mut quine, mut bingo, mut jackpot) = (None, None, None);

            if game.quine.is_none() {
                if let Some((win, payout)) =
                    settle_tier(txn, &game.id, cards, &drawn, called, prizes.quine_prize, PrizeTier::Quine)?
                {
                    game.quine = Some(win);
                    quine = Some(payout);
                }
            }

            if game.bingo.is_none() {
                if let Some((win, payout)) =
                    settle_tier(txn, &game.id, cards, &drawn, called, prizes.bingo_prize, PrizeTier::Bingo)?
                {
                    if called <= threshold && !game.jackpot_won && txn.jackpot()?.amount > 0 {
                        let award = PrizeLedger::award_jackpot_in(txn, &game.id, &win.winner_user_ids)?;
                        game.jackpot_won = true;
                        game.jackpot_amount_per_winner = award.amount_per_winner;
                        jackpot = Some(award);
                    }
                    game.bingo = Some(win);
                    bingo = Some(payout);
                }
            }

            txn.put_game(&mut game)?;
            Ok(DrawOutcome {
                game,
                number,
                quine,
                bingo,
                jackpot,
            })
        })
    }

    fn publish_draw(&self, outcome: &DrawOutcome) {
        let game = &outcome.game;
        let called = game.drawn_numbers.len();
        debug!(game_id = %game.id, number = outcome.number, called, "Number called");

        self.hub.publish_game(
            &game.id,
            BingoEvent::NumberCalled {
                game_id: game.id.clone(),
                number: outcome.number,
                called_count: called,
            },
        );

        if let (Some(win), Some(payout)) = (&game.quine, &outcome.quine) {
            info!(game_id = %game.id, winners = win.winner_user_ids.len(), called, "Quine won");
            self.hub.publish_game(
                &game.id,
                BingoEvent::QuineWon {
                    game_id: game.id.clone(),
                    winner_user_ids: win.winner_user_ids.clone(),
                    winning_card_ids: win.winning_card_ids.clone(),
                    numbers_called: win.numbers_called,
                    amount_per_winner: win.amount_per_winner,
                },
            );
            self.publish_awards(&game.id, PrizeTier::Quine, payout);
        }

        if let (Some(win), Some(payout)) = (&game.bingo, &outcome.bingo) {
            info!(
                game_id = %game.id,
                winners = win.winner_user_ids.len(),
                called,
                jackpot = game.jackpot_won,
                "Bingo won"
            );
            self.hub.publish_game(
                &game.id,
                BingoEvent::BingoWon {
                    game_id: game.id.clone(),
                    winner_user_ids: win.winner_user_ids.clone(),
                    winning_card_ids: win.winning_card_ids.clone(),
                    numbers_called: win.numbers_called,
                    amount_per_winner: win.amount_per_winner,
                    jackpot_won: outcome.jackpot.is_some(),
                    jackpot_amount_per_winner: game.jackpot_amount_per_winner,
                },
            );
            self.publish_awards(&game.id, PrizeTier::Bingo, payout);
            if let Some(jackpot) = &outcome.jackpot {
                self.publish_awards(&game.id, PrizeTier::Jackpot, jackpot);
            }
        }
    }

    fn publish_awards(&self, game_id: &str, tier: PrizeTier, payout: &TierPayout) {
        for (user_id, amount) in &payout.awards {
            self.hub.publish_user(
                user_id,
                BingoEvent::PrizeWon {
                    user_id: user_id.clone(),
                    game_id: game_id.to_string(),
                    tier,
                    amount: *amount,
                },
            );
        }
        self.publish_balance_changes(&payout.changes);
    }

    fn publish_balance_changes(&self, changes: &[BalanceChange]) {
        for change in changes {
            self.hub.publish_user(
                &change.user_id,
                BingoEvent::BalanceChanged {
                    user_id: change.user_id.clone(),
                    balance: change.balance,
                    delta: change.delta,
                    reason: change.kind,
                },
            );
        }
    }

    /// Persist the terminal state with its verification hash and announce it
    pub fn finish_game(&self, game_id: &str) -> BingoResult<Game> {
        let game = self.store.transact("finish_game", |txn| {
            let mut game = txn.require_game(game_id)?;
            transition(&mut game, GameStatus::Completed)?;
            game.ended_at = Some(Utc::now());

            // Tiers nobody reached are not paid to anyone; the pool stays whole
            let prizes = game.prizes.unwrap_or_default();
            let mut unclaimed: Amount = 0;
            if game.quine.is_none() {
                unclaimed += prizes.quine_prize;
            }
            if game.bingo.is_none() {
                unclaimed += prizes.bingo_prize;
            }
            PrizeLedger::add_platform_fee_in(txn, unclaimed)?;

            let hash = fairness::verification_hash(&game)
                .map_err(|e| GameError::SeedFailed(e.to_string()))?;
            game.verification_hash = Some(hash);
            txn.put_game(&mut game)?;
            Ok(game)
        })?;

        info!(
            game_id,
            draws = game.drawn_numbers.len(),
            bingo = game.bingo.is_some(),
            "Game completed"
        );
        self.hub.publish_game(
            game_id,
            BingoEvent::GameEnded {
                game_id: game_id.to_string(),
                summary: game.summary(),
            },
        );
        Ok(game)
    }

    /// Mark a game `canceled` and apply the refund policy in one transaction.
    /// Returns `false` when the game had already reached a terminal state.
    fn cancel_game(&self, game_id: &str, reason: &str) -> BingoResult<bool> {
        let refund = self.config.game.refund_on_cancel;
        let changes = self.store.transact("cancel_game", |txn| {
            let mut game = txn.require_game(game_id)?;
            if game.status.is_terminal() {
                return Ok(None);
            }
            transition(&mut game, GameStatus::Canceled)?;
            game.cancel_reason = Some(reason.to_string());
            game.ended_at = Some(Utc::now());

            let changes = if refund && game.cards_sold > 0 {
                // Read after the game so a racing purchase conflicts on the game record
                let cards = self.store.cards_for_game(game_id)?;
                PrizeLedger::refund_game_in(txn, &mut game, &cards)?
            } else {
                Vec::new()
            };
            txn.put_game(&mut game)?;
            Ok(Some(changes))
        })?;

        let Some(changes) = changes else {
            debug!(game_id, "Game already terminal, nothing to cancel");
            return Ok(false);
        };

        self.publish_canceled(game_id, reason);
        if !changes.is_empty() {
            info!(game_id, users = changes.len(), "Refunded canceled game");
            self.publish_balance_changes(&changes);
        }
        Ok(true)
    }

    fn publish_canceled(&self, game_id: &str, reason: &str) {
        self.hub.publish_game(
            game_id,
            BingoEvent::GameCanceled {
                game_id: game_id.to_string(),
                reason: reason.to_string(),
            },
        );
    }

    /// Cancel a game from outside its own task (operator tooling and tests)
    pub fn cancel(&self, game_id: &str, reason: &str) -> BingoResult<()> {
        warn!(game_id, reason, "Canceling game");
        if !self.cancel_game(game_id, reason)? {
            let game = self.store.require_game(game_id)?;
            return Err(BingoError::Game(GameError::InvalidTransition {
                game_id: game_id.to_string(),
                from: game.status.to_string(),
                to: GameStatus::Canceled.to_string(),
            }));
        }
        if let Some((_, handle)) = self.tasks.remove(game_id) {
            handle.abort();
        }
        self.notify_finished(game_id, GameStatus::Canceled);
        Ok(())
    }
}

/// Detect and pay one tier for the current draw. One share per winning card.
fn settle_tier(
    txn: &mut Txn<'_>,
    game_id: &str,
    cards: &[Card],
    drawn: &DrawnSet,
    called: usize,
    tier_amount: Amount,
    tier: PrizeTier,
) -> BingoResult<Option<(TierWin, TierPayout)>> {
    let predicate: fn(&CardGrid, &DrawnSet) -> bool = match tier {
        PrizeTier::Quine => has_quine,
        _ => has_bingo,
    };
    let winners = winning_cards(cards, drawn, predicate);
    if winners.is_empty() {
        return Ok(None);
    }

    let winner_user_ids: Vec<UserId> = winners.iter().map(|c| c.user_id.clone()).collect();
    let winning_card_ids: Vec<CardId> = winners.iter().map(|c| c.id.clone()).collect();
    let payout = PrizeLedger::credit_winners_in(txn, game_id, &winner_user_ids, tier_amount, tier)?;

    Ok(Some((
        TierWin {
            winner_user_ids,
            winning_card_ids,
            numbers_called: called,
            amount_per_winner: payout.amount_per_winner,
        },
        payout,
    )))
}
