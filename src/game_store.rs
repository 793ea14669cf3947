//! Persistent game, card and ledger records over a `KeyValueStore`.
//!
//! Records are JSON under prefixed keys. Mutations go through
//! [`GameStore::transact`], an optimistic transaction: every key read through
//! the [`Txn`] becomes a compare-and-swap expectation of the final commit, so
//! read-modify-write on shared rows (jackpot, wallet, balances) never loses
//! an update. Conflicting attempts are re-run a bounded number of times.

use crate::{
    common::traits::{KeyValueStore, WriteSet},
    errors::{BingoResult, GameError, StorageError},
    games::types::{Account, Card, Game, Jackpot, OrganizerWallet, Transaction},
};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::BTreeMap, sync::Arc};

const GAME_PREFIX: &str = "game:";
const CARD_PREFIX: &str = "card:";
const GAME_CARDS_PREFIX: &str = "card:game:";
const USER_CARDS_PREFIX: &str = "card:user:";
const ACCOUNT_PREFIX: &str = "account:";
const TX_PREFIX: &str = "tx:";
const JACKPOT_KEY: &[u8] = b"jackpot";
const WALLET_KEY: &[u8] = b"wallet";

fn game_key(game_id: &str) -> Vec<u8> {
    format!("{}{}", GAME_PREFIX, game_id).into_bytes()
}

fn card_key(card_id: &str) -> Vec<u8> {
    format!("{}{}", CARD_PREFIX, card_id).into_bytes()
}

fn game_card_index_key(game_id: &str, card_id: &str) -> Vec<u8> {
    format!("{}{}:{}", GAME_CARDS_PREFIX, game_id, card_id).into_bytes()
}

fn user_card_index_key(user_id: &str, game_id: &str, card_id: &str) -> Vec<u8> {
    format!("{}{}:{}:{}", USER_CARDS_PREFIX, user_id, game_id, card_id).into_bytes()
}

fn account_key(user_id: &str) -> Vec<u8> {
    format!("{}{}", ACCOUNT_PREFIX, user_id).into_bytes()
}

fn transaction_key(tx: &Transaction) -> Vec<u8> {
    // Zero-padded millis keep a user's history in chronological key order
    format!(
        "{}{}:{:020}:{}",
        TX_PREFIX,
        tx.user_id,
        tx.created_at.timestamp_millis().max(0),
        tx.id
    )
    .into_bytes()
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> BingoResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::CorruptedData(format!(
            "Failed to decode {}: {}",
            String::from_utf8_lossy(key),
            e
        ))
        .into()
    })
}

fn encode<T: Serialize>(key: &[u8], value: &T) -> BingoResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        StorageError::WriteFailed(format!(
            "Failed to encode {}: {}",
            String::from_utf8_lossy(key),
            e
        ))
        .into()
    })
}

/// Card ids sit after the last ':' of an index key
fn card_id_from_index(key: &[u8]) -> Option<String> {
    let key = std::str::from_utf8(key).ok()?;
    key.rsplit(':').next().map(str::to_string)
}

/// Typed access to every record the engine persists
#[derive(Clone)]
pub struct GameStore {
    kv: Arc<dyn KeyValueStore>,
    max_conflict_retries: u32,
}

impl GameStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, max_conflict_retries: u32) -> Self {
        Self {
            kv,
            max_conflict_retries: max_conflict_retries.max(1),
        }
    }

    /// Run `f` as one atomic unit of work.
    ///
    /// Errors returned by `f` abort without writing anything. A commit that
    /// loses a compare-and-swap race re-runs `f` against fresh reads; after
    /// `max_conflict_retries` attempts the conflict surfaces as
    /// `PersistenceFailure`.
    pub fn transact<T, F>(&self, op: &str, mut f: F) -> BingoResult<T>
    where
        F: FnMut(&mut Txn<'_>) -> BingoResult<T>,
    {
        for attempt in 1..=self.max_conflict_retries {
            let mut txn = Txn::new(self.kv.as_ref());
            let value = f(&mut txn)?;

            match self.kv.commit(txn.into_write_set()) {
                Ok(()) => return Ok(value),
                Err(e) if e.is_conflict() => {
                    tracing::warn!(op, attempt, error = %e, "Transaction conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::PersistenceFailure(format!(
            "{}: gave up after {} conflicting attempts",
            op, self.max_conflict_retries
        ))
        .into())
    }

    fn load<T: DeserializeOwned>(&self, key: &[u8]) -> BingoResult<Option<T>> {
        match self.kv.get(key)? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn game(&self, game_id: &str) -> BingoResult<Option<Game>> {
        self.load(&game_key(game_id))
    }

    pub fn require_game(&self, game_id: &str) -> BingoResult<Game> {
        self.game(game_id)?
            .ok_or_else(|| GameError::NotFound(game_id.to_string()).into())
    }

    /// Every stored game, in key order
    pub fn games(&self) -> BingoResult<Vec<Game>> {
        self.kv
            .scan_prefix(GAME_PREFIX.as_bytes())?
            .into_iter()
            .map(|(key, value)| decode(&key, &value))
            .collect()
    }

    pub fn card(&self, card_id: &str) -> BingoResult<Option<Card>> {
        self.load(&card_key(card_id))
    }

    fn cards_by_index(&self, prefix: &[u8]) -> BingoResult<Vec<Card>> {
        let mut cards = Vec::new();
        for (key, _) in self.kv.scan_prefix(prefix)? {
            let Some(card_id) = card_id_from_index(&key) else {
                continue;
            };
            match self.card(&card_id)? {
                Some(card) => cards.push(card),
                None => {
                    tracing::warn!(card_id = %card_id, "Card index points at a missing card");
                }
            }
        }
        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(cards)
    }

    pub fn cards_for_game(&self, game_id: &str) -> BingoResult<Vec<Card>> {
        self.cards_by_index(format!("{}{}:", GAME_CARDS_PREFIX, game_id).as_bytes())
    }

    pub fn cards_for_user(&self, user_id: &str, game_id: &str) -> BingoResult<Vec<Card>> {
        self.cards_by_index(format!("{}{}:{}:", USER_CARDS_PREFIX, user_id, game_id).as_bytes())
    }

    pub fn account(&self, user_id: &str) -> BingoResult<Option<Account>> {
        self.load(&account_key(user_id))
    }

    /// A user's ledger rows, oldest first
    pub fn transactions(&self, user_id: &str) -> BingoResult<Vec<Transaction>> {
        self.kv
            .scan_prefix(format!("{}{}:", TX_PREFIX, user_id).as_bytes())?
            .into_iter()
            .map(|(key, value)| decode(&key, &value))
            .collect()
    }

    pub fn jackpot(&self) -> BingoResult<Jackpot> {
        Ok(self.load(JACKPOT_KEY)?.unwrap_or_default())
    }

    pub fn wallet(&self) -> BingoResult<OrganizerWallet> {
        Ok(self.load(WALLET_KEY)?.unwrap_or_default())
    }

    /// Raw access for records outside the typed layout (VRF key material)
    pub fn get_raw(&self, key: &[u8]) -> BingoResult<Option<Vec<u8>>> {
        self.kv.get(key)
    }
}

/// Read set and pending writes of one optimistic transaction
pub struct Txn<'a> {
    kv: &'a dyn KeyValueStore,
    reads: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    // None marks a delete
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> Txn<'a> {
    fn new(kv: &'a dyn KeyValueStore) -> Self {
        Self {
            kv,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Read a key, seeing this transaction's own pending writes
    pub fn get_raw(&mut self, key: &[u8]) -> BingoResult<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        if let Some(seen) = self.reads.get(key) {
            return Ok(seen.clone());
        }
        let value = self.kv.get(key)?;
        self.reads.insert(key.to_vec(), value.clone());
        Ok(value)
    }

    pub fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    fn get<T: DeserializeOwned>(&mut self, key: &[u8]) -> BingoResult<Option<T>> {
        match self.get_raw(key)? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> BingoResult<()> {
        let bytes = encode(&key, value)?;
        self.put_raw(key, bytes);
        Ok(())
    }

    pub fn game(&mut self, game_id: &str) -> BingoResult<Option<Game>> {
        self.get(&game_key(game_id))
    }

    pub fn require_game(&mut self, game_id: &str) -> BingoResult<Game> {
        self.game(game_id)?
            .ok_or_else(|| GameError::NotFound(game_id.to_string()).into())
    }

    /// Store a game, bumping its revision
    pub fn put_game(&mut self, game: &mut Game) -> BingoResult<()> {
        game.revision += 1;
        self.put(game_key(&game.id), game)
    }

    /// Store a new card together with its game and user index entries
    pub fn insert_card(&mut self, card: &Card) -> BingoResult<()> {
        self.put(card_key(&card.id), card)?;
        self.put_raw(game_card_index_key(&card.game_id, &card.id), Vec::new());
        self.put_raw(user_card_index_key(&card.user_id, &card.game_id, &card.id), Vec::new());
        Ok(())
    }

    /// Existing account or a zero-balance one for a first-time user
    pub fn account(&mut self, user_id: &str) -> BingoResult<Account> {
        Ok(self
            .get(&account_key(user_id))?
            .unwrap_or_else(|| Account::new(user_id.to_string())))
    }

    pub fn put_account(&mut self, account: &mut Account) -> BingoResult<()> {
        account.revision += 1;
        account.updated_at = chrono::Utc::now();
        self.put(account_key(&account.user_id), account)
    }

    pub fn append_transaction(&mut self, tx: &Transaction) -> BingoResult<()> {
        self.put(transaction_key(tx), tx)
    }

    pub fn jackpot(&mut self) -> BingoResult<Jackpot> {
        Ok(self.get(JACKPOT_KEY)?.unwrap_or_default())
    }

    pub fn put_jackpot(&mut self, jackpot: &mut Jackpot) -> BingoResult<()> {
        jackpot.revision += 1;
        jackpot.updated_at = chrono::Utc::now();
        self.put(JACKPOT_KEY.to_vec(), jackpot)
    }

    pub fn wallet(&mut self) -> BingoResult<OrganizerWallet> {
        Ok(self.get(WALLET_KEY)?.unwrap_or_default())
    }

    pub fn put_wallet(&mut self, wallet: &mut OrganizerWallet) -> BingoResult<()> {
        wallet.revision += 1;
        wallet.updated_at = chrono::Utc::now();
        self.put(WALLET_KEY.to_vec(), wallet)
    }

    fn into_write_set(self) -> WriteSet {
        let mut writes = WriteSet::new();
        for (key, value) in self.reads {
            writes.expect(key, value);
        }
        for (key, value) in self.writes {
            match value {
                Some(bytes) => writes.put(key, bytes),
                None => writes.delete(key),
            }
        }
        writes
    }
}
