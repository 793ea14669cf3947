//! Win verifier: quine (a completed row) and bingo (a completed card).

use super::types::{Card, CardGrid, DrawnSet};

fn row_complete(row: &[u8; 9], drawn: &DrawnSet) -> bool {
    row.iter().filter(|n| **n != 0).all(|n| drawn.contains(*n))
}

/// At least one row has all of its numbers drawn
pub fn has_quine(grid: &CardGrid, drawn: &DrawnSet) -> bool {
    grid.iter().any(|row| row_complete(row, drawn))
}

/// Every number on the card has been drawn
pub fn has_bingo(grid: &CardGrid, drawn: &DrawnSet) -> bool {
    grid.iter().all(|row| row_complete(row, drawn))
}

/// Cards that satisfy `predicate` against one drawn-set snapshot.
/// Ties at the same draw are all returned, in card order.
pub fn winning_cards<'a>(
    cards: &'a [Card],
    drawn: &DrawnSet,
    predicate: fn(&CardGrid, &DrawnSet) -> bool,
) -> Vec<&'a Card> {
    cards.iter().filter(|card| predicate(&card.numbers, drawn)).collect()
}
