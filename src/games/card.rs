//! Card generator for the European 90-ball layout.
//!
//! A card is 3 rows by 9 columns. Every row holds exactly 5 numbers, every
//! column holds between 1 and 3, and column `c` only draws from
//! `[c*10+1, (c+1)*10]` (the last column covers 81..=90).

use super::types::{CardGrid, COLUMNS, NUMBERS_PER_ROW, ROWS};
use crate::errors::GameError;
use rand::{seq::SliceRandom, Rng};

const NUMBERS_PER_CARD: usize = ROWS * NUMBERS_PER_ROW;
const MAX_PER_COLUMN: usize = 3;

/// Inclusive number range of a column
pub fn column_range(column: usize) -> (u8, u8) {
    let low = (column * 10 + 1) as u8;
    let high = if column == COLUMNS - 1 { 90 } else { ((column + 1) * 10) as u8 };
    (low, high)
}

/// Generate a valid card. Always succeeds for any random source.
pub fn generate_card<R: Rng + ?Sized>(rng: &mut R) -> CardGrid {
    let counts = column_counts(rng);
    let layout = assign_rows(&counts, rng);

    let mut grid: CardGrid = [[0; COLUMNS]; ROWS];
    for (column, rows) in layout.iter().enumerate() {
        let (low, high) = column_range(column);
        let pool: Vec<u8> = (low..=high).collect();
        let mut picked: Vec<u8> = pool.choose_multiple(rng, rows.len()).copied().collect();
        picked.sort_unstable();

        // Ascending top to bottom within the column
        for (row, number) in rows.iter().zip(picked) {
            grid[*row][column] = number;
        }
    }
    grid
}

/// Per-column number counts: at least 1, at most 3, 15 in total
fn column_counts<R: Rng + ?Sized>(rng: &mut R) -> [usize; COLUMNS] {
    let mut counts = [1usize; COLUMNS];
    let mut extra = NUMBERS_PER_CARD - COLUMNS;
    while extra > 0 {
        let column = rng.gen_range(0..COLUMNS);
        if counts[column] < MAX_PER_COLUMN {
            counts[column] += 1;
            extra -= 1;
        }
    }
    counts
}

/// Choose which rows each column occupies so that every row ends with 5.
///
/// Columns are placed fullest first, each into the rows with the most
/// remaining capacity. With row capacities of 5 and column counts of at
/// most 3 summing to 15 this greedy order always completes.
fn assign_rows<R: Rng + ?Sized>(counts: &[usize; COLUMNS], rng: &mut R) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..COLUMNS).collect();
    order.shuffle(rng);
    order.sort_by(|a, b| counts[*b].cmp(&counts[*a]));

    let mut capacity = [NUMBERS_PER_ROW; ROWS];
    let mut layout = vec![Vec::new(); COLUMNS];

    for column in order {
        let mut rows: Vec<usize> = (0..ROWS).collect();
        rows.shuffle(rng);
        rows.sort_by(|a, b| capacity[*b].cmp(&capacity[*a]));

        let mut chosen: Vec<usize> = rows
            .into_iter()
            .filter(|row| capacity[*row] > 0)
            .take(counts[column])
            .collect();
        chosen.sort_unstable();

        for row in &chosen {
            capacity[*row] -= 1;
        }
        layout[column] = chosen;
    }

    layout
}

/// Non-zero cells of a card
pub fn card_numbers(grid: &CardGrid) -> impl Iterator<Item = u8> + '_ {
    grid.iter().flat_map(|row| row.iter().copied()).filter(|n| *n != 0)
}

/// Check the layout rules of a grid
pub fn validate_grid(grid: &CardGrid) -> Result<(), GameError> {
    for (r, row) in grid.iter().enumerate() {
        let filled = row.iter().filter(|n| **n != 0).count();
        if filled != NUMBERS_PER_ROW {
            return Err(GameError::InvalidCard(format!(
                "row {} has {} numbers, expected {}",
                r, filled, NUMBERS_PER_ROW
            )));
        }
    }

    let mut seen = [false; 91];
    for column in 0..COLUMNS {
        let (low, high) = column_range(column);
        let mut filled = 0;
        let mut previous = 0u8;
        for row in grid.iter() {
            let n = row[column];
            if n == 0 {
                continue;
            }
            if n < low || n > high {
                return Err(GameError::InvalidCard(format!(
                    "{} outside column {} range {}..={}",
                    n, column, low, high
                )));
            }
            if seen[n as usize] {
                return Err(GameError::InvalidCard(format!("duplicate number {}", n)));
            }
            if n < previous {
                return Err(GameError::InvalidCard(format!("column {} is not ascending", column)));
            }
            seen[n as usize] = true;
            previous = n;
            filled += 1;
        }
        if filled == 0 || filled > MAX_PER_COLUMN {
            return Err(GameError::InvalidCard(format!(
                "column {} has {} numbers",
                column, filled
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_column_ranges() {
        assert_eq!(column_range(0), (1, 10));
        assert_eq!(column_range(4), (41, 50));
        assert_eq!(column_range(8), (81, 90));
    }

    #[test]
    fn test_generated_card_is_valid() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let grid = generate_card(&mut rng);
            validate_grid(&grid).unwrap();
            assert_eq!(card_numbers(&grid).count(), 15);
        }
    }

    #[test]
    fn test_validate_rejects_bad_layouts() {
        let good = generate_card(&mut StdRng::seed_from_u64(7));
        assert!(validate_grid(&good).is_ok());

        let mut short_row = good;
        let col = short_row[0].iter().position(|n| *n != 0).unwrap();
        short_row[0][col] = 0;
        assert!(validate_grid(&short_row).is_err());

        let mut out_of_range = good;
        let col = out_of_range[1].iter().position(|n| *n != 0).unwrap();
        let (_, high) = column_range(col);
        out_of_range[1][col] = if high == 90 { 1 } else { high + 1 };
        assert!(validate_grid(&out_of_range).is_err());
    }

    proptest! {
        #[test]
        fn prop_cards_follow_layout(seed in any::<u64>()) {
            let grid = generate_card(&mut StdRng::seed_from_u64(seed));
            prop_assert!(validate_grid(&grid).is_ok());

            for row in grid.iter() {
                prop_assert_eq!(row.iter().filter(|n| **n == 0).count(), 4);
            }

            let mut numbers: Vec<u8> = card_numbers(&grid).collect();
            numbers.sort_unstable();
            numbers.dedup();
            prop_assert_eq!(numbers.len(), 15);
        }
    }
}
