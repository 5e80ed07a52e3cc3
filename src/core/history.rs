use super::types::HistoryRow;

/// Committed years, oldest first.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    rows: Vec<HistoryRow>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryRow> {
        self.rows.last()
    }

    pub fn next_year_index(&self) -> u32 {
        self.rows.last().map_or(1, |row| row.year_index + 1)
    }

    pub(crate) fn append(&mut self, row: HistoryRow) {
        debug_assert!(
            row.year_index == self.next_year_index(),
            "year {} appended after {:?}",
            row.year_index,
            self.rows.last().map(|r| r.year_index)
        );
        self.rows.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(year_index: u32) -> HistoryRow {
        HistoryRow {
            year_index,
            expense: 0.0,
            withdrawn: 0.0,
            return_percents: vec![0.0],
            return_amounts: vec![0.0],
            ending_balances: vec![1.0],
            total: 1.0,
        }
    }

    #[test]
    fn next_year_index_starts_at_one_and_follows_last_row() {
        let mut store = HistoryStore::new();
        assert_eq!(store.next_year_index(), 1);
        store.append(row(1));
        store.append(row(2));
        assert_eq!(store.next_year_index(), 3);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last().map(|r| r.year_index), Some(2));
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn append_rejects_out_of_order_year() {
        let mut store = HistoryStore::new();
        store.append(row(1));
        store.append(row(1));
    }
}
