use std::collections::{HashMap, HashSet};

use crate::types::MutationRecord;

/// Mutations for one destination table, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBatch {
    pub table: String,
    pub records: Vec<MutationRecord>,
}

impl TableBatch {
    /// Distinct identifiers in first-seen order
    pub fn ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect()
    }
}

/// One flush unit: every table buffered since the previous flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    tables: Vec<TableBatch>,
}

impl Batch {
    pub fn tables(&self) -> &[TableBatch] {
        &self.tables
    }

    pub fn into_tables(self) -> Vec<TableBatch> {
        self.tables
    }

    /// Mutation count across all tables
    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Groups mutations by table and hands them out once the buffered count reaches the threshold.
///
/// The check runs after all mutations of one origin record have been added, so a record's
/// mutations always land in the same flush.
#[derive(Debug)]
pub struct BatchAccumulator {
    threshold: usize,
    tables: Vec<TableBatch>,
    positions: HashMap<String, usize>,
    pending: usize,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            tables: Vec::new(),
            positions: HashMap::new(),
            pending: 0,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    fn push(&mut self, record: MutationRecord) {
        let position = match self.positions.get(&record.table) {
            Some(&position) => position,
            None => {
                self.tables.push(TableBatch {
                    table: record.table.clone(),
                    records: Vec::new(),
                });
                self.positions.insert(record.table.clone(), self.tables.len() - 1);
                self.tables.len() - 1
            }
        };
        self.tables[position].records.push(record);
        self.pending += 1;
    }

    /// Add the mutations of one origin record; returns a batch when the threshold is reached
    pub fn extend(&mut self, records: impl IntoIterator<Item = MutationRecord>) -> Option<Batch> {
        for record in records {
            self.push(record);
        }
        if self.pending >= self.threshold {
            Some(self.take())
        } else {
            None
        }
    }

    /// Residual records at end of input
    pub fn finish(&mut self) -> Option<Batch> {
        if self.pending == 0 {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> Batch {
        self.positions.clear();
        self.pending = 0;
        Batch {
            tables: std::mem::take(&mut self.tables),
        }
    }
}
