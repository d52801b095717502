use super::statement::Statement;

/// An ordered group of statements applied to the store as one operation.
///
/// A batch is only constructed by [`BatchAccumulator`] when it is sealed and
/// exposes no way to mutate it afterwards. It always holds at least one
/// statement.
#[derive(Debug)]
pub struct Batch {
    seq: u64,
    records: usize,
    statements: Vec<Statement>,
}

impl Batch {
    /// Position of the batch within its pipeline, starting at zero.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Number of source records whose statements completed in this batch.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Groups statements into batches of `batch_size` records, never letting a
/// batch exceed `max_statements` statements.
pub struct BatchAccumulator {
    batch_size: usize,
    max_statements: usize,
    records: usize,
    statements: Vec<Statement>,
    next_seq: u64,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize, max_statements: usize) -> Self {
        let batch_size = batch_size.max(1);
        let max_statements = max_statements.max(1);
        BatchAccumulator {
            batch_size,
            max_statements,
            records: 0,
            statements: Vec::with_capacity(batch_size.min(max_statements)),
            next_seq: 0,
        }
    }

    /// Appends the statements built from one record and returns any batches
    /// sealed as a result, in order.
    pub fn push(&mut self, statements: Vec<Statement>) -> Vec<Batch> {
        let mut sealed = Vec::new();
        for statement in statements {
            self.statements.push(statement);
            if self.statements.len() >= self.max_statements {
                sealed.extend(self.seal());
            }
        }

        self.records += 1;
        if self.records >= self.batch_size {
            sealed.extend(self.seal());
            // a window of records that produced nothing is dropped
            self.records = 0;
        }
        sealed
    }

    /// Seals whatever is left at end of stream.
    pub fn finish(mut self) -> Option<Batch> {
        self.seal()
    }

    fn seal(&mut self) -> Option<Batch> {
        if self.statements.is_empty() {
            return None;
        }
        let capacity = self.batch_size.min(self.max_statements);
        let statements = std::mem::replace(&mut self.statements, Vec::with_capacity(capacity));
        let batch = Batch {
            seq: self.next_seq,
            records: self.records,
            statements,
        };
        self.next_seq += 1;
        self.records = 0;
        Some(batch)
    }
}
