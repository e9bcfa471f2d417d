//! Greedy packing of records into API-sized batches.

use std::collections::HashSet;

use busbar_sf_jobs::{csv_cells_len, Record};

/// Per-batch ceilings.
///
/// `max_bytes` bounds the batch as uploaded: a CSV with a header row over
/// the union of the batch's columns and every row padded to that union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
}

/// A size-bounded chunk of one object's records.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position of this batch in submission order.
    pub sequence: usize,
    pub object_name: String,
    pub records: Vec<Record>,
    /// Size of the batch encoded as CSV, header row included.
    pub encoded_bytes: usize,
    /// A single record larger than the byte ceiling, alone in its batch.
    pub oversized: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Splits an ordered record set into batches.
///
/// Records are appended to the current batch until either ceiling would
/// be exceeded. Order is preserved within and across batches, which is
/// what lets row-indexed results be mapped back to `client_row_id`.
#[derive(Debug, Clone, Copy)]
pub struct BatchSplitter {
    limits: BatchLimits,
}

impl BatchSplitter {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits: BatchLimits {
                max_rows: limits.max_rows.max(1),
                max_bytes: limits.max_bytes.max(1),
            },
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    pub fn split(&self, object_name: &str, records: Vec<Record>) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut pending = Pending::default();

        for record in records {
            let cells = record.encoded_cells_len();
            let alone = Pending::default().size_with(&record, cells);

            if alone > self.limits.max_bytes {
                flush(&mut batches, object_name, &mut pending);
                batches.push(Batch {
                    sequence: batches.len(),
                    object_name: object_name.to_string(),
                    records: vec![record],
                    encoded_bytes: alone,
                    oversized: true,
                });
                continue;
            }

            if pending.records.len() + 1 > self.limits.max_rows
                || pending.size_with(&record, cells) > self.limits.max_bytes
            {
                flush(&mut batches, object_name, &mut pending);
            }

            pending.push(record, cells);
        }

        flush(&mut batches, object_name, &mut pending);
        batches
    }
}

/// Running totals for the batch being filled.
#[derive(Debug, Default)]
struct Pending {
    records: Vec<Record>,
    columns: HashSet<String>,
    /// Encoded size of the column names.
    header_cells: usize,
    /// Encoded size of every record's own values.
    cells: usize,
    /// Records with at least one non-blank value.
    filled: usize,
}

impl Pending {
    fn size(&self) -> usize {
        encoded_size(
            self.columns.len(),
            self.header_cells,
            self.records.len(),
            self.cells,
            self.filled,
        )
    }

    /// Size the batch would have with `record` appended.
    fn size_with(&self, record: &Record, cells: usize) -> usize {
        let mut columns = self.columns.len();
        let mut header_cells = self.header_cells;
        for name in record.fields.keys() {
            if !self.columns.contains(name) {
                columns += 1;
                header_cells = header_cells.saturating_add(csv_cells_len([name]));
            }
        }
        encoded_size(
            columns,
            header_cells,
            self.records.len() + 1,
            self.cells.saturating_add(cells),
            self.filled + usize::from(cells > 0),
        )
    }

    fn push(&mut self, record: Record, cells: usize) {
        for name in record.fields.keys() {
            if self.columns.insert(name.clone()) {
                self.header_cells = self.header_cells.saturating_add(csv_cells_len([name]));
            }
        }
        self.cells = self.cells.saturating_add(cells);
        self.filled += usize::from(cells > 0);
        self.records.push(record);
    }
}

/// Header row plus `rows` rows, each padded to `columns` cells.
fn encoded_size(
    columns: usize,
    header_cells: usize,
    rows: usize,
    cells: usize,
    filled: usize,
) -> usize {
    rows_size(columns, 1, header_cells, usize::from(header_cells > 0))
        .saturating_add(rows_size(columns, rows, cells, filled))
}

fn rows_size(columns: usize, rows: usize, cells: usize, filled: usize) -> usize {
    // one delimiter per extra column, one terminator per row
    let mut size = cells.saturating_add(rows.saturating_mul(columns.max(1)));
    if columns <= 1 {
        // a row whose only cell is blank is written as `""`
        size = size.saturating_add(2 * rows.saturating_sub(filled));
    }
    size
}

fn flush(batches: &mut Vec<Batch>, object_name: &str, pending: &mut Pending) {
    if pending.records.is_empty() {
        return;
    }
    let encoded_bytes = pending.size();
    let done = std::mem::take(pending);
    batches.push(Batch {
        sequence: batches.len(),
        object_name: object_name.to_string(),
        records: done.records,
        encoded_bytes,
        oversized: false,
    });
}

/// Split `records` with the given row and byte ceilings.
pub fn split(
    object_name: &str,
    records: Vec<Record>,
    max_batch_size: usize,
    max_batch_bytes: usize,
) -> Vec<Batch> {
    BatchSplitter::new(BatchLimits {
        max_rows: max_batch_size,
        max_bytes: max_batch_bytes,
    })
    .split(object_name, records)
}
