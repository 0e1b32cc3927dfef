//! Local sub-query execution: drain a wrapped table expression into the sink.

use tessera_common::error::{TesseraError, TesseraResult};

use super::{RowSink, TableExpression};

/// Pull every row from `expr` and hand it to `sink`.
///
/// Any failure raised by the expression becomes this sub-query's failure.
/// Local work is never retried.
pub fn execute_local(expr: Box<dyn TableExpression>, sink: &dyn RowSink) -> TesseraResult<()> {
    if sink.is_cancelled() {
        return Err(TesseraError::Cancelled("gather cancelled".into()));
    }
    let column_count = expr.column_count();
    let mut cursor = expr.execute()?;
    while let Some(row) = cursor.next()? {
        if row.len() != column_count {
            return Err(TesseraError::LocalExecution(format!(
                "row {} has {} columns, expected {}",
                row,
                row.len(),
                column_count
            )));
        }
        if !sink.push(row) {
            return Err(TesseraError::Cancelled("gather cancelled".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed_exec::ResultCursor;
    use crate::partition::MemoryScan;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tessera_common::datum::{Datum, OwnedRow};

    #[derive(Default)]
    struct VecSink {
        rows: Mutex<Vec<OwnedRow>>,
        cancelled: AtomicBool,
        accept: Option<usize>,
    }

    impl RowSink for VecSink {
        fn push(&self, row: OwnedRow) -> bool {
            let mut rows = self.rows.lock();
            if self.accept.is_some_and(|n| rows.len() >= n) {
                self.cancelled.store(true, Ordering::SeqCst);
                return false;
            }
            rows.push(row);
            true
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    struct FailingScan {
        good_rows: usize,
    }

    impl TableExpression for FailingScan {
        fn column_count(&self) -> usize {
            1
        }

        fn execute(self: Box<Self>) -> TesseraResult<Box<dyn ResultCursor>> {
            Ok(self)
        }
    }

    impl ResultCursor for FailingScan {
        fn column_count(&self) -> usize {
            1
        }

        fn next(&mut self) -> TesseraResult<Option<OwnedRow>> {
            if self.good_rows == 0 {
                return Err(TesseraError::LocalExecution("disk read failed".into()));
            }
            self.good_rows -= 1;
            Ok(Some(OwnedRow::new(vec![Datum::Int64(1)])))
        }
    }

    fn rows(n: i64) -> Vec<OwnedRow> {
        (0..n).map(|i| OwnedRow::new(vec![Datum::Int64(i)])).collect()
    }

    #[test]
    fn test_drains_expression_in_order() {
        let sink = VecSink::default();
        execute_local(Box::new(MemoryScan::new(1, rows(3))), &sink).unwrap();
        assert_eq!(*sink.rows.lock(), rows(3));
    }

    #[test]
    fn test_expression_failure_propagates_after_partial_rows() {
        let sink = VecSink::default();
        let err = execute_local(Box::new(FailingScan { good_rows: 1 }), &sink).unwrap_err();
        assert_eq!(err, TesseraError::LocalExecution("disk read failed".into()));
        assert_eq!(sink.rows.lock().len(), 1);
    }

    #[test]
    fn test_stops_when_sink_rejects() {
        let sink = VecSink {
            accept: Some(2),
            ..Default::default()
        };
        let err = execute_local(Box::new(MemoryScan::new(1, rows(10))), &sink).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(sink.rows.lock().len(), 2);
    }

    #[test]
    fn test_does_not_start_when_already_cancelled() {
        let sink = VecSink::default();
        sink.cancelled.store(true, Ordering::SeqCst);
        let err = execute_local(Box::new(MemoryScan::new(1, rows(3))), &sink).unwrap_err();
        assert!(err.is_cancelled());
        assert!(sink.rows.lock().is_empty());
    }

    #[test]
    fn test_rejects_row_of_wrong_width() {
        let sink = VecSink::default();
        let bad = vec![OwnedRow::new(vec![Datum::Int64(1), Datum::Int64(2)])];
        let err = execute_local(Box::new(MemoryScan::new(1, bad)), &sink).unwrap_err();
        assert!(matches!(err, TesseraError::LocalExecution(_)));
    }
}
