//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Replaying tunnel records into a table.
//!
//! A [`Record`] describes a row change; [`RowChange`] is the equivalent
//! write against a table. [`replay_records`] applies a batch in order through
//! any [`TableWriter`], which is how a consumer mirrors one table into
//! another.
use async_trait::async_trait;
use std::result::Result;
use tracing::trace;

use crate::error::{ia_err, TunnelError};
use crate::record::{Record, RecordColumn, RecordColumnType};
use crate::types::{ActionType, ColumnValue, PrimaryKey};

/// A column written by a put, with an optional explicit version timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PutColumn {
    pub name: String,
    pub value: ColumnValue,
    pub timestamp: Option<i64>,
}

/// A single-row write.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    /// Replace the whole row.
    Put {
        primary_key: PrimaryKey,
        columns: Vec<PutColumn>,
    },
    /// Modify columns of an existing row. Columns keep their per-column
    /// operation (put, delete one version, delete all versions).
    Update {
        primary_key: PrimaryKey,
        columns: Vec<RecordColumn>,
    },
    Delete {
        primary_key: PrimaryKey,
    },
}

impl RowChange {
    pub fn primary_key(&self) -> &PrimaryKey {
        match self {
            RowChange::Put { primary_key, .. } => primary_key,
            RowChange::Update { primary_key, .. } => primary_key,
            RowChange::Delete { primary_key } => primary_key,
        }
    }
}

impl TryFrom<&Record> for RowChange {
    type Error = TunnelError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        let primary_key = record.primary_key.clone();
        match record.action_type {
            ActionType::Put => {
                let mut columns = Vec::with_capacity(record.columns.len());
                for c in &record.columns {
                    match (&c.column_type, &c.value) {
                        (RecordColumnType::Put, Some(v)) => columns.push(PutColumn {
                            name: c.name.clone(),
                            value: v.clone(),
                            timestamp: c.timestamp,
                        }),
                        _ => {
                            return ia_err!(
                                "put record has non-put column '{}' ({:?})",
                                c.name,
                                c.column_type
                            )
                        }
                    }
                }
                Ok(RowChange::Put {
                    primary_key,
                    columns,
                })
            }
            ActionType::Update => Ok(RowChange::Update {
                primary_key,
                columns: record.columns.clone(),
            }),
            ActionType::Delete => Ok(RowChange::Delete { primary_key }),
        }
    }
}

/// Single-row writes against a table.
#[async_trait]
pub trait TableWriter: Send + Sync {
    async fn write_row(&self, table: &str, change: RowChange) -> Result<(), TunnelError>;
}

/// Write `records` to `table` in order. Stops at the first failure.
///
/// Returns the number of rows written.
pub async fn replay_records(
    writer: &dyn TableWriter,
    table: &str,
    records: &[Record],
) -> Result<usize, TunnelError> {
    for (i, record) in records.iter().enumerate() {
        let change = RowChange::try_from(record)?;
        trace!("replaying {:?} into {}", record.action_type, table);
        writer
            .write_row(table, change)
            .await
            .map_err(|e| TunnelError {
                code: e.code,
                message: format!("replay of record {} into '{}' failed: {}", i, table, e.message),
            })?;
    }
    Ok(records.len())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::TunnelErrorCode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemWriter {
        rows: Mutex<Vec<(String, RowChange)>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl TableWriter for MemWriter {
        async fn write_row(&self, table: &str, change: RowChange) -> Result<(), TunnelError> {
            let mut rows = self.rows.lock().unwrap();
            if Some(rows.len()) == self.fail_at {
                return Err(TunnelError::new(TunnelErrorCode::ServerBusy, "busy"));
            }
            rows.push((table.to_string(), change));
            Ok(())
        }
    }

    fn record(action_type: ActionType, columns: Vec<RecordColumn>) -> Record {
        Record {
            action_type,
            timestamp: 0,
            sequence_info: None,
            primary_key: PrimaryKey::new().column("id", 1i64),
            columns,
        }
    }

    fn put_col(name: &str, v: i64) -> RecordColumn {
        RecordColumn {
            name: name.to_string(),
            column_type: RecordColumnType::Put,
            value: Some(ColumnValue::Integer(v)),
            timestamp: Some(100),
        }
    }

    #[test]
    fn converts_each_action() {
        let put = RowChange::try_from(&record(ActionType::Put, vec![put_col("a", 7)])).unwrap();
        assert_eq!(
            put,
            RowChange::Put {
                primary_key: PrimaryKey::new().column("id", 1i64),
                columns: vec![PutColumn {
                    name: "a".to_string(),
                    value: ColumnValue::Integer(7),
                    timestamp: Some(100),
                }],
            }
        );

        let del_col = RecordColumn {
            name: "b".to_string(),
            column_type: RecordColumnType::DeleteAllVersions,
            value: None,
            timestamp: None,
        };
        let upd = RowChange::try_from(&record(
            ActionType::Update,
            vec![put_col("a", 8), del_col.clone()],
        ))
        .unwrap();
        match upd {
            RowChange::Update { columns, .. } => assert_eq!(columns[1], del_col),
            other => panic!("unexpected {:?}", other),
        }

        let del = RowChange::try_from(&record(ActionType::Delete, vec![])).unwrap();
        assert_eq!(del.primary_key().get("id"), Some(&ColumnValue::Integer(1)));

        // a put can't carry deletes
        assert!(RowChange::try_from(&record(ActionType::Put, vec![del_col])).is_err());
    }

    #[tokio::test]
    async fn replay_stops_on_error() {
        let records = vec![
            record(ActionType::Put, vec![put_col("a", 1)]),
            record(ActionType::Delete, vec![]),
            record(ActionType::Update, vec![put_col("a", 2)]),
        ];
        let w = MemWriter::default();
        assert_eq!(replay_records(&w, "t", &records).await.unwrap(), 3);
        assert_eq!(w.rows.lock().unwrap().len(), 3);

        let w = MemWriter {
            fail_at: Some(1),
            ..Default::default()
        };
        let err = replay_records(&w, "t", &records).await.unwrap_err();
        assert_eq!(err.code, TunnelErrorCode::ServerBusy);
        assert!(err.message.contains("record 1"));
        assert_eq!(w.rows.lock().unwrap().len(), 1);
    }
}
