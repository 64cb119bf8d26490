use crate::{
    context::Context,
    lessor::{LeaseTable, Lessor},
    store::{sqlite::decode_timestamp, ExecError, Execer, Queryer, SqliteStore, Value},
    time::{Clock, Timestamp},
    LeaseRecord,
};
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecCall {
    pub statement: String,
    pub args: Vec<Value>,
}

#[derive(Debug)]
enum Reply {
    Rows(u64),
    Fail(String),
}

/// An [`Execer`] that records every statement and answers from a script.
/// With nothing scripted, each statement reports one affected row.
#[derive(Debug, Default)]
pub struct RecordingExecer {
    calls: Mutex<Vec<ExecCall>>,
    replies: Mutex<VecDeque<Reply>>,
}

impl RecordingExecer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_rows(&self, rows: u64) -> &Self {
        self.replies.lock().push_back(Reply::Rows(rows));
        self
    }

    pub fn reply_error(&self, message: &str) -> &Self {
        self.replies.lock().push_back(Reply::Fail(message.to_owned()));
        self
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
        self.replies.lock().clear();
    }
}

#[async_trait]
impl Execer for RecordingExecer {
    async fn exec(&self, _ctx: &Context, statement: &str, args: &[Value]) -> Result<u64, ExecError> {
        self.calls.lock().push(ExecCall {
            statement: statement.to_owned(),
            args: args.to_vec(),
        });
        match self.replies.lock().pop_front() {
            None => Ok(1),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(message)) => Err(ExecError::Backend(anyhow::anyhow!(message))),
        }
    }
}

/// The current time at the precision the SQLite adapter stores.
pub fn now_micros() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}

/// An in-memory SQLite store with the lease table already created.
pub async fn sqlite_store(table: &LeaseTable) -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("open in-memory sqlite");
    let ctx = Context::background();
    for ddl in table.recommended_schema() {
        store.exec(&ctx, &ddl, &[]).await.expect("create lease table");
    }
    store
}

pub fn sqlite_lessor(store: &SqliteStore, clock: Arc<dyn Clock>) -> Arc<Lessor> {
    Arc::new(Lessor::new(Arc::new(store.clone())).with_clock(clock))
}

/// Every row in the default lease table, ordered by name.
pub async fn stored_leases(store: &SqliteStore) -> Vec<LeaseRecord> {
    let rows = store
        .query(
            &Context::background(),
            "SELECT name, exp, key FROM leases ORDER BY name",
            &[],
        )
        .await
        .expect("read lease table");
    rows.into_iter()
        .map(|row| {
            let text = |i: usize| row[i].as_text().expect("text column").to_owned();
            let exp = match row[1] {
                Value::Integer(micros) => decode_timestamp(micros).expect("timestamp in range"),
                ref other => panic!("unexpected exp column {other:?}"),
            };
            LeaseRecord {
                name: text(0),
                exp,
                key: text(2),
            }
        })
        .collect()
}
