//! Recording mock connection for session and persister tests.

use std::future::Future;
use std::sync::{Arc, Mutex};

use asupersync::{Cx, Outcome};
use relmodel_core::{
    Connection, Error, IsolationLevel, QueryError, QueryErrorKind, Row, TransactionOps, Value,
};

pub(crate) fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockState {
    pub begun: usize,
    pub committed: bool,
    pub rolled_back: bool,
    pub isolation: Option<IsolationLevel>,
    /// Every INSERT attempted, in order.
    pub statements: Vec<(String, Vec<Value>)>,
    next_id: i64,
    fail_on: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Fail any INSERT whose SQL contains `pattern` with a constraint error.
    pub fn failing_on(pattern: &str) -> Self {
        let conn = Self::new();
        conn.state.lock().expect("lock poisoned").fail_on = Some(pattern.to_string());
        conn
    }

    pub fn state(&self) -> MockState {
        self.state.lock().expect("lock poisoned").clone()
    }

    /// Tables written to, in statement order.
    pub fn tables(&self) -> Vec<String> {
        self.state()
            .statements
            .iter()
            .filter_map(|(sql, _)| sql.split('"').nth(1).map(str::to_string))
            .collect()
    }
}

fn record_insert(state: &Mutex<MockState>, sql: &str, params: &[Value]) -> Outcome<i64, Error> {
    let mut guard = state.lock().expect("lock poisoned");
    guard.statements.push((sql.to_string(), params.to_vec()));
    if guard.fail_on.as_deref().is_some_and(|p| sql.contains(p)) {
        return Outcome::Err(Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some(sql.to_string()),
            code: Some(19),
            message: "NOT NULL constraint failed".to_string(),
            source: None,
        }));
    }
    guard.next_id += 1;
    Outcome::Ok(guard.next_id)
}

impl Connection for MockConnection {
    type Tx<'conn>
        = MockTransaction
    where
        Self: 'conn;

    fn query(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async { Outcome::Ok(vec![]) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        async { Outcome::Ok(None) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async { Outcome::Ok(0) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let result = record_insert(&self.state, sql, params);
        async move { result }
    }

    fn begin_with(
        &self,
        _cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        {
            let mut guard = self.state.lock().expect("lock poisoned");
            guard.begun += 1;
            guard.isolation = Some(isolation);
        }
        let tx = MockTransaction {
            state: Arc::clone(&self.state),
        };
        async move { Outcome::Ok(tx) }
    }
}

pub(crate) struct MockTransaction {
    state: Arc<Mutex<MockState>>,
}

impl TransactionOps for MockTransaction {
    fn query(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async { Outcome::Ok(vec![]) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        async { Outcome::Ok(None) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async { Outcome::Ok(0) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let result = record_insert(&self.state, sql, params);
        async move { result }
    }

    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.state.lock().expect("lock poisoned").committed = true;
        async { Outcome::Ok(()) }
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.state.lock().expect("lock poisoned").rolled_back = true;
        async { Outcome::Ok(()) }
    }
}
