//! Test doubles for the repository boundary.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Connection, DataSource, SqliteSource, seed};
use crate::error::{ConnectionError, QueryError};
use crate::types::{Dialect, Query, Row, RowSet, Value};

const WINDOW_SUFFIX: &str = "LIMIT ? OFFSET ?";

#[derive(Debug, Default)]
struct Script {
    connects: AtomicUsize,
    closes: AtomicUsize,
    executes: AtomicUsize,
    peak_open: AtomicUsize,
    refuse_connects: AtomicUsize,
    fail_executes: AtomicUsize,
    fail_closes: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptStats {
    pub connects: usize,
    pub closes: usize,
    pub executes: usize,
    /// Most connections held at the same time.
    pub peak_open: usize,
}

impl ScriptStats {
    pub fn open(&self) -> usize {
        self.connects - self.closes
    }
}

/// In-memory data source with scripted failures.
///
/// Every query returns the whole fixture, except windowed queries (see
/// [`Query::windowed`]) which return the requested slice.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    name: String,
    rows: Arc<Vec<Row>>,
    delay: Duration,
    script: Arc<Script>,
}

impl ScriptedSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            name: "scripted".to_owned(),
            rows: Arc::new(rows),
            delay: Duration::ZERO,
            script: Arc::new(Script::default()),
        }
    }

    pub fn with_users(count: usize) -> Self {
        Self::new(users(count))
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Refuses the next `n` connection attempts.
    pub fn refusing_connects(self, n: usize) -> Self {
        self.script.refuse_connects.store(n, Ordering::SeqCst);
        self
    }

    /// Fails the next `n` query executions.
    pub fn failing_executes(self, n: usize) -> Self {
        self.script.fail_executes.store(n, Ordering::SeqCst);
        self
    }

    /// Every release fails (the connection still counts as closed).
    pub fn failing_closes(self) -> Self {
        self.script.fail_closes.store(true, Ordering::SeqCst);
        self
    }

    /// Every execution sleeps for `delay` before returning.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stats(&self) -> ScriptStats {
        ScriptStats {
            connects: self.script.connects.load(Ordering::SeqCst),
            closes: self.script.closes.load(Ordering::SeqCst),
            executes: self.script.executes.load(Ordering::SeqCst),
            peak_open: self.script.peak_open.load(Ordering::SeqCst),
        }
    }
}

/// Decrements `counter` if positive, returns whether it did.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl DataSource for ScriptedSource {
    type Cx = ScriptedCx;

    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn connect(&self) -> Result<ScriptedCx, ConnectionError> {
        if take_one(&self.script.refuse_connects) {
            return Err(ConnectionError::Refused(self.name.clone()));
        }
        let connects = self.script.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let open = connects - self.script.closes.load(Ordering::SeqCst);
        self.script.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(ScriptedCx {
            source: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct ScriptedCx {
    source: ScriptedSource,
}

#[async_trait]
impl Connection for ScriptedCx {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, query: &Query) -> Result<RowSet, QueryError> {
        let script = &self.source.script;
        let attempt = script.executes.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.source.delay.is_zero() {
            tokio::time::sleep(self.source.delay).await;
        }

        if take_one(&script.fail_executes) {
            return Err(QueryError::Execution(format!(
                "scripted failure on execution #{attempt}"
            )));
        }

        let rows = self.source.rows.as_slice();
        if !query.statement().ends_with(WINDOW_SUFFIX) {
            return Ok(rows.to_vec());
        }

        let params = query.params();
        let bound = |idx: usize| -> Result<usize, QueryError> {
            params
                .get(idx)
                .and_then(Value::as_i64)
                .map(|v| v as usize)
                .ok_or_else(|| QueryError::Execution("missing window bound".into()))
        };
        let limit = bound(params.len() - 2)?;
        let offset = bound(params.len() - 1)?;

        Ok(rows.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn close(self) -> Result<(), ConnectionError> {
        let script = &self.source.script;
        script.closes.fetch_add(1, Ordering::SeqCst);
        if script.fail_closes.load(Ordering::SeqCst) {
            return Err(ConnectionError::ReleaseFailed(self.source.name.clone()));
        }
        Ok(())
    }
}

/// Waits for connections released in the background.
pub async fn wait_released(source: &ScriptedSource) {
    for _ in 0..100 {
        if source.stats().open() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// `count` users named `user-<n>` with age `20 + n`.
pub fn users(count: usize) -> Vec<Row> {
    (0..count)
        .map(|n| {
            Row::from_pairs([
                ("user_id", Value::from(n as i64)),
                ("name", Value::from(format!("user-{n}"))),
                ("age", Value::from(20 + n as i64)),
            ])
        })
        .collect()
}

/// Creates a SQLite database in `dir` holding the `user_data` table seeded
/// with `users`.
pub async fn sqlite_fixture(dir: &Path, users: &[seed::NewUser]) -> SqliteSource {
    let source = SqliteSource::from_path(dir.join("fixture.db"));
    let mut cx = source.connect().await.expect("unable to open fixture db");
    seed::ensure_users_table(&mut cx)
        .await
        .expect("unable to create fixture table");
    seed::seed_users(&mut cx, users)
        .await
        .expect("unable to seed fixture");
    cx.close().await.expect("unable to close fixture connection");
    source
}

/// `count` users with age `20 + 3 * n` (so ages `> 40` are the ones with `n >= 7`).
pub fn new_users(count: usize) -> Vec<seed::NewUser> {
    (0..count)
        .map(|n| seed::NewUser {
            name: format!("user-{n}"),
            email: format!("user-{n}@example.com"),
            age: 20 + 3 * n as i64,
        })
        .collect()
}
