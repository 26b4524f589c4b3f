//! Demo fixture: the `user_data` table and its sample content.

use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::Connection;
use crate::error::{self, QueryError};
use crate::types::{Query, Value};

pub const USERS_TABLE: &str = "user_data";

#[derive(thiserror::Error, Debug)]
pub enum SeedError {
    #[error("unable to read seed file :: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed seed file :: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("malformed csv seed file :: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Repo(#[from] error::Error),
}

/// A user to be inserted, the identifier is generated on insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: i64,
}

impl NewUser {
    pub fn new(name: &str, age: i64) -> Self {
        let email = format!("{}@email.com", name.to_lowercase().replace(' ', "."));
        Self {
            name: name.to_owned(),
            email,
            age,
        }
    }
}

pub fn sample_users() -> Vec<NewUser> {
    [
        ("John Doe", 28),
        ("Jane Smith", 32),
        ("Bob Johnson", 45),
        ("Alice Brown", 29),
        ("Charlie Wilson", 38),
        ("Diana Davis", 26),
        ("Frank Miller", 41),
        ("Grace Taylor", 33),
        ("Henry Clark", 22),
        ("Ivy Anderson", 43),
        ("Jack Wilson", 52),
        ("Kate Brown", 47),
    ]
    .into_iter()
    .map(|(name, age)| NewUser::new(name, age))
    .collect()
}

/// Reads the users stored at `path`.
///
/// Files with a `.csv` extension are read as CSV with a `name,email,age`
/// header, anything else as a JSON array of `{name, email, age}` objects.
pub fn load_users(path: impl AsRef<Path>) -> Result<Vec<NewUser>, SeedError> {
    let path = path.as_ref();
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let users: Vec<NewUser> = if is_csv {
        csv::Reader::from_path(path)?
            .deserialize::<NewUser>()
            .collect::<Result<Vec<_>, _>>()?
    } else {
        serde_json::from_str(&std::fs::read_to_string(path)?)?
    };

    debug!("loaded {} users from `{}`", users.len(), path.display());
    Ok(users)
}

pub async fn ensure_users_table<C: Connection>(cx: &mut C) -> error::Result<()> {
    cx.execute(&Query::new(format!(
        "CREATE TABLE IF NOT EXISTS {USERS_TABLE} (
            user_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            age INTEGER NOT NULL
        )"
    )))
    .await?;

    cx.execute(&Query::new(format!(
        "CREATE INDEX IF NOT EXISTS idx_user_id ON {USERS_TABLE} (user_id)"
    )))
    .await?;

    Ok(())
}

/// Inserts `users` unless the table already holds rows.
///
/// Returns the number of inserted users.
pub async fn seed_users<C: Connection>(cx: &mut C, users: &[NewUser]) -> error::Result<usize> {
    let count = cx
        .execute(&Query::new(format!("SELECT COUNT(*) AS n FROM {USERS_TABLE}")))
        .await?;
    let existing = count
        .first()
        .and_then(|r| r.get_index(0))
        .and_then(Value::as_i64)
        .ok_or_else(|| QueryError::Execution("unable to count existing users".into()))?;

    if existing > 0 {
        info!("table `{USERS_TABLE}` already holds {existing} rows, skipping seed");
        return Ok(0);
    }

    let insert = format!(
        "INSERT INTO {USERS_TABLE} (user_id, name, email, age) VALUES ({})",
        cx.dialect().placeholders(1, 4)
    );

    for user in users {
        let query = Query::new(&insert)
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(user.name.as_str())
            .bind(user.email.as_str())
            .bind(user.age);
        cx.execute(&query).await?;
    }

    info!("inserted {} users into `{USERS_TABLE}`", users.len());
    Ok(users.len())
}
