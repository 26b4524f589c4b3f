use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use log::info;

use lazyrows::cache::{CacheOutcome, ResultCache};
use lazyrows::error::{AggregateFetchError, ConfigurationError};
use lazyrows::params::Configurables;
use lazyrows::repo::{DataSource, FacadeFetch, seed, with_connection};
use lazyrows::types::{Query, Row, RowSet, Value};

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] lazyrows::Error),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Seed(#[from] seed::SeedError),
    #[error(transparent)]
    Concurrent(#[from] AggregateFetchError<Arc<RowSet>>),
    #[error("unable to serialize row :: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct Output {
    pub json: bool,
}

impl Output {
    fn row(&self, row: &Row) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string(row)?);
            return Ok(());
        }

        let fields: Vec<String> = row
            .iter()
            .filter(|(column, _)| *column != "user_id")
            .map(|(column, value)| format!("{}: {}", column.dimmed(), value))
            .collect();
        println!("  {}", fields.join(", "));
        Ok(())
    }
}

pub fn facade<S: DataSource>(
    source: S,
    configurables: &Configurables,
) -> Result<FacadeFetch<S>, ConfigurationError> {
    FacadeFetch::new(source, &configurables.config)
        .with_max_concurrent_fetches(configurables.max_concurrent_fetches)
}

fn users_query() -> Query {
    Query::new(format!("SELECT * FROM {} ORDER BY name, user_id", seed::USERS_TABLE))
}

fn age_of(row: &Row) -> Option<i64> {
    row.get("age").and_then(Value::as_i64)
}

pub async fn seed_database<S: DataSource>(source: &S, file: Option<&Path>) -> Result<(), CliError> {
    let users = match file {
        Some(path) => seed::load_users(path)?,
        None => seed::sample_users(),
    };

    let inserted = with_connection(source, move |cx| {
        Box::pin(async move {
            seed::ensure_users_table(cx).await?;
            seed::seed_users(cx, &users).await
        })
    })
    .await?;

    if inserted > 0 {
        println!("{} inserted {} users", "ok".green().bold(), inserted);
    } else {
        println!("{} table already populated", "ok".green().bold());
    }
    Ok(())
}

/// Prints users one at a time, returns how many were printed.
pub async fn stream<S: DataSource>(
    facade: &FacadeFetch<S>,
    limit: Option<usize>,
    out: &Output,
) -> Result<usize, CliError> {
    let mut rows = facade.stream_rows(users_query());
    let mut printed = 0;

    while limit.is_none_or(|limit| printed < limit) {
        let Some(row) = rows.next_row().await? else {
            break;
        };
        out.row(&row)?;
        printed += 1;
    }
    rows.close().await?;

    info!("streamed {} users", printed);
    Ok(printed)
}

pub async fn batches<S: DataSource>(
    facade: &FacadeFetch<S>,
    min_age: i64,
    out: &Output,
) -> Result<(), CliError> {
    let mut cursor = facade.stream_batches(users_query());

    while let Some(batch) = cursor.next_batch().await? {
        let selected = batch.filter(|row| age_of(row).is_some_and(|age| age > min_age));
        println!(
            "{} {} ({} users, {} older than {})",
            "batch".cyan().bold(),
            batch.index + 1,
            batch.len(),
            selected.len(),
            min_age
        );
        for row in selected {
            out.row(row)?;
        }
    }

    info!(
        "processed {} batches ({} rows)",
        cursor.batches_yielded(),
        cursor.rows_yielded()
    );
    Ok(())
}

pub async fn paginate<S: DataSource>(facade: &FacadeFetch<S>, out: &Output) -> Result<(), CliError> {
    let page_size = facade.config().batch_size();
    let query = users_query();
    let mut offset = 0;
    let mut page = 1;

    loop {
        let rows = facade.fetch_page(&query, page_size, offset).await?;
        if rows.is_empty() {
            println!("{}", "no more users".dimmed());
            break;
        }

        println!(
            "{} {} ({} users from position {})",
            "page".cyan().bold(),
            page,
            rows.len(),
            offset
        );
        for row in &rows {
            out.row(row)?;
        }

        offset += rows.len();
        page += 1;
    }
    Ok(())
}

pub async fn average_age<S: DataSource>(facade: &FacadeFetch<S>, out: &Output) -> Result<(), CliError> {
    let query = Query::new(format!("SELECT age FROM {}", seed::USERS_TABLE));
    let average = facade.stream_column(&query, "age").average().await?;

    match (average, out.json) {
        (Some(avg), true) => println!("{}", serde_json::json!({ "average_age": avg })),
        (None, true) => println!("{}", serde_json::json!({ "average_age": null })),
        (Some(avg), false) => println!("{} {:.2}", "average age:".bold(), avg),
        (None, false) => println!("{}", "no users".dimmed()),
    }
    Ok(())
}

pub async fn fetch<S: DataSource>(
    facade: &FacadeFetch<S>,
    sql: &str,
    params: &[String],
    repeat: usize,
    out: &Output,
) -> Result<(), CliError> {
    let query = params
        .iter()
        .fold(Query::new(sql), |q, raw| q.bind(parse_param(raw)));

    let cache = Arc::new(ResultCache::new());
    let facade = facade.clone().with_cache(cache.clone());

    let mut last = None;
    for attempt in 1..=repeat.max(1) {
        let fetched = facade.fetch(&query).await?;
        let outcome = match fetched.cache {
            Some(CacheOutcome::Hit) => "hit".green(),
            Some(CacheOutcome::Miss) => "miss".yellow(),
            None => "uncached".normal(),
        };
        println!(
            "{} {}: {} rows (cache {})",
            "fetch".cyan().bold(),
            attempt,
            fetched.rows.len(),
            outcome
        );
        last = Some(fetched.rows);
    }

    if let Some(rows) = last {
        for row in rows.iter() {
            out.row(row)?;
        }
    }

    let stats = cache.stats().await;
    info!(
        "cache: {} entries, {} hits, {} misses",
        stats.entries, stats.hits, stats.misses
    );
    Ok(())
}

pub async fn concurrent<S: DataSource>(
    facade: &FacadeFetch<S>,
    min_age: i64,
    out: &Output,
) -> Result<(), CliError> {
    let older = Query::new(format!(
        "SELECT * FROM {} WHERE age > {} ORDER BY name, user_id",
        seed::USERS_TABLE,
        facade.source().dialect().placeholder(1)
    ))
    .bind(min_age);

    let results = facade.fetch_many(vec![users_query(), older]).await?;

    let titles = ["all users".to_owned(), format!("users older than {min_age}")];
    for (title, rows) in titles.iter().zip(&results) {
        println!("{} ({})", title.cyan().bold(), rows.len());
        for row in rows.iter() {
            out.row(row)?;
        }
    }
    println!("{}", "both queries completed concurrently".green());
    Ok(())
}

/// Integers, then floats, then text.
fn parse_param(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Integer(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    Value::Text(raw.to_owned())
}
