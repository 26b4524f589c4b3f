use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::Value;

/// Alias used for the derived queries issued by cursors.
const WRAPPED_ALIAS: &str = "lazyrows_q";

/// Placeholder syntax of the underlying data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Positional `?` placeholders.
    Sqlite,
    /// Numbered `$n` placeholders.
    Postgres,
}

impl Dialect {
    /// Placeholder for the parameter at `position` (one based).
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_owned(),
            Dialect::Postgres => format!("${position}"),
        }
    }

    /// Comma separated placeholders for `count` parameters, starting at `first`.
    pub fn placeholders(&self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|p| self.placeholder(p))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// An immutable parametrized statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    statement: Arc<str>,
    params: Vec<Value>,
}

impl Query {
    pub fn new(statement: impl AsRef<str>) -> Self {
        Self {
            statement: Arc::from(statement.as_ref()),
            params: Vec::new(),
        }
    }

    pub fn with_params(statement: impl AsRef<str>, params: Vec<Value>) -> Self {
        Self {
            statement: Arc::from(statement.as_ref()),
            params,
        }
    }

    /// Returns a new query with `value` appended to the bound parameters.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Statement with comments dropped, whitespace runs collapsed (outside of
    /// quoted sections), surrounding blanks and trailing semicolons removed.
    pub fn normalized_statement(&self) -> String {
        normalize(&self.statement)
    }

    /// Deterministic cache key derived from the normalized statement and the
    /// bound parameters.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        let normalized = self.normalized_statement();
        hasher.update((normalized.len() as u64).to_le_bytes());
        hasher.update(normalized.as_bytes());

        hasher.update((self.params.len() as u64).to_le_bytes());
        for param in &self.params {
            hasher.update([param.tag()]);
            match param {
                Value::Null => {}
                Value::Boolean(v) => hasher.update([u8::from(*v)]),
                Value::Integer(v) => hasher.update(v.to_le_bytes()),
                Value::Float(v) => hasher.update(v.to_bits().to_le_bytes()),
                Value::Text(v) => {
                    hasher.update((v.len() as u64).to_le_bytes());
                    hasher.update(v.as_bytes());
                }
            }
        }

        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    /// Wraps the statement in an offset/limit window. The window bounds are
    /// appended to the existing parameters.
    pub fn windowed(&self, dialect: Dialect, limit: usize, offset: usize) -> Query {
        let next = self.params.len() + 1;
        let statement = format!(
            "SELECT * FROM ({}\n) AS {WRAPPED_ALIAS} LIMIT {} OFFSET {}",
            subquery_body(&self.statement),
            dialect.placeholder(next),
            dialect.placeholder(next + 1),
        );

        let mut params = self.params.clone();
        params.push(Value::Integer(limit as i64));
        params.push(Value::Integer(offset as i64));

        Query {
            statement: Arc::from(statement),
            params,
        }
    }

    /// Narrows the result to a single column.
    pub fn project(&self, column: &str) -> Query {
        let statement = format!(
            "SELECT {} FROM ({}\n) AS {WRAPPED_ALIAS}",
            quote_identifier(column),
            subquery_body(&self.statement),
        );

        Query {
            statement: Arc::from(statement),
            params: self.params.clone(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized_statement())?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| format!("{p:?}")).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::new(s)
    }
}

/// Normalized, deterministic key of a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Code,
    Quoted,
    Comment,
}

/// Classifies every character of `statement`. Quotes are `'` and `"`, comments
/// run from `--` to the end of the line or from `/*` to `*/`.
fn lex(statement: &str) -> Vec<(usize, char, Lexeme)> {
    #[derive(Clone, Copy)]
    enum State {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut out = Vec::with_capacity(statement.len());
    let mut state = State::Code;
    let mut chars = statement.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);
        let lexeme = match state {
            State::Code => match (c, next) {
                ('\'' | '"', _) => {
                    state = State::Quoted(c);
                    Lexeme::Quoted
                }
                ('-', Some('-')) => {
                    state = State::LineComment;
                    Lexeme::Comment
                }
                ('/', Some('*')) => {
                    // The opening star cannot close the comment
                    state = State::BlockComment;
                    out.push((idx, c, Lexeme::Comment));
                    out.extend(chars.next().map(|(i, n)| (i, n, Lexeme::Comment)));
                    continue;
                }
                _ => Lexeme::Code,
            },
            State::Quoted(q) => {
                if c == q {
                    state = State::Code;
                }
                Lexeme::Quoted
            }
            State::LineComment if c == '\n' => {
                state = State::Code;
                Lexeme::Code
            }
            State::LineComment => Lexeme::Comment,
            State::BlockComment if c == '*' && next == Some('/') => {
                state = State::Code;
                out.push((idx, c, Lexeme::Comment));
                out.extend(chars.next().map(|(i, n)| (i, n, Lexeme::Comment)));
                continue;
            }
            State::BlockComment => Lexeme::Comment,
        };
        out.push((idx, c, lexeme));
    }

    out
}

fn normalize(statement: &str) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut pending_space = false;
    // Where the trailing run of `;` terminators starts in `out`
    let mut terminators: Option<usize> = None;

    for (_, c, lexeme) in lex(statement) {
        let code = lexeme == Lexeme::Code;
        if lexeme == Lexeme::Comment || (code && c.is_whitespace()) {
            pending_space = true;
            continue;
        }

        let mark = out.len();
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);

        if code && c == ';' {
            terminators.get_or_insert(mark);
        } else {
            terminators = None;
        }
    }

    if let Some(mark) = terminators {
        out.truncate(mark);
    }
    out
}

/// The statement as written, minus its trailing `;` terminators, so that it can
/// be used as a derived table. Comments are kept.
fn subquery_body(statement: &str) -> String {
    let mut terminators = Vec::new();
    for (idx, c, lexeme) in lex(statement) {
        match lexeme {
            Lexeme::Code if c == ';' => terminators.push(idx),
            Lexeme::Code if c.is_whitespace() => {}
            Lexeme::Comment => {}
            Lexeme::Code | Lexeme::Quoted => terminators.clear(),
        }
    }

    let mut body = statement.to_owned();
    for idx in terminators.into_iter().rev() {
        body.remove(idx);
    }
    body.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace() {
        let q = Query::new("  SELECT *\n\tFROM   users\n WHERE age > ? ;  ");
        assert_eq!(q.normalized_statement(), "SELECT * FROM users WHERE age > ?");
    }

    #[test]
    fn normalization_keeps_quoted_text() {
        let q = Query::new("SELECT *  FROM users WHERE name = 'John   Doe'");
        assert_eq!(
            q.normalized_statement(),
            "SELECT * FROM users WHERE name = 'John   Doe'"
        );
    }

    #[test]
    fn normalization_drops_comments() {
        let q = Query::new("SELECT * -- every user\nFROM users /* all of them */ WHERE age > ?");
        assert_eq!(q.normalized_statement(), "SELECT * FROM users WHERE age > ?");

        let quoted = Query::new("SELECT '-- kept' AS a,  '/* kept */' AS b");
        assert_eq!(
            quoted.normalized_statement(),
            "SELECT '-- kept' AS a, '/* kept */' AS b"
        );
    }

    #[test]
    fn line_comment_ends_at_newline() {
        let filtered = Query::new("SELECT * FROM user_data -- c\nWHERE age > 40");
        let commented_out = Query::new("SELECT * FROM user_data -- c WHERE age > 40");

        assert_eq!(
            filtered.normalized_statement(),
            "SELECT * FROM user_data WHERE age > 40"
        );
        assert_eq!(commented_out.normalized_statement(), "SELECT * FROM user_data");
        assert_ne!(filtered.fingerprint(), commented_out.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_formatting() {
        let a = Query::new("SELECT * FROM users WHERE age > ?").bind(40);
        let b = Query::new("SELECT *\n  FROM users\n  WHERE age > ?;").bind(40);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_depends_on_params() {
        let base = "SELECT * FROM users WHERE age > ?";
        let a = Query::new(base).bind(40);
        let b = Query::new(base).bind(41);
        let c = Query::new(base).bind("40");
        let d = Query::new(base);

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn fingerprint_does_not_merge_statement_and_params() {
        let a = Query::new("SELECT 'a'").bind("b");
        let b = Query::new("SELECT 'ab'");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn windowed_sqlite() {
        let q = Query::new("SELECT * FROM users WHERE age > ?;").bind(25);
        let w = q.windowed(Dialect::Sqlite, 5, 10);

        assert_eq!(
            w.statement(),
            "SELECT * FROM (SELECT * FROM users WHERE age > ?\n) AS lazyrows_q LIMIT ? OFFSET ?"
        );
        assert_eq!(
            w.params(),
            &[Value::Integer(25), Value::Integer(5), Value::Integer(10)]
        );
    }

    #[test]
    fn windowed_keeps_comments_inside_the_derived_table() {
        let q = Query::new("SELECT * FROM user_data -- every user\nWHERE age > ?").bind(40);
        assert_eq!(
            q.windowed(Dialect::Sqlite, 5, 0).statement(),
            "SELECT * FROM (SELECT * FROM user_data -- every user\nWHERE age > ?\n) AS lazyrows_q LIMIT ? OFFSET ?"
        );

        let trailing = Query::new("SELECT * FROM users; -- done");
        assert_eq!(
            trailing.project("age").statement(),
            "SELECT \"age\" FROM (SELECT * FROM users -- done\n) AS lazyrows_q"
        );
    }

    #[test]
    fn windowed_postgres_numbers_placeholders() {
        let q = Query::new("SELECT * FROM users WHERE age > $1").bind(25);
        let w = q.windowed(Dialect::Postgres, 5, 0);
        assert!(w.statement().ends_with("LIMIT $2 OFFSET $3"));
    }

    #[test]
    fn project_quotes_column() {
        let q = Query::new("SELECT * FROM user_data");
        assert_eq!(
            q.project("age").statement(),
            "SELECT \"age\" FROM (SELECT * FROM user_data\n) AS lazyrows_q"
        );
    }

    #[test]
    fn dialect_placeholders() {
        assert_eq!(Dialect::Sqlite.placeholders(1, 3), "?, ?, ?");
        assert_eq!(Dialect::Postgres.placeholders(1, 3), "$1, $2, $3");
    }
}
