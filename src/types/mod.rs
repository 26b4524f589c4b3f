mod query;
mod row;
mod value;

pub use query::{Dialect, Fingerprint, Query};
pub use row::{Batch, Row, RowSet};
pub use value::{Float, Integer, Text, Value};
