//! # Facade Module
//!
//! This module implements the **Facade** pattern, serving as an intermediate logic layer
//! between the application and the data-access components.
//!
//! The primary objective of these facades is to centralize how the guard, retry, cache
//! and cursor components are wired together, so that callers deal with a single handle.
//!
//! * **Source Abstraction:** Facades are generic over [`super::DataSource`], they never
//!   expose whether the underlying provider is SQLite, PostgreSQL or a test double.
//! * **Explicit Composition:** Every stage (cache, retry, connection scope) is visible in
//!   the facade code instead of being attached through wrappers around call shapes.
//! * **Encapsulation:** The rest of the system interacts with [`FacadeFetch`] rather than
//!   assembling connections and retry loops by hand.

mod facade_fetch;
pub use facade_fetch::*;
