//! Filter-query compiler and response cache for paginated content loops.
//!
//! A loop view describes what it wants to list through a [`domain::query::QueryState`].
//! The [`application::compiler`] turns that state into canonical REST parameters,
//! the [`cache`] layer keys and stores the responses, and the
//! [`application::controller`] drives numbered, load-more and infinite-scroll
//! pagination on top of both.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
