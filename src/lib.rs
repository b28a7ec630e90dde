//! Publish-triggered synchronization of CMS media assets to a CDN-fronted
//! object store.
//!
//! Each publish event is classified into an upload, replace or delete of the
//! asset's object, which then runs asynchronously on a bounded job pool.
//! Delivery URLs can be rewritten to point at the CDN origin.

pub mod app;
pub mod cdn;
pub mod error;
pub mod jobs;
pub mod key;
pub mod manifest;
pub mod mime;
pub mod models;
pub mod publisher;
pub mod rewriter;
pub mod sync;

pub use error::{Error, Result};
