//! Extraction backends.
//!
//! Every backend implements [`ExtractionEngine`](crate::ExtractionEngine) and
//! streams [`EngineEvent`](crate::EngineEvent)s through a
//! [`Subscription`](crate::Subscription).

pub mod zip;

pub use self::zip::ZipEngine;
