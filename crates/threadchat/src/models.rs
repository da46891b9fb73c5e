//! These models represent the objects passed around the chat pipeline
//!
//! There are three related families of objects:
//! - raw events, produced by a streaming agent in whatever granularity the provider uses
//! - display events, the normalized incremental updates handed to a render sink
//! - messages and threads, the durable form a turn takes once it is committed
//!
//! Providers convert their wire formats into raw events immediately; nothing past the
//! normalizer ever sees a provider-specific shape.
pub mod event;
pub mod message;
pub mod thread;
