//! Output sinks shared by every collector.
//!
//! - `persistence`: the upsert/append store contract and the in-memory backend
//! - `redis_store`: Redis backend
//! - `alert`:       alert types, log / memory / fan-out sinks
//! - `ws_alert`:    WebSocket alert forwarder
//!
//! Both contracts must tolerate concurrent calls from several
//! collector tasks.

pub mod alert;
pub mod persistence;
pub mod redis_store;
pub mod ws_alert;

pub use alert::{Alert, AlertKind, AlertSink, FanoutAlertSink, LogAlertSink, MemoryAlertSink, Severity};
pub use persistence::{MemoryStore, PersistenceSink, persist};
pub use redis_store::RedisStore;
pub use ws_alert::WsAlertSink;
