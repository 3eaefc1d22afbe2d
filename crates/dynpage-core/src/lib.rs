//! Core script runtime for dynpage.
//!
//! This crate provides the interpreter-embedding machinery behind dynamic
//! pages:
//! - [`ScriptEngine`]: Configured Wasmtime engine shared by the runtime
//! - [`InstancePool`]: Background-producer pool of bootstrapped instances
//! - [`BytecodeCache`]: Compile-once cache of serialized script bytecode
//! - [`PageInstance`] / [`LoadedPage`]: One-shot and resident execution
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ScriptEngine                        │
//! │  (Shared across all requests, thread-safe)              │
//! └──────────────┬──────────────────────────┬───────────────┘
//!                ▼                          ▼
//! ┌──────────────────────────┐  ┌───────────────────────────┐
//! │      InstancePool        │  │      BytecodeCache        │
//! │  producer ──▶ [channel]  │  │  storage ─▶ dumper ─▶ TTL │
//! │  bootstrapped instances  │  │  serialized bytecode      │
//! └──────────────┬───────────┘  └─────────────┬─────────────┘
//!                ▼                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           PageInstance (Store<PageContext>)             │
//! │  bind request ─▶ load bytecode ─▶ run ─▶ take response  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod bindings;
pub mod bytecode;
pub mod cache;
pub mod context;
pub mod engine;
pub mod glue;
pub mod instance;
pub mod pool;
pub mod storage;

pub use bytecode::{Bytecode, BytecodeCache, BytecodeCompiler, Resolution};
pub use cache::ExpiringCache;
pub use context::{LogEntry, LogLevel, PageContext, ScriptRequest, ScriptResponse};
pub use engine::ScriptEngine;
pub use instance::{LoadedPage, Outcome, PageInstance};
pub use pool::{InstancePool, ReuseRing};
pub use storage::{DirStore, ScriptStore};
