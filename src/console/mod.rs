//! Operator console: accounts, game history, and the live analysis relay.
//!
//! ## Overview
//!
//! One server process owns a SQLite database of users and logged decisions,
//! launches at most one external analysis process on request, and relays that
//! process's classified output to the one dashboard connected over WebSocket.
//!
//! ## Module Map
//!
//! ```text
//! ┌───────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │ Dashboard │ ───────> │  server.rs  (axum Router, static mounts)         │
//! │ (browser) │          │    └─ api.rs  (handlers, AppState, ApiError)      │
//! └───────────┘          │         │                                        │
//!       ^                │         │ ProcessSupervisor::start()/stop()      │
//!       │                │         v                                        │
//!       │                │  supervisor.rs  (child process, exit watcher)    │
//!       │                │         │                                        │
//!       │                │         │ classify_stdout_line()                 │
//!       │                │         v                                        │
//!       │  WebSocket     │  output.rs  (markers, dict-literal shim)         │
//!       │                │         │                                        │
//!       │                │         │ RelayBridge::deliver()                 │
//!       │                │         v                                        │
//!       └─────────────── │  relay.rs ── ws.rs  (current connection)         │
//!                        └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                           |
//! |------------|----------------------------------------------------------|
//! | `models`   | `User`, history records and read models, `GameDate`      |
//! | `db`       | SQLite access via `DbHandle` (`spawn_blocking` wrapper)  |
//! | `auth`     | argon2 hashing, register/login, `SessionStore`           |
//! | `embedded` | Dashboard pages compiled in with `rust-embed`            |
//!
//! ## Typical Flow (start analysis)
//!
//! 1. The dashboard opens `/ws`; `ws.rs` attaches it to the `RelayBridge`,
//!    which queues `{"command":"start"}`.
//! 2. `POST /api/start-system` spawns the analysis program with piped output.
//! 3. Each stdout line becomes a `log` or `analysis` event, each stderr line
//!    an `error` event, and an abnormal exit a final `error` event.
//! 4. Closing the socket detaches it and stops the process.

pub mod api;
pub mod auth;
pub mod db;
pub mod embedded;
pub mod models;
pub mod output;
pub mod relay;
pub mod server;
pub mod supervisor;
pub mod ws;
