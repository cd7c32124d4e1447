//! cadence-core
//!
//! Distributed reconciliation iterators: a shared collection of entities
//! becomes a self-coordinating work queue. Each entity carries its own
//! "next due" schedule; workers claim due entities with one atomic
//! claim-and-reschedule and hand them to a domain handler. Any number of
//! pumps, in any number of processes, can share one collection.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（schedule, scheduling policy, filter, errors, ids, state）
//! - **ports**: 抽象化レイヤー（PersistenceProvider, Handler, Clock）
//! - **impls**: PersistenceProvider の実装（in-memory, Postgres）
//! - **app**: アプリケーションロジック（builder, iterator, worker_loop, pump registry）
//! - **config**: 設定（IteratorConfig, layered Settings）
//! - **reconcilers**: iterator の利用例
//! - **telemetry**: tracing subscriber の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod reconcilers;
pub mod telemetry;
