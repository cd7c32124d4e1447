//! Impls - PersistenceProvider の実装
//!
//! # 含まれる実装
//! - **InMemoryPersistenceProvider**: テスト・デモ用のドキュメントストア
//! - **PgPersistenceProvider**: Postgres (JSONB) 上の本番用実装

pub mod memory;
pub mod postgres;

pub use self::memory::InMemoryPersistenceProvider;
pub use self::postgres::PgPersistenceProvider;
