//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: single-process store (tests, embedding)
//! - **SqliteStore**: file-backed store shared by worker processes
//! - **ShellRunner**: runs job commands through `sh -c`

pub mod memory;
pub mod shell;
pub mod sqlite;

pub use self::memory::InMemoryStore;
pub use self::shell::ShellRunner;
pub use self::sqlite::SqliteStore;
