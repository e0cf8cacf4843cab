pub mod config;
pub mod contract;
pub mod lifecycle;
pub mod memory;
pub mod mpt;
pub mod snapshot;
pub mod struct_backend;
pub mod substate;
pub mod trie_backend;

pub use config::{open_state, BackendConfig, BackendKind};
pub use contract::{ArchiveView, BulkLoader, Lifecycle, Log, StateBackend, Substate, ViewAndMutate};
pub use memory::MemoryState;
pub use struct_backend::StructState;
pub use trie_backend::TrieState;
