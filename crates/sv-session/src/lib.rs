//! sv-session: sessions over split, encrypted shares, shared sessions and the gateway

pub mod cache;
pub mod gateway;
pub mod login;
pub mod manage;
pub mod pool;
pub mod replicated;
pub mod scratch;
pub mod session;
pub mod shared;
pub mod transfer;
pub mod watcher;

pub use cache::{CloudFile, Directory, Entry, PathCache};
pub use gateway::{BackendStatus, Gateway, Scope, SharedFolderInfo};
pub use pool::{Gathered, WorkerPool};
pub use replicated::{IntegrityReport, ReplicaName};
pub use scratch::ScratchSpace;
pub use session::{RootKind, Session, SessionOptions};
pub use shared::{KeyState, SharedSession};
pub use transfer::{FolderTransfer, ProgressFn, RepairReport, Transfer};
pub use watcher::{DiscoveryFn, SharedFolderWatcher};
