//! sv-storage: the cloud backend contract and its adapters
//!
//! A backend is one account on one object store. The session layer only
//! talks to [`CloudBackend`]; adapters translate it to a concrete store:
//!
//! - [`memory::MemoryBackend`]: a process-local simulated cloud with
//!   accounts, sharing, recycle bin and fault injection
//! - [`opendal_backend::OpendalBackend`]: any OpenDAL operator (fs, s3, memory)
//!
//! Backends are per-(tag, email) singletons handed out by [`BackendRegistry`].

pub mod backend;
pub mod health;
pub mod memory;
pub mod opendal_backend;
pub mod operator;
pub mod registry;
pub mod types;

pub use backend::{BackendRef, CloudBackend};
pub use health::check_health;
pub use memory::{MemoryBackend, MemoryCloud};
pub use opendal_backend::OpendalBackend;
pub use operator::{build_operator, S3Config};
pub use registry::BackendRegistry;
pub use types::{NamedItem, RemoteFile, RemoteFolder, RemoteItem};
