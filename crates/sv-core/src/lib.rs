//! sv-core: types shared by every splitvault crate

pub mod config;
pub mod error;
pub mod names;
pub mod types;

pub use error::{SvError, SvResult};
pub use types::{ItemKind, ListedItem, SessionMeta};
