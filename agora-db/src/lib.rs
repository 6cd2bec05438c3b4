pub mod client;
pub mod memory;
mod record;
pub mod session;
pub mod store;
pub mod voting;

pub use store::{DbError, PostStore, Result, SessionStore, UserStore};
