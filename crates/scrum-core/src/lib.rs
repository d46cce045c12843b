pub mod command;
pub mod config;
pub mod document;
pub mod envelope;
pub mod epic;
pub mod error;
pub mod io;
pub mod paths;
pub mod project;
pub mod prompts;
pub mod report;
pub mod resources;
pub mod services;
pub mod sprint;
pub mod store;
pub mod task;
pub mod types;
pub mod validate;

pub use command::{Command, ParseError};
pub use config::Config;
pub use envelope::{Envelope, Reply};
pub use error::{ErrorCode, Result, ScrumError};
pub use services::Services;
pub use store::{SqliteStore, Store};
