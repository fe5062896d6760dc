//! Shared building blocks for the polly crates.
//!
//! - [`Config`]: layered settings from `config/*.toml` and `POLLY__*` variables
//! - [`AppError`] / [`AppResult`]: the error type every layer returns, with its
//!   HTTP mapping
//! - [`IdGenerator`]: lowercase ULIDs for polls, options and vote records
//!
//! # Example
//!
//! ```no_run
//! use polly_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let poll_id = IdGenerator::new().generate();
//!     println!("poll {poll_id}, pages of {}", config.polls.default_page_size);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
