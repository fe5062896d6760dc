//! Business logic services.

#![allow(missing_docs)]

pub mod lifecycle;
pub mod poll;
pub mod results;
pub mod vote;

pub use lifecycle::LifecycleService;
pub use poll::{
    CreatePollInput, ListPollsInput, OptionDetail, PollDetail, PollService, UpdatePollInput,
};
pub use results::{OptionResult, PollResults, ResultsService};
pub use vote::{VoteReceipt, VoteService};
