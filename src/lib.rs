#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::dbg_macro,
    clippy::doc_markdown,
    clippy::enum_glob_use,
    clippy::flat_map_option,
    clippy::implicit_clone,
    clippy::inefficient_to_string,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::mem_forget,
    clippy::mut_mut,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::rc_mutex,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add,
    clippy::string_add_assign,
    clippy::todo,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::verbose_file_reads,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    unexpected_cfgs
)]

mod codec;
mod config;
mod connection;
mod envelope;
mod error;
mod events;
mod keys;
mod queue;
mod script;
mod watcher;

pub use crate::config::Config;
pub use crate::envelope::Envelope;
pub use crate::error::{ErrorSource, ImqError};
pub use crate::events::QueueEvent;
pub use crate::queue::MessageQueue;
