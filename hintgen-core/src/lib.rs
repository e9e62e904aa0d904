//! hintgen core library: abstraction pipeline, tree diff, goal graph, edit
//! individualization, hint formatting, and the persistent state store.
//!
//! The main entry point is [`engine::HintEngine`], which turns a student
//! submission into a [`types::Hint`] using the corpus held in a
//! [`store::HintStore`].

pub mod abstraction;
pub mod chain;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod format;
pub mod graph;
pub mod individualize;
pub mod progress;
pub mod runner;
pub mod store;
pub mod syntax;
pub mod types;
