//! # Force: an embedded automation runtime
//!
//! Scripts declare *processes*, each binding an event source to an action.
//! The runtime turns script text into typed, immutable action trees and runs
//! one copy of a process's tree per event it receives.
//!
//! ## Pipeline
//!
//! ```text
//! Script → Parser → Interpreter (lexical scope) → Expression / Action tree
//!                                                        │
//!         Event sources → Runner (fan-in, fan-out) → Process dispatch → runs
//! ```
//!
//! - Syntax ([`parser`]) and building ([`interpreter`]) resolve every name
//!   against a [`scope::Scope`], so undefined names and kind mismatches fail
//!   before any event arrives.
//! - The expression model ([`expression`]) separates constants, values
//!   computed against an [`context::ExecutionContext`] and [`action::Action`]s.
//! - Event sources ([`source`]) feed the [`runner::Runner`], which delivers
//!   events to [`process::Process`]es without letting one slow process stall
//!   another.
//! - Every built tree can be rendered back into script text ([`marshal`]).
//! - Plugins describe their types and functions declaratively and the
//!   [`convert`] module binds them into a scope.
//!
//! ## Builtins
//!
//! Each [`group::Group`] starts with the combinators and helpers defined in
//! [`builtin`]: `Sequence`, `Continue`, `Parallel`, `If`, `Define`,
//! `Process`, `Ticker`, `Watch`, `Marshal` and friends.

pub mod action;
pub mod builtin;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod event;
pub mod expression;
pub mod group;
pub mod interpreter;
pub mod logging;
pub mod marshal;
pub mod parser;
pub mod process;
pub mod retry;
pub mod runner;
pub mod scope;
pub mod source;

// Re-exports
pub use action::{Action, ScopeAction};
pub use context::ExecutionContext;
pub use error::*;
pub use event::{Event, EventKind};
pub use expression::{Expression, Kind, Value};
pub use group::Group;
pub use runner::Runner;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
