pub mod config;
pub mod dry_run;
pub mod engine;
pub mod error;
pub mod format;
pub mod oracle;
pub mod permutation;
pub mod session;
pub mod spec;
pub mod splitter;

pub use config::IsolationConfig;
pub use dry_run::dry_run;
pub use engine::Engine;
pub use error::{IsolationError, IsolationResult, SessionError};
pub use permutation::generate_permutations;
pub use spec::{load_spec, parse_spec, Spec};
