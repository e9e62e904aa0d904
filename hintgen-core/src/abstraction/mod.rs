//! Program abstraction tiers: anonymization of identifiers, canonical
//! rewriting, and the pipeline that stores each tier of a submission.

pub mod anonymize;
pub mod canonicalize;
pub mod pipeline;

pub use anonymize::{NameMap, anonymize, is_placeholder};
pub use canonicalize::canonicalize;
pub use pipeline::{DerivedStates, flag, generate_states};
