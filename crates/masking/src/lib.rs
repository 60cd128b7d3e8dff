//! Role-gated value masking.
//!
//! A [`MaskRule`] names how a column is obscured; [`mask_value`] applies it
//! unless the caller's role is allowed to see raw data. Masking never
//! fails: empty values pass through, and so do values under a rule this
//! build does not recognize.

mod rule;
mod engine;

pub use rule::MaskRule;
pub use engine::{mask_value, MaskingEngine, DEFAULT_UNMASK_ROLES, REDACTED};
