//! The expression sublanguages referenced by workflow operators: field
//! paths and document variables, filter selectors, projection expressions
//! and shapes, grouping accumulators, and sort keys.

pub(crate) mod expression;
pub(crate) mod field;
pub(crate) mod reshape;
pub(crate) mod selector;
pub(crate) mod sort;

pub use self::expression::{Accumulator, Expr, GroupBy, Grouped};
pub use self::field::{DocVar, FieldPath};
pub use self::reshape::{Reshape, ShapeField};
pub use self::selector::{Condition, Selector};
pub use self::sort::{SortDirection, SortKey};
