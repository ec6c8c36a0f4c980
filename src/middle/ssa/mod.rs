//! Conversion into and out of SSA form.
//!
//! The builder already gives every write its own version, so constructing
//! SSA only means placing phis where versions of a declaration meet.
//! Elimination then replaces each phi by copies on its incoming edges.

mod builder;
mod eliminator;

pub use builder::build_ssa;
pub use eliminator::eliminate_ssa;

#[cfg(test)]
mod tests;
