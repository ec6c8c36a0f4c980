//! The middle end works on HIR. Modules are lowered from the syntax tree,
//! converted into SSA form to place phis, taken back out of it with explicit
//! copies and then optimized.

pub mod cfg;
pub mod hir;
pub mod optimization;
pub mod ssa;
