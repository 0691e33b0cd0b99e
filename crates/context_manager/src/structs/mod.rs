pub mod branch;
pub mod invariants;
pub mod tree;
pub mod tree_branches;
pub mod tree_dedupe;
