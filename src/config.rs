/// Toggles for the optimization pipeline. Every pass is enabled by default;
/// the CLI exposes a `--no-<pass>` flag for each of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    pub enable_constant_propagation_pass: bool,
    pub enable_load_store_forwarding_pass: bool,
    pub enable_late_dead_code_elimination_pass: bool,
    pub enable_function_inlining_pass: bool,
    pub enable_redundant_copy_elimination_pass: bool,
    pub enable_merge_blocks_pass: bool,
    /// Upper bound on rounds of the fixed-point optimizer loop. Reaching it is
    /// logged but not an error.
    pub max_optimizer_iterations: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            enable_constant_propagation_pass: true,
            enable_load_store_forwarding_pass: true,
            enable_late_dead_code_elimination_pass: true,
            enable_function_inlining_pass: true,
            enable_redundant_copy_elimination_pass: true,
            enable_merge_blocks_pass: true,
            max_optimizer_iterations: 64,
        }
    }
}

impl CompilerOptions {
    /// Options with every optimization pass switched off. SSA construction and
    /// elimination still run.
    pub fn unoptimized() -> Self {
        Self {
            enable_constant_propagation_pass: false,
            enable_load_store_forwarding_pass: false,
            enable_late_dead_code_elimination_pass: false,
            enable_function_inlining_pass: false,
            enable_redundant_copy_elimination_pass: false,
            enable_merge_blocks_pass: false,
            ..Self::default()
        }
    }

    pub fn any_pass_enabled(&self) -> bool {
        self.enable_constant_propagation_pass
            || self.enable_load_store_forwarding_pass
            || self.enable_late_dead_code_elimination_pass
            || self.enable_function_inlining_pass
            || self.enable_redundant_copy_elimination_pass
            || self.enable_merge_blocks_pass
    }
}
