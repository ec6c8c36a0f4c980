use crate::index::simple_index;

simple_index! {
    /// Identifies a basic block within a module
    pub struct BlockId = "bb";
}

simple_index! {
    /// Identifies a storage slot. Several places may refer to the same
    /// identifier (one per read site).
    pub struct PlaceId = "%";
}

simple_index! {
    /// Identifies one SSA version of a declaration
    pub struct IdentifierId = "$";
}

simple_index! {
    /// Identifies a source-level variable (or a compiler temporary). All the
    /// versions of a variable share it.
    pub struct DeclarationId = "d";
}

simple_index! {
    pub struct InstructionId = "i";
}

simple_index! {
    pub struct FunctionId = "fn";
}

simple_index! {
    pub struct PhiId = "phi_";
}
