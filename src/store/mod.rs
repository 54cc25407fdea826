pub mod effects;
pub mod fs;
pub mod memory;
