pub mod memory;
pub mod relay;
pub mod traits;
