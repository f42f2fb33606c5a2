pub mod plan;
pub mod sync;

pub use plan::plan;
pub use sync::sync;
