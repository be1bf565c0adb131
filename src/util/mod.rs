pub mod clock;
pub mod deadline;
pub mod telemetry;

pub use clock::*;
pub use deadline::*;
pub use telemetry::*;
