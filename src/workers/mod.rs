//! Ready-made work units.

pub mod fn_work;
pub mod script;

pub use fn_work::FnWork;
pub use script::{Script, ScriptBuilder, ScriptWork};
