pub mod error;
pub mod parser;
mod pass1;
mod pass2;

pub use error::{AsmError, AsmErrorKind};

use arch::obj::ObjectModule;

/// Assembles already macro-expanded source lines into an unrelocated
/// object module. `name` is the fallback program name; a label on the
/// START directive takes precedence. Fails on the first unrecoverable
/// error with the offending line attached.
pub fn assemble(name: &str, source: &[String]) -> Result<ObjectModule, AsmError> {
    let collected = pass1::run(name, source)?;
    pass2::run(collected, source)
}
