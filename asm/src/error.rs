use color_print::cprintln;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmErrorKind {
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),

    #[error("bad label `{0}`")]
    BadLabel(String),

    #[error("label `{0}` has no statement")]
    DanglingLabel(String),

    #[error("duplicate symbol `{0}`")]
    DuplicateSymbol(String),

    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),

    #[error("`{0}` requires an operand")]
    MissingOperand(String),

    #[error("cannot parse operand `{0}`")]
    BadOperand(String),

    #[error("register required, got `{0}`")]
    BadRegister(String),

    #[error("extended flag is only valid on memory-format mnemonics: `+{0}`")]
    BadExtended(String),

    #[error("operand of `{mnemonic}` is out of displacement range (target 0x{target:X}); use the extended format")]
    DisplacementOutOfRange { mnemonic: String, target: u32 },

    #[error("external reference `{0}` requires the extended format")]
    ExternalNeedsExtended(String),

    #[error("misplaced `{0}` directive")]
    MisplacedDirective(String),

    #[error("missing END directive")]
    MissingEnd,

    #[error("location counter overflow")]
    LocationOverflow,
}

/// An assembly failure, pinned to its 1-based source line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct AsmError {
    pub line: usize,
    pub text: String,
    pub kind: AsmErrorKind,
}

impl AsmError {
    pub fn new(line: usize, text: &str, kind: AsmErrorKind) -> Self {
        AsmError { line, text: text.to_string(), kind }
    }

    /// Print error with diagnostic information showing the source location
    /// and the offending line.
    pub fn print_diag(&self, file: &str) {
        cprintln!("<red,bold>error</>: {}", self.kind);
        cprintln!("     <blue>--></> <underline>{}:{}</>", file, self.line);
        cprintln!("      <blue>|</>");
        cprintln!(" <blue>{:>4} |</> {}", self.line, self.text);
        cprintln!("      <blue>|</>");
    }
}
