use bitcoin::script::PushBytesError;

#[derive(Debug)]
pub enum ContractError {
    Script(bitcoin::blockdata::script::Error),
    PushBytes(PushBytesError),
    /// The script does not have as many instructions as the HTLC template.
    InstructionCount { expected: usize, got: usize },
    /// Instruction at `position` differs from the HTLC template.
    TemplateMismatch { position: usize },
    /// The locktime hole holds a number outside `0..=u32::MAX` or a non minimal number.
    InvalidLockTime,
    Protocol(&'static str),
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ContractError {}

impl From<bitcoin::blockdata::script::Error> for ContractError {
    fn from(value: bitcoin::blockdata::script::Error) -> Self {
        Self::Script(value)
    }
}

impl From<PushBytesError> for ContractError {
    fn from(value: PushBytesError) -> Self {
        Self::PushBytes(value)
    }
}
