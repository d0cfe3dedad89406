use std::fmt;

/// Build a `DexError`, optionally wrapping an existing one with a context message.
macro_rules! err {
    ($base:ident, $fmtstr:literal $(, $args:expr)*) => {
        DexError::with_context($base, format!($fmtstr $(, $args)*))
    };
    ($fmtstr:literal $(, $args:expr)*) => {
        DexError::new(&format!($fmtstr $(, $args)*))
    };
}

/// Return early with a `DexError`.
#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err(DexError::new($msg))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::new(&format!($fmtstr, $($args)*)))
    };
    (($fmtstr:literal, $($args:tt)*), ($contextfmt:literal, $($contextargs:tt)*)) => {
        return Err(DexError::with_context(
            DexError::new(&format!($fmtstr, $($args)*)),
            format!($contextfmt, $($contextargs)*),
        ))
    };
}

/// Low level failure while decoding dex or oat bytes.
///
/// The message describes the innermost problem; every context pushed on the way
/// out names the structure that was being read, so the rendered form reads
/// like "bad string index 7 for field_id_item #3 of classes2.dex".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexError
{
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub fn new(msg: &str) -> Self
    {
        DexError {
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub fn with_context(base: DexError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        DexError { msg: base.msg, contexts }
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }

    pub fn contexts(&self) -> &[String]
    {
        &self.contexts
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}
