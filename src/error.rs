//! The error taxonomy of the runtime: which conditions are recoverable
//! return values and which are fatal aborts. See `spec.md` §7.

use std::fmt;

/// Recoverable failure of [`crate::vm::Vm::allocate`]: GC ran and the
/// request still could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory {
    pub requested_bytes: usize,
}

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out of memory: could not satisfy a {}-byte allocation after a collection",
            self.requested_bytes
        )
    }
}

impl std::error::Error for OutOfMemory {}

/// Fatal invariant violations. These are programmer errors, not conditions a
/// caller can recover from: we log at `error!` and abort, the same as the
/// teacher's `handle_mmap_error` does for unrecoverable OS-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// `vm_pop`/peek on an empty root stack.
    RootStackUnderflow,
    /// A BitSet length not a multiple of the word size, or a QF region
    /// smaller than 2 * data alignment.
    InvalidSize { detail: &'static str },
    /// Sweep encountered an object whose header is malformed: zero size,
    /// size exceeding the region, or an unrecognized tag.
    HeapCorruption { detail: &'static str },
    /// A `Ref` handed to an operation that needs to trust its address across
    /// a possible relocation (a constructor argument such as `wrapper`'s
    /// child or `array`'s fill, or `set_slot`/`slot`'s `container`/`value`)
    /// was not found on the root stack. Only root-stack entries get
    /// forwarded across a relocating collection (see `spec.md` §5's core
    /// safety rule), so an unrooted reference would silently go stale.
    UnrootedReference,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::RootStackUnderflow => write!(f, "root stack underflow"),
            FatalError::InvalidSize { detail } => write!(f, "invalid size: {detail}"),
            FatalError::HeapCorruption { detail } => write!(f, "heap corruption: {detail}"),
            FatalError::UnrootedReference => {
                write!(f, "reference was not already on the root stack")
            }
        }
    }
}

impl std::error::Error for FatalError {}

impl FatalError {
    /// Log the condition and abort the process. Call sites use this instead
    /// of a bare `panic!` so every fatal path leaves the same diagnostic
    /// trail in the log.
    pub fn abort(self) -> ! {
        log::error!("fatal runtime error: {self}");
        panic!("{self}");
    }
}
