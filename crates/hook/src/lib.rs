//! Hook transaction service for Windows.
//!
//! This crate is intended to be used only as `reskin`'s internal dependency.
//! It describes the batch primitive the engine uses to attach function
//! interceptors and provides a MinHook backed implementation for x86 and
//! x86_64.
//!
//! A transaction stages any number of attach/detach operations and applies
//! them in one step. Nothing staged is visible to the host until
//! [`HookTransaction::commit`] succeeds, and a failed commit rolls every staged
//! operation back.

#[cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]
mod minhook;

#[cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]
pub use minhook::{MinHookService, MinHookTransaction};

use core::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};

/// Begins hook transactions.
pub trait HookService {
    type Transaction: HookTransaction;

    /// Begin a new transaction.
    fn begin(&self) -> DetourResult<Self::Transaction>;
}

/// A batch of pending attach/detach operations.
///
/// Dropping a transaction without committing aborts it.
pub trait HookTransaction {
    /// Enlist a thread whose instruction pointer must be fixed up while code is rewritten.
    fn update_thread(&mut self, thread_id: u32) -> DetourResult<()>;

    /// Stage an interceptor redirecting `target` to `detour`.
    ///
    /// Returns the address which calls the original implementation once committed.
    ///
    /// # Safety
    /// `target` and `detour` must be valid function addresses with the same signature.
    unsafe fn attach(&mut self, target: usize, detour: usize) -> DetourResult<usize>;

    /// Stage removal of a previously committed interceptor on `target`.
    ///
    /// # Safety
    /// `target` must be hooked and no thread may be executing the trampoline on commit.
    unsafe fn detach(&mut self, target: usize) -> DetourResult<()>;

    /// Apply every staged operation at once.
    fn commit(self) -> DetourResult<()>;

    /// Discard every staged operation.
    fn abort(self);
}

/// Transaction step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOp {
    Begin,
    UpdateThread,
    Attach,
    Detach,
    Commit,
}

pub type DetourResult<T> = Result<T, DetourError>;

/// Detour error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetourError {
    op: HookOp,
    code: i32,
}

impl DetourError {
    pub const fn new(op: HookOp, code: i32) -> Self {
        Self { op, code }
    }

    #[inline]
    pub const fn op(&self) -> HookOp {
        self.op
    }

    #[inline]
    pub const fn code(&self) -> i32 {
        self.code
    }
}

impl Display for DetourError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Detour {:?} call error: {:?}", self.op, self.code)
    }
}

impl Error for DetourError {}
