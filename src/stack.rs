//! Stack safety for the recursive phases.
//!
//! Parsing, resolving and evaluating all recurse over the syntax tree.  Deep
//! (but still legal) programs would otherwise exhaust the thread's stack, so
//! each recursive step goes through [`ensure_sufficient_stack`], which grows
//! the stack on demand via `stacker`.

/// Minimum stack space to keep available (100KB red zone).
const RED_ZONE: usize = 100 * 1024;

/// Stack space to allocate when growing (1MB).
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, first growing the stack if less than [`RED_ZONE`] remains.
#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
