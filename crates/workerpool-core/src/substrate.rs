/// The concrete execution mechanism behind a worker.
///
/// Mirrors the distilled spec's three substrates. `Web` only ever spawns
/// successfully when the `wasm-worker` feature is enabled on a
/// `wasm32-unknown-unknown` target; elsewhere requesting it is an
/// `UnsupportedSubstrate` error (see `SPEC_FULL.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substrate {
    /// Spawn an OS child process.
    Process,
    /// Spawn an OS thread.
    Thread,
    /// Spawn a browser worker (feature-gated, `wasm32-unknown-unknown` only).
    Web,
    /// Prefer `Thread` for in-process closure scripts, else `Process`.
    Auto,
}

impl Substrate {
    /// Resolve `Auto` against whether the caller supplied an in-process
    /// closure script (`is_thread_script`). Concrete substrates resolve to
    /// themselves.
    #[must_use]
    pub fn resolve(self, is_thread_script: bool) -> Substrate {
        match self {
            Substrate::Auto if is_thread_script => Substrate::Thread,
            Substrate::Auto => Substrate::Process,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefers_thread_for_closure_scripts() {
        assert_eq!(Substrate::Auto.resolve(true), Substrate::Thread);
        assert_eq!(Substrate::Auto.resolve(false), Substrate::Process);
    }

    #[test]
    fn concrete_substrates_are_stable_under_resolve() {
        assert_eq!(Substrate::Process.resolve(true), Substrate::Process);
        assert_eq!(Substrate::Thread.resolve(false), Substrate::Thread);
    }
}
