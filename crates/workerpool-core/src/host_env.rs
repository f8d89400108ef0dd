/// A read-only snapshot of the host process's debug-related environment,
/// injected into [`crate`] consumers rather than read ad hoc, so that
/// worker-spawning code stays pure and unit-testable.
///
/// Mirrors the original's argv-sniffing for `--inspect`/`--debug-brk`: this
/// crate has no equivalent CLI flag vector to inspect, so the signal is the
/// two environment variables a host can set before launching the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnv {
    /// Port to forward via `WORKERPOOL_INSPECT` to spawned child processes.
    pub inspect_port: Option<u16>,
    /// Whether the host asked children to break on start (`WORKERPOOL_DEBUG_BRK`).
    pub debug_brk: bool,
}

impl HostEnv {
    /// Read the current process's environment once. Callers that need
    /// determinism in tests should use [`HostEnv::from_vars`] instead.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a [`HostEnv`] from an arbitrary iterator of `(key, value)`
    /// pairs, decoupling the parsing rule from `std::env` for tests.
    #[must_use]
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut inspect_port = None;
        let mut debug_brk = false;
        for (key, value) in vars {
            match key.as_str() {
                "WORKERPOOL_INSPECT" => inspect_port = value.trim().parse().ok(),
                "WORKERPOOL_DEBUG_BRK" => debug_brk = value == "1" || value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }
        Self { inspect_port, debug_brk }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inspect_port_and_debug_brk() {
        let env = HostEnv::from_vars([
            ("WORKERPOOL_INSPECT".to_string(), "9229".to_string()),
            ("WORKERPOOL_DEBUG_BRK".to_string(), "true".to_string()),
            ("UNRELATED".to_string(), "noise".to_string()),
        ]);
        assert_eq!(env.inspect_port, Some(9229));
        assert!(env.debug_brk);
    }

    #[test]
    fn defaults_to_empty_when_unset() {
        let env = HostEnv::from_vars(std::iter::empty());
        assert_eq!(env, HostEnv::default());
    }

    #[test]
    fn ignores_unparsable_port() {
        let env = HostEnv::from_vars([("WORKERPOOL_INSPECT".to_string(), "not-a-port".to_string())]);
        assert_eq!(env.inspect_port, None);
    }
}
