//! CLI/environment resolution for the agent (spec.md §6.3).
//!
//! Precedence is CLI > environment > default, and both "unknown flags" and
//! "malformed numerics" fall back rather than aborting the process - so
//! this module parses `argv` itself instead of leaning on a strict parser
//! that would reject either case.

use std::collections::HashMap;

/// Fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub server_url: String,
    pub state_dir: std::path::PathBuf,
    pub max_lease_ms: i64,
    pub heartbeat_interval_ms: i64,
    pub poll_interval_ms: i64,
    pub kill_after: Option<std::time::Duration>,
    pub random_failures: bool,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::from_args_and_env(&args, |key| std::env::var(key).ok())
    }

    /// Core resolution logic, parameterized over an environment lookup so
    /// tests don't have to mutate real process environment variables.
    fn from_args_and_env(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let flags = parse_flags(args);

        let agent_id = string_value(&flags, "agent-id", "AGENT_ID", &env)
            .unwrap_or_else(|| format!("agent-{}", short_random_suffix()));
        let server_url = string_value(&flags, "server-url", "SERVER_URL", &env)
            .unwrap_or_else(|| "http://localhost:3000".to_string());
        let state_dir = string_value(&flags, "state-dir", "AGENT_STATE_DIR", &env)
            .unwrap_or_else(|| ".agent-state".to_string());

        let max_lease_ms = numeric_value(&flags, "max-lease-ms", "MAX_LEASE_MS", &env, 30_000);
        let heartbeat_interval_ms = numeric_value(
            &flags,
            "heartbeat-interval-ms",
            "HEARTBEAT_INTERVAL_MS",
            &env,
            10_000,
        );
        let poll_interval_ms =
            numeric_value(&flags, "poll-interval-ms", "POLL_INTERVAL_MS", &env, 1_000);

        let kill_after = flags
            .get("kill-after")
            .and_then(|raw| raw.parse::<f64>().ok())
            .map(std::time::Duration::from_secs_f64);

        let random_failures = flags.contains_key("random-failures");

        Self {
            agent_id,
            server_url,
            state_dir: state_dir.into(),
            max_lease_ms,
            heartbeat_interval_ms,
            poll_interval_ms,
            kill_after,
            random_failures,
        }
    }

    /// Per spec.md §4.5: the heartbeat extends the lease by 3x its own
    /// interval, giving generous slack for transient network glitches.
    pub fn heartbeat_extend_ms(&self) -> i64 {
        self.heartbeat_interval_ms * 3
    }

    /// Path to this agent's journal file.
    pub fn journal_path(&self) -> std::path::PathBuf {
        self.state_dir.join(format!("{}.json", self.agent_id))
    }
}

/// Parse `--key=value` and `--key value` pairs, plus bare `--flag` switches.
/// Anything that isn't a recognized `--xxx` shape is silently dropped.
fn parse_flags(args: &[String]) -> HashMap<String, String> {
    let mut flags = HashMap::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(rest) = arg.strip_prefix("--") else {
            continue;
        };
        if let Some((key, value)) = rest.split_once('=') {
            flags.insert(key.to_string(), value.to_string());
        } else if matches!(iter.peek(), Some(next) if !next.starts_with("--")) {
            flags.insert(rest.to_string(), iter.next().unwrap().clone());
        } else {
            flags.insert(rest.to_string(), String::new());
        }
    }
    flags
}

fn string_value(
    flags: &HashMap<String, String>,
    flag: &str,
    env_key: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    flags
        .get(flag)
        .cloned()
        .filter(|v| !v.is_empty())
        .or_else(|| env(env_key))
}

fn numeric_value(
    flags: &HashMap<String, String>,
    flag: &str,
    env_key: &str,
    env: impl Fn(&str) -> Option<String>,
    default: i64,
) -> i64 {
    string_value(flags, flag, env_key, env)
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(default)
}

fn short_random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..8)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn malformed_numeric_cli_falls_back_to_default() {
        let config =
            AgentConfig::from_args_and_env(&args(&["--max-lease-ms=not-a-number"]), |_| None);
        assert_eq!(config.max_lease_ms, 30_000);
    }

    #[test]
    fn unknown_flag_is_ignored() {
        let config =
            AgentConfig::from_args_and_env(&args(&["--totally-unknown=5", "--poll-interval-ms=250"]), |_| None);
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[test]
    fn cli_overrides_env_overrides_default() {
        let env = |key: &str| (key == "POLL_INTERVAL_MS").then(|| "500".to_string());
        let config =
            AgentConfig::from_args_and_env(&args(&["--poll-interval-ms=250"]), env);
        assert_eq!(config.poll_interval_ms, 250);

        let config = AgentConfig::from_args_and_env(&args(&[]), env);
        assert_eq!(config.poll_interval_ms, 500);

        let config = AgentConfig::from_args_and_env(&args(&[]), |_| None);
        assert_eq!(config.poll_interval_ms, 1_000);
    }

    #[test]
    fn heartbeat_extend_is_three_times_interval() {
        let config =
            AgentConfig::from_args_and_env(&args(&["--heartbeat-interval-ms=5000"]), |_| None);
        assert_eq!(config.heartbeat_extend_ms(), 15_000);
    }

    #[test]
    fn kill_after_parses_fractional_seconds() {
        let config = AgentConfig::from_args_and_env(&args(&["--kill-after=1.5"]), |_| None);
        assert_eq!(
            config.kill_after,
            Some(std::time::Duration::from_secs_f64(1.5))
        );
    }

    #[test]
    fn random_failures_flag() {
        let config = AgentConfig::from_args_and_env(&args(&["--random-failures"]), |_| None);
        assert!(config.random_failures);
        let config = AgentConfig::from_args_and_env(&args(&[]), |_| None);
        assert!(!config.random_failures);
    }
}
