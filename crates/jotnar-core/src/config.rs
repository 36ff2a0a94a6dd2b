//! Environment-driven configuration (spec §6 "Environment variables").
//!
//! Grounded in borg-core's `config.rs`: a `.env` file is merged under real
//! environment variables (the environment always wins), parsed with small
//! typed getters, and the whole thing is loaded once at process start.

use std::collections::HashMap;

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Which dist-git container family to route a ticket's new branches into.
/// Grounded in `common/constants.py`'s c9s/c10s queue split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerVersion {
    C9s,
    C10s,
}

impl ContainerVersion {
    fn parse(raw: &str) -> Self {
        match raw {
            "c10s" | "C10S" => Self::C10s,
            _ => Self::C9s,
        }
    }
}

/// Process-wide configuration, loaded once at startup (spec §6).
#[derive(Debug, Clone)]
pub struct Config {
    // Queue backend
    pub queue_url: String,

    // Issue tracker
    pub tracker_url: String,
    pub tracker_token: String,
    pub tracker_query: String,

    // Forge (dist-git / GitLab-alike)
    pub forge_url: String,
    pub forge_token: String,
    pub forge_fork_namespace: String,

    // Builder (brew/koji-alike)
    pub builder_url: String,

    // LLM / agent runner
    pub model: String,
    pub agent_max_retries_per_step: u32,
    pub agent_total_max_retries: u32,
    pub agent_max_iterations: u32,
    pub agent_timeout_s: u64,

    // Pipeline tuning
    pub max_build_attempts: u32,
    pub max_task_retries: u32,
    pub dry_run: bool,
    pub clone_base_path: String,
    pub clone_janitor_max_age_days: u32,
    pub container_version: ContainerVersion,

    // Kerberos credential broker (C7)
    pub krb5_keytab: String,
    pub krb5_ccache: String,

    // Observability
    pub otel_collector_endpoint: String,

    // Timeouts (spec §5 "Cancellation and timeouts")
    pub queue_pop_timeout_s: u64,
    pub tool_tracker_timeout_s: u64,
    pub tool_builder_timeout_s: u64,
    pub build_poll_interval_s: u64,
    pub build_poll_deadline_s: u64,

    // Ingestion (C5)
    pub ingest_interval_s: u64,
    pub ingest_page_size: u32,

    /// Major RHEL versions with a currently maintained Y-stream development
    /// branch, consulted by target-branch mapping when a CVE needs an
    /// internal fix (grounded in `triage_agent.py`'s
    /// `load_rhel_config().get("current_y_streams")`).
    pub current_y_streams: Vec<u32>,

    /// Packages under functional-safety (FuSa) tracking; combined with the
    /// branch regex in spec §6 to decide whether to add the FuSa label.
    pub fusa_packages: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let dotenv = parse_dotenv();

        Ok(Self {
            queue_url: get_str("JOTNAR_QUEUE_URL", &dotenv, "postgres://localhost/jotnar"),

            tracker_url: get_str("JOTNAR_TRACKER_URL", &dotenv, ""),
            tracker_token: get_str("JOTNAR_TRACKER_TOKEN", &dotenv, ""),
            tracker_query: get_str(
                "JOTNAR_TRACKER_QUERY",
                &dotenv,
                "project = RHEL AND status = New ORDER BY created ASC",
            ),

            forge_url: get_str("JOTNAR_FORGE_URL", &dotenv, ""),
            forge_token: get_str("JOTNAR_FORGE_TOKEN", &dotenv, ""),
            forge_fork_namespace: get_str("JOTNAR_FORGE_FORK_NAMESPACE", &dotenv, "redhat"),

            builder_url: get_str("JOTNAR_BUILDER_URL", &dotenv, ""),

            model: get_str("JOTNAR_MODEL", &dotenv, "claude-sonnet-4"),
            agent_max_retries_per_step: get_u32("JOTNAR_AGENT_MAX_RETRIES_PER_STEP", &dotenv, 3),
            agent_total_max_retries: get_u32("JOTNAR_AGENT_TOTAL_MAX_RETRIES", &dotenv, 10),
            agent_max_iterations: get_u32("JOTNAR_AGENT_MAX_ITERATIONS", &dotenv, 25),
            agent_timeout_s: get_u64("JOTNAR_AGENT_TIMEOUT_S", &dotenv, 600),

            max_build_attempts: get_u32("JOTNAR_MAX_BUILD_ATTEMPTS", &dotenv, 10),
            max_task_retries: get_u32("JOTNAR_MAX_TASK_RETRIES", &dotenv, 5),
            dry_run: get_bool("JOTNAR_DRY_RUN", &dotenv, false),
            clone_base_path: get_str("JOTNAR_CLONE_BASE_PATH", &dotenv, "/var/lib/jotnar/clones"),
            clone_janitor_max_age_days: get_u32("JOTNAR_CLONE_JANITOR_MAX_AGE_DAYS", &dotenv, 14),
            container_version: ContainerVersion::parse(&get_str(
                "JOTNAR_CONTAINER_VERSION",
                &dotenv,
                "c9s",
            )),

            krb5_keytab: get_str("KRB5_KEYTAB", &dotenv, ""),
            krb5_ccache: get_str("KRB5CCNAME", &dotenv, ""),

            otel_collector_endpoint: get_str("JOTNAR_OTEL_COLLECTOR_ENDPOINT", &dotenv, ""),

            queue_pop_timeout_s: get_u64("JOTNAR_QUEUE_POP_TIMEOUT_S", &dotenv, 30),
            tool_tracker_timeout_s: get_u64("JOTNAR_TOOL_TRACKER_TIMEOUT_S", &dotenv, 30),
            tool_builder_timeout_s: get_u64("JOTNAR_TOOL_BUILDER_TIMEOUT_S", &dotenv, 3 * 3600),
            build_poll_interval_s: get_u64("JOTNAR_BUILD_POLL_INTERVAL_S", &dotenv, 30),
            build_poll_deadline_s: get_u64("JOTNAR_BUILD_POLL_DEADLINE_S", &dotenv, 4 * 3600),

            ingest_interval_s: get_u64("JOTNAR_INGEST_INTERVAL_S", &dotenv, 300),
            ingest_page_size: get_u32("JOTNAR_INGEST_PAGE_SIZE", &dotenv, 500),

            current_y_streams: get_str("JOTNAR_CURRENT_Y_STREAMS", &dotenv, "9,10")
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect(),
            fusa_packages: get_str("JOTNAR_FUSA_PACKAGES", &dotenv, "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    /// Queue name suffix for this process's container family, e.g. `c9s` in
    /// `rebase_queue_c9s` (spec §4.4, grounded in `get_rebase_queue_for_branch`).
    pub fn container_suffix(&self) -> &'static str {
        match self.container_version {
            ContainerVersion::C9s => "c9s",
            ContainerVersion::C10s => "c10s",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_with_no_environment() {
        let dotenv = HashMap::new();
        assert_eq!(get_u32("DOES_NOT_EXIST", &dotenv, 10), 10);
        assert!(!get_bool("DOES_NOT_EXIST", &dotenv, false));
    }

    #[test]
    fn dotenv_parsing_skips_blank_and_comment_lines() {
        // parse_dotenv reads from the CWD's .env; exercise the line parser
        // directly instead of depending on filesystem state.
        let mut map = HashMap::new();
        for line in ["# a comment", "", "KEY=value", "  SPACED = trimmed  "] {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                map.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        assert_eq!(map.get("KEY").map(String::as_str), Some("value"));
        assert_eq!(map.get("SPACED").map(String::as_str), Some("trimmed"));
    }

    #[test]
    fn container_version_parses_c10s_and_defaults_to_c9s() {
        assert_eq!(ContainerVersion::parse("c10s"), ContainerVersion::C10s);
        assert_eq!(ContainerVersion::parse("garbage"), ContainerVersion::C9s);
    }
}
