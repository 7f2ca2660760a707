pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# GRIDCAST CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/gridcast/config.yml
#   3. /etc/gridcast/config.yml
#
# Values of the form $env{NAME} are replaced with environment variables.
# Durations accept suffixes such as 500ms, 10s, 2m, 24h.

# =============================================================================
# REMOTE (required)
# =============================================================================
remote:
  url: https://grid.example.com/api
  # Optional second endpoint; every write is raced over both and the first
  # answer wins.
  # fallback_url: https://backup.grid.example.com/api
  token: $env{GRIDCAST_TOKEN}
  # Resource (canvas) the operations are written to
  resource: default
  # HTTP client timeout
  timeout: 8s

# =============================================================================
# LIMITER
# =============================================================================
# Admission control applied before every write. Keep these well below what the
# server advertises; server hints can only make them stricter.
limiter:
  min_spacing: 700ms
  burst_quota: 15
  burst_window: 10s
  # Extra wait once the burst window is full, to absorb clock skew
  burst_safety_margin: 500ms
  jitter_min: 50ms
  jitter_max: 150ms

# =============================================================================
# DISPATCH
# =============================================================================
dispatch:
  checkpoint_every: 10
  progress_every: 50
  burst_cooldown: 15s
  rate_limit_cooldown: 10s
  error_backoff: 1s
  send_timeout: 8s
  # 'drop' abandons a failed write (recover it later with 'gridcast validate'),
  # or retry it at the back of the queue:
  #   failure_policy:
  #     requeue:
  #       max_retries: 3
  failure_policy: drop
  # Ask the remote for policy hints every N confirmed writes (0 = never)
  policy_poll_every: 0

# =============================================================================
# CHECKPOINT
# =============================================================================
checkpoint:
  enabled: true
  dir: ~/.local/share/gridcast
  # Defaults to session-<hostname>
  # slot: my-client
  expiry: 24h

# =============================================================================
# VALIDATION
# =============================================================================
validation:
  region_size: 1000
  read_concurrency: 4
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_starter_config_parses() {
        std::env::set_var("GRIDCAST_TOKEN", "starter-token");
        let config = parse_config(&generate_starter_config()).unwrap();
        std::env::remove_var("GRIDCAST_TOKEN");

        assert_eq!(config.remote.token.as_deref(), Some("starter-token"));
        assert_eq!(config.limiter.burst_quota, 15);
        assert!(!config.checkpoint.dir.starts_with("~"));
    }
}
