use std::time::Duration;

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Hierarchical dot-separated node name.
    pub name: String,
    /// Interval between callback registry sweeps while running.
    pub sweep_interval: Duration,
    /// Lifetime of outgoing messages when the sender does not pick one.
    pub default_ttl: Duration,
    /// Step used by a handler's ttl extension request when none is given.
    pub ttl_extension: Duration,
    /// Upper bound on records dispatched by one `poll` call.
    pub max_records_per_poll: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "Main".to_string(),
            sweep_interval: Duration::from_secs(10),
            default_ttl: Duration::from_millis(500),
            ttl_extension: Duration::from_secs(10),
            max_records_per_poll: 1024,
        }
    }
}

impl EngineConfig {
    /// Default configuration for the node called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::EngineConfig;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.name, "Main");
        assert_eq!(cfg.sweep_interval, Duration::from_secs(10));
        assert_eq!(cfg.default_ttl, Duration::from_millis(500));
        assert_eq!(cfg.ttl_extension, Duration::from_secs(10));
        assert_eq!(cfg.max_records_per_poll, 1024);
    }

    #[test]
    fn named_keeps_other_defaults() {
        let cfg = EngineConfig::named("A.B");
        assert_eq!(cfg.name, "A.B");
        assert_eq!(cfg.default_ttl, EngineConfig::default().default_ttl);
    }
}
