//! Application configuration wrapper
//!
//! Typed getters with defaults over `config::Config`, under the `trinco.*`
//! key namespace. Engine and channel config structs build themselves from
//! this through `from_configuration`.

/// Application configuration wrapper
#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: config::Config,
}

impl Configuration {
    /// Create a new configuration from a Config instance
    pub fn from_config(config: config::Config) -> Self {
        Self { config }
    }

    /// Check if running in standalone mode (single node, no peers)
    pub fn is_standalone(&self) -> bool {
        self.config.get_bool("trinco.standalone").unwrap_or(true)
    }

    /// Get the local node name
    pub fn node_name(&self) -> String {
        self.config
            .get_string("trinco.node.name")
            .unwrap_or_else(|_| "trinco-node".to_string())
    }

    // ===================== Lock Engine Configuration =====================

    /// Get the per-call vote timeout in milliseconds, used when the caller's
    /// own budget is unbounded (default: 5000ms)
    pub fn lock_vote_timeout_ms(&self) -> u64 {
        self.config
            .get_int("trinco.lock.vote-timeout")
            .unwrap_or(5000) as u64
    }

    /// Get the default acquisition timeout in milliseconds (default: 10000ms)
    pub fn lock_default_timeout_ms(&self) -> u64 {
        self.config
            .get_int("trinco.lock.default-timeout")
            .unwrap_or(10000) as u64
    }

    // ===================== Cluster Channel Configuration =====================

    /// Get the channel request timeout in milliseconds (default: 5000ms)
    pub fn channel_request_timeout_ms(&self) -> u64 {
        self.config
            .get_int("trinco.channel.request-timeout")
            .unwrap_or(5000) as u64
    }

    /// Get the artificial delivery delay in milliseconds, used to widen race
    /// windows in tests (default: 0, no delay)
    pub fn channel_delivery_delay_ms(&self) -> u64 {
        self.config
            .get_int("trinco.channel.delivery-delay")
            .unwrap_or(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Configuration {
        Configuration::from_config(config::Config::builder().build().unwrap())
    }

    #[test]
    fn test_defaults() {
        let conf = empty();
        assert!(conf.is_standalone());
        assert_eq!(conf.node_name(), "trinco-node");
        assert_eq!(conf.lock_vote_timeout_ms(), 5000);
        assert_eq!(conf.lock_default_timeout_ms(), 10000);
        assert_eq!(conf.channel_request_timeout_ms(), 5000);
        assert_eq!(conf.channel_delivery_delay_ms(), 0);
    }

    #[test]
    fn test_overrides() {
        let conf = Configuration::from_config(
            config::Config::builder()
                .set_override("trinco.standalone", false)
                .unwrap()
                .set_override("trinco.node.name", "node-a")
                .unwrap()
                .set_override("trinco.lock.vote-timeout", 1200)
                .unwrap()
                .set_override("trinco.channel.delivery-delay", 25)
                .unwrap()
                .build()
                .unwrap(),
        );
        assert!(!conf.is_standalone());
        assert_eq!(conf.node_name(), "node-a");
        assert_eq!(conf.lock_vote_timeout_ms(), 1200);
        assert_eq!(conf.channel_delivery_delay_ms(), 25);
    }
}
