use std::time::Duration;

/// Tunable constants for the routing core. Defaults match the normative
/// values in the external spec this crate implements (`MAX_INACTIVITY`,
/// `DEFAULT_ROUTE_HOPS`, `DEFAULT_ROUTE_TTL`); embedders may override them
/// for testing or for non-default deployments.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// A route is stale and must be rediscovered once its most recent
    /// usage is older than this.
    pub max_inactivity: Duration,
    /// Hop budget handed to a freshly originated route request.
    pub default_route_hops: u16,
    /// Wall-clock lifetime of a freshly originated route request.
    pub default_route_ttl: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_inactivity: Duration::from_secs(12 * 3600),
            default_route_hops: 10,
            default_route_ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = RoutingConfig::default();
        assert_eq!(config.max_inactivity, Duration::from_secs(43_200));
        assert_eq!(config.default_route_hops, 10);
        assert_eq!(config.default_route_ttl, Duration::from_secs(300));
    }
}
