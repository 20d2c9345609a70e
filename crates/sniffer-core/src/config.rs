use crate::error::ConfigError;

/// The unvalidated shape a config source (CLI flags, env vars, ...) hands
/// the core. Every field mirrors a row of spec.md §6's configuration table.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    pub interface: Option<String>,
    pub ports: Vec<u32>,
    pub sample_rate: Option<f64>,
    pub max_body_size: Option<u32>,
    pub max_concurrent_connections: Option<u32>,
    pub connection_idle_timeout_ms: Option<u64>,
}

/// A config that has passed [`validate`] and satisfies every constraint in
/// spec.md §6. Internal components never re-check these invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub interface: String,
    pub ports: Vec<u16>,
    pub sample_rate: f64,
    pub max_body_size: u32,
    pub max_concurrent_connections: u32,
    pub connection_idle_timeout_ms: u64,
}

pub const DEFAULT_MAX_BODY_SIZE: u32 = 1_048_576;
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: u32 = 10_000;
pub const DEFAULT_CONNECTION_IDLE_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;

/// Validate a [`RawConfig`], filling in defaults for absent optional fields
/// and rejecting anything that violates spec.md §6's constraints.
pub fn validate(raw: RawConfig) -> Result<CaptureConfig, ConfigError> {
    if raw.ports.is_empty() {
        return Err(ConfigError::EmptyPorts);
    }

    let mut ports = Vec::with_capacity(raw.ports.len());
    for port in raw.ports {
        if port == 0 || port > u16::from(u16::MAX) as u32 {
            return Err(ConfigError::PortOutOfRange(port));
        }
        ports.push(port as u16);
    }

    let sample_rate = raw.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    if !(0.0..=1.0).contains(&sample_rate) {
        return Err(ConfigError::SampleRateOutOfRange(sample_rate));
    }

    let max_body_size = raw.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE);
    if max_body_size == 0 {
        return Err(ConfigError::ZeroMaxBodySize);
    }

    let max_concurrent_connections = raw
        .max_concurrent_connections
        .unwrap_or(DEFAULT_MAX_CONCURRENT_CONNECTIONS);
    if max_concurrent_connections == 0 {
        return Err(ConfigError::ZeroMaxConnections);
    }

    let connection_idle_timeout_ms = raw
        .connection_idle_timeout_ms
        .unwrap_or(DEFAULT_CONNECTION_IDLE_TIMEOUT_MS);
    if connection_idle_timeout_ms == 0 {
        return Err(ConfigError::ZeroIdleTimeout);
    }

    Ok(CaptureConfig {
        interface: raw.interface.unwrap_or_default(),
        ports,
        sample_rate,
        max_body_size,
        max_concurrent_connections,
        connection_idle_timeout_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_ports(ports: Vec<u32>) -> RawConfig {
        RawConfig {
            ports,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_empty_ports() {
        assert_eq!(validate(raw_with_ports(vec![])), Err(ConfigError::EmptyPorts));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert_eq!(
            validate(raw_with_ports(vec![70000])),
            Err(ConfigError::PortOutOfRange(70000))
        );
        assert_eq!(
            validate(raw_with_ports(vec![0])),
            Err(ConfigError::PortOutOfRange(0))
        );
    }

    #[test]
    fn rejects_out_of_range_sample_rate() {
        let mut raw = raw_with_ports(vec![80]);
        raw.sample_rate = Some(1.5);
        assert_eq!(
            validate(raw),
            Err(ConfigError::SampleRateOutOfRange(1.5))
        );
    }

    #[test]
    fn rejects_zero_max_body_size() {
        let mut raw = raw_with_ports(vec![80]);
        raw.max_body_size = Some(0);
        assert_eq!(validate(raw), Err(ConfigError::ZeroMaxBodySize));
    }

    #[test]
    fn rejects_zero_max_connections() {
        let mut raw = raw_with_ports(vec![80]);
        raw.max_concurrent_connections = Some(0);
        assert_eq!(validate(raw), Err(ConfigError::ZeroMaxConnections));
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        let mut raw = raw_with_ports(vec![80]);
        raw.connection_idle_timeout_ms = Some(0);
        assert_eq!(validate(raw), Err(ConfigError::ZeroIdleTimeout));
    }

    #[test]
    fn fills_in_defaults() {
        let cfg = validate(raw_with_ports(vec![80, 443])).unwrap();
        assert_eq!(cfg.interface, "");
        assert_eq!(cfg.ports, vec![80, 443]);
        assert_eq!(cfg.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(cfg.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert_eq!(
            cfg.max_concurrent_connections,
            DEFAULT_MAX_CONCURRENT_CONNECTIONS
        );
        assert_eq!(
            cfg.connection_idle_timeout_ms,
            DEFAULT_CONNECTION_IDLE_TIMEOUT_MS
        );
    }

    #[test]
    fn preserves_port_order_for_bpf_filter_synthesis() {
        let cfg = validate(raw_with_ports(vec![8080, 80, 443])).unwrap();
        assert_eq!(cfg.ports, vec![8080, 80, 443]);
    }
}
