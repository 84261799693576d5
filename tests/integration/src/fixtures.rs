//! Test fixtures
//!
//! Configurations and tokens shared by the integration tests.

use chrono::Duration;
use roomcast_common::{
    AppConfig, AppSettings, EngineConfig, Environment, JwtConfig, RateLimitConfig, ServerConfig,
    TokenVerifier,
};

/// Secret used by gateways started with [`auth_config`]
pub const TEST_SECRET: &str = "integration-test-secret";

/// Gateway config on a loopback ephemeral port, no Redis, no heartbeat
pub fn test_config(namespaces: &[&str]) -> AppConfig {
    AppConfig {
        app: AppSettings {
            name: "roomcast-integration".to_string(),
            env: Environment::Development,
        },
        gateway: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        redis: None,
        engine: EngineConfig {
            heartbeat_interval_secs: 0,
            namespaces: namespaces.iter().map(ToString::to_string).collect(),
            ..EngineConfig::default()
        },
        jwt: None,
        rate_limit: RateLimitConfig {
            per_second: 100,
            burst: 100,
        },
    }
}

/// [`test_config`] requiring a token signed with [`TEST_SECRET`]
pub fn auth_config(namespaces: &[&str]) -> AppConfig {
    let mut config = test_config(namespaces);
    config.jwt = Some(JwtConfig {
        secret: TEST_SECRET.to_string(),
    });
    config
}

/// Token for `user_id` valid for five minutes
pub fn token_for(user_id: &str) -> String {
    TokenVerifier::new(TEST_SECRET)
        .issue(user_id, Duration::minutes(5))
        .expect("Failed to issue test token")
}
