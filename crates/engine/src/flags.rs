//! Feature flag resolution for the merged-digest-id rollout.
//!
//! The Redis resolver checks an organization override, then an environment
//! override, then falls back to the configured default:
//!
//! - `feature:use_merged_digest_id:org:{organization_id}`
//! - `feature:use_merged_digest_id:env:{environment_id}`

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use courier_common::config::parse_flag;
use courier_common::error::AppError;

const FLAG_KEY_PREFIX: &str = "feature:use_merged_digest_id";

/// Decides whether a digest uses the merged-digest-id aggregation.
#[async_trait]
pub trait FeatureFlagResolver: Send + Sync {
    async fn evaluate(
        &self,
        environment_id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError>;
}

/// Resolver returning a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct StaticFlagResolver(pub bool);

#[async_trait]
impl FeatureFlagResolver for StaticFlagResolver {
    async fn evaluate(&self, _: Uuid, _: Uuid, _: Uuid) -> Result<bool, AppError> {
        Ok(self.0)
    }
}

/// Redis-backed resolver with per-organization and per-environment overrides.
#[derive(Clone)]
pub struct RedisFlagResolver {
    redis: ConnectionManager,
    default: bool,
}

impl RedisFlagResolver {
    pub fn new(redis: ConnectionManager, default: bool) -> Self {
        Self { redis, default }
    }

    fn organization_key(organization_id: Uuid) -> String {
        format!("{FLAG_KEY_PREFIX}:org:{organization_id}")
    }

    fn environment_key(environment_id: Uuid) -> String {
        format!("{FLAG_KEY_PREFIX}:env:{environment_id}")
    }

    /// First parseable override wins; unparseable values are skipped.
    fn resolve(overrides: &[Option<String>], default: bool) -> bool {
        overrides
            .iter()
            .flatten()
            .find_map(|raw| parse_flag(raw))
            .unwrap_or(default)
    }
}

#[async_trait]
impl FeatureFlagResolver for RedisFlagResolver {
    async fn evaluate(
        &self,
        environment_id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut redis = self.redis.clone();
        let keys = [
            Self::organization_key(organization_id),
            Self::environment_key(environment_id),
        ];
        let overrides: Vec<Option<String>> = redis.mget(&keys).await?;
        let enabled = Self::resolve(&overrides, self.default);

        tracing::debug!(
            environment_id = %environment_id,
            organization_id = %organization_id,
            user_id = %user_id,
            enabled,
            "Resolved merged digest id flag"
        );

        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_override_wins() {
        let overrides = vec![Some("true".to_string()), Some("false".to_string())];
        assert!(RedisFlagResolver::resolve(&overrides, false));
    }

    #[test]
    fn test_environment_override_used_without_organization_override() {
        let overrides = vec![None, Some("0".to_string())];
        assert!(!RedisFlagResolver::resolve(&overrides, true));
    }

    #[test]
    fn test_garbage_override_falls_through_to_default() {
        let overrides = vec![Some("perhaps".to_string()), None];
        assert!(RedisFlagResolver::resolve(&overrides, true));
        assert!(!RedisFlagResolver::resolve(&[None, None], false));
    }

    #[test]
    fn test_flag_keys() {
        let id = Uuid::nil();
        assert_eq!(
            RedisFlagResolver::organization_key(id),
            "feature:use_merged_digest_id:org:00000000-0000-0000-0000-000000000000"
        );
        assert!(RedisFlagResolver::environment_key(id).contains(":env:"));
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let id = Uuid::new_v4();
        assert!(StaticFlagResolver(true).evaluate(id, id, id).await.unwrap());
        assert!(!StaticFlagResolver(false).evaluate(id, id, id).await.unwrap());
    }
}
