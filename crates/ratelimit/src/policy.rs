//! Policy classes and their bucket settings.

use std::fmt;

use serde::Serialize;

use crate::bucket::BucketConfig;

/// Traffic class a request is limited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyClass {
    /// Unauthenticated callers.
    Anonymous,
    /// Callers with a resolved principal.
    Authenticated,
    /// Credential-handling endpoints such as login.
    Sensitive,
    /// Payment provider deliveries.
    Webhook,
}

impl PolicyClass {
    pub const ALL: [PolicyClass; 4] = [
        PolicyClass::Anonymous,
        PolicyClass::Authenticated,
        PolicyClass::Sensitive,
        PolicyClass::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyClass::Anonymous => "anonymous",
            PolicyClass::Authenticated => "authenticated",
            PolicyClass::Sensitive => "sensitive",
            PolicyClass::Webhook => "webhook",
        }
    }
}

impl fmt::Display for PolicyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket settings for every policy class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitPolicy {
    pub anonymous: BucketConfig,
    pub authenticated: BucketConfig,
    pub sensitive: BucketConfig,
    pub webhook: BucketConfig,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            anonymous: BucketConfig::known(30, 5),
            authenticated: BucketConfig::known(300, 50),
            sensitive: BucketConfig::known(5, 1),
            webhook: BucketConfig::known(100, 50),
        }
    }
}

impl RateLimitPolicy {
    pub fn config(&self, class: PolicyClass) -> BucketConfig {
        match class {
            PolicyClass::Anonymous => self.anonymous,
            PolicyClass::Authenticated => self.authenticated,
            PolicyClass::Sensitive => self.sensitive,
            PolicyClass::Webhook => self.webhook,
        }
    }

    /// Replaces the settings of one class.
    pub fn with(mut self, class: PolicyClass, config: BucketConfig) -> Self {
        let slot = match class {
            PolicyClass::Anonymous => &mut self.anonymous,
            PolicyClass::Authenticated => &mut self.authenticated,
            PolicyClass::Sensitive => &mut self.sensitive,
            PolicyClass::Webhook => &mut self.webhook,
        };
        *slot = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_per_class() {
        let policy = RateLimitPolicy::default();
        let expected = [
            (PolicyClass::Anonymous, 30, 5),
            (PolicyClass::Authenticated, 300, 50),
            (PolicyClass::Sensitive, 5, 1),
            (PolicyClass::Webhook, 100, 50),
        ];
        for (class, per_minute, burst) in expected {
            let config = policy.config(class);
            assert_eq!(config.rate_per_minute(), per_minute, "{class}");
            assert_eq!(config.burst(), burst, "{class}");
        }
    }

    #[test]
    fn override_touches_one_class() {
        let custom = BucketConfig::per_minute(10, 2).unwrap();
        let policy = RateLimitPolicy::default().with(PolicyClass::Webhook, custom);

        assert_eq!(policy.config(PolicyClass::Webhook), custom);
        assert_eq!(
            policy.config(PolicyClass::Anonymous),
            RateLimitPolicy::default().anonymous
        );
    }
}
