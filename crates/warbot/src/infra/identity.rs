//! Identity resolution and the capability gate.

use crate::domain::{Error, ParticipantId};
use async_trait::async_trait;

/// Resolves a transport-native identity token (a mention, a raw id) to a
/// participant id. Only manual roster selection uses this; pool signals
/// arrive already resolved by the transport.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<ParticipantId, Error>;
}

/// Parses `<@123>` / `<@!123>` mentions and bare numeric ids. Display-name
/// fallback happens against the pool snapshot in the selector, since names
/// are captured there at signal time.
#[derive(Debug, Clone, Default)]
pub struct MentionResolver;

impl MentionResolver {
    pub fn new() -> Self {
        Self
    }

    fn parse(token: &str) -> Option<ParticipantId> {
        let token = token.trim();
        let inner = token
            .strip_prefix("<@!")
            .or_else(|| token.strip_prefix("<@"))
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(token);

        // Transport ids are long digit strings; anything shorter is a name.
        if inner.len() >= 5 && inner.chars().all(|c| c.is_ascii_digit()) {
            Some(inner.to_string())
        } else {
            None
        }
    }
}

#[async_trait]
impl IdentityResolver for MentionResolver {
    async fn resolve(&self, token: &str) -> Result<ParticipantId, Error> {
        Self::parse(token).ok_or_else(|| Error::UnresolvedParticipant(token.trim().to_string()))
    }
}

/// Whether an actor may run lock/cancel/finalize operations. A plain
/// capability check; role semantics live with the transport.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_manage(&self, actor: &str) -> bool;
}

/// Allow-list authorizer configured from settings.
#[derive(Debug, Clone, Default)]
pub struct RoleAuthorizer {
    managers: Vec<ParticipantId>,
}

impl RoleAuthorizer {
    pub fn new(managers: Vec<ParticipantId>) -> Self {
        Self { managers }
    }
}

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn can_manage(&self, actor: &str) -> bool {
        self.managers.iter().any(|id| id == actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mentions_and_raw_ids_resolve() {
        let resolver = MentionResolver::new();
        assert_eq!(resolver.resolve("<@123456789>").await.unwrap(), "123456789");
        assert_eq!(
            resolver.resolve("<@!123456789>").await.unwrap(),
            "123456789"
        );
        assert_eq!(resolver.resolve(" 987654321 ").await.unwrap(), "987654321");
    }

    #[tokio::test]
    async fn names_do_not_resolve_here() {
        let resolver = MentionResolver::new();
        assert!(matches!(
            resolver.resolve("Viper").await,
            Err(Error::UnresolvedParticipant(_))
        ));
        assert!(matches!(
            resolver.resolve("<@abc>").await,
            Err(Error::UnresolvedParticipant(_))
        ));
    }

    #[tokio::test]
    async fn role_authorizer_checks_the_allow_list() {
        let authz = RoleAuthorizer::new(vec!["admin1".into()]);
        assert!(authz.can_manage("admin1").await);
        assert!(!authz.can_manage("rando").await);
    }
}
