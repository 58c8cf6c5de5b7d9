//! Authentication of incoming requests and per-handler level checks

use super::{AccessLevel, Authorizer, Identity, IdentityResolver, PermissionAuthorizer, TokenBlocklist};
use crate::error::{ServiceError, ServiceResult};
use std::sync::Arc;
use tracing::debug;

pub const AUTH_REQUIRED: &str = "authentication required";
pub const INVALID_TOKEN: &str = "invalid or expired token";
pub const REVOKED_TOKEN: &str = "token has been revoked";
pub const INSUFFICIENT: &str = "insufficient permissions for dataset";

/// Who is calling, attached to every request as an extension
///
/// Authentication failures are carried rather than raised so that routes
/// without a level requirement still answer.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub identity: Option<Arc<Identity>>,
    pub token: Option<String>,
    rejection: Option<ServiceError>,
    unrestricted: bool,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Caller when authentication is disabled: everything is allowed
    pub fn unrestricted() -> Self {
        Self {
            unrestricted: true,
            ..Self::default()
        }
    }

    fn rejected(token: String, err: ServiceError) -> Self {
        Self {
            token: Some(token),
            rejection: Some(err),
            ..Self::default()
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.identity.as_deref().map(|i| i.email.as_str())
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }
}

/// Turns credentials into callers and callers into access decisions
pub struct AuthorizationGate {
    resolver: Option<Arc<IdentityResolver>>,
    authorizer: Arc<dyn Authorizer>,
    blocklist: Arc<TokenBlocklist>,
}

impl AuthorizationGate {
    pub fn new(
        resolver: Arc<IdentityResolver>,
        authorizer: Arc<dyn Authorizer>,
        blocklist: Arc<TokenBlocklist>,
    ) -> Self {
        Self {
            resolver: Some(resolver),
            authorizer,
            blocklist,
        }
    }

    /// Gate that lets every request through at admin level
    pub fn disabled() -> Self {
        Self {
            resolver: None,
            authorizer: Arc::new(PermissionAuthorizer::default()),
            blocklist: Arc::new(TokenBlocklist::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn resolver(&self) -> Option<&IdentityResolver> {
        self.resolver.as_deref()
    }

    pub fn blocklist(&self) -> &TokenBlocklist {
        &self.blocklist
    }

    /// Resolves the presented token, if any
    pub async fn authenticate(&self, token: Option<String>) -> Caller {
        let Some(resolver) = &self.resolver else {
            return Caller::unrestricted();
        };
        let Some(token) = token else {
            return Caller::anonymous();
        };
        if self.blocklist.is_blocked(&token) {
            debug!("blocked token presented");
            return Caller::rejected(token, ServiceError::unauthorized(REVOKED_TOKEN));
        }
        match resolver.resolve(&token).await {
            Ok(Some(identity)) => Caller {
                identity: Some(identity),
                token: Some(token),
                ..Caller::default()
            },
            Ok(None) => Caller::rejected(token, ServiceError::unauthorized(INVALID_TOKEN)),
            Err(err) => Caller::rejected(token, err),
        }
    }

    /// Effective level of `caller` on `dataset`
    pub fn level(&self, caller: &Caller, dataset: Option<&str>) -> AccessLevel {
        if caller.unrestricted {
            return AccessLevel::Admin;
        }
        match &caller.identity {
            Some(identity) => self.authorizer.level(identity, dataset),
            None => AccessLevel::None,
        }
    }

    /// Fails unless `caller` holds at least `required` on `dataset`
    pub fn require(
        &self,
        caller: &Caller,
        dataset: Option<&str>,
        required: AccessLevel,
    ) -> ServiceResult<AccessLevel> {
        if required == AccessLevel::None {
            return Ok(self.level(caller, dataset));
        }
        if let Some(err) = &caller.rejection {
            return Err(err.clone());
        }
        if caller.identity.is_none() && !caller.unrestricted {
            return Err(ServiceError::unauthorized(AUTH_REQUIRED));
        }
        let level = self.level(caller, dataset);
        if level < required {
            return Err(ServiceError::forbidden(INSUFFICIENT));
        }
        Ok(level)
    }
}
