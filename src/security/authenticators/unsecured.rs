use crate::context::{AuthenticationContext, RequestContext};
use crate::error::AuthError;
use crate::security::{AuthOutcome, Authenticator};
use tracing::debug;

/// Resources with security disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsecuredAuthenticator;

impl UnsecuredAuthenticator {
    pub const NAME: &'static str = "unsecured";
    pub const PRIORITY: i32 = 0;
}

impl Authenticator for UnsecuredAuthenticator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn can_handle(&self, req: &RequestContext) -> bool {
        req.resource.security_disabled
    }

    fn authenticate(&self, req: &mut RequestContext) -> Result<AuthOutcome, AuthError> {
        debug!(api = %req.api.name, resource = %req.resource.path, "security disabled for resource");
        Ok(AuthOutcome::Authenticated(AuthenticationContext::anonymous(req)))
    }
}
