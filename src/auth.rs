use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Shared-secret password check. Identity comes from the login's user name,
/// which the query handler reads as the caller's user id.
#[derive(Debug)]
pub struct ShareItAuthSource {
    password: String,
}

impl ShareItAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ShareItAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!("password login for {:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
