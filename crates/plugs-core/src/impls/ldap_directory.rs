//! LdapDirectory - LDAP 実装（`ldap` feature）
//!
//! bind 済みの 1 本の接続をハンドルとして扱います。生存確認は users base への
//! base search です。
//!
//! 残高の compare-and-set は 1 回の modify で「旧値の delete + 新値の add」を送ります。
//! 旧値が既に無ければサーバーは noSuchAttribute (16) を返すので、それを
//! 競合負けとして `false` にします。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use ldap3::{dn_escape, ldap_escape};
use tracing::{info, warn};

use crate::domain::{Backend, BackendError, UserId};
use crate::ports::{Connector, CreditDirectory, Liveness};

const RC_SUCCESS: u32 = 0;
const RC_NO_SUCH_ATTRIBUTE: u32 = 16;
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Where users, groups and balances live in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub users_base: String,
    pub groups_base: String,
    pub balance_attribute: String,
}

impl DirectoryLayout {
    fn user_dn(&self, user: &UserId) -> String {
        format!("uid={},{}", dn_escape(user.as_str()), self.users_base)
    }

    /// Matches `user` when it is a member of any of `groups`.
    fn admin_filter(&self, user: &UserId, groups: &[String]) -> String {
        let any: String = groups
            .iter()
            .map(|group| {
                let dn = format!("cn={},{}", dn_escape(group.as_str()), self.groups_base);
                format!("(memberOf={})", ldap_escape(dn))
            })
            .collect();
        format!("(&(|{any})(uid={}))", ldap_escape(user.as_str()))
    }
}

/// Binds fresh connections. The bind password is never logged.
#[derive(Clone)]
pub struct LdapConnector {
    url: String,
    bind_dn: String,
    bind_password: String,
    layout: Arc<DirectoryLayout>,
    timeout: Duration,
}

impl LdapConnector {
    /// `host` may be a full `ldap://` / `ldaps://` URL or a bare host name.
    pub fn new(
        host: &str,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
        layout: DirectoryLayout,
    ) -> Self {
        Self {
            url: directory_url(host),
            bind_dn: bind_dn.into(),
            bind_password: bind_password.into(),
            layout: Arc::new(layout),
            timeout: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for LdapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConnector")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("layout", &self.layout)
            .finish()
    }
}

fn directory_url(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("ldaps://{host}")
    }
}

#[async_trait]
impl Connector<dyn CreditDirectory> for LdapConnector {
    fn backend(&self) -> Backend {
        Backend::Directory
    }

    async fn connect(&self) -> Result<Arc<dyn CreditDirectory>, BackendError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(ldap_error)?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "directory connection closed");
            }
        });

        ldap.simple_bind(&self.bind_dn, &self.bind_password)
            .await
            .and_then(|result| result.success())
            .map_err(ldap_error)?;
        info!(url = %self.url, bind_dn = %self.bind_dn, "bound to directory");
        Ok(Arc::new(LdapDirectory {
            ldap,
            layout: Arc::clone(&self.layout),
        }))
    }
}

/// `CreditDirectory` over one bound connection.
pub struct LdapDirectory {
    ldap: Ldap,
    layout: Arc<DirectoryLayout>,
}

#[async_trait]
impl Liveness for LdapDirectory {
    async fn ping(&self) -> Result<(), BackendError> {
        let mut ldap = self.ldap.clone();
        ldap.search(&self.layout.users_base, Scope::Base, "(objectClass=*)", vec!["1.1"])
            .await
            .and_then(|rs| rs.success())
            .map_err(ldap_error)?;
        Ok(())
    }
}

#[async_trait]
impl CreditDirectory for LdapDirectory {
    async fn read_balance(&self, user: &UserId) -> Result<Option<String>, BackendError> {
        let attribute = self.layout.balance_attribute.as_str();
        let mut ldap = self.ldap.clone();
        let rs = ldap
            .search(
                &self.layout.user_dn(user),
                Scope::Base,
                "(objectClass=*)",
                vec![attribute],
            )
            .await
            .map_err(ldap_error)?;
        if rs.1.rc == RC_NO_SUCH_OBJECT {
            return Ok(None);
        }
        let (entries, _) = rs.success().map_err(ldap_error)?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        // a user without the attribute is reported as an empty value
        let entry = SearchEntry::construct(entry);
        let value = entry
            .attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .and_then(|(_, values)| values.first().cloned())
            .unwrap_or_default();
        Ok(Some(value))
    }

    async fn swap_balance(
        &self,
        user: &UserId,
        expected: &str,
        new: &str,
    ) -> Result<bool, BackendError> {
        let attribute = self.layout.balance_attribute.as_str();
        let dn = self.layout.user_dn(user);
        let mods = vec![
            Mod::Delete(attribute, HashSet::from([expected])),
            Mod::Add(attribute, HashSet::from([new])),
        ];
        let mut ldap = self.ldap.clone();
        let result = ldap.modify(&dn, mods).await.map_err(ldap_error)?;
        match result.rc {
            RC_SUCCESS => Ok(true),
            RC_NO_SUCH_ATTRIBUTE => Ok(false),
            rc => Err(BackendError::Operation(format!(
                "modify {dn} failed: rc={rc} {}",
                result.text
            ))),
        }
    }

    async fn is_member(&self, user: &UserId, groups: &[String]) -> Result<bool, BackendError> {
        if groups.is_empty() {
            return Ok(false);
        }
        let mut ldap = self.ldap.clone();
        let (entries, _) = ldap
            .search(
                &self.layout.users_base,
                Scope::Subtree,
                &self.layout.admin_filter(user, groups),
                vec!["uid"],
            )
            .await
            .and_then(|rs| rs.success())
            .map_err(ldap_error)?;
        Ok(!entries.is_empty())
    }
}

fn ldap_error(e: LdapError) -> BackendError {
    match e {
        LdapError::Io { .. }
        | LdapError::OpSend { .. }
        | LdapError::ResultRecv { .. }
        | LdapError::Timeout { .. } => BackendError::Unavailable(e.to_string()),
        other => BackendError::Operation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DirectoryLayout {
        DirectoryLayout {
            users_base: "cn=users,dc=example,dc=test".into(),
            groups_base: "cn=groups,dc=example,dc=test".into(),
            balance_attribute: "drinkBalance".into(),
        }
    }

    #[test]
    fn bare_host_defaults_to_ldaps() {
        assert_eq!(directory_url("ldap.example.test"), "ldaps://ldap.example.test");
        assert_eq!(directory_url("ldap://localhost:389"), "ldap://localhost:389");
    }

    #[test]
    fn user_dn_escapes_the_uid() {
        let dn = layout().user_dn(&UserId::new("eve,cn=admins"));
        assert!(dn.starts_with("uid=eve\\"));
        assert!(dn.ends_with(",cn=users,dc=example,dc=test"));
        assert!(!dn.contains("eve,"));
    }

    #[test]
    fn admin_filter_ors_groups_and_escapes_the_user() {
        let filter = layout().admin_filter(&UserId::new("al*"), &["drink".into(), "rtp".into()]);
        assert!(filter.starts_with(
            "(&(|(memberOf=cn=drink,cn=groups,dc=example,dc=test)\
             (memberOf=cn=rtp,cn=groups,dc=example,dc=test))(uid=al\\"
        ));
        assert!(!filter.contains('*'));
    }

    #[test]
    fn debug_output_hides_the_bind_password() {
        let connector = LdapConnector::new("ldap.example.test", "uid=svc", "hunter2", layout());
        assert!(!format!("{connector:?}").contains("hunter2"));
    }
}
