//! vCenter session lifecycle.
//!
//! `open_session` logs in and resolves the working datacenter;
//! `run_scoped` lends the session to a traversal and always logs out
//! afterwards, whether the traversal succeeded, failed or panicked.

use crate::error::{VcenterError, VcenterErrorKind, VcenterResult};
use crate::inventory::TraversalControl;
use crate::property::{PropertySet, PropertySource};
use crate::types::{ManagedObjectReference, SessionOptions, VcenterCredentials};
use crate::vim::{normalize_endpoint, VimClient};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// A property source whose server-side session must be released.
#[async_trait::async_trait]
pub trait ManagedSession: PropertySource {
    /// Log out. Retrievals fail afterwards.
    async fn release(&mut self);
}

/// An authenticated vCenter session, exclusively owned by one request.
pub struct VcenterSession {
    client: VimClient,
    host: String,
}

impl VcenterSession {
    /// Hostname of the endpoint (no credentials).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_open(&self) -> bool {
        self.client.is_connected()
    }

    pub fn root_folder(&self) -> VcenterResult<ManagedObjectReference> {
        Ok(self.client.service_content()?.root_folder.clone())
    }

    /// Log out. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.client.is_connected() {
            let _ = self.client.logout().await;
            log::debug!("Logged out of vCenter at {}", self.host);
        }
    }
}

impl Drop for VcenterSession {
    fn drop(&mut self) {
        // Reached when the owning future is dropped mid-request.
        let Some(mut detached) = self.client.detach() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::warn!(
                    "vCenter session for {} dropped while open; logging out in background",
                    self.host
                );
                handle.spawn(async move {
                    let _ = detached.logout().await;
                });
            }
            Err(_) => log::warn!(
                "vCenter session for {} dropped outside a runtime; it will expire server-side",
                self.host
            ),
        }
    }
}

#[async_trait::async_trait]
impl PropertySource for VcenterSession {
    async fn retrieve(
        &self,
        obj: &ManagedObjectReference,
        paths: &[&str],
    ) -> VcenterResult<PropertySet> {
        self.client.retrieve_properties(obj, paths).await
    }
}

#[async_trait::async_trait]
impl ManagedSession for VcenterSession {
    async fn release(&mut self) {
        self.close().await;
    }
}

/// Connect, authenticate and locate the datacenter to walk.
///
/// Fails with `ConnectionError` when the endpoint is unreachable, TLS fails
/// or the credentials are rejected, and with `NoDatacenter` when no single
/// datacenter can be chosen. `control` is checked before every round-trip.
/// A session opened before a later failure is logged out before returning.
pub async fn open_session(
    credentials: &VcenterCredentials,
    options: &SessionOptions,
    control: &TraversalControl,
) -> VcenterResult<(VcenterSession, ManagedObjectReference)> {
    let endpoint = normalize_endpoint(&credentials.endpoint)?;
    let host = endpoint.host_str().unwrap_or_default().to_string();
    if options.insecure_skip_verify {
        log::warn!("TLS certificate verification disabled for vCenter at {host}");
    }

    log::info!("Connecting to vCenter at {host}");
    let mut client = VimClient::new(&endpoint, options)?;
    control.check()?;
    let content = client.fetch_service_content().await?;
    if let Some(name) = content.about.as_ref().and_then(|a| a.full_name.as_deref()) {
        log::debug!("vCenter at {host} reports {name}");
    }
    control.check()?;
    client.login(&credentials.username, &credentials.password).await?;

    let mut session = VcenterSession { client, host };
    let resolved = resolve_datacenter(
        &session,
        &content.root_folder,
        credentials.datacenter.as_deref(),
        control,
    )
    .await;
    match resolved {
        Ok(datacenter) => Ok((session, datacenter)),
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

/// Pick the datacenter among the root folder's children: the one named
/// `preferred`, or the only one visible.
pub async fn resolve_datacenter<S: PropertySource + ?Sized>(
    source: &S,
    root_folder: &ManagedObjectReference,
    preferred: Option<&str>,
    control: &TraversalControl,
) -> VcenterResult<ManagedObjectReference> {
    control.check()?;
    let root = source
        .retrieve(root_folder, &["childEntity"])
        .await
        .map_err(|e| e.into_kind(VcenterErrorKind::NoDatacenter))?;
    let datacenters: Vec<ManagedObjectReference> = root
        .get_list::<ManagedObjectReference>("childEntity")
        .map_err(|e| e.into_kind(VcenterErrorKind::NoDatacenter))?
        .into_iter()
        .filter(|r| r.type_ == "Datacenter")
        .collect();

    if let Some(wanted) = preferred {
        for dc in &datacenters {
            control.check()?;
            let props = source
                .retrieve(dc, &["name"])
                .await
                .map_err(|e| e.into_kind(VcenterErrorKind::NoDatacenter))?;
            if props.get::<String>("name").ok().as_deref() == Some(wanted) {
                return Ok(dc.clone());
            }
        }
        return Err(VcenterError::no_datacenter(format!(
            "Datacenter '{wanted}' not found or not visible"
        )));
    }

    let mut iter = datacenters.into_iter();
    match (iter.next(), iter.next()) {
        (Some(dc), None) => Ok(dc),
        (None, _) => Err(VcenterError::no_datacenter(
            "No datacenter configured or visible to this user",
        )),
        (Some(_), Some(_)) => Err(VcenterError::no_datacenter(
            "Several datacenters are visible; name the one to use",
        )),
    }
}

/// Lend `session` to `f`, then release it on every exit path.
///
/// A panic inside `f` is re-raised after the session has been released.
pub async fn run_scoped<S, T, F>(
    mut session: S,
    datacenter: ManagedObjectReference,
    f: F,
) -> VcenterResult<T>
where
    S: ManagedSession,
    F: for<'s> FnOnce(&'s S, ManagedObjectReference) -> BoxFuture<'s, VcenterResult<T>>,
{
    let outcome = AssertUnwindSafe(f(&session, datacenter)).catch_unwind().await;
    session.release().await;
    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_vcenter::{FakeHandle, FakeVcenter};
    use crate::inventory::build_inventory;
    use crate::mock::MockInventory;
    use secrecy::SecretString;
    use std::sync::atomic::Ordering;
    use tokio_util::sync::CancellationToken;

    fn unlimited() -> TraversalControl {
        TraversalControl::new()
    }

    fn credentials(fake: &FakeHandle) -> VcenterCredentials {
        VcenterCredentials {
            endpoint: fake.endpoint.clone(),
            username: "administrator@vsphere.local".into(),
            password: SecretString::new(FakeVcenter::PASSWORD.into()),
            datacenter: None,
        }
    }

    async fn open(fake: &FakeHandle) -> VcenterResult<(VcenterSession, ManagedObjectReference)> {
        open_session(&credentials(fake), &SessionOptions::new(false), &unlimited()).await
    }

    #[tokio::test]
    async fn single_datacenter_is_default() {
        let mut inv = MockInventory::new();
        let dc = inv.add_datacenter("DC1");
        let root = inv.root_folder().clone();
        let found = resolve_datacenter(&inv, &root, None, &unlimited()).await.unwrap();
        assert_eq!(found, dc);
    }

    #[tokio::test]
    async fn no_datacenter_fails() {
        let inv = MockInventory::new();
        let root = inv.root_folder().clone();
        let err = resolve_datacenter(&inv, &root, None, &unlimited()).await.unwrap_err();
        assert_eq!(err.kind, VcenterErrorKind::NoDatacenter);
    }

    #[tokio::test]
    async fn several_datacenters_need_a_name() {
        let mut inv = MockInventory::new();
        inv.add_datacenter("DC1");
        let dc2 = inv.add_datacenter("DC2");
        let root = inv.root_folder().clone();

        let err = resolve_datacenter(&inv, &root, None, &unlimited()).await.unwrap_err();
        assert_eq!(err.kind, VcenterErrorKind::NoDatacenter);
        assert!(err.message.contains("Several"));

        let found = resolve_datacenter(&inv, &root, Some("DC2"), &unlimited()).await.unwrap();
        assert_eq!(found, dc2);
        let err = resolve_datacenter(&inv, &root, Some("DC9"), &unlimited())
            .await
            .unwrap_err();
        assert_eq!(err.kind, VcenterErrorKind::NoDatacenter);
    }

    #[tokio::test]
    async fn unreadable_root_folder_is_no_datacenter() {
        let mut inv = MockInventory::new();
        inv.add_datacenter("DC1");
        let root = inv.root_folder().clone();
        inv.fail_on(&root);
        let err = resolve_datacenter(&inv, &root, None, &unlimited()).await.unwrap_err();
        assert_eq!(err.kind, VcenterErrorKind::NoDatacenter);
    }

    #[tokio::test]
    async fn scoped_session_released_on_success() {
        let mut inv = MockInventory::new();
        let dc = inv.add_datacenter("DC1");
        let released = inv.release_flag();

        let name = run_scoped(inv, dc, |s, dc| {
            async move {
                let props = s.retrieve(&dc, &["name"]).await?;
                props.get::<String>("name")
            }
            .boxed()
        })
        .await
        .unwrap();

        assert_eq!(name, "DC1");
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scoped_session_released_on_error() {
        let mut inv = MockInventory::new();
        let dc = inv.add_datacenter("DC1");
        let released = inv.release_flag();

        let result: VcenterResult<()> = run_scoped(inv, dc, |_, _| {
            async move { Err(VcenterError::property("boom")) }.boxed()
        })
        .await;

        assert_eq!(result.unwrap_err().kind, VcenterErrorKind::PropertyRetrieval);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scoped_session_released_on_panic() {
        let mut inv = MockInventory::new();
        let dc = inv.add_datacenter("DC1");
        let released = inv.release_flag();

        let caught = AssertUnwindSafe(run_scoped(inv, dc, |_, _| {
            async move {
                if true {
                    panic!("traversal bug");
                }
                Ok(())
            }
            .boxed()
        }))
        .catch_unwind()
        .await;

        assert!(caught.is_err());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn released_mock_refuses_retrievals() {
        let mut inv = MockInventory::new();
        let dc = inv.add_datacenter("DC1");
        inv.release().await;
        let err = inv.retrieve(&dc, &["name"]).await.unwrap_err();
        assert_eq!(err.kind, VcenterErrorKind::ConnectionError);
    }

    #[tokio::test]
    async fn cancelled_control_skips_datacenter_lookup() {
        let mut inv = MockInventory::new();
        inv.add_datacenter("DC1");
        let root = inv.root_folder().clone();
        let token = CancellationToken::new();
        token.cancel();

        let control = TraversalControl::new().with_cancel(token);
        let err = resolve_datacenter(&inv, &root, None, &control).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(inv.retrievals(), 0);
    }

    // ── Against a live HTTP endpoint ────────────────────────────────

    #[tokio::test]
    async fn http_session_logs_out_once_after_traversal() {
        let fake = FakeVcenter::new().with_datacenter("DC1", &["web-01", "db-01"]).start().await;
        let (session, dc) = open(&fake).await.unwrap();
        assert!(session.is_open());
        assert_eq!(session.host(), "127.0.0.1");
        assert_eq!(dc.value, "datacenter-1");

        let tree = run_scoped(session, dc, |s, dc| {
            async move { build_inventory(s, &dc, TraversalControl::new()).await }.boxed()
        })
        .await
        .unwrap();
        assert_eq!(tree.virtual_machines().len(), 2);
        assert_eq!(fake.logins(), 1);
        assert_eq!(fake.logouts(), 1);
    }

    #[tokio::test]
    async fn http_session_without_datacenter_logs_out() {
        let fake = FakeVcenter::new().start().await;
        let err = open(&fake).await.err().unwrap();
        assert_eq!(err.kind, VcenterErrorKind::NoDatacenter);
        assert_eq!(fake.logins(), 1);
        assert_eq!(fake.logouts(), 1);
    }

    #[tokio::test]
    async fn http_session_logs_out_after_failed_traversal() {
        let fake = FakeVcenter::new().with_datacenter("DC1", &["web-01"]).start().await;
        let (session, dc) = open(&fake).await.unwrap();

        let result: VcenterResult<()> = run_scoped(session, dc, |s, _| {
            async move {
                let gone = ManagedObjectReference::new("VirtualMachine", "vm-404");
                s.retrieve(&gone, &["name"]).await.map(|_| ())
            }
            .boxed()
        })
        .await;
        assert_eq!(result.unwrap_err().kind, VcenterErrorKind::PropertyRetrieval);
        assert_eq!(fake.logouts(), 1);
    }

    #[tokio::test]
    async fn dropped_http_session_logs_out_in_background() {
        let fake = FakeVcenter::new().with_datacenter("DC1", &[]).start().await;
        let (session, _) = open(&fake).await.unwrap();
        drop(session);
        assert!(fake.wait_for_logouts(1).await);
    }

    #[tokio::test]
    async fn closed_http_session_is_not_logged_out_again() {
        let fake = FakeVcenter::new().with_datacenter("DC1", &[]).start().await;
        let (mut session, _) = open(&fake).await.unwrap();
        session.close().await;
        session.close().await;
        assert!(!session.is_open());
        drop(session);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fake.logouts(), 1);
    }

    #[tokio::test]
    async fn cancellation_during_login_logs_out() {
        let token = CancellationToken::new();
        let fake = FakeVcenter::new()
            .with_datacenter("DC1", &[])
            .cancel_on_login(token.clone())
            .start()
            .await;
        let control = TraversalControl::new().with_cancel(token);

        let err = open_session(&credentials(&fake), &SessionOptions::new(false), &control)
            .await
            .err()
            .unwrap();
        assert!(err.is_cancelled());
        assert_eq!(fake.logins(), 1);
        assert_eq!(fake.logouts(), 1);
    }
}
