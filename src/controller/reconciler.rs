//! Provision Controller
//!
//! Wires a [`Provisioner`] into the kube-rs controller runtime. The runtime
//! owns watching, resync and the work queue; this module only supplies the
//! two reconcile callbacks and the requeue decision for failures.
//!
//! [`Provisioner`]: crate::domain::ports::Provisioner

use crate::controller::objects::{
    claim_provisioner, claim_storage_class, claim_wants, is_unbound, persistent_volume,
    request_from_claim, should_delete, volume_from_persistent_volume, volume_name_for,
};
use crate::domain::ports::ProvisionerRef;
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::ProvisionerMetrics;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the provision controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Provisioner name claims must request
    pub provisioner_name: String,
    /// Requeue interval after a transient failure
    pub resync_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            provisioner_name: "example.com/hostpath".to_string(),
            resync_period: Duration::from_secs(15),
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// State shared by all reconcile calls
pub struct Context {
    client: Client,
    provisioner: ProvisionerRef,
    config: ControllerConfig,
    metrics: ProvisionerMetrics,
}

// =============================================================================
// Provision Controller
// =============================================================================

/// Drives claims and volumes through the provisioner
pub struct ProvisionController {
    context: Arc<Context>,
}

impl ProvisionController {
    /// Create a new controller
    pub fn new(
        client: Client,
        config: ControllerConfig,
        provisioner: ProvisionerRef,
        metrics: ProvisionerMetrics,
    ) -> Self {
        Self {
            context: Arc::new(Context {
                client,
                provisioner,
                config,
                metrics,
            }),
        }
    }

    /// Run until a shutdown signal is received
    pub async fn run(self) {
        let client = self.context.client.clone();
        info!(
            "Starting provision controller for {} (backend: {})",
            self.context.config.provisioner_name,
            self.context.provisioner.backend_name()
        );

        let claims = Controller::new(
            Api::<PersistentVolumeClaim>::all(client.clone()),
            watcher::Config::default(),
        )
        .shutdown_on_signal()
        .run(reconcile_claim, error_policy, self.context.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled claim {}", obj),
                Err(e) => debug!("Claim reconcile failed: {}", e),
            }
        });

        let volumes = Controller::new(
            Api::<PersistentVolume>::all(client),
            watcher::Config::default(),
        )
        .shutdown_on_signal()
        .run(reconcile_volume, error_policy, self.context.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled volume {}", obj),
                Err(e) => debug!("Volume reconcile failed: {}", e),
            }
        });

        futures::future::join(claims, volumes).await;
        info!("Provision controller stopped");
    }
}

// =============================================================================
// Reconcilers
// =============================================================================

/// Provision a volume for an unbound claim that asks for us
async fn reconcile_claim(claim: Arc<PersistentVolumeClaim>, ctx: Arc<Context>) -> Result<Action> {
    if !is_unbound(&claim) {
        return Ok(Action::await_change());
    }

    let class_name = claim_storage_class(&claim);

    // The storage class only matters when the claim names no provisioner
    let class = match (claim_provisioner(&claim), class_name) {
        (None, Some(name)) => {
            Api::<StorageClass>::all(ctx.client.clone())
                .get_opt(name)
                .await?
        }
        _ => None,
    };
    if !claim_wants(&claim, class.as_ref(), &ctx.config.provisioner_name) {
        return Ok(Action::await_change());
    }

    let volume_name = volume_name_for(&claim)?;
    let volumes = Api::<PersistentVolume>::all(ctx.client.clone());
    if volumes.get_opt(&volume_name).await?.is_some() {
        debug!("Volume {} already exists", volume_name);
        return Ok(Action::await_change());
    }

    let request = request_from_claim(&claim, volume_name)?;

    let provisioner = ctx.provisioner.clone();
    let outcome = tokio::task::spawn_blocking(move || provisioner.provision(request))
        .await
        .map_err(|e| Error::Internal(format!("provision task failed: {}", e)))?;
    ctx.metrics.record_provision(&outcome);
    let volume = outcome?;

    let pv = persistent_volume(&volume, &ctx.config.provisioner_name, class_name);
    match volumes.create(&PostParams::default(), &pv).await {
        Ok(_) => info!(
            "Created volume {} for claim {}/{}",
            volume.name,
            claim.namespace().unwrap_or_default(),
            claim.name_any()
        ),
        Err(kube::Error::Api(resp)) if resp.code == 409 => {
            debug!("Volume {} was created concurrently", volume.name)
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Action::await_change())
}

/// Destroy the asset behind a released volume we provisioned
async fn reconcile_volume(pv: Arc<PersistentVolume>, ctx: Arc<Context>) -> Result<Action> {
    if !should_delete(&pv, &ctx.config.provisioner_name) {
        return Ok(Action::await_change());
    }

    let volume = volume_from_persistent_volume(&pv)?;

    let provisioner = ctx.provisioner.clone();
    let outcome = tokio::task::spawn_blocking(move || provisioner.delete(&volume))
        .await
        .map_err(|e| Error::Internal(format!("delete task failed: {}", e)))?;
    ctx.metrics.record_delete(&outcome);
    outcome?;

    let name = pv.name_any();
    match Api::<PersistentVolume>::all(ctx.client.clone())
        .delete(&name, &DeleteParams::default())
        .await
    {
        Ok(_) => info!("Deleted volume {}", name),
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            debug!("Volume {} already gone", name)
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Action::await_change())
}

fn error_policy<K>(obj: Arc<K>, err: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource,
{
    let name = obj.name_any();
    if err.is_ignored() {
        warn!("{}: {}", name, err);
    } else {
        error!("Reconcile of {} failed: {}", name, err);
    }
    requeue_action(err.action(), ctx.config.resync_period)
}

/// Map an error action onto the runtime's requeue decision
pub fn requeue_action(action: ErrorAction, resync_period: Duration) -> Action {
    match action {
        ErrorAction::Requeue => Action::requeue(resync_period),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::objects::{PROVISIONED_BY_ANNOTATION, STORAGE_PROVISIONER_ANNOTATION};
    use crate::domain::ports::ReclaimPolicy;
    use crate::metrics::RESULT_SUCCESS;
    use crate::provisioner::{HostPathConfig, HostPathProvisioner};
    use hyper::{Body, Method, Request, Response, StatusCode};
    use k8s_openapi::api::core::v1::PersistentVolumeStatus;
    use prometheus::Registry;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;
    use tower_test::mock::{Handle, SendResponse};

    const PROVISIONER: &str = "example.com/hostpath";
    const VOLUME_PATH: &str = "/api/v1/persistentvolumes/pvc-0b8c2f4e";

    type ApiServerHandle = Handle<Request<Body>, Response<Body>>;

    fn test_context() -> (Arc<Context>, ApiServerHandle, TempDir) {
        let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let tmp = TempDir::new().unwrap();
        let provisioner = HostPathProvisioner::new(HostPathConfig {
            root_dir: tmp.path().to_path_buf(),
            ..Default::default()
        });
        let ctx = Context {
            client: Client::new(service, "default"),
            provisioner: Arc::new(provisioner),
            config: ControllerConfig::default(),
            metrics: ProvisionerMetrics::register(&Registry::new()).unwrap(),
        };
        (Arc::new(ctx), handle, tmp)
    }

    fn test_claim(annotations: serde_json::Value) -> PersistentVolumeClaim {
        serde_json::from_value(json!({
            "metadata": {
                "name": "claim1",
                "namespace": "team-a",
                "uid": "0b8c2f4e",
                "annotations": annotations
            },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "storageClassName": "hostpath",
                "resources": { "requests": { "storage": "5Gi" } }
            }
        }))
        .unwrap()
    }

    fn annotated_claim() -> PersistentVolumeClaim {
        test_claim(json!({ STORAGE_PROVISIONER_ANNOTATION: PROVISIONER }))
    }

    fn storage_class(provisioner: &str) -> serde_json::Value {
        json!({
            "apiVersion": "storage.k8s.io/v1",
            "kind": "StorageClass",
            "metadata": { "name": "hostpath" },
            "provisioner": provisioner
        })
    }

    fn api_status(code: u16, reason: &str) -> serde_json::Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("request failed: {}", reason),
            "reason": reason,
            "code": code
        })
    }

    fn claim_dir(root: &Path) -> std::path::PathBuf {
        root.join("team-a").join("claim1")
    }

    /// Take the next API request, checking its method and path
    async fn expect_request(
        handle: &mut ApiServerHandle,
        method: Method,
        path: &str,
    ) -> (Request<Body>, SendResponse<Response<Body>>) {
        let (request, send) = handle
            .next_request()
            .await
            .expect("no API request was made");
        assert_eq!(request.method(), method);
        assert_eq!(request.uri().path(), path);
        (request, send)
    }

    fn reply(send: SendResponse<Response<Body>>, status: StatusCode, body: Vec<u8>) {
        send.send_response(
            Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap(),
        );
    }

    fn reply_json(send: SendResponse<Response<Body>>, status: StatusCode, body: serde_json::Value) {
        reply(send, status, serde_json::to_vec(&body).unwrap());
    }

    #[test]
    fn test_requeue_action() {
        let resync = Duration::from_secs(15);
        assert_eq!(
            requeue_action(ErrorAction::Requeue, resync),
            Action::requeue(resync)
        );
        assert_eq!(
            requeue_action(ErrorAction::NoRequeue, resync),
            Action::await_change()
        );
    }

    #[test]
    fn test_ignored_volume_is_not_requeued() {
        let err = Error::Ignored {
            volume: "pvc-1".into(),
            reason: "identity annotation on volume does not match ours".into(),
        };
        assert_eq!(
            requeue_action(err.action(), Duration::from_secs(15)),
            Action::await_change()
        );
    }

    #[tokio::test]
    async fn test_existing_volume_is_left_alone() {
        let (ctx, mut handle, tmp) = test_context();

        // An annotated claim goes straight to the volume lookup
        let server = tokio::spawn(async move {
            let (_, send) = expect_request(&mut handle, Method::GET, VOLUME_PATH).await;
            reply_json(
                send,
                StatusCode::OK,
                json!({
                    "apiVersion": "v1",
                    "kind": "PersistentVolume",
                    "metadata": { "name": "pvc-0b8c2f4e" }
                }),
            );
        });

        let (result, served) = tokio::join!(
            reconcile_claim(Arc::new(annotated_claim()), ctx.clone()),
            server
        );
        served.unwrap();
        assert_eq!(result.unwrap(), Action::await_change());
        assert!(!claim_dir(tmp.path()).exists());
        assert_eq!(ctx.metrics.provisions(RESULT_SUCCESS), 0);
    }

    #[tokio::test]
    async fn test_concurrent_create_counts_as_provisioned() {
        let (ctx, mut handle, tmp) = test_context();

        let server = tokio::spawn(async move {
            let (_, send) = expect_request(&mut handle, Method::GET, VOLUME_PATH).await;
            reply_json(send, StatusCode::NOT_FOUND, api_status(404, "NotFound"));

            let (_, send) =
                expect_request(&mut handle, Method::POST, "/api/v1/persistentvolumes").await;
            reply_json(send, StatusCode::CONFLICT, api_status(409, "AlreadyExists"));
        });

        let (result, served) = tokio::join!(
            reconcile_claim(Arc::new(annotated_claim()), ctx.clone()),
            server
        );
        served.unwrap();
        assert_eq!(result.unwrap(), Action::await_change());
        assert!(claim_dir(tmp.path()).is_dir());
        assert_eq!(ctx.metrics.provisions(RESULT_SUCCESS), 1);
    }

    #[tokio::test]
    async fn test_claim_matched_through_storage_class() {
        let (ctx, mut handle, tmp) = test_context();

        let server = tokio::spawn(async move {
            let (_, send) = expect_request(
                &mut handle,
                Method::GET,
                "/apis/storage.k8s.io/v1/storageclasses/hostpath",
            )
            .await;
            reply_json(send, StatusCode::OK, storage_class(PROVISIONER));

            let (_, send) = expect_request(&mut handle, Method::GET, VOLUME_PATH).await;
            reply_json(send, StatusCode::NOT_FOUND, api_status(404, "NotFound"));

            let (request, send) =
                expect_request(&mut handle, Method::POST, "/api/v1/persistentvolumes").await;
            let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
            let pv: PersistentVolume = serde_json::from_slice(&body).unwrap();
            assert_eq!(pv.metadata.name.as_deref(), Some("pvc-0b8c2f4e"));
            assert_eq!(
                pv.annotations().get(PROVISIONED_BY_ANNOTATION).map(String::as_str),
                Some(PROVISIONER)
            );
            assert_eq!(
                pv.spec.as_ref().and_then(|s| s.storage_class_name.as_deref()),
                Some("hostpath")
            );
            reply(send, StatusCode::CREATED, body.to_vec());
        });

        let claim = test_claim(json!({}));
        let (result, served) = tokio::join!(
            reconcile_claim(Arc::new(claim), ctx.clone()),
            server
        );
        served.unwrap();
        assert_eq!(result.unwrap(), Action::await_change());
        assert!(claim_dir(tmp.path()).is_dir());
        assert_eq!(ctx.metrics.provisions(RESULT_SUCCESS), 1);
    }

    #[tokio::test]
    async fn test_claim_for_other_provisioner_is_skipped() {
        let (ctx, mut handle, tmp) = test_context();

        let server = tokio::spawn(async move {
            let (_, send) = expect_request(
                &mut handle,
                Method::GET,
                "/apis/storage.k8s.io/v1/storageclasses/hostpath",
            )
            .await;
            reply_json(send, StatusCode::OK, storage_class("example.com/nfs"));
        });

        let claim = test_claim(json!({}));
        let (result, served) = tokio::join!(
            reconcile_claim(Arc::new(claim), ctx.clone()),
            server
        );
        served.unwrap();
        assert_eq!(result.unwrap(), Action::await_change());
        assert!(!claim_dir(tmp.path()).exists());
    }

    #[tokio::test]
    async fn test_released_volume_already_gone_counts_as_deleted() {
        let (ctx, mut handle, tmp) = test_context();

        let request = request_from_claim(&annotated_claim(), "pvc-0b8c2f4e".into()).unwrap();
        let volume = ctx.provisioner.provision(request).unwrap();
        assert_eq!(volume.reclaim_policy, ReclaimPolicy::Delete);
        let mut pv = persistent_volume(&volume, PROVISIONER, Some("hostpath"));
        pv.status = Some(PersistentVolumeStatus {
            phase: Some("Released".into()),
            ..Default::default()
        });
        assert!(claim_dir(tmp.path()).is_dir());

        let server = tokio::spawn(async move {
            let (_, send) = expect_request(&mut handle, Method::DELETE, VOLUME_PATH).await;
            reply_json(send, StatusCode::NOT_FOUND, api_status(404, "NotFound"));
        });

        let (result, served) = tokio::join!(
            reconcile_volume(Arc::new(pv), ctx.clone()),
            server
        );
        served.unwrap();
        assert_eq!(result.unwrap(), Action::await_change());
        assert!(!claim_dir(tmp.path()).exists());
        assert_eq!(ctx.metrics.deletions(RESULT_SUCCESS), 1);
    }
}
