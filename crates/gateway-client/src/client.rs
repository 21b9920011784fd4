//! kube-backed gateway client

use crate::error::GatewayError;
use crate::gateway_trait::GatewayClientTrait;
use crds::{ApiExposure, Policy, VirtualService};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Gateway client talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeGatewayClient {
    client: Client,
}

impl std::fmt::Debug for KubeGatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeGatewayClient").finish_non_exhaustive()
    }
}

impl KubeGatewayClient {
    /// Wrap an existing kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster config or the local kubeconfig.
    pub async fn try_default() -> Result<Self, GatewayError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// The underlying kube client, shared with watchers.
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn describe<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> String {
    format!("{} {}/{}", K::kind(&()), namespace, name)
}

async fn get_object<K>(api: &Api<K>, namespace: &str, name: &str) -> Result<Option<K>, GatewayError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    api.get_opt(name)
        .await
        .map_err(|e| GatewayError::from_kube(e, describe::<K>(namespace, name)))
}

async fn create_object<K>(api: &Api<K>, object: &K) -> Result<K, GatewayError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
{
    let what = describe::<K>(&object.namespace().unwrap_or_default(), &object.name_any());
    debug!("Creating {}", what);
    api.create(&PostParams::default(), object)
        .await
        .map_err(|e| GatewayError::from_kube(e, what))
}

async fn replace_object<K>(api: &Api<K>, object: &K) -> Result<K, GatewayError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = object.name_any();
    let what = describe::<K>(&object.namespace().unwrap_or_default(), &name);
    debug!("Replacing {} at resourceVersion {:?}", what, object.resource_version());
    api.replace(&name, &PostParams::default(), object)
        .await
        .map_err(|e| GatewayError::from_kube(e, what))
}

async fn delete_object<K>(api: &Api<K>, namespace: &str, name: &str) -> Result<(), GatewayError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    debug!("Deleting {}", describe::<K>(namespace, name));
    api.delete(name, &DeleteParams::default())
        .await
        .map(|_| ())
        .map_err(|e| GatewayError::from_kube(e, describe::<K>(namespace, name)))
}

#[async_trait::async_trait]
impl GatewayClientTrait for KubeGatewayClient {
    async fn get_api_exposure(&self, namespace: &str, name: &str) -> Result<Option<ApiExposure>, GatewayError> {
        get_object(&self.namespaced::<ApiExposure>(namespace), namespace, name).await
    }

    async fn update_api_exposure_status(&self, exposure: &ApiExposure) -> Result<ApiExposure, GatewayError> {
        let namespace = exposure.namespace().unwrap_or_default();
        let name = exposure.name_any();
        // resourceVersion in a merge patch is an optimistic-lock precondition
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": exposure.resource_version() },
            "status": exposure.status,
        });
        self.namespaced::<ApiExposure>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| GatewayError::from_kube(e, describe::<ApiExposure>(&namespace, &name)))
    }

    async fn get_virtual_service(&self, namespace: &str, name: &str) -> Result<Option<VirtualService>, GatewayError> {
        get_object(&self.namespaced::<VirtualService>(namespace), namespace, name).await
    }

    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>, GatewayError> {
        let api: Api<VirtualService> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_virtual_service(&self, virtual_service: &VirtualService) -> Result<VirtualService, GatewayError> {
        let namespace = virtual_service.namespace().unwrap_or_default();
        create_object(&self.namespaced::<VirtualService>(&namespace), virtual_service).await
    }

    async fn update_virtual_service(&self, virtual_service: &VirtualService) -> Result<VirtualService, GatewayError> {
        let namespace = virtual_service.namespace().unwrap_or_default();
        replace_object(&self.namespaced::<VirtualService>(&namespace), virtual_service).await
    }

    async fn delete_virtual_service(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        delete_object(&self.namespaced::<VirtualService>(namespace), namespace, name).await
    }

    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<Policy>, GatewayError> {
        get_object(&self.namespaced::<Policy>(namespace), namespace, name).await
    }

    async fn create_policy(&self, policy: &Policy) -> Result<Policy, GatewayError> {
        let namespace = policy.namespace().unwrap_or_default();
        create_object(&self.namespaced::<Policy>(&namespace), policy).await
    }

    async fn update_policy(&self, policy: &Policy) -> Result<Policy, GatewayError> {
        let namespace = policy.namespace().unwrap_or_default();
        replace_object(&self.namespaced::<Policy>(&namespace), policy).await
    }

    async fn delete_policy(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        delete_object(&self.namespaced::<Policy>(namespace), namespace, name).await
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, GatewayError> {
        get_object(&self.namespaced::<Ingress>(namespace), namespace, name).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError> {
        let namespace = ingress.namespace().unwrap_or_default();
        create_object(&self.namespaced::<Ingress>(&namespace), ingress).await
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError> {
        let namespace = ingress.namespace().unwrap_or_default();
        replace_object(&self.namespaced::<Ingress>(&namespace), ingress).await
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        delete_object(&self.namespaced::<Ingress>(namespace), namespace, name).await
    }
}
