//! # Subscription Store
//!
//! Reads subscriptions and the objects they reference straight from the API
//! server. Nothing is cached; the controller's own watch keeps the hot path
//! cheap enough.

use crate::constants::FIELD_MANAGER;
use crate::crd::{Channel, NamespacedName, Subscription, SubscriptionStatus};
use crate::provider::SubscriptionStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, key: &NamespacedName, what: &str) -> Result<Option<K>>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name)
            .await
            .with_context(|| format!("failed to get {what} {key}"))
    }
}

#[async_trait]
impl SubscriptionStore for KubeStore {
    async fn get_subscription(&self, key: &NamespacedName) -> Result<Option<Subscription>> {
        self.get_opt(key, "subscription").await
    }

    async fn get_channel(&self, key: &NamespacedName) -> Result<Option<Channel>> {
        self.get_opt(key, "channel").await
    }

    async fn get_secret(&self, key: &NamespacedName) -> Result<Option<Secret>> {
        self.get_opt(key, "secret").await
    }

    async fn get_config_map(&self, key: &NamespacedName) -> Result<Option<ConfigMap>> {
        self.get_opt(key, "config map").await
    }

    async fn update_subscription_status(
        &self,
        key: &NamespacedName,
        status: &SubscriptionStatus,
    ) -> Result<()> {
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &key.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(patch),
        )
        .await
        .with_context(|| format!("failed to update status of subscription {key}"))?;
        debug!(subscription = %key, "Updated subscription status");
        Ok(())
    }
}
