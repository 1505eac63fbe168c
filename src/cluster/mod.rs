/// Cluster flavor registry
///
/// The set of supported local-cluster flavors is an explicit value
/// built at startup and handed to whatever orchestrates provisioning,
/// not a package-level singleton. That keeps the harness and the
/// execution engine testable against fake flavors.
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::kubectl::KubeCmd;
use crate::utils::command::Runner;

/// Selects which flavor `FlavorRegistry::select_from_env` picks.
pub const ENV_K8S_FLAVOR: &str = "KUBEHARNESS_K8S_FLAVOR";

pub const DEFAULT_FLAVOR: &str = "k3d";

/// The operations a cluster flavor must provide to host a test run.
#[async_trait]
pub trait ClusterActions: Send + Sync {
    async fn create_cluster(&self) -> Result<()>;
    async fn delete_cluster(&self) -> Result<()>;
    async fn cluster_exists(&self) -> bool;
    async fn load_image(&self, image: &str) -> Result<()>;
    async fn setup_kubeconfig(&self) -> Result<()>;
    async fn apply_default_storage(&self) -> Result<()>;
    fn describe_env(&self) -> BTreeMap<String, String>;
}

impl std::fmt::Debug for dyn ClusterActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterActions").finish_non_exhaustive()
    }
}

/// Flavor name -> actions, owned by the caller.
pub struct FlavorRegistry {
    flavors: BTreeMap<String, Arc<dyn ClusterActions>>,
}

impl FlavorRegistry {
    pub fn new() -> Self {
        Self {
            flavors: BTreeMap::new(),
        }
    }

    /// Registry preloaded with the built-in flavors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_FLAVOR, Arc::new(K3d::new()));
        registry
    }

    pub fn register(&mut self, name: &str, actions: Arc<dyn ClusterActions>) {
        self.flavors.insert(name.to_string(), actions);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ClusterActions>> {
        self.flavors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.flavors.keys().map(String::as_str).collect()
    }

    pub fn select(&self, name: &str) -> Result<Arc<dyn ClusterActions>> {
        self.get(name).ok_or_else(|| {
            anyhow::anyhow!(
                "Unsupported cluster flavor '{}'; supported: {}",
                name,
                self.names().join(", ")
            )
        })
    }

    /// Select by [`ENV_K8S_FLAVOR`], falling back to the default.
    pub fn select_from_env(&self) -> Result<Arc<dyn ClusterActions>> {
        let name = std::env::var(ENV_K8S_FLAVOR).unwrap_or_else(|_| DEFAULT_FLAVOR.to_string());
        self.select(&name)
    }
}

impl Default for FlavorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

const K3D_CLUSTER_NAME: &str = "k3s-default";
const K3D_CREATE_RETRIES: u32 = 5;

/// k3d-backed local cluster.
pub struct K3d {
    runner: Runner,
    cluster_name: String,
}

impl K3d {
    pub fn new() -> Self {
        Self::with_runner(Runner::new("k3d"))
    }

    pub fn with_runner(runner: Runner) -> Self {
        Self {
            runner,
            cluster_name: K3D_CLUSTER_NAME.to_string(),
        }
    }
}

impl Default for K3d {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterActions for K3d {
    async fn create_cluster(&self) -> Result<()> {
        let cmd = KubeCmd::new("cluster")
            .with_arg("create")
            .with_arg(&self.cluster_name)
            .with_arg("-s")
            .with_arg("6");

        // Docker can be flaky while a cluster comes up; give it a few
        // chances before giving up.
        let mut retries = K3D_CREATE_RETRIES;
        loop {
            match self.runner.exec(&cmd).await {
                Ok(()) => return Ok(()),
                Err(err) if retries > 1 => {
                    retries -= 1;
                    warn!(
                        "k3d failed to create the cluster, {} retries left: {:#}",
                        retries, err
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn delete_cluster(&self) -> Result<()> {
        info!("Deleting k3d cluster {}", self.cluster_name);
        self.runner
            .exec(
                &KubeCmd::new("cluster")
                    .with_arg("delete")
                    .with_arg(&self.cluster_name),
            )
            .await
    }

    async fn cluster_exists(&self) -> bool {
        self.runner
            .exec(
                &KubeCmd::new("cluster")
                    .with_arg("ls")
                    .with_arg(&self.cluster_name),
            )
            .await
            .is_ok()
    }

    async fn load_image(&self, image: &str) -> Result<()> {
        info!("Loading image into k3d: {}", image);
        self.runner
            .exec(&KubeCmd::new("image").with_arg("import").with_arg(image))
            .await
    }

    async fn setup_kubeconfig(&self) -> Result<()> {
        self.runner
            .exec(
                &KubeCmd::new("kubeconfig")
                    .with_arg("merge")
                    .with_arg(&self.cluster_name)
                    .with_arg("--kubeconfig-merge-default"),
            )
            .await
    }

    async fn apply_default_storage(&self) -> Result<()> {
        // k3d ships the local-path provisioner out of the box
        debug!("k3d provides a default storage class; nothing to apply");
        Ok(())
    }

    fn describe_env(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeFlavor {
        creates: AtomicU32,
        deletes: AtomicU32,
    }

    impl FakeFlavor {
        fn new() -> Self {
            Self {
                creates: AtomicU32::new(0),
                deletes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ClusterActions for FakeFlavor {
        async fn create_cluster(&self) -> Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_cluster(&self) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cluster_exists(&self) -> bool {
            self.creates.load(Ordering::SeqCst) > self.deletes.load(Ordering::SeqCst)
        }

        async fn load_image(&self, _image: &str) -> Result<()> {
            Ok(())
        }

        async fn setup_kubeconfig(&self) -> Result<()> {
            Ok(())
        }

        async fn apply_default_storage(&self) -> Result<()> {
            Ok(())
        }

        fn describe_env(&self) -> BTreeMap<String, String> {
            BTreeMap::from([("flavor".to_string(), "fake".to_string())])
        }
    }

    #[tokio::test]
    async fn test_registry_dispatches_to_registered_flavor() {
        let fake = Arc::new(FakeFlavor::new());
        let mut registry = FlavorRegistry::new();
        registry.register("fake", fake.clone());

        let actions = registry.select("fake").unwrap();
        actions.create_cluster().await.unwrap();
        assert!(actions.cluster_exists().await);
        actions.delete_cluster().await.unwrap();
        assert_eq!(fake.creates.load(Ordering::SeqCst), 1);
        assert_eq!(fake.deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_select_unknown_flavor_lists_supported() {
        let mut registry = FlavorRegistry::new();
        registry.register("fake", Arc::new(FakeFlavor::new()));
        let err = registry.select("gke").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gke"));
        assert!(msg.contains("fake"));
    }

    #[test]
    fn test_defaults_include_k3d() {
        let registry = FlavorRegistry::with_defaults();
        assert!(registry.get(DEFAULT_FLAVOR).is_some());
        assert_eq!(registry.names(), vec![DEFAULT_FLAVOR]);
    }

    #[test]
    fn test_select_from_env_override() {
        let mut registry = FlavorRegistry::with_defaults();
        registry.register("fake", Arc::new(FakeFlavor::new()));

        std::env::set_var(ENV_K8S_FLAVOR, "fake");
        let selected = registry.select_from_env();
        std::env::remove_var(ENV_K8S_FLAVOR);

        let actions = selected.unwrap();
        assert_eq!(
            actions.describe_env().get("flavor").map(String::as_str),
            Some("fake")
        );
    }

    #[test]
    fn test_describe_env() {
        let fake = FakeFlavor::new();
        assert_eq!(fake.describe_env().get("flavor").map(String::as_str), Some("fake"));
        assert!(K3d::new().describe_env().is_empty());
    }
}
