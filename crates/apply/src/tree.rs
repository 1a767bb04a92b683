//! Resource tree reconciliation.
//!
//! The tree is loaded from the plane once per session and indexed by full path.
//! [`ResourceTree::upsert`] materializes a path by walking up to the first existing
//! ancestor and creating every missing segment on the way back down.

use async_recursion::async_recursion;
use gantry_core::path::{self, ROOT};
use gantry_plane::{ControlPlane, Resource, RestApi};
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::DeployError;

pub struct ResourceTree {
    api: RestApi,
    container_created: bool,
    nodes: FxHashMap<String, Resource>,
    created: Vec<String>,
}

impl ResourceTree {
    /// Find the container named `name` (creating it when absent) and load its resources.
    pub async fn resolve_container(plane: &dyn ControlPlane, name: &str) -> Result<Self, DeployError> {
        let existing = plane.list_rest_apis().await?.into_iter().find(|api| api.name == name);
        let (api, container_created) = match existing {
            Some(api) => {
                debug!(api = %name, id = %api.id, "found api container");
                (api, false)
            }
            None => {
                let api = plane.create_rest_api(name).await?;
                info!(api = %name, id = %api.id, "created api container");
                (api, true)
            }
        };
        let nodes = plane.list_resources(&api.id).await?;
        debug!(api = %name, resources = nodes.len(), "loaded resource map");
        let mut tree = Self::from_nodes(api, nodes);
        tree.container_created = container_created;
        Ok(tree)
    }

    /// Build a tree from an already known node list.
    pub fn from_nodes(api: RestApi, nodes: impl IntoIterator<Item = Resource>) -> Self {
        let nodes = nodes.into_iter().map(|r| (r.path.clone(), r)).collect();
        Self { api, container_created: false, nodes, created: Vec::new() }
    }

    pub fn api(&self) -> &RestApi { &self.api }

    pub fn container_created(&self) -> bool { self.container_created }

    pub fn get(&self, path: &str) -> Option<&Resource> { self.nodes.get(path) }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Paths created through this tree, in creation order.
    pub fn created(&self) -> &[String] { &self.created }

    /// Ensure `path` exists remotely, creating missing ancestors first.
    #[async_recursion]
    pub async fn upsert(&mut self, plane: &dyn ControlPlane, path: &str) -> Result<Resource, DeployError> {
        let path = path::normalize(path);
        if path == ROOT {
            return self.nodes.get(ROOT).cloned().ok_or(DeployError::MissingRoot);
        }

        let parent_path = path::parent_of(&path);
        let parent = match self.nodes.get(&parent_path).cloned() {
            Some(parent) => parent,
            None => self.upsert(plane, &parent_path).await?,
        };

        if let Some(node) = self.nodes.get(&path) {
            debug!(path = %path, id = %node.id, "resource unchanged");
            return Ok(node.clone());
        }

        let part = path::last_segment(&path).unwrap_or_default().to_string();
        let node = plane.create_resource(&self.api.id, &parent.id, &part).await?;
        info!(path = %path, id = %node.id, parent = %parent.id, "created resource");
        counter!("resources_created_total", 1u64);
        self.created.push(path.clone());
        self.nodes.insert(path, node.clone());
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{ClientConfig, Credentials};
    use gantry_plane::{MemoryPlane, Op};

    fn plane() -> MemoryPlane {
        MemoryPlane::new(ClientConfig { region: "us-east-1".into(), account_id: "1".into(), credentials: Credentials::default() })
    }

    #[tokio::test]
    async fn creates_missing_ancestors_parent_first() {
        let p = plane();
        let mut tree = ResourceTree::resolve_container(&p, "Geddit").await.unwrap();
        assert!(tree.container_created());

        let leaf = tree.upsert(&p, "/a/b/c").await.unwrap();
        assert_eq!(leaf.path, "/a/b/c");
        assert_eq!(tree.created(), &["/a".to_string(), "/a/b".to_string(), "/a/b/c".to_string()]);
        assert_eq!(p.targets_of(Op::CreateResource).len(), 3);

        // siblings reuse the already materialized parents
        tree.upsert(&p, "/a/b/d").await.unwrap();
        assert_eq!(p.count(Op::CreateResource), 4);
        assert_eq!(tree.get("/a/b/d").unwrap().parent_id.as_deref(), Some(tree.get("/a/b").unwrap().id.as_str()));
    }

    #[tokio::test]
    async fn root_must_be_loaded() {
        let p = plane();
        let api = RestApi { id: "x".into(), name: "Geddit".into(), created_at: 0 };
        let mut tree = ResourceTree::from_nodes(api, Vec::new());
        assert!(matches!(tree.upsert(&p, "/").await, Err(DeployError::MissingRoot)));
        assert!(matches!(tree.upsert(&p, "/a").await, Err(DeployError::MissingRoot)));
        assert_eq!(p.count(Op::CreateResource), 0);
    }

    #[tokio::test]
    async fn synthetic_nodes_short_circuit_remote_calls() {
        let p = plane();
        let api = RestApi { id: "x".into(), name: "Geddit".into(), created_at: 0 };
        let nodes = vec![
            Resource { id: "r0".into(), parent_id: None, path: "/".into(), path_part: None },
            Resource { id: "r1".into(), parent_id: Some("r0".into()), path: "/quote".into(), path_part: Some("quote".into()) },
        ];
        let mut tree = ResourceTree::from_nodes(api, nodes);
        let node = tree.upsert(&p, "quote/").await.unwrap();
        assert_eq!(node.id, "r1");
        assert!(p.calls().is_empty());
    }
}
