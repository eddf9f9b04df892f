//! Registry of the API types this process works with.
//!
//! Built once at startup and shared (behind `Arc`) by the manager and the
//! client bootstrap, which checks that the cluster serves every entry.

use std::collections::BTreeMap;

use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Pod};
use kube::core::ApiResource;
use kube::Resource;

use crate::k8s::SchemeError;

/// API group of Argo workflows.
pub const WORKFLOW_GROUP: &str = "argoproj.io";
pub const WORKFLOW_VERSION: &str = "v1alpha1";
pub const WORKFLOW_KIND: &str = "Workflow";

/// The Argo `Workflow` custom resource.
pub fn workflow_resource() -> ApiResource {
    ApiResource {
        group: WORKFLOW_GROUP.to_string(),
        version: WORKFLOW_VERSION.to_string(),
        api_version: format!("{}/{}", WORKFLOW_GROUP, WORKFLOW_VERSION),
        kind: WORKFLOW_KIND.to_string(),
        plural: "workflows".to_string(),
    }
}

/// API types keyed by (group, kind).
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    types: BTreeMap<(String, String), ApiResource>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in types the manager needs plus Argo workflows.
    pub fn with_defaults() -> Result<Self, SchemeError> {
        let mut scheme = Self::new();
        scheme.register_type::<Pod>()?;
        scheme.register_type::<ConfigMap>()?;
        scheme.register_type::<Event>()?;
        scheme.register_type::<Lease>()?;
        scheme.register(workflow_resource())?;
        Ok(scheme)
    }

    /// Register a statically typed resource.
    pub fn register_type<K>(&mut self) -> Result<(), SchemeError>
    where
        K: Resource<DynamicType = ()>,
    {
        self.register(ApiResource::erase::<K>(&()))
    }

    /// Register a resource. Re-registering an identical entry is a no-op; a
    /// different version or plural for a known kind is a conflict.
    pub fn register(&mut self, resource: ApiResource) -> Result<(), SchemeError> {
        let key = (resource.group.clone(), resource.kind.clone());
        if let Some(existing) = self.types.get(&key) {
            if existing.api_version == resource.api_version && existing.plural == resource.plural {
                return Ok(());
            }
            return Err(SchemeError::Conflict {
                existing: describe(existing),
                requested: describe(&resource),
                kind: resource.kind,
            });
        }
        self.types.insert(key, resource);
        Ok(())
    }

    pub fn get(&self, group: &str, kind: &str) -> Option<&ApiResource> {
        self.types.get(&(group.to_string(), kind.to_string()))
    }

    /// Registered resources grouped by `apiVersion`.
    pub fn by_api_version(&self) -> BTreeMap<&str, Vec<&ApiResource>> {
        let mut grouped: BTreeMap<&str, Vec<&ApiResource>> = BTreeMap::new();
        for resource in self.types.values() {
            grouped.entry(resource.api_version.as_str()).or_default().push(resource);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn describe(resource: &ApiResource) -> String {
    format!("{} ({})", resource.api_version, resource.plural)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_core_and_workflows() {
        let scheme = Scheme::with_defaults().unwrap();
        assert_eq!(scheme.len(), 5);
        assert_eq!(scheme.get("", "Pod").unwrap().plural, "pods");
        assert_eq!(scheme.get("coordination.k8s.io", "Lease").unwrap().api_version, "coordination.k8s.io/v1");
        assert_eq!(scheme.get(WORKFLOW_GROUP, WORKFLOW_KIND).unwrap().plural, "workflows");

        let grouped = scheme.by_api_version();
        assert_eq!(grouped["v1"].len(), 3);
        assert_eq!(grouped["argoproj.io/v1alpha1"].len(), 1);
    }

    #[test]
    fn test_identical_registration_is_idempotent() {
        let mut scheme = Scheme::new();
        scheme.register_type::<Pod>().unwrap();
        scheme.register_type::<Pod>().unwrap();
        assert_eq!(scheme.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_fails() {
        let mut scheme = Scheme::new();
        scheme.register(workflow_resource()).unwrap();

        let mut other = workflow_resource();
        other.version = "v1".into();
        other.api_version = "argoproj.io/v1".into();

        let err = scheme.register(other).unwrap_err();
        match err {
            SchemeError::Conflict { kind, existing, requested } => {
                assert_eq!(kind, "Workflow");
                assert_eq!(existing, "argoproj.io/v1alpha1 (workflows)");
                assert_eq!(requested, "argoproj.io/v1 (workflows)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(scheme.get(WORKFLOW_GROUP, WORKFLOW_KIND).unwrap().version, "v1alpha1");
    }
}
