//! Access level decisions for a resolved identity

use super::{AccessLevel, Identity};
use crate::error::{ServiceError, ServiceResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

pub trait Authorizer: Send + Sync {
    /// Effective level of `identity` on `dataset`; without a dataset, the
    /// highest level held on any dataset
    fn level(&self, identity: &Identity, dataset: Option<&str>) -> AccessLevel;
}

/// Levels derived from the identity service's per-dataset role tokens
#[derive(Debug, Clone, Default)]
pub struct PermissionAuthorizer {
    dataset_map: HashMap<String, String>,
}

impl PermissionAuthorizer {
    pub fn new(dataset_map: HashMap<String, String>) -> Self {
        Self { dataset_map }
    }

    /// Identity-service slug of a dataset: configured mapping, else the
    /// name without its `:tag` suffix
    pub fn slug<'a>(&'a self, dataset: &'a str) -> &'a str {
        if let Some(slug) = self.dataset_map.get(dataset) {
            return slug;
        }
        match dataset.split_once(':') {
            Some((base, _)) => base,
            None => dataset,
        }
    }
}

impl Authorizer for PermissionAuthorizer {
    fn level(&self, identity: &Identity, dataset: Option<&str>) -> AccessLevel {
        if identity.admin {
            return AccessLevel::Admin;
        }
        match dataset {
            Some(dataset) => AccessLevel::from_roles(identity.roles_for(self.slug(dataset))),
            None => identity
                .permissions_v2
                .values()
                .map(AccessLevel::from_roles)
                .max()
                .unwrap_or_default(),
        }
    }
}

/// Levels read from a JSON file mapping email to role string
///
/// The file is re-read when a caller is missing from it.
pub struct FileAuthorizer {
    path: PathBuf,
    users: RwLock<HashMap<String, String>>,
}

fn load_users(path: &Path) -> ServiceResult<HashMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| ServiceError::config(format!("{} cannot be read", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| ServiceError::config(format!("{} is not a valid auth file: {}", path.display(), e)))
}

impl FileAuthorizer {
    pub fn open(path: impl Into<PathBuf>) -> ServiceResult<Self> {
        let path = path.into();
        let users = load_users(&path)?;
        info!(path = %path.display(), users = users.len(), "loaded auth file");
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    fn role(&self, email: &str) -> Option<String> {
        let known = self
            .users
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(email)
            .cloned();
        if known.is_some() {
            return known;
        }

        match load_users(&self.path) {
            Ok(fresh) => {
                let role = fresh.get(email).cloned();
                *self.users.write().unwrap_or_else(|p| p.into_inner()) = fresh;
                role
            }
            Err(err) => {
                warn!(error = %err, "failed to reload auth file");
                None
            }
        }
    }
}

impl Authorizer for FileAuthorizer {
    fn level(&self, identity: &Identity, _dataset: Option<&str>) -> AccessLevel {
        let Some(role) = self.role(&identity.email) else {
            return AccessLevel::None;
        };
        role.parse().unwrap_or_else(|err: ServiceError| {
            warn!(email = %identity.email, error = %err, "unknown role in auth file");
            AccessLevel::None
        })
    }
}
