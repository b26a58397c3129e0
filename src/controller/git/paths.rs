//! # Path Resolution
//!
//! Where inside a clone the resources (and the hook templates) of a
//! subscription live. Resolution walks an ordered list of strategies and takes
//! the first non-empty answer; the repository root is the fallback.

use crate::constants::{ANNOTATION_GITHUB_PATH, ANNOTATION_GIT_PATH, CONFIG_MAP_KEY_PATH};
use crate::crd::Subscription;
use anyhow::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use std::path::{Component, Path, PathBuf};

/// Inputs available to path strategies
#[derive(Debug, Clone, Copy)]
pub struct PathContext<'a> {
    pub subscription: &'a Subscription,
    /// Config map named by `packageFilter.filterRef`, when it exists
    pub filter_config: Option<&'a ConfigMap>,
}

/// One path strategy, named for logging
pub type PathResolver = (&'static str, fn(&PathContext<'_>) -> Option<String>);

/// Resource path strategies in priority order
pub const RESOURCE_PATH_RESOLVERS: &[PathResolver] = &[
    ("github-path annotation", github_path_annotation),
    ("git-path annotation", git_path_annotation),
    ("filter config map", filter_config_path),
];

/// Base directory of the `prehook`/`posthook` folders
pub const HOOK_PATH_RESOLVERS: &[PathResolver] = &[
    ("github-path annotation", github_path_annotation),
    ("git-path annotation", git_path_annotation),
];

fn github_path_annotation(ctx: &PathContext<'_>) -> Option<String> {
    ctx.subscription
        .annotation(ANNOTATION_GITHUB_PATH)
        .map(str::to_string)
}

fn git_path_annotation(ctx: &PathContext<'_>) -> Option<String> {
    ctx.subscription
        .annotation(ANNOTATION_GIT_PATH)
        .map(str::to_string)
}

fn filter_config_path(ctx: &PathContext<'_>) -> Option<String> {
    ctx.filter_config
        .and_then(|cm| cm.data.as_ref())
        .and_then(|data| data.get(CONFIG_MAP_KEY_PATH))
        .cloned()
}

/// First non-empty answer from `resolvers`, with its strategy name
#[must_use]
pub fn resolve_relative_path(
    resolvers: &[PathResolver],
    ctx: &PathContext<'_>,
) -> Option<(&'static str, String)> {
    resolvers.iter().find_map(|(name, resolve)| {
        resolve(ctx)
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .map(|path| (*name, path))
    })
}

/// Join `relative` onto `root`, refusing paths that could leave the clone
pub fn join_within(root: &Path, relative: Option<&str>) -> Result<PathBuf> {
    let Some(relative) = relative.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(root.to_path_buf());
    };

    if relative.contains('\0') {
        return Err(anyhow::anyhow!("path '{relative}' cannot contain null bytes"));
    }

    let mut joined = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow::anyhow!(
                    "path '{relative}' must be relative and stay inside the repository"
                ));
            }
        }
    }
    Ok(joined)
}
