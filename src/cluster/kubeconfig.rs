use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kube::config::Kubeconfig;

use crate::error::{Error, Result};
use crate::models::k8s::ClusterContext;

// ── helpers ───────────────────────────────────────────────────────────────────

/// Expands a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Merges `extra` into `base` by extending clusters, auth_infos, and contexts.
/// `base.current_context` wins; `extra.current_context` is used only if base has none.
fn merge_kubeconfig(mut base: Kubeconfig, extra: Kubeconfig) -> Kubeconfig {
    base.clusters.extend(extra.clusters);
    base.auth_infos.extend(extra.auth_infos);
    base.contexts.extend(extra.contexts);
    if base.current_context.is_none() {
        base.current_context = extra.current_context;
    }
    base
}

/// Returns all regular, non-hidden files in `dir`, sorted alphabetically.
fn scan_kube_dir(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("kubeconfig: cannot read directory {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        // cache/, http-cache/ and friends
        .filter(|path| !path.is_dir())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            !name.starts_with('.')
        })
        .collect();

    paths.sort();
    paths
}

/// Tries to load each path as a kubeconfig and merges all that succeed.
fn load_from_paths(paths: &[PathBuf]) -> Option<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;

    for path in paths {
        match Kubeconfig::read_from(path) {
            Ok(cfg) => {
                log::info!(
                    "kubeconfig: ok   ({} context(s))   — {}",
                    cfg.contexts.len(),
                    path.display()
                );
                merged = Some(match merged.take() {
                    None => cfg,
                    Some(base) => merge_kubeconfig(base, cfg),
                });
            }
            Err(e) => {
                // Not a kubeconfig; expected when scanning everything in ~/.kube
                log::debug!("kubeconfig: skip (parse error: {e}) — {}", path.display());
            }
        }
    }

    merged
}

// ── loading ───────────────────────────────────────────────────────────────────

/// Loads the kubeconfig the run should connect with.
///
/// Resolution order:
/// 1. An explicit `path` is read as-is (with `~` expanded).
/// 2. If KUBECONFIG is set, `Kubeconfig::read()` merges every listed file with
///    the same semantics as kubectl.
/// 3. Otherwise every regular file in ~/.kube is tried and all valid ones are
///    merged, so a config dropped next to `config` is picked up too.
pub fn load_kubeconfig(path: Option<&Path>) -> Result<Kubeconfig> {
    if let Some(path) = path {
        let path = expand_home(path);
        log::info!("kubeconfig: reading {}", path.display());
        return Kubeconfig::read_from(&path)
            .map_err(|e| Error::kubeconfig(format!("{}: {e}", path.display())));
    }

    let kube_env = std::env::var("KUBECONFIG").unwrap_or_default();
    if !kube_env.is_empty() {
        log::info!("kubeconfig: KUBECONFIG env = {kube_env:?}");
        return Kubeconfig::read().map_err(|e| Error::kubeconfig(e.to_string()));
    }

    let home = dirs::home_dir()
        .ok_or_else(|| Error::kubeconfig("cannot determine home directory"))?;
    discover_in(&home.join(".kube"))
}

/// Merges every kubeconfig found directly inside `dir`.
pub fn discover_in(dir: &Path) -> Result<Kubeconfig> {
    let candidates = scan_kube_dir(dir);
    log::info!(
        "kubeconfig: {} candidate file(s) in {}",
        candidates.len(),
        dir.display()
    );

    load_from_paths(&candidates).ok_or_else(|| {
        Error::kubeconfig(format!("no valid kubeconfig files found in {}", dir.display()))
    })
}

/// Describes the context a client built from `kubeconfig` will use.
pub fn current_context(kubeconfig: &Kubeconfig) -> Option<ClusterContext> {
    let current = kubeconfig.current_context.as_deref()?;

    // cluster-name → server-URL lookup from the clusters stanza
    let cluster_servers: HashMap<&str, &str> = kubeconfig
        .clusters
        .iter()
        .filter_map(|nc| {
            let server = nc.cluster.as_ref()?.server.as_deref()?;
            Some((nc.name.as_str(), server))
        })
        .collect();

    let named = kubeconfig.contexts.iter().find(|c| c.name == current)?;
    let ctx = named.context.as_ref()?;
    Some(ClusterContext {
        name: named.name.clone(),
        cluster: ctx.cluster.clone(),
        user: ctx.user.clone().unwrap_or_default(),
        namespace: ctx.namespace.clone(),
        server_url: cluster_servers.get(ctx.cluster.as_str()).map(|s| s.to_string()),
    })
}
