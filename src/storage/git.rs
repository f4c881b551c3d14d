//! # Git storage backend
//!
//! Reads nodes and classes straight out of git blobs rather than a working
//! tree, with branches doubling as environments — the "environment" concept
//! maps directly onto a reclass-over-git deployment's branch model. A
//! `parking_lot::Mutex` serializes access to the single `git2::Repository`
//! handle, since libgit2 handles are `Send` but not `Sync`.
//!
//! Grounded on `original_source/reclass/storage/yaml_fs.py`'s document
//! contract (same `RawDocument` shape as `filesystem`), adapted to a git
//! object database the way `filesystem.rs`'s `walkdir`-based traversal
//! adapts to a plain directory.

use super::{parse_mapping_pattern, ClassMappingRule, NodeRef, RawDocument, Storage, StorageError, StorageResult};
use crate::value::Value;
use git2::{Repository, Tree};
use parking_lot::Mutex;
use std::path::PathBuf;

pub struct GitStorage {
    repo: Mutex<Repository>,
    nodes_path: PathBuf,
    classes_path: PathBuf,
    compose_node_name: bool,
}

impl GitStorage {
    pub fn open(
        repo_path: impl AsRef<std::path::Path>,
        nodes_path: impl Into<PathBuf>,
        classes_path: impl Into<PathBuf>,
        compose_node_name: bool,
    ) -> StorageResult<Self> {
        let repo = Repository::open(repo_path)?;
        Ok(GitStorage {
            repo: Mutex::new(repo),
            nodes_path: nodes_path.into(),
            classes_path: classes_path.into(),
            compose_node_name,
        })
    }

    fn branch_tree(&self, repo: &Repository, environment: &str) -> StorageResult<git2::Oid> {
        let reference = repo
            .find_branch(environment, git2::BranchType::Local)
            .map_err(|_| StorageError::Other(format!("unknown environment (branch) '{environment}'")))?;
        let commit = reference.get().peel_to_commit()?;
        Ok(commit.tree()?.id())
    }

    fn walk_yaml<'a>(
        repo: &'a Repository,
        tree: &Tree<'a>,
        prefix: &std::path::Path,
        out: &mut Vec<(PathBuf, git2::Oid)>,
    ) -> StorageResult<()> {
        for entry in tree.iter() {
            let name = match entry.name() {
                Some(n) => n,
                None => continue,
            };
            let rel = prefix.join(name);
            match entry.kind() {
                Some(git2::ObjectType::Tree) => {
                    let subtree = entry.to_object(repo)?.peel_to_tree()?;
                    Self::walk_yaml(repo, &subtree, &rel, out)?;
                }
                Some(git2::ObjectType::Blob) => {
                    if rel.extension().and_then(|e| e.to_str()) == Some("yml")
                        || rel.extension().and_then(|e| e.to_str()) == Some("yaml")
                    {
                        out.push((rel, entry.id()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn load_blob(&self, repo: &Repository, oid: git2::Oid, uri: &str) -> StorageResult<Value> {
        let blob = repo.find_blob(oid)?;
        let text = std::str::from_utf8(blob.content())
            .map_err(|e| StorageError::Other(format!("{uri}: not valid UTF-8: {e}")))?;
        let raw: serde_yaml::Value = serde_yaml::from_str(text).map_err(|source| StorageError::Yaml {
            uri: uri.to_string(),
            source,
        })?;
        Value::from_yaml(raw).map_err(StorageError::Other)
    }

    fn node_name_for(&self, rel: &std::path::Path) -> String {
        let stem = Self::stem(rel);
        if self.compose_node_name {
            stem.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(".")
        } else {
            stem.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        }
    }

    /// Slash-separated storage path, minus extension — see
    /// `RawDocument::path`.
    fn node_path_for(&self, rel: &std::path::Path) -> String {
        Self::stem(rel)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn stem(rel: &std::path::Path) -> PathBuf {
        let mut stem = rel.to_path_buf();
        stem.set_extension("");
        stem
    }
}

impl Storage for GitStorage {
    fn nodes(&self, environment: &str) -> StorageResult<Vec<NodeRef>> {
        let repo = self.repo.lock();
        let tree_id = self.branch_tree(&repo, environment)?;
        let tree = repo.find_tree(tree_id)?;
        let subtree_entry = tree.get_path(&self.nodes_path);
        let subtree = match subtree_entry {
            Ok(entry) => entry.to_object(&repo)?.peel_to_tree()?,
            Err(_) => return Ok(Vec::new()),
        };
        let mut found = Vec::new();
        Self::walk_yaml(&repo, &subtree, std::path::Path::new(""), &mut found)?;
        Ok(found
            .into_iter()
            .map(|(rel, oid)| NodeRef {
                name: self.node_name_for(&rel),
                uri: format!("git://{environment}/{}/{}", self.nodes_path.display(), rel.display()),
                path: self.node_path_for(&rel),
                // keep oid reachable via a second lookup in get_node; URIs stay human readable
            })
            .collect())
    }

    fn get_node(&self, environment: &str, name: &str) -> StorageResult<RawDocument> {
        let repo = self.repo.lock();
        let tree_id = self.branch_tree(&repo, environment)?;
        let tree = repo.find_tree(tree_id)?;
        let subtree_entry = tree
            .get_path(&self.nodes_path)
            .map_err(|_| StorageError::NodeNotFound(name.to_string()))?;
        let subtree = subtree_entry.to_object(&repo)?.peel_to_tree()?;
        let mut found = Vec::new();
        Self::walk_yaml(&repo, &subtree, std::path::Path::new(""), &mut found)?;
        for (rel, oid) in found {
            if self.node_name_for(&rel) == name {
                let uri = format!("git://{environment}/{}/{}", self.nodes_path.display(), rel.display());
                let value = self.load_blob(&repo, oid, &uri)?;
                return Ok(RawDocument {
                    uri,
                    value,
                    path: self.node_path_for(&rel),
                });
            }
        }
        Err(StorageError::NodeNotFound(name.to_string()))
    }

    fn get_class(&self, environment: &str, classname: &str) -> StorageResult<Option<RawDocument>> {
        let repo = self.repo.lock();
        let tree_id = self.branch_tree(&repo, environment)?;
        let tree = repo.find_tree(tree_id)?;
        let parts: Vec<&str> = classname.split('.').collect();
        for candidate in class_candidates(&self.classes_path, &parts) {
            if let Ok(entry) = tree.get_path(&candidate) {
                if let Ok(blob) = entry.to_object(&repo)?.peel_to_blob() {
                    let uri = format!("git://{environment}/{}", candidate.display());
                    let value = self.load_blob(&repo, blob.id(), &uri)?;
                    return Ok(Some(RawDocument {
                        uri,
                        value,
                        path: classname.replace('.', "/"),
                    }));
                }
            }
        }
        Ok(None)
    }

    fn class_mappings(&self, environment: &str) -> StorageResult<Vec<ClassMappingRule>> {
        let repo = self.repo.lock();
        let tree_id = self.branch_tree(&repo, environment)?;
        let tree = repo.find_tree(tree_id)?;
        let path = PathBuf::from("class_mappings.yml");
        let entry = match tree.get_path(&path) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };
        let blob = entry.to_object(&repo)?.peel_to_blob()?;
        let uri = format!("git://{environment}/class_mappings.yml");
        let value = self.load_blob(&repo, blob.id(), &uri)?;
        let map = value.as_map().cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(map.len());
        for (pattern, classes) in map {
            let classes = classes
                .as_list()
                .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            out.push(ClassMappingRule { pattern: parse_mapping_pattern(&pattern)?, classes });
        }
        Ok(out)
    }

    fn environments(&self) -> StorageResult<Vec<String>> {
        let repo = self.repo.lock();
        let mut out = Vec::new();
        for branch in repo.branches(Some(git2::BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }
}

fn class_candidates(classes_path: &std::path::Path, parts: &[&str]) -> Vec<PathBuf> {
    let mut base = classes_path.to_path_buf();
    for part in parts {
        base.push(part);
    }
    let mut out = Vec::new();
    for ext in ["yml", "yaml"] {
        let mut flat = base.clone();
        flat.set_extension(ext);
        out.push(flat);
        out.push(base.join(format!("init.{ext}")));
    }
    out
}
