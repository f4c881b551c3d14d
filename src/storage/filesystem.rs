//! # Filesystem storage backend
//!
//! Nodes and classes laid out as a directory tree of YAML documents, the
//! conventional reclass layout: `nodes/**/*.yml` and
//! `classes/**/*.yml` (or `classes/foo/bar/init.yml` for a class with
//! children, mirroring a Python package `__init__.py`). Class-mappings
//! rules live in an optional `class_mappings.yml` at the
//! storage root, each entry a glob or `/regex/` pattern mapped to a list of
//! classes to prepend.
//!
//! Grounded on `original_source/reclass/storage/yaml_fs.py`'s node/class
//! path resolution, reimplemented with `walkdir` instead of `os.walk`.

use super::{parse_mapping_pattern, ClassMappingRule, NodeRef, RawDocument, Storage, StorageError, StorageResult};
use crate::value::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct FilesystemStorage {
    nodes_dir: PathBuf,
    classes_dir: PathBuf,
    environment: String,
    compose_node_name: bool,
}

impl FilesystemStorage {
    pub fn new(
        nodes_dir: impl Into<PathBuf>,
        classes_dir: impl Into<PathBuf>,
        environment: impl Into<String>,
        compose_node_name: bool,
    ) -> Self {
        FilesystemStorage {
            nodes_dir: nodes_dir.into(),
            classes_dir: classes_dir.into(),
            environment: environment.into(),
            compose_node_name,
        }
    }

    fn is_yaml(entry: &walkdir::DirEntry) -> bool {
        entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yml" || e == "yaml")
            .unwrap_or(false)
    }

    fn node_name_for(&self, root: &Path, path: &Path) -> String {
        let stem = Self::relative_stem(root, path);
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

    /// Slash-separated storage path relative to `root`, minus extension —
    /// used for `class_mappings_match_path`, independent of
    /// `compose_node_name`'s dotted display name.
    fn node_path_for(&self, root: &Path, path: &Path) -> String {
        Self::relative_stem(root, path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn relative_stem(root: &Path, path: &Path) -> PathBuf {
        let rel = path.strip_prefix(root).unwrap_or(path);
        let mut stem = rel.to_path_buf();
        stem.set_extension("");
        stem
    }

    fn load(&self, path: &Path) -> StorageResult<Value> {
        let text = std::fs::read_to_string(path)?;
        let raw: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|source| StorageError::Yaml {
            uri: path.display().to_string(),
            source,
        })?;
        Value::from_yaml(raw).map_err(StorageError::Other)
    }

    /// Resolve a dotted class name to a file path, trying both `foo/bar.yml`
    /// and the package-style `foo/bar/init.yml`.
    fn class_path(&self, classname: &str) -> Option<PathBuf> {
        let parts: Vec<&str> = classname.split('.').collect();
        let mut flat = self.classes_dir.clone();
        for (i, part) in parts.iter().enumerate() {
            if i + 1 == parts.len() {
                flat.push(part);
            } else {
                flat.push(part);
            }
        }
        for ext in ["yml", "yaml"] {
            let mut candidate = flat.clone();
            candidate.set_extension(ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        for ext in ["yml", "yaml"] {
            let candidate = flat.join(format!("init.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Storage for FilesystemStorage {
    fn nodes(&self, environment: &str) -> StorageResult<Vec<NodeRef>> {
        if environment != self.environment {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.nodes_dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() || !Self::is_yaml(&entry) {
                continue;
            }
            out.push(NodeRef {
                name: self.node_name_for(&self.nodes_dir, entry.path()),
                uri: entry.path().display().to_string(),
                path: self.node_path_for(&self.nodes_dir, entry.path()),
            });
        }
        Ok(out)
    }

    fn get_node(&self, environment: &str, name: &str) -> StorageResult<RawDocument> {
        for node in self.nodes(environment)? {
            if node.name == name {
                let value = self.load(Path::new(&node.uri))?;
                return Ok(RawDocument {
                    uri: node.uri,
                    value,
                    path: node.path,
                });
            }
        }
        Err(StorageError::NodeNotFound(name.to_string()))
    }

    fn get_class(&self, environment: &str, classname: &str) -> StorageResult<Option<RawDocument>> {
        if environment != self.environment {
            return Ok(None);
        }
        match self.class_path(classname) {
            Some(path) => {
                let value = self.load(&path)?;
                Ok(Some(RawDocument {
                    uri: path.display().to_string(),
                    value,
                    path: classname.replace('.', "/"),
                }))
            }
            None => Ok(None),
        }
    }

    fn class_mappings(&self, environment: &str) -> StorageResult<Vec<ClassMappingRule>> {
        if environment != self.environment {
            return Ok(Vec::new());
        }
        let path = self.classes_dir.parent().unwrap_or(&self.classes_dir).join("class_mappings.yml");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let value = self.load(&path)?;
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
        Ok(vec![self.environment.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_and_loads_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = dir.path().join("nodes");
        let classes = dir.path().join("classes");
        fs::create_dir_all(&nodes).unwrap();
        fs::create_dir_all(&classes).unwrap();
        fs::write(nodes.join("web1.yml"), "classes:\n  - role.web\nparameters:\n  a: 1\n").unwrap();

        let storage = FilesystemStorage::new(&nodes, &classes, "base", false);
        let refs = storage.nodes("base").unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "web1");

        let doc = storage.get_node("base", "web1").unwrap();
        assert!(doc.value.as_map().is_some());
    }

    #[test]
    fn resolves_dotted_class_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = dir.path().join("nodes");
        let classes = dir.path().join("classes");
        fs::create_dir_all(&nodes).unwrap();
        fs::create_dir_all(classes.join("role")).unwrap();
        fs::write(classes.join("role").join("web.yml"), "parameters:\n  port: 80\n").unwrap();

        let storage = FilesystemStorage::new(&nodes, &classes, "base", false);
        let doc = storage.get_class("base", "role.web").unwrap().unwrap();
        assert_eq!(
            doc.value.as_map().unwrap().get("port"),
            Some(&Value::Int(80))
        );
    }
}
