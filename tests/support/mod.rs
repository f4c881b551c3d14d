//! In-memory `Storage` implementation shared by the integration tests —
//! a single environment, nodes and classes addressed by dotted name,
//! keyed straight off literal YAML snippets rather than real files.

use reclass_rs::storage::{ClassMappingRule, NodeRef, RawDocument, Storage, StorageError, StorageResult};
use reclass_rs::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStorage {
    nodes: HashMap<String, String>,
    classes: HashMap<String, String>,
    mappings: Vec<ClassMappingRule>,
    class_loads: Mutex<HashMap<String, u32>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn node(mut self, name: &str, yaml: &str) -> Self {
        self.nodes.insert(name.to_string(), yaml.to_string());
        self
    }

    pub fn class(mut self, name: &str, yaml: &str) -> Self {
        self.classes.insert(name.to_string(), yaml.to_string());
        self
    }

    pub fn mapping(mut self, rule: ClassMappingRule) -> Self {
        self.mappings.push(rule);
        self
    }

    /// How many times `get_class` actually parsed `classname` — used to
    /// assert the post-order `seen` set suppresses a revisited class.
    pub fn load_count(&self, classname: &str) -> u32 {
        self.class_loads
            .lock()
            .unwrap()
            .get(classname)
            .copied()
            .unwrap_or(0)
    }

    fn parse(name: &str, yaml: &str) -> Result<Value, StorageError> {
        let raw: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| StorageError::Yaml { uri: name.to_string(), source: e })?;
        Value::from_yaml(raw).map_err(StorageError::Other)
    }
}

impl Storage for MemoryStorage {
    fn nodes(&self, _environment: &str) -> StorageResult<Vec<NodeRef>> {
        Ok(self
            .nodes
            .keys()
            .map(|name| NodeRef {
                name: name.clone(),
                uri: format!("mem:///nodes/{name}.yml"),
                path: name.replace('.', "/"),
            })
            .collect())
    }

    fn get_node(&self, _environment: &str, name: &str) -> StorageResult<RawDocument> {
        let yaml = self
            .nodes
            .get(name)
            .ok_or_else(|| StorageError::NodeNotFound(name.to_string()))?;
        Ok(RawDocument {
            uri: format!("mem:///nodes/{name}.yml"),
            value: Self::parse(name, yaml)?,
            path: name.replace('.', "/"),
        })
    }

    fn get_class(&self, _environment: &str, classname: &str) -> StorageResult<Option<RawDocument>> {
        let Some(yaml) = self.classes.get(classname) else {
            return Ok(None);
        };
        *self.class_loads.lock().unwrap().entry(classname.to_string()).or_insert(0) += 1;
        Ok(Some(RawDocument {
            uri: format!("mem:///classes/{}.yml", classname.replace('.', "/")),
            value: Self::parse(classname, yaml)?,
            path: classname.replace('.', "/"),
        }))
    }

    fn class_mappings(&self, _environment: &str) -> StorageResult<Vec<ClassMappingRule>> {
        Ok(self.mappings.clone())
    }

    fn environments(&self) -> StorageResult<Vec<String>> {
        Ok(vec!["base".to_string()])
    }
}
