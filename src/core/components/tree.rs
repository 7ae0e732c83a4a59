use log::debug;
use std::collections::HashMap;

use super::traits::{Component, Container};
use super::typed_value::ValueStore;
use crate::core::error::{SimError, SimResult};
use crate::core::types::ComponentKey;

/// Separator between the segments of a hierarchical name
pub const NAME_SEPARATOR: char = '.';

/// One node of the component tree
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) parent: Option<ComponentKey>,
    pub(crate) children: Vec<ComponentKey>,
    /// `None` while the component is out running one of its hooks
    pub(crate) component: Option<Box<dyn Component>>,
    pub(crate) container: bool,
    pub(crate) initialized: bool,
    pub(crate) started: bool,
    pub(crate) values: ValueStore,
}

/// Arena holding the component tree. Parents own their children by key;
/// the parent link is a plain back-reference.
pub(crate) struct ComponentTree {
    nodes: HashMap<ComponentKey, Node>,
    root: ComponentKey,
    next_key: u64,
}

impl ComponentTree {
    pub(crate) fn new(root_name: &str) -> Self {
        let root = ComponentKey(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                name: root_name.to_string(),
                parent: None,
                children: Vec::new(),
                component: Some(Box::new(Container)),
                container: true,
                initialized: false,
                started: false,
                values: ValueStore::new(),
            },
        );
        Self {
            nodes,
            root,
            next_key: 1,
        }
    }

    pub(crate) fn root(&self) -> ComponentKey {
        self.root
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, key: ComponentKey) -> SimResult<&Node> {
        self.nodes
            .get(&key)
            .ok_or_else(|| SimError::ComponentNotFound(format!("{:?}", key)))
    }

    pub(crate) fn node_mut(&mut self, key: ComponentKey) -> SimResult<&mut Node> {
        self.nodes
            .get_mut(&key)
            .ok_or_else(|| SimError::ComponentNotFound(format!("{:?}", key)))
    }

    /// Attach `component` as the last child of `parent`
    pub(crate) fn insert(
        &mut self,
        parent: ComponentKey,
        name: &str,
        component: Box<dyn Component>,
    ) -> SimResult<ComponentKey> {
        if name.is_empty() || name.contains(NAME_SEPARATOR) {
            return Err(SimError::illegal_state(format!(
                "invalid component name '{}'",
                name
            )));
        }
        let parent_name = self.hierarchical_name(parent)?;
        let parent_node = self.node(parent)?;
        if !parent_node.container {
            return Err(SimError::NotAContainer(parent_name));
        }
        let duplicate = parent_node
            .children
            .iter()
            .filter_map(|k| self.nodes.get(k))
            .any(|n| n.name == name);
        if duplicate {
            return Err(SimError::DuplicateName {
                parent: parent_name,
                name: name.to_string(),
            });
        }

        let key = ComponentKey(self.next_key);
        self.next_key += 1;
        let container = component.is_container();
        self.nodes.insert(
            key,
            Node {
                name: name.to_string(),
                parent: Some(parent),
                children: Vec::new(),
                component: Some(component),
                container,
                initialized: false,
                started: false,
                values: ValueStore::new(),
            },
        );
        self.node_mut(parent)?.children.push(key);
        debug!("Attached component '{}{}{}'", parent_name, NAME_SEPARATOR, name);
        Ok(key)
    }

    /// Remove `key` and its whole subtree, returning the node's own component.
    ///
    /// Descendants are dropped. `None` is returned if the component is busy in a hook.
    pub(crate) fn remove(&mut self, key: ComponentKey) -> SimResult<Option<Box<dyn Component>>> {
        if key == self.root {
            return Err(SimError::illegal_state("the root component cannot be detached"));
        }
        let parent = self.node(key)?.parent;
        if let Some(parent) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|k| *k != key);
            }
        }

        let mut stack = vec![key];
        let mut detached = None;
        while let Some(k) = stack.pop() {
            if let Some(node) = self.nodes.remove(&k) {
                stack.extend(node.children.iter().copied());
                if k == key {
                    detached = node.component;
                }
            }
        }
        Ok(detached)
    }

    pub(crate) fn hierarchical_name(&self, key: ComponentKey) -> SimResult<String> {
        let mut segments = Vec::new();
        let mut current = Some(key);
        while let Some(k) = current {
            let node = self.node(k)?;
            segments.push(node.name.as_str());
            current = node.parent;
        }
        segments.reverse();
        Ok(segments.join(&NAME_SEPARATOR.to_string()))
    }

    /// Resolve a dotted path, either a full hierarchical name starting with
    /// the root's name or a path relative to the root. The empty path is the root.
    pub(crate) fn find(&self, path: &str) -> Option<ComponentKey> {
        if path.is_empty() {
            return Some(self.root);
        }
        let root_name = self.nodes.get(&self.root)?.name.as_str();
        if path == root_name {
            return Some(self.root);
        }
        let absolute = path
            .strip_prefix(root_name)
            .and_then(|rest| rest.strip_prefix(NAME_SEPARATOR))
            .and_then(|rest| self.find_relative(rest));
        absolute.or_else(|| self.find_relative(path))
    }

    fn find_relative(&self, path: &str) -> Option<ComponentKey> {
        let mut current = self.root;
        for segment in path.split(NAME_SEPARATOR) {
            let node = self.nodes.get(&current)?;
            current = node
                .children
                .iter()
                .copied()
                .find(|k| self.nodes.get(k).map_or(false, |n| n.name == segment))?;
        }
        Some(current)
    }

    pub(crate) fn children(&self, key: ComponentKey) -> SimResult<Vec<ComponentKey>> {
        Ok(self.node(key)?.children.clone())
    }

    /// Take the component out of its node so a hook can run without the tree locked
    pub(crate) fn take(&mut self, key: ComponentKey) -> SimResult<Box<dyn Component>> {
        let name = self.hierarchical_name(key)?;
        self.node_mut(key)?
            .component
            .take()
            .ok_or(SimError::ComponentBusy(name))
    }

    /// Put a component back; `false` if its node was detached in the meantime
    pub(crate) fn restore(&mut self, key: ComponentKey, component: Box<dyn Component>) -> bool {
        match self.nodes.get_mut(&key) {
            Some(node) => {
                node.component = Some(component);
                true
            }
            None => false,
        }
    }
}
