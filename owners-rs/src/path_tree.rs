use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NodeId(pub(crate) usize);

pub(crate) struct Node {
    pub(crate) children: BTreeMap<String, NodeId>,
    /// Modified paths ending at this node.
    pub(crate) paths: Vec<String>,
}

impl Node {
    fn new() -> Self {
        Self {
            children: BTreeMap::new(),
            paths: Vec::new(),
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Trie of the modified paths of a change, one node per `/` separated
/// segment. Walking it visits every directory prefix exactly once.
pub(crate) struct PathTree {
    nodes: Vec<Node>,
}

impl PathTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node::new()],
        }
    }

    pub(crate) fn root_id() -> NodeId {
        NodeId(0)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn insert(&mut self, path: &str) {
        let mut current_node = Self::root_id();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            let child = self.nodes[current_node.0].children.get(segment);
            if let Some(&node_id) = child {
                current_node = node_id;
            } else {
                let node_id = NodeId(self.nodes.len());
                self.nodes.push(Node::new());
                self.nodes[current_node.0]
                    .children
                    .insert(segment.to_owned(), node_id);
                current_node = node_id;
            }
        }
        self.nodes[current_node.0].paths.push(path.to_owned());
    }
}

impl<'a> FromIterator<&'a str> for PathTree {
    fn from_iter<I: IntoIterator<Item = &'a str>>(paths: I) -> Self {
        let mut tree = PathTree::new();
        for path in paths {
            tree.insert(path);
        }
        tree
    }
}
