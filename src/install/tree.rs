//! The option tree consumed by the orchestrator.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. The orchestrator
//! only ever reads the tree through [`OptionNode`] views; selection
//! decisions are kept separately in a [`Selection`](super::Selection).
//!
//! ```rust
//! use installkit::install::OptionTree;
//!
//! let mut tree = OptionTree::new();
//! let base = tree.add(tree.root(), "option").attr("install", "true").text("Base").id();
//! tree.add(base, "files").text("data/*.pak");
//! assert_eq!(tree.node(base).label(), "Base");
//! ```

/// Identity of a node in an [`OptionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct NodeData {
    element: String,
    attrs: Vec<(String, String)>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An arena of option-tree elements.
#[derive(Debug, Clone)]
pub struct OptionTree {
    nodes: Vec<NodeData>,
}

impl Default for OptionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionTree {
    /// Creates a tree holding only the `install` root element.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                element: "install".to_string(),
                attrs: Vec::new(),
                text: String::new(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The root element.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a child element and returns a builder for it.
    ///
    /// # Panics
    ///
    /// Panics if `parent` does not belong to this tree.
    pub fn add(&mut self, parent: NodeId, element: impl Into<String>) -> NodeBuilder<'_> {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            element: element.into(),
            attrs: Vec::new(),
            text: String::new(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        NodeBuilder { tree: self, id }
    }

    /// Returns a read-only view of a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> OptionNode<'_> {
        assert!(id.0 < self.nodes.len(), "node id out of range");
        OptionNode { tree: self, id }
    }

    fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }
}

/// Builder returned by [`OptionTree::add`].
#[derive(Debug)]
pub struct NodeBuilder<'t> {
    tree: &'t mut OptionTree,
    id: NodeId,
}

impl NodeBuilder<'_> {
    /// Sets an attribute, replacing an earlier value.
    pub fn attr(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        let attrs = &mut self.tree.nodes[self.id.0].attrs;
        match attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => attrs.push((name, value)),
        }
        self
    }

    /// Sets the element text.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.tree.nodes[self.id.0].text = text.into();
        self
    }

    /// Finishes building and returns the node's identity.
    pub fn id(self) -> NodeId {
        self.id
    }
}

/// A read-only view of one option-tree element.
#[derive(Debug, Clone, Copy)]
pub struct OptionNode<'a> {
    tree: &'a OptionTree,
    id: NodeId,
}

impl<'a> OptionNode<'a> {
    /// Node identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Element name (`option`, `files`, `binary`, ...).
    pub fn element(&self) -> &'a str {
        &self.tree.data(self.id).element
    }

    /// Attribute value.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.tree
            .data(self.id)
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute interpreted as a boolean flag (`true`, `yes` or `1`).
    pub fn flag(&self, name: &str) -> bool {
        self.attr(name).is_some_and(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v == "1"
        })
    }

    /// Raw element text.
    pub fn text(&self) -> &'a str {
        &self.tree.data(self.id).text
    }

    /// Display label: the `name` attribute, else the first text line.
    pub fn label(&self) -> &'a str {
        if let Some(name) = self.attr("name") {
            return name;
        }
        self.text()
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }

    /// Parent element.
    pub fn parent(&self) -> Option<OptionNode<'a>> {
        self.tree.data(self.id).parent.map(|id| OptionNode {
            tree: self.tree,
            id,
        })
    }

    /// Child elements in document order.
    pub fn children(&self) -> impl Iterator<Item = OptionNode<'a>> + 'a {
        let tree = self.tree;
        tree.data(self.id)
            .children
            .iter()
            .map(move |&id| OptionNode { tree, id })
    }

    /// Walks up from this node and returns the first attribute value found.
    pub fn inherited_attr(&self, name: &str) -> Option<&'a str> {
        let mut node = Some(*self);
        while let Some(n) = node {
            if let Some(v) = n.attr(name) {
                return Some(v);
            }
            node = n.parent();
        }
        None
    }
}
