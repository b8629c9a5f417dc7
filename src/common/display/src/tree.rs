//! Tree rendering for driver descriptions and aggregator profiles.

use std::fmt;

/// A node in a display tree.
pub trait TreeNode {
    /// Get the display name of this node.
    fn name(&self) -> &str;

    /// Get child nodes.
    fn children(&self) -> Vec<&dyn TreeNode>;

    /// Get additional details to display.
    fn details(&self) -> Option<String> {
        None
    }
}

/// Renders a [`TreeNode`] one node per line with box-drawing connectors.
pub struct DisplayTree<'a> {
    root: &'a dyn TreeNode,
}

impl<'a> DisplayTree<'a> {
    /// Create a new display tree.
    pub fn new(root: &'a dyn TreeNode) -> Self {
        Self { root }
    }
}

/// A node waiting to be written, with the prefix of its line and the
/// prefix its children inherit.
struct Pending<'a> {
    node: &'a dyn TreeNode,
    line_prefix: String,
    child_prefix: String,
}

fn write_line(f: &mut fmt::Formatter<'_>, prefix: &str, node: &dyn TreeNode) -> fmt::Result {
    match node.details() {
        Some(details) => writeln!(f, "{prefix}{} ({details})", node.name()),
        None => writeln!(f, "{prefix}{}", node.name()),
    }
}

impl fmt::Display for DisplayTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Pending {
            node: self.root,
            line_prefix: String::new(),
            child_prefix: String::new(),
        }];
        while let Some(Pending {
            node,
            line_prefix,
            child_prefix,
        }) = stack.pop()
        {
            write_line(f, &line_prefix, node)?;
            let children = node.children();
            let last = children.len().saturating_sub(1);
            // Pushed in reverse so the first child is written first.
            for (i, child) in children.into_iter().enumerate().rev() {
                let (connector, indent) = if i == last { ("└─ ", "   ") } else { ("├─ ", "│  ") };
                stack.push(Pending {
                    node: child,
                    line_prefix: format!("{child_prefix}{connector}"),
                    child_prefix: format!("{child_prefix}{indent}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        name: &'static str,
        details: Option<&'static str>,
        children: Vec<Node>,
    }

    impl TreeNode for Node {
        fn name(&self) -> &str {
            self.name
        }

        fn children(&self) -> Vec<&dyn TreeNode> {
            self.children.iter().map(|c| c as &dyn TreeNode).collect()
        }

        fn details(&self) -> Option<String> {
            self.details.map(str::to_string)
        }
    }

    fn leaf(name: &'static str) -> Node {
        Node {
            name,
            details: None,
            children: vec![],
        }
    }

    #[test]
    fn test_display_tree() {
        let tree = Node {
            name: "range",
            details: Some("buckets=2"),
            children: vec![leaf("avg"), leaf("max")],
        };

        let output = DisplayTree::new(&tree).to_string();
        assert_eq!(output, "range (buckets=2)\n├─ avg\n└─ max\n");
    }

    #[test]
    fn test_nested_prefix() {
        let tree = Node {
            name: "root",
            details: None,
            children: vec![Node {
                name: "mid",
                details: None,
                children: vec![leaf("deep")],
            }],
        };
        let output = DisplayTree::new(&tree).to_string();
        assert_eq!(output, "root\n└─ mid\n   └─ deep\n");
    }
}
