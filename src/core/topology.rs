//! Chain topology: role and next-hop assignment from list position

use crate::core::{Node, Role};

/// A node together with its derived position in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    /// Position in the input list
    pub index: usize,
    pub node: Node,
    pub role: Role,
    /// Address of the next node, `None` for the terminal node
    pub next_hop: Option<String>,
}

impl Hop {
    pub fn is_terminal(&self) -> bool {
        self.role == Role::Terminal
    }
}

/// Resolve roles and next hops. Exactly the last node is terminal.
pub fn resolve(nodes: &[Node]) -> Vec<Hop> {
    let last = nodes.len().saturating_sub(1);
    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| Hop {
            index,
            node: node.clone(),
            role: if index == last { Role::Terminal } else { Role::Intermediate },
            next_hop: nodes.get(index + 1).map(|next| next.address.clone()),
        })
        .collect()
}
