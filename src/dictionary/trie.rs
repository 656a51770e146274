//! Provides the character trie used to look up dictionary strings.
//!
//! The trie is stored in an arena of nodes. Every node is bound to a character **position**
//! within the strings it distinguishes and owns a list of references. Each reference is labeled
//! with the lowercase character found at that position (0 marks the end of a string) and either
//! points to a string (a leaf) or to another node which distinguishes the strings sharing this
//! prefix at the next position.
//!
//! Leaves are created as early as possible: a string is only pushed one level deeper once
//! another string with the same prefix arrives. Therefore the trie only contains as many nodes
//! as required to tell all strings apart, and a final comparison with the stored string is
//! required to confirm a match.
//!
//! While strings are added, every node sits exactly one level below its parent. A persisted
//! trie is additionally compressed: a node with a single reference which leads to another node
//! carries no information and is skipped (see [Trie::compressed]).

/// Represents the index of a string within a dictionary volume.
pub type StringId = u16;

/// Represents the index of a node within the trie arena.
pub type NodeId = usize;

/// Represents the target of a reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Child {
    /// The reference leads to a single string.
    Leaf(StringId),
    /// The reference leads to a node distinguishing several strings.
    Node(NodeId),
}

/// Represents a labeled edge within the trie.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    /// The lowercase character at the position of the owning node (0 marks the end).
    pub character: u8,
    /// The target of this reference.
    pub child: Child,
}

/// Represents a node within the trie.
#[derive(Clone, Debug, Default)]
pub struct TrieNode {
    /// The character position this node inspects.
    pub position: usize,
    /// All references (at most one per character).
    pub references: Vec<Reference>,
}

impl TrieNode {
    /// Finds the reference for the given character.
    pub fn find(&self, character: u8) -> Option<&Reference> {
        let character = character.to_ascii_lowercase();
        self.references
            .iter()
            .find(|reference| reference.character == character)
    }

    fn find_mut(&mut self, character: u8) -> Option<&mut Reference> {
        let character = character.to_ascii_lowercase();
        self.references
            .iter_mut()
            .find(|reference| reference.character == character)
    }
}

/// Represents the outcome of walking the trie for a given string.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Walk {
    /// The walk ended in a leaf of the given node, which still needs to be verified against the
    /// stored string.
    Candidate(NodeId, StringId),
    /// The walk ended in the given node without a matching reference.
    Miss(NodeId),
}

/// Returns the lowercase character at the given position or 0 if the string is shorter.
pub fn character_at(string: &[u8], position: usize) -> u8 {
    string
        .get(position)
        .map(|ch| ch.to_ascii_lowercase())
        .unwrap_or(0)
}

/// Provides the node arena of a dictionary volume.
#[derive(Clone, Debug)]
pub struct Trie {
    nodes: Vec<TrieNode>,
}

impl Default for Trie {
    fn default() -> Self {
        Trie::new()
    }
}

impl Trie {
    /// Contains the maximal number of nodes in a single trie.
    pub const MAX_NODES: usize = 0x10000;

    /// Creates a trie which only consists of its root node.
    pub fn new() -> Self {
        Trie {
            nodes: vec![TrieNode::default()],
        }
    }

    /// Returns the root node.
    pub fn root(&self) -> NodeId {
        0
    }

    /// Returns the node with the given id.
    pub fn node(&self, id: NodeId) -> Option<&TrieNode> {
        self.nodes.get(id)
    }

    /// Returns the number of nodes in the arena.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the total number of references of all nodes.
    pub fn num_references(&self) -> usize {
        self.nodes.iter().map(|node| node.references.len()).sum()
    }

    /// Walks the trie along the given string.
    ///
    /// # Errors
    ///
    /// Fails if the structure is corrupted (a node position not matching its depth or a subtree
    /// found after the end of the string).
    pub fn walk(&self, string: &[u8]) -> anyhow::Result<Walk> {
        let mut node = self.root();

        for (index, &ch) in string.iter().enumerate() {
            let current = &self.nodes[node];
            if current.position != index {
                return Err(anyhow::anyhow!(
                    "corrupted tree position {} (should be {}) in tree {}",
                    current.position,
                    index,
                    node
                ));
            }

            match current.find(ch) {
                None => return Ok(Walk::Miss(node)),
                Some(Reference {
                    child: Child::Leaf(id),
                    ..
                }) => return Ok(Walk::Candidate(node, *id)),
                Some(Reference {
                    child: Child::Node(next),
                    ..
                }) => {
                    if ch == 0 {
                        return Err(anyhow::anyhow!("found a subtree after end of string"));
                    }
                    if *next >= self.nodes.len() {
                        return Err(anyhow::anyhow!("corrupted tree (node {} is unknown)", next));
                    }
                    node = *next;
                }
            }
        }

        match self.nodes[node].find(0) {
            None => Ok(Walk::Miss(node)),
            Some(Reference {
                child: Child::Leaf(id),
                ..
            }) => Ok(Walk::Candidate(node, *id)),
            Some(_) => Err(anyhow::anyhow!("found a subtree after end of string")),
        }
    }

    /// Inserts a new string into the trie, starting at the node where its walk ended.
    ///
    /// As long as the character of the new string collides with an existing leaf, the leaf is
    /// pushed down into a new node one position deeper. `resolve` provides the bytes of an
    /// existing string.
    ///
    /// # Errors
    ///
    /// Fails if the arena is full or if a collision with a subtree is detected (which would
    /// indicate a corrupted structure).
    pub fn insert<'a, F>(
        &mut self,
        start: NodeId,
        string: &[u8],
        id: StringId,
        resolve: F,
    ) -> anyhow::Result<()>
    where
        F: Fn(StringId) -> &'a [u8],
    {
        let mut node = start;
        let mut character = character_at(string, self.nodes[node].position);

        while let Some(reference) = self.nodes[node].find(character).copied() {
            let existing = match reference.child {
                Child::Leaf(existing) => existing,
                Child::Node(_) => {
                    return Err(anyhow::anyhow!("dictionary corrupted (incomplete search)"));
                }
            };
            if self.nodes.len() >= Trie::MAX_NODES {
                return Err(anyhow::anyhow!("dictionary tree full"));
            }

            let position = self.nodes[node].position + 1;
            let referenced = resolve(existing);
            if character == 0 && position > referenced.len() && position > string.len() {
                return Err(anyhow::anyhow!(
                    "dictionary corrupted (duplicate string {})",
                    existing
                ));
            }

            let new_node = self.nodes.len();
            self.nodes.push(TrieNode {
                position,
                references: vec![Reference {
                    character: character_at(referenced, position),
                    child: Child::Leaf(existing),
                }],
            });
            if let Some(reference) = self.nodes[node].find_mut(character) {
                reference.child = Child::Node(new_node);
            }

            node = new_node;
            character = character_at(string, position);
        }

        self.nodes[node].references.push(Reference {
            character,
            child: Child::Leaf(id),
        });

        Ok(())
    }

    /// Resolves the node which actually represents the given node in a compressed trie.
    ///
    /// Nodes which only contain a single reference to another node are skipped.
    pub fn compressed(&self, mut node: NodeId) -> NodeId {
        while let [Reference {
            child: Child::Node(next),
            ..
        }] = self.nodes[node].references.as_slice()
        {
            node = *next;
        }

        node
    }

    /// Lists the nodes of the compressed trie in depth first pre-order.
    ///
    /// This is the order in which nodes are persisted. The root is always the first entry.
    pub fn compressed_preorder(&self) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![self.compressed(self.root())];
        while let Some(node) = stack.pop() {
            result.push(node);
            for reference in self.nodes[node].references.iter().rev() {
                if let Child::Node(next) = reference.child {
                    stack.push(self.compressed(next));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use crate::dictionary::trie::{character_at, Child, Trie, Walk};

    fn strings() -> Vec<&'static [u8]> {
        vec![b"", b"main", b"mainz", b"maple"]
    }

    fn build() -> Trie {
        let strings = strings();
        let mut trie = Trie::new();
        trie.nodes[0].references.push(crate::dictionary::trie::Reference {
            character: 0,
            child: Child::Leaf(0),
        });
        for (id, string) in strings.iter().enumerate().skip(1) {
            let node = match trie.walk(string).unwrap() {
                Walk::Miss(node) => node,
                Walk::Candidate(node, candidate) => {
                    // Not a real match, the walk only found a leaf sharing a prefix...
                    assert_ne!(strings[candidate as usize], *string);
                    node
                }
            };
            trie.insert(node, string, id as u16, |existing| strings[existing as usize])
                .unwrap();
        }

        trie
    }

    #[test]
    fn characters_are_lowercased_and_padded() {
        assert_eq!(character_at(b"Main", 0), b'm');
        assert_eq!(character_at(b"Main", 4), 0);
        assert_eq!(character_at(b"Main", 10), 0);
    }

    #[test]
    fn colliding_leaves_are_pushed_down() {
        let trie = build();

        assert_eq!(matches!(trie.walk(b"main").unwrap(), Walk::Candidate(_, 1)), true);
        assert_eq!(matches!(trie.walk(b"MAINZ").unwrap(), Walk::Candidate(_, 2)), true);
        assert_eq!(matches!(trie.walk(b"maple").unwrap(), Walk::Candidate(_, 3)), true);
        assert_eq!(trie.walk(b"").unwrap(), Walk::Candidate(0, 0));
        assert_eq!(matches!(trie.walk(b"mo").unwrap(), Walk::Miss(_)), true);
    }

    #[test]
    fn compression_skips_single_choice_nodes() {
        let trie = build();

        // "ma" is shared by all strings and "main" by two of them, hence the nodes for "a" and
        // "n" only carry a single reference pointing to the next node...
        let preorder = trie.compressed_preorder();
        assert_eq!(trie.num_nodes(), 5);
        assert_eq!(preorder.len(), 3);
        assert_eq!(preorder[0], trie.root());
        for node in preorder {
            let references = &trie.node(node).unwrap().references;
            assert_eq!(
                references.len() == 1 && matches!(references[0].child, Child::Node(_)),
                false
            );
        }
    }
}
