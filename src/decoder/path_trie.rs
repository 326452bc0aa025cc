use std::sync::Arc;

use crate::alphabet::byte_is_codepoint_boundary;
use crate::decoder::utils::log_sum_exp;
use crate::scorer::dictionary::Dictionary;
use crate::types::Label;

/// Index handle into the trie arena.
pub type NodeId = usize;

pub(crate) const ROOT_ID: NodeId = 0;

/// One vertex of the search trie.
///
/// `character` is the label on the edge from the parent; the root has none.
/// The four log probabilities track the prefix ending / not ending in blank
/// for the previous and the current timestep; `score` is their log-sum and
/// is refreshed by the per-timestep slide. `exists` is a tombstone flag so
/// beam trimming never invalidates frontier handles mid-timestep.
#[derive(Debug)]
pub(crate) struct PathNode {
    pub(crate) character: Option<Label>,
    pub(crate) timestep: usize,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<(Label, NodeId)>,
    pub(crate) log_prob_b_prev: f64,
    pub(crate) log_prob_nb_prev: f64,
    pub(crate) log_prob_b_cur: f64,
    pub(crate) log_prob_nb_cur: f64,
    pub(crate) log_prob_c: f64,
    pub(crate) score: f64,
    pub(crate) exists: bool,
    pub(crate) has_dictionary: bool,
    pub(crate) dictionary_state: fst::raw::CompiledAddr,
}

impl PathNode {
    fn new(
        character: Option<Label>,
        timestep: usize,
        parent: Option<NodeId>,
        log_prob_c: f64,
    ) -> Self {
        Self {
            character,
            timestep,
            parent,
            children: Vec::new(),
            log_prob_b_prev: f64::NEG_INFINITY,
            log_prob_nb_prev: f64::NEG_INFINITY,
            log_prob_b_cur: f64::NEG_INFINITY,
            log_prob_nb_cur: f64::NEG_INFINITY,
            log_prob_c,
            score: f64::NEG_INFINITY,
            exists: true,
            has_dictionary: false,
            dictionary_state: 0,
        }
    }
}

/// Arena of prefix nodes forming the search frontier.
///
/// The arena owns every node; parent links are plain indices, so ascent
/// never fights the ownership of the tree. Removed nodes are recycled
/// through a free list. An optional lexicon FST is co-walked during child
/// creation to drop prefixes no vocabulary word can complete.
#[derive(Debug)]
pub struct PathTrie {
    nodes: Vec<PathNode>,
    free: Vec<NodeId>,
    dictionary: Option<Arc<Dictionary>>,
}

impl PathTrie {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![PathNode::new(None, 0, None, f64::NEG_INFINITY)],
            free: Vec::new(),
            dictionary: None,
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &PathNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut PathNode {
        &mut self.nodes[id]
    }

    /// Attaches the lexicon FST; the root starts walking at the FST root.
    pub(crate) fn set_dictionary(&mut self, dictionary: Arc<Dictionary>) {
        self.nodes[ROOT_ID].dictionary_state = dictionary.start();
        self.nodes[ROOT_ID].has_dictionary = true;
        self.dictionary = Some(dictionary);
    }

    /// Locates or creates the child of `id` reached by emitting `new_char`.
    ///
    /// Returns `None` when a lexicon is attached and no vocabulary word can
    /// complete the extended prefix; such prefixes are dropped silently.
    pub(crate) fn get_path_trie(
        &mut self,
        id: NodeId,
        new_char: Label,
        new_timestep: usize,
        cur_log_prob_c: f64,
        reset: bool,
    ) -> Option<NodeId> {
        let existing = self.nodes[id]
            .children
            .iter()
            .find(|&&(c, _)| c == new_char)
            .map(|&(_, child)| child);
        if let Some(child_id) = existing {
            let child = &mut self.nodes[child_id];
            // A leaf re-reached with a stronger emission adopts the new
            // timestep. Non-leaves keep theirs so a node never postdates
            // its descendants.
            if child.log_prob_c < cur_log_prob_c && child.children.is_empty() {
                child.log_prob_c = cur_log_prob_c;
                child.timestep = new_timestep;
            }
            if !child.exists {
                child.exists = true;
                child.log_prob_b_prev = f64::NEG_INFINITY;
                child.log_prob_nb_prev = f64::NEG_INFINITY;
                child.log_prob_b_cur = f64::NEG_INFINITY;
                child.log_prob_nb_cur = f64::NEG_INFINITY;
            }
            return Some(child_id);
        }

        let dictionary = self
            .dictionary
            .clone()
            .filter(|_| self.nodes[id].has_dictionary);
        let mut child = PathNode::new(Some(new_char), new_timestep, Some(id), cur_log_prob_c);
        if let Some(dict) = dictionary {
            let state = self.nodes[id].dictionary_state;
            match dict.find_input(state, new_char) {
                None => {
                    // The character would take this prefix outside the
                    // lexicon. If a word just completed, let the next one
                    // start from the lexicon root.
                    if dict.is_final(state) && reset {
                        self.nodes[id].dictionary_state = dict.start();
                    }
                    return None;
                }
                Some(next_state) => {
                    child.has_dictionary = true;
                    child.dictionary_state = if dict.is_final(next_state) && reset {
                        dict.start()
                    } else {
                        next_state
                    };
                }
            }
        }
        let child_id = self.alloc(child);
        self.nodes[id].children.push((new_char, child_id));
        Some(child_id)
    }

    /// Appends the labels and first-emission timesteps of the path from the
    /// root to `id`, in root-to-leaf order. The root itself is skipped.
    pub(crate) fn get_path_vec(
        &self,
        id: NodeId,
        tokens: &mut Vec<Label>,
        timesteps: &mut Vec<usize>,
    ) {
        let start = tokens.len();
        let mut current = Some(id);
        while let Some(cid) = current {
            let node = &self.nodes[cid];
            if let Some(character) = node.character {
                tokens.push(character);
                timesteps.push(node.timestep);
            }
            current = node.parent;
        }
        tokens[start..].reverse();
        timesteps[start..].reverse();
    }

    /// Collects the byte labels of the trailing (possibly incomplete)
    /// codepoint and returns the node carrying its first byte.
    pub(crate) fn get_prev_grapheme(
        &self,
        id: NodeId,
        tokens: &mut Vec<Label>,
        timesteps: &mut Vec<usize>,
    ) -> NodeId {
        let node = &self.nodes[id];
        let Some(character) = node.character else {
            return id;
        };
        let mut stop = id;
        if !byte_is_codepoint_boundary((character + 1) as u8) {
            if let Some(parent) = node.parent {
                stop = self.get_prev_grapheme(parent, tokens, timesteps);
            }
        }
        tokens.push(character);
        timesteps.push(node.timestep);
        stop
    }

    /// Collects the labels of the trailing word and returns the boundary
    /// node (the nearest space ancestor, or the root).
    pub(crate) fn get_prev_word(
        &self,
        id: NodeId,
        tokens: &mut Vec<Label>,
        timesteps: &mut Vec<usize>,
        space_id: Label,
    ) -> NodeId {
        let node = &self.nodes[id];
        let Some(character) = node.character else {
            return id;
        };
        if character == space_id {
            return id;
        }
        let mut stop = id;
        if let Some(parent) = node.parent {
            stop = self.get_prev_word(parent, tokens, timesteps, space_id);
        }
        tokens.push(character);
        timesteps.push(node.timestep);
        stop
    }

    /// Number of nodes between `id` and the nearest codepoint-boundary byte
    /// on its path, inclusive, together with that boundary byte. `None` when
    /// the path holds continuation bytes all the way to the root.
    pub(crate) fn distance_to_codepoint_boundary(&self, id: NodeId) -> Option<(usize, u8)> {
        let mut distance = 0;
        let mut current = Some(id);
        while let Some(cid) = current {
            let node = &self.nodes[cid];
            let character = node.character?;
            distance += 1;
            let byte = (character + 1) as u8;
            if byte_is_codepoint_boundary(byte) {
                return Some((distance, byte));
            }
            current = node.parent;
        }
        None
    }

    /// The per-timestep slide: for every existing node, current log probs
    /// become previous, current reset to -inf, `score` is recomputed, and
    /// the node joins `out`. Tombstoned nodes are skipped but their
    /// children are still visited.
    pub(crate) fn iterate_to_vec(&mut self, out: &mut Vec<NodeId>) {
        let mut stack = vec![ROOT_ID];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id];
            if node.exists {
                node.log_prob_b_prev = node.log_prob_b_cur;
                node.log_prob_nb_prev = node.log_prob_nb_cur;
                node.log_prob_b_cur = f64::NEG_INFINITY;
                node.log_prob_nb_cur = f64::NEG_INFINITY;
                node.score = log_sum_exp(node.log_prob_b_prev, node.log_prob_nb_prev);
                out.push(id);
            }
            // reversed push keeps insertion order in the output
            let node = &self.nodes[id];
            for &(_, child) in node.children.iter().rev() {
                stack.push(child);
            }
        }
    }

    /// Tombstones `id`; childless nodes are unlinked from their parent and
    /// recycled, and the unlink propagates to tombstoned childless
    /// ancestors.
    pub(crate) fn remove(&mut self, id: NodeId) {
        self.nodes[id].exists = false;
        if !self.nodes[id].children.is_empty() {
            return;
        }
        if let Some(parent) = self.nodes[id].parent {
            let children = &mut self.nodes[parent].children;
            if let Some(pos) = children.iter().position(|&(_, child)| child == id) {
                children.remove(pos);
            }
            self.free.push(id);
            if self.nodes[parent].children.is_empty() && !self.nodes[parent].exists {
                self.remove(parent);
            }
        }
    }

    fn alloc(&mut self, node: PathNode) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }
}
