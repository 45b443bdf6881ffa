// crates/tessel-store/src/tree.rs
//
// Red-black tree keyed by signed hash, valued by host.
//
// This is the placement index behind the hash ring. Ordered maps answer
// "smallest key >= h", but placement needs "the next N *distinct* hosts
// clockwise from h, wrapping past the maximum back to the minimum", which is
// a walk over in-order successors. Nodes live in an arena (`Vec`) addressed
// by index; slot 0 is the shared black NIL sentinel, so the textbook
// insert/delete fix-ups apply without special-casing absent children.
// Freed slots are recycled through a free list.

use std::collections::HashSet;

const NIL: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct Slot {
    key: i64,
    value: String,
    color: Color,
    left: usize,
    right: usize,
    parent: usize,
}

impl Slot {
    fn sentinel() -> Self {
        Self {
            key: 0,
            value: String::new(),
            color: Color::Black,
            left: NIL,
            right: NIL,
            parent: NIL,
        }
    }
}

/// Balanced index mapping hash positions to host names.
///
/// Values may repeat (every virtual node of a host carries the same value);
/// keys may not. The tree is not internally synchronized; the ring owner
/// serializes access.
#[derive(Debug, Clone)]
pub struct RbTree {
    slots: Vec<Slot>,
    root: usize,
    free: Vec<usize>,
    len: usize,
}

impl Default for RbTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RbTree {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::sentinel()],
            root: NIL,
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `(hash, host)`. Returns `false` without modifying the tree if
    /// `hash` is already present.
    pub fn insert(&mut self, hash: i64, host: &str) -> bool {
        let mut parent = NIL;
        let mut cursor = self.root;
        while cursor != NIL {
            parent = cursor;
            let key = self.slots[cursor].key;
            if hash < key {
                cursor = self.slots[cursor].left;
            } else if hash > key {
                cursor = self.slots[cursor].right;
            } else {
                return false;
            }
        }

        let z = self.alloc(hash, host);
        self.slots[z].parent = parent;
        if parent == NIL {
            self.root = z;
        } else if hash < self.slots[parent].key {
            self.slots[parent].left = z;
        } else {
            self.slots[parent].right = z;
        }
        self.insert_fixup(z);
        self.len += 1;
        true
    }

    /// Remove the entry at `hash`. Returns `false` if it was absent.
    pub fn delete(&mut self, hash: i64) -> bool {
        let z = self.find(hash);
        if z == NIL {
            return false;
        }

        let mut y = z;
        let mut y_color = self.slots[y].color;
        let x;
        if self.slots[z].left == NIL {
            x = self.slots[z].right;
            self.transplant(z, x);
        } else if self.slots[z].right == NIL {
            x = self.slots[z].left;
            self.transplant(z, x);
        } else {
            y = self.minimum(self.slots[z].right);
            y_color = self.slots[y].color;
            x = self.slots[y].right;
            if self.slots[y].parent == z {
                self.slots[x].parent = y;
            } else {
                self.transplant(y, x);
                let zr = self.slots[z].right;
                self.slots[y].right = zr;
                self.slots[zr].parent = y;
            }
            self.transplant(z, y);
            let zl = self.slots[z].left;
            self.slots[y].left = zl;
            self.slots[zl].parent = y;
            self.slots[y].color = self.slots[z].color;
        }

        if y_color == Color::Black {
            self.delete_fixup(x);
        }

        self.release(z);
        self.len -= 1;
        true
    }

    /// Host stored at exactly `hash`.
    pub fn search(&self, hash: i64) -> Option<&str> {
        match self.find(hash) {
            NIL => None,
            idx => Some(self.slots[idx].value.as_str()),
        }
    }

    /// Collect up to `n` distinct hosts walking clockwise from the smallest
    /// key `>= hash`, wrapping to the minimum key when the maximum is passed.
    ///
    /// Each entry is visited at most once, so the result holds fewer than `n`
    /// hosts when the tree has fewer distinct values.
    pub fn lookup_n_unique_at(&self, n: usize, hash: i64) -> Vec<String> {
        let mut hosts = Vec::new();
        if n == 0 || self.root == NIL {
            return hosts;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut cursor = match self.ceiling(hash) {
            NIL => self.minimum(self.root),
            idx => idx,
        };
        for _ in 0..self.len {
            let value = self.slots[cursor].value.as_str();
            if seen.insert(value) {
                hosts.push(value.to_string());
                if hosts.len() == n {
                    break;
                }
            }
            cursor = match self.successor(cursor) {
                NIL => self.minimum(self.root),
                idx => idx,
            };
        }
        hosts
    }

    /// In-order `(hash, host)` pairs.
    pub fn entries(&self) -> Vec<(i64, String)> {
        let mut out = Vec::with_capacity(self.len);
        if self.root == NIL {
            return out;
        }
        let mut cursor = self.minimum(self.root);
        while cursor != NIL {
            out.push((self.slots[cursor].key, self.slots[cursor].value.clone()));
            cursor = self.successor(cursor);
        }
        out
    }

    /// Verify the red-black and search-tree invariants.
    ///
    /// Checks that the root is black, no red node has a red child, every
    /// root-to-leaf path carries the same number of black nodes, keys are
    /// strictly ordered, parent links are consistent, and the node count
    /// matches `len()`. Returns the black height on success.
    pub fn check_invariants(&self) -> Result<usize, String> {
        if self.slots[NIL].color != Color::Black {
            return Err("sentinel is not black".into());
        }
        if self.root == NIL {
            return if self.len == 0 {
                Ok(0)
            } else {
                Err(format!("empty root but len = {}", self.len))
            };
        }
        if self.slots[self.root].color != Color::Black {
            return Err("root is red".into());
        }
        if self.slots[self.root].parent != NIL {
            return Err("root has a parent".into());
        }
        let mut count = 0;
        let height = self.check_subtree(self.root, None, None, &mut count)?;
        if count != self.len {
            return Err(format!("counted {} nodes but len = {}", count, self.len));
        }
        Ok(height)
    }

    fn check_subtree(
        &self,
        idx: usize,
        lower: Option<i64>,
        upper: Option<i64>,
        count: &mut usize,
    ) -> Result<usize, String> {
        if idx == NIL {
            return Ok(1);
        }
        *count += 1;
        let slot = &self.slots[idx];
        if lower.is_some_and(|lo| slot.key <= lo) || upper.is_some_and(|hi| slot.key >= hi) {
            return Err(format!("key {} out of order", slot.key));
        }
        for child in [slot.left, slot.right] {
            if child == NIL {
                continue;
            }
            if self.slots[child].parent != idx {
                return Err(format!("broken parent link below key {}", slot.key));
            }
            if slot.color == Color::Red && self.slots[child].color == Color::Red {
                return Err(format!("red node {} has a red child", slot.key));
            }
        }
        let left = self.check_subtree(slot.left, lower, Some(slot.key), count)?;
        let right = self.check_subtree(slot.right, Some(slot.key), upper, count)?;
        if left != right {
            return Err(format!(
                "black height mismatch at key {}: {} vs {}",
                slot.key, left, right
            ));
        }
        Ok(left + usize::from(slot.color == Color::Black))
    }

    fn alloc(&mut self, key: i64, value: &str) -> usize {
        let slot = Slot {
            key,
            value: value.to_string(),
            color: Color::Red,
            left: NIL,
            right: NIL,
            parent: NIL,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.slots[idx] = Slot::sentinel();
        self.free.push(idx);
        // Delete fix-up may have written through the sentinel.
        self.slots[NIL] = Slot::sentinel();
    }

    fn find(&self, hash: i64) -> usize {
        let mut cursor = self.root;
        while cursor != NIL {
            let key = self.slots[cursor].key;
            if hash < key {
                cursor = self.slots[cursor].left;
            } else if hash > key {
                cursor = self.slots[cursor].right;
            } else {
                return cursor;
            }
        }
        NIL
    }

    fn ceiling(&self, hash: i64) -> usize {
        let mut best = NIL;
        let mut cursor = self.root;
        while cursor != NIL {
            if self.slots[cursor].key >= hash {
                best = cursor;
                cursor = self.slots[cursor].left;
            } else {
                cursor = self.slots[cursor].right;
            }
        }
        best
    }

    fn minimum(&self, mut idx: usize) -> usize {
        while self.slots[idx].left != NIL {
            idx = self.slots[idx].left;
        }
        idx
    }

    fn successor(&self, mut idx: usize) -> usize {
        if self.slots[idx].right != NIL {
            return self.minimum(self.slots[idx].right);
        }
        let mut parent = self.slots[idx].parent;
        while parent != NIL && idx == self.slots[parent].right {
            idx = parent;
            parent = self.slots[parent].parent;
        }
        parent
    }

    fn color(&self, idx: usize) -> Color {
        self.slots[idx].color
    }

    fn left_rotate(&mut self, x: usize) {
        let y = self.slots[x].right;
        let yl = self.slots[y].left;
        self.slots[x].right = yl;
        if yl != NIL {
            self.slots[yl].parent = x;
        }
        let xp = self.slots[x].parent;
        self.slots[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.slots[xp].left {
            self.slots[xp].left = y;
        } else {
            self.slots[xp].right = y;
        }
        self.slots[y].left = x;
        self.slots[x].parent = y;
    }

    fn right_rotate(&mut self, x: usize) {
        let y = self.slots[x].left;
        let yr = self.slots[y].right;
        self.slots[x].left = yr;
        if yr != NIL {
            self.slots[yr].parent = x;
        }
        let xp = self.slots[x].parent;
        self.slots[y].parent = xp;
        if xp == NIL {
            self.root = y;
        } else if x == self.slots[xp].right {
            self.slots[xp].right = y;
        } else {
            self.slots[xp].left = y;
        }
        self.slots[y].right = x;
        self.slots[x].parent = y;
    }

    fn transplant(&mut self, u: usize, v: usize) {
        let up = self.slots[u].parent;
        if up == NIL {
            self.root = v;
        } else if u == self.slots[up].left {
            self.slots[up].left = v;
        } else {
            self.slots[up].right = v;
        }
        self.slots[v].parent = up;
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.color(self.slots[z].parent) == Color::Red {
            let p = self.slots[z].parent;
            let g = self.slots[p].parent;
            if p == self.slots[g].left {
                let uncle = self.slots[g].right;
                if self.color(uncle) == Color::Red {
                    self.slots[p].color = Color::Black;
                    self.slots[uncle].color = Color::Black;
                    self.slots[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.slots[p].right {
                        z = p;
                        self.left_rotate(z);
                    }
                    let p = self.slots[z].parent;
                    let g = self.slots[p].parent;
                    self.slots[p].color = Color::Black;
                    self.slots[g].color = Color::Red;
                    self.right_rotate(g);
                }
            } else {
                let uncle = self.slots[g].left;
                if self.color(uncle) == Color::Red {
                    self.slots[p].color = Color::Black;
                    self.slots[uncle].color = Color::Black;
                    self.slots[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.slots[p].left {
                        z = p;
                        self.right_rotate(z);
                    }
                    let p = self.slots[z].parent;
                    let g = self.slots[p].parent;
                    self.slots[p].color = Color::Black;
                    self.slots[g].color = Color::Red;
                    self.left_rotate(g);
                }
            }
        }
        let root = self.root;
        self.slots[root].color = Color::Black;
    }

    fn delete_fixup(&mut self, mut x: usize) {
        while x != self.root && self.color(x) == Color::Black {
            let p = self.slots[x].parent;
            if x == self.slots[p].left {
                let mut w = self.slots[p].right;
                if self.color(w) == Color::Red {
                    self.slots[w].color = Color::Black;
                    self.slots[p].color = Color::Red;
                    self.left_rotate(p);
                    w = self.slots[p].right;
                }
                let (wl, wr) = (self.slots[w].left, self.slots[w].right);
                if self.color(wl) == Color::Black && self.color(wr) == Color::Black {
                    self.slots[w].color = Color::Red;
                    x = p;
                } else {
                    if self.color(wr) == Color::Black {
                        self.slots[wl].color = Color::Black;
                        self.slots[w].color = Color::Red;
                        self.right_rotate(w);
                        w = self.slots[p].right;
                    }
                    self.slots[w].color = self.slots[p].color;
                    self.slots[p].color = Color::Black;
                    let wr = self.slots[w].right;
                    self.slots[wr].color = Color::Black;
                    self.left_rotate(p);
                    x = self.root;
                }
            } else {
                let mut w = self.slots[p].left;
                if self.color(w) == Color::Red {
                    self.slots[w].color = Color::Black;
                    self.slots[p].color = Color::Red;
                    self.right_rotate(p);
                    w = self.slots[p].left;
                }
                let (wl, wr) = (self.slots[w].left, self.slots[w].right);
                if self.color(wl) == Color::Black && self.color(wr) == Color::Black {
                    self.slots[w].color = Color::Red;
                    x = p;
                } else {
                    if self.color(wl) == Color::Black {
                        self.slots[wr].color = Color::Black;
                        self.slots[w].color = Color::Red;
                        self.left_rotate(w);
                        w = self.slots[p].left;
                    }
                    self.slots[w].color = self.slots[p].color;
                    self.slots[p].color = Color::Black;
                    let wl = self.slots[w].left;
                    self.slots[wl].color = Color::Black;
                    self.right_rotate(p);
                    x = self.root;
                }
            }
        }
        self.slots[x].color = Color::Black;
    }
}
