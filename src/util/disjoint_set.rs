//! Union-find over dense indices, used by the points-to analysis to
//! maintain the location equivalence classes.

/// Disjoint-set forest with union by rank and path compression.
///
/// Elements are dense `usize` indices handed out by [`DisjointSet::insert`].
#[derive(Debug, Default)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl DisjointSet {
    pub fn new() -> DisjointSet {
        DisjointSet::default()
    }

    /// Creates a fresh singleton set and returns its element index.
    pub fn insert(&mut self) -> usize {
        let id = self.parent.len();
        self.parent.push(id);
        self.rank.push(0);
        id
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Returns the representative of the set containing `x`.
    pub fn find(&mut self, x: usize) -> usize {
        assert!(x < self.parent.len());
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // path compression
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merges the sets containing `x` and `y` and returns the surviving
    /// representative.
    pub fn union(&mut self, x: usize, y: usize) -> usize {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return rx;
        }

        let (winner, loser) = if self.rank[rx] >= self.rank[ry] {
            (rx, ry)
        } else {
            (ry, rx)
        };
        self.parent[loser] = winner;
        if self.rank[winner] == self.rank[loser] {
            self.rank[winner] += 1;
        }
        winner
    }

    pub fn same_set(&mut self, x: usize, y: usize) -> bool {
        self.find(x) == self.find(y)
    }
}

#[cfg(test)]
mod tests {
    use super::DisjointSet;

    #[test]
    fn union_find_basics() {
        let mut ds = DisjointSet::new();
        let a = ds.insert();
        let b = ds.insert();
        let c = ds.insert();

        assert!(!ds.same_set(a, b));
        ds.union(a, b);
        assert!(ds.same_set(a, b));
        assert!(!ds.same_set(a, c));

        let r = ds.union(b, c);
        assert_eq!(ds.find(a), r);
        assert_eq!(ds.find(c), r);
    }
}
