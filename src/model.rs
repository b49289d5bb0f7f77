use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::path::{Component, Path};

/// One archive entry's full path, root-first. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct EntryPath(Vec<String>);

impl EntryPath {
    pub fn new<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            None
        } else {
            Some(Self(segments))
        }
    }

    /// Builds a path from the normal components of `path`. Root, `.` and `..`
    /// components are dropped.
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::new(path.components().filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        }))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn name(&self) -> &str {
        // non-empty by construction
        &self.0[self.0.len() - 1]
    }
}

impl TryFrom<Vec<String>> for EntryPath {
    type Error = String;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(segments).ok_or_else(|| "entry path must not be empty".to_string())
    }
}

impl From<EntryPath> for Vec<String> {
    fn from(path: EntryPath) -> Self {
        path.0
    }
}

impl std::fmt::Display for EntryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// What the archive listing says about one explicit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Uncompressed size in bytes; zero for directories
    pub size: u64,
    pub is_dir: bool,
}

impl EntryMeta {
    pub fn file(size: u64) -> Self {
        Self {
            size,
            is_dir: false,
        }
    }

    pub fn dir() -> Self {
        Self {
            size: 0,
            is_dir: true,
        }
    }
}

/// Hierarchical view of the flat entry stream.
///
/// Children keep the order in which they were first inserted, which follows
/// the archive's own listing order. Nodes created only as parents of deeper
/// entries carry no [`EntryMeta`]. Trees only grow; a new session starts from
/// [`PathTree::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTree {
    entry: Option<EntryMeta>,
    order: Vec<String>,
    children: HashMap<String, PathTree>,
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descends one segment at a time, creating missing children, and marks
    /// the last node with `meta`.
    ///
    /// Inserting an existing path leaves the tree unchanged. The first
    /// metadata recorded for a node is kept.
    pub fn insert(&mut self, path: &EntryPath, meta: EntryMeta) {
        let mut node = self;
        for segment in path.segments() {
            if !node.children.contains_key(segment) {
                node.order.push(segment.clone());
            }
            node = node.children.entry(segment.clone()).or_default();
        }
        node.entry.get_or_insert(meta);
    }

    /// Metadata of the entry this node was listed as, if it was listed.
    pub fn entry(&self) -> Option<&EntryMeta> {
        self.entry.as_ref()
    }

    /// Explicit directory entries, and any node with children.
    pub fn is_dir(&self) -> bool {
        self.entry.map_or(true, |meta| meta.is_dir) || !self.children.is_empty()
    }

    fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Child keys in insertion order.
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn child(&self, key: &str) -> Option<&PathTree> {
        self.children.get(key)
    }

    pub fn get(&self, path: &EntryPath) -> Option<&PathTree> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    pub fn reset(&mut self) {
        self.entry = None;
        self.order.clear();
        self.children.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of nodes below this one.
    pub fn node_count(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.node_count())
            .sum()
    }

    /// Depth-first pre-order listing of `(depth, name)`, depth starting at 1.
    pub fn walk(&self) -> Vec<(usize, &str)> {
        let mut out = Vec::with_capacity(self.node_count());
        self.walk_into(1, &mut out);
        out
    }

    fn walk_into<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a str)>) {
        for key in &self.order {
            out.push((depth, key.as_str()));
            if let Some(child) = self.children.get(key) {
                child.walk_into(depth + 1, out);
            }
        }
    }
}

/// Directories serialize as a map of their children in insertion order, files
/// as their size.
impl Serialize for PathTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_file() {
            let size = self.entry.map_or(0, |meta| meta.size);
            return serializer.serialize_u64(size);
        }
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for key in &self.order {
            if let Some(child) = self.children.get(key) {
                map.serialize_entry(key, child)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> EntryPath {
        EntryPath::new(segments.iter().copied()).unwrap()
    }

    fn add_file(tree: &mut PathTree, segments: &[&str]) {
        tree.insert(&path(segments), EntryMeta::file(1));
    }

    #[test]
    fn test_entry_path_rejects_empty() {
        assert!(EntryPath::new(Vec::<String>::new()).is_none());
        assert!(EntryPath::from_path(Path::new("/")).is_none());
        assert!(serde_json::from_str::<EntryPath>("[]").is_err());
    }

    #[test]
    fn test_entry_path_from_path_keeps_normal_components() {
        let p = EntryPath::from_path(Path::new("/docs/./img/logo.png")).unwrap();
        assert_eq!(p.segments(), ["docs", "img", "logo.png"]);
        assert_eq!(p.name(), "logo.png");
        assert_eq!(p.to_string(), "docs/img/logo.png");
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tree = PathTree::new();
        add_file(&mut tree, &["a", "b.txt"]);
        let once = tree.clone();
        add_file(&mut tree, &["a", "b.txt"]);
        add_file(&mut tree, &["a", "b.txt"]);

        assert_eq!(tree, once);
        assert_eq!(tree.keys(), ["a"]);
        assert_eq!(tree.child("a").unwrap().keys(), ["b.txt"]);
        assert_eq!(tree.node_count(), 2);
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut tree = PathTree::new();
        add_file(&mut tree, &["x"]);
        add_file(&mut tree, &["y"]);
        add_file(&mut tree, &["x", "1"]);

        assert_eq!(tree.keys(), ["x", "y"]);
        assert_eq!(tree.child("x").unwrap().keys(), ["1"]);
        assert!(tree.child("y").unwrap().is_empty());
    }

    #[test]
    fn test_order_is_not_alphabetical() {
        let mut tree = PathTree::new();
        for name in ["zeta", "alpha", "mid"] {
            add_file(&mut tree, &[name]);
        }
        assert_eq!(tree.keys(), ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_get_and_walk() {
        let mut tree = PathTree::new();
        add_file(&mut tree, &["a", "b", "c"]);
        add_file(&mut tree, &["a", "b", "c", "d"]);
        add_file(&mut tree, &["a", "f"]);
        add_file(&mut tree, &["u"]);

        assert!(tree.get(&path(&["a", "b", "c", "d"])).is_some());
        assert!(tree.get(&path(&["a", "x"])).is_none());
        assert_eq!(
            tree.walk(),
            vec![(1, "a"), (2, "b"), (3, "c"), (4, "d"), (2, "f"), (1, "u")]
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut tree = PathTree::new();
        add_file(&mut tree, &["a", "b"]);
        tree.reset();
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 0);
        assert_eq!(tree, PathTree::new());
    }

    #[test]
    fn test_serializes_in_insertion_order() {
        let mut tree = PathTree::new();
        tree.insert(&path(&["docs", "readme.txt"]), EntryMeta::file(12));
        tree.insert(&path(&["bin"]), EntryMeta::dir());
        tree.insert(&path(&["docs", "img.png"]), EntryMeta::file(3));

        let json = serde_json::to_string(&tree).unwrap();
        assert_eq!(json, r#"{"docs":{"readme.txt":12,"img.png":3},"bin":{}}"#);
    }

    #[test]
    fn test_empty_dir_and_empty_file_differ() {
        let mut with_dir = PathTree::new();
        with_dir.insert(&path(&["empty"]), EntryMeta::dir());
        let mut with_file = PathTree::new();
        with_file.insert(&path(&["empty"]), EntryMeta::file(0));

        assert_ne!(with_dir, with_file);
        assert!(with_dir.child("empty").unwrap().is_dir());
        assert!(!with_file.child("empty").unwrap().is_dir());
        assert_eq!(serde_json::to_string(&with_dir).unwrap(), r#"{"empty":{}}"#);
        assert_eq!(serde_json::to_string(&with_file).unwrap(), r#"{"empty":0}"#);
    }

    #[test]
    fn test_entry_meta_is_kept_on_reinsert() {
        let mut tree = PathTree::new();
        tree.insert(&path(&["a", "b.txt"]), EntryMeta::file(7));
        let once = tree.clone();
        tree.insert(&path(&["a", "b.txt"]), EntryMeta::file(7));
        assert_eq!(tree, once);

        // a parent created implicitly has no metadata until it is listed
        assert!(tree.child("a").unwrap().entry().is_none());
        assert!(tree.child("a").unwrap().is_dir());
        tree.insert(&path(&["a"]), EntryMeta::dir());
        assert_eq!(tree.child("a").unwrap().entry(), Some(&EntryMeta::dir()));
        assert_eq!(tree.child("a").unwrap().keys(), ["b.txt"]);
        assert_eq!(
            tree.get(&path(&["a", "b.txt"])).unwrap().entry(),
            Some(&EntryMeta::file(7))
        );
    }
}
