//! Literal-segment path trie
//!
//! One trie exists per routable method. Edges are labeled with one path
//! segment each, leading slash included, so `/api/users` occupies two
//! nodes below the root. A node's terminal handler is independent of its
//! children: `/a` and `/a/b` can both be registered without conflict.

use crate::{errors::PathError, router::table::Handler};
use std::collections::HashMap;

const FORBIDDEN: [char; 3] = [';', ',', '.'];

// Rejects paths the router will never serve. Called by both `add` and
// `find`: a forbidden path can neither be registered nor looked up, which
// is what lets the dispatcher answer such request targets as not-found.
//
// The dot rule is deliberate and stricter than it may look: a dot anywhere
// in the path is rejected, so file-extension-looking segments like
// `/logo.png` cannot be routes.
pub(crate) fn validate_path(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !path.starts_with('/') {
        return Err(PathError::NoLeadingSlash);
    }
    if let Some(c) = path.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(PathError::Forbidden(c));
    }
    Ok(())
}

#[derive(Default)]
pub(crate) struct TrieNode {
    children: HashMap<String, TrieNode>,
    handler: Option<Handler>,
}

impl TrieNode {
    // `path` is the not-yet-consumed remainder, always starting with `/`.
    // A bare `/` means the walk ends at this node.
    fn add(&mut self, path: &str, handler: Handler) {
        if path == "/" {
            self.handler = Some(handler);
            return;
        }

        let (first, remain) = split_first_segment(path);
        let child = self.children.entry(format!("/{first}")).or_default();
        match remain {
            Some(r) => child.add(&format!("/{r}"), handler),
            None => child.add("/", handler),
        }
    }

    fn find(&self, path: &str) -> Option<&Handler> {
        if path == "/" {
            return self.handler.as_ref();
        }

        let (first, remain) = split_first_segment(path);
        let child = self.children.get(&format!("/{first}"))?;
        match remain {
            Some(r) => child.find(&format!("/{r}")),
            None => child.find("/"),
        }
    }
}

// First segment after the leading slash, plus the remainder after the next
// slash if any. `/a/b/c` -> ("a", Some("b/c")); `/a` -> ("a", None).
#[inline]
fn split_first_segment(path: &str) -> (&str, Option<&str>) {
    match path[1..].split_once('/') {
        Some((first, remain)) => (first, Some(remain)),
        None => (&path[1..], None),
    }
}

/// Path-to-handler trie for a single method.
#[derive(Default)]
pub(crate) struct PathTrie {
    root: TrieNode,
}

impl PathTrie {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` at `path`, overwriting any previous handler at
    /// the same path. Fails only on validation.
    pub(crate) fn add(&mut self, path: &str, handler: Handler) -> Result<(), PathError> {
        validate_path(path)?;
        self.root.add(path, handler);
        Ok(())
    }

    /// Walks the trie for `path`. `Ok(None)` means no handler registered
    /// there - the absent case the dispatcher turns into a 404.
    pub(crate) fn find(&self, path: &str) -> Result<Option<&Handler>, PathError> {
        validate_path(path)?;
        Ok(self.root.find(path))
    }
}

#[cfg(test)]
mod trie_self {
    use super::*;
    use crate::router::table::handler;
    use std::sync::Arc;

    fn noop() -> Handler {
        handler(|_req, resp| async move { resp })
    }

    fn found(trie: &PathTrie, path: &str) -> bool {
        trie.find(path).unwrap().is_some()
    }

    #[test]
    fn add_then_find() {
        #[rustfmt::skip]
        let paths = [
            "/",
            "/200",
            "/200/test",
            "/api/users/all",
            "/a/",
        ];

        for path in paths {
            let mut trie = PathTrie::new();
            let h = noop();
            trie.add(path, h.clone()).unwrap();
            let got = trie.find(path).unwrap().expect("registered path must resolve");
            assert!(Arc::ptr_eq(got, &h), "path {path:?}");
        }
    }

    #[test]
    fn validation() {
        #[rustfmt::skip]
        let cases = [
            ("",          Err(PathError::Empty)),
            ("200",       Err(PathError::NoLeadingSlash)),
            ("/a;b",      Err(PathError::Forbidden(';'))),
            ("/a,b",      Err(PathError::Forbidden(','))),
            ("/logo.png", Err(PathError::Forbidden('.'))),
            ("/.",        Err(PathError::Forbidden('.'))),
            ("/a/b",      Ok(())),
            ("/",         Ok(())),
        ];

        for (path, expected) in cases {
            assert_eq!(validate_path(path), expected, "path {path:?}");
        }
    }

    #[test]
    fn find_rejects_forbidden_paths_too() {
        let mut trie = PathTrie::new();
        trie.add("/a", noop()).unwrap();
        assert!(matches!(
            trie.find("/a.b"),
            Err(PathError::Forbidden('.'))
        ));
        assert_eq!(
            trie.add("/x.y", noop()).unwrap_err(),
            PathError::Forbidden('.')
        );
    }

    #[test]
    fn missing_path_is_absent_not_error() {
        let mut trie = PathTrie::new();
        trie.add("/a/b", noop()).unwrap();
        assert!(!found(&trie, "/a/c"));
        assert!(!found(&trie, "/b"));
        assert!(!found(&trie, "/a/b/c"));
    }

    #[test]
    fn prefix_is_not_registered_implicitly() {
        // Registering /a/b and /a/c creates an /a node, but /a itself has
        // no terminal handler until separately registered.
        let mut trie = PathTrie::new();
        trie.add("/a/b", noop()).unwrap();
        trie.add("/a/c", noop()).unwrap();
        assert!(!found(&trie, "/a"));

        let h = noop();
        trie.add("/a", h.clone()).unwrap();
        assert!(Arc::ptr_eq(trie.find("/a").unwrap().unwrap(), &h));
        assert!(found(&trie, "/a/b"));
    }

    #[test]
    fn terminal_and_children_coexist() {
        let mut trie = PathTrie::new();
        let ha = noop();
        let hab = noop();
        trie.add("/a", ha.clone()).unwrap();
        trie.add("/a/b", hab.clone()).unwrap();
        assert!(Arc::ptr_eq(trie.find("/a").unwrap().unwrap(), &ha));
        assert!(Arc::ptr_eq(trie.find("/a/b").unwrap().unwrap(), &hab));
    }

    #[test]
    fn reregistration_overwrites() {
        let mut trie = PathTrie::new();
        let h1 = noop();
        let h2 = noop();
        trie.add("/dup", h1).unwrap();
        trie.add("/dup", h2.clone()).unwrap();
        assert!(Arc::ptr_eq(trie.find("/dup").unwrap().unwrap(), &h2));
    }

    #[test]
    fn trailing_slash_is_the_same_node() {
        let mut trie = PathTrie::new();
        let h = noop();
        trie.add("/a/", h.clone()).unwrap();
        assert!(Arc::ptr_eq(trie.find("/a").unwrap().unwrap(), &h));
        assert!(Arc::ptr_eq(trie.find("/a/").unwrap().unwrap(), &h));
    }
}
