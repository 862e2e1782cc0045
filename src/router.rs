//! # Topic Router
//!
//! `TopicRouter` indexes `(pattern, subscription)` pairs in a trie keyed by
//! `/`-separated token, with special edges for the two wildcard tokens `*`
//! (exactly one token) and `#` (one-or-more trailing tokens, terminal only).
//! `route(topic)` walks the trie once, in `O(depth + matches)`, and returns
//! every subscription whose pattern matches.
//!
//! Subscribe/unsubscribe are copy-on-write: each rebuilds a new root (sharing
//! untouched subtrees via `Arc`) and publishes it through an `ArcSwap`, so
//! concurrent `route` calls never block behind a mutation and never observe
//! a half-built trie.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque handle returned by `subscribe`, required by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    pattern: String,
}

/// One node per token level. `exact` holds literal-token children, `single`
/// is the `*` edge, `multi` (set when this node was reached by a trailing
/// `#`) holds subscriptions that match this node and every node beneath it.
#[derive(Default)]
struct Node {
    exact: HashMap<String, Arc<Node>>,
    single: Option<Arc<Node>>,
    multi_subs: Vec<Subscription>,
    here_subs: Vec<Subscription>,
}

impl Node {
    fn clone_shallow(&self) -> Self {
        Node {
            exact: self.exact.clone(),
            single: self.single.clone(),
            multi_subs: self.multi_subs.clone(),
            here_subs: self.here_subs.clone(),
        }
    }
}

/// Pattern-matched topic to subscription registry. Topics and patterns are
/// split on `/`; empty segments (leading/trailing/doubled slashes) are
/// rejected by [`TopicRouter::subscribe`] to keep the trie well-formed.
pub struct TopicRouter {
    root: ArcSwap<Node>,
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            root: ArcSwap::from(Arc::new(Node::default())),
        }
    }

    /// Register `handler`'s pattern. `#` may only appear as the final token.
    /// Returns the new subscription's id.
    pub fn subscribe(&self, pattern: &str) -> Result<SubscriptionId, crate::error::BusError> {
        let tokens = split_tokens(pattern)?;
        let id = SubscriptionId::new();
        let sub = Subscription {
            id,
            pattern: pattern.to_string(),
        };

        let mut new_root = self.root.load().clone_shallow();
        insert(&mut new_root, &tokens, sub);
        self.root.store(Arc::new(new_root));
        Ok(id)
    }

    /// Remove the subscription with the given id, wherever it was inserted.
    /// `O(size of trie)` — acceptable since unsubscribe is rare relative to
    /// `route`, and a full rebuild keeps the removal logic trivially correct
    /// (no partial-subtree bookkeeping to get wrong under concurrent calls).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let old_root = self.root.load_full();
        let mut new_root = Node::default();
        let mut found = false;
        rebuild_without(&old_root, &mut new_root, id, &mut found);
        if found {
            self.root.store(Arc::new(new_root));
        }
        found
    }

    /// All subscription ids whose pattern matches `topic`, each returned at
    /// most once even if a subscriber's pattern matches via more than one
    /// trie edge.
    pub fn route(&self, topic: &str) -> Vec<SubscriptionId> {
        let tokens: Vec<&str> = topic.split('/').collect();
        let root = self.root.load();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        collect(&root, &tokens, &mut seen, &mut out);
        out
    }

    /// Total number of registered subscriptions (not trie nodes).
    pub fn len(&self) -> usize {
        let root = self.root.load();
        let mut count = 0;
        count_subs(&root, &mut count);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn split_tokens(pattern: &str) -> Result<Vec<&str>, crate::error::BusError> {
    if pattern.is_empty() {
        return Err(crate::error::BusError::TypeError(
            "topic pattern must not be empty".to_string(),
        ));
    }
    let tokens: Vec<&str> = pattern.split('/').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(crate::error::BusError::TypeError(format!(
            "topic pattern '{pattern}' has an empty segment"
        )));
    }
    for (i, t) in tokens.iter().enumerate() {
        if *t == "#" && i != tokens.len() - 1 {
            return Err(crate::error::BusError::TypeError(format!(
                "'#' must be the terminal token in pattern '{pattern}'"
            )));
        }
    }
    Ok(tokens)
}

fn insert(node: &mut Node, tokens: &[&str], sub: Subscription) {
    match tokens.split_first() {
        None => node.here_subs.push(sub),
        Some((&"#", _)) => node.multi_subs.push(sub),
        Some((&"*", rest)) => {
            let child = node.single.take().map(|a| (*a).clone_shallow()).unwrap_or_default();
            let mut child = child;
            insert(&mut child, rest, sub);
            node.single = Some(Arc::new(child));
        }
        Some((token, rest)) => {
            let child = node
                .exact
                .get(*token)
                .map(|a| (**a).clone_shallow())
                .unwrap_or_default();
            let mut child = child;
            insert(&mut child, rest, sub);
            node.exact.insert(token.to_string(), Arc::new(child));
        }
    }
}

fn rebuild_without(src: &Node, dst: &mut Node, id: SubscriptionId, found: &mut bool) {
    for sub in &src.here_subs {
        if sub.id == id {
            *found = true;
        } else {
            dst.here_subs.push(sub.clone());
        }
    }
    for sub in &src.multi_subs {
        if sub.id == id {
            *found = true;
        } else {
            dst.multi_subs.push(sub.clone());
        }
    }
    if let Some(single) = &src.single {
        let mut child = Node::default();
        rebuild_without(single, &mut child, id, found);
        dst.single = Some(Arc::new(child));
    }
    for (token, child) in &src.exact {
        let mut new_child = Node::default();
        rebuild_without(child, &mut new_child, id, found);
        dst.exact.insert(token.clone(), Arc::new(new_child));
    }
}

fn collect(node: &Node, tokens: &[&str], seen: &mut std::collections::HashSet<SubscriptionId>, out: &mut Vec<SubscriptionId>) {
    // `#` requires "one or more" trailing tokens beyond the literal prefix
    // that led to this node, so it only matches while at least one token of
    // the topic remains unconsumed here — an exact prefix with nothing left
    // over (e.g. topic "sensor" against pattern "sensor/#") must not match.
    if !tokens.is_empty() {
        for sub in &node.multi_subs {
            if seen.insert(sub.id) {
                out.push(sub.id);
            }
        }
    }

    match tokens.split_first() {
        None => {
            for sub in &node.here_subs {
                if seen.insert(sub.id) {
                    out.push(sub.id);
                }
            }
        }
        Some((head, rest)) => {
            if let Some(child) = node.exact.get(*head) {
                collect(child, rest, seen, out);
            }
            if let Some(child) = &node.single {
                collect(child, rest, seen, out);
            }
        }
    }
}

fn count_subs(node: &Node, count: &mut usize) {
    *count += node.here_subs.len() + node.multi_subs.len();
    if let Some(single) = &node.single {
        count_subs(single, count);
    }
    for child in node.exact.values() {
        count_subs(child, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let router = TopicRouter::new();
        let id = router.subscribe("sensor/room1/temp").unwrap();
        assert_eq!(router.route("sensor/room1/temp"), vec![id]);
        assert!(router.route("sensor/room1/humidity").is_empty());
    }

    #[test]
    fn single_wildcard_matches_one_token() {
        let router = TopicRouter::new();
        let id = router.subscribe("sensor/*/temp").unwrap();
        assert_eq!(router.route("sensor/room1/temp"), vec![id]);
        assert!(router.route("sensor/room1/room2/temp").is_empty());
        assert!(router.route("sensor/temp").is_empty());
    }

    #[test]
    fn hash_wildcard_matches_one_or_more_trailing_tokens() {
        let router = TopicRouter::new();
        let id = router.subscribe("sensor/#").unwrap();
        assert_eq!(router.route("sensor/room1"), vec![id]);
        assert_eq!(router.route("sensor/room1/temp"), vec![id]);
        assert!(router.route("sensor").is_empty());
    }

    #[test]
    fn hash_must_be_terminal() {
        let router = TopicRouter::new();
        assert!(router.subscribe("sensor/#/temp").is_err());
    }

    #[test]
    fn wildcard_fan_out_matches_every_subscriber_exactly_once() {
        let router = TopicRouter::new();
        let a = router.subscribe("sensor/#").unwrap();
        let b = router.subscribe("sensor/room1/#").unwrap();
        let c = router.subscribe("sensor/room1/temp").unwrap();

        let mut matched = router.route("sensor/room1/temp");
        matched.sort_by_key(|id| id.0);
        let mut expected = vec![a, b, c];
        expected.sort_by_key(|id| id.0);
        assert_eq!(matched, expected);
    }

    #[test]
    fn unsubscribe_removes_the_pattern() {
        let router = TopicRouter::new();
        let id = router.subscribe("sensor/room1/temp").unwrap();
        assert!(router.unsubscribe(id));
        assert!(router.route("sensor/room1/temp").is_empty());
        assert!(!router.unsubscribe(id));
    }

    #[test]
    fn empty_pattern_segment_is_rejected() {
        let router = TopicRouter::new();
        assert!(router.subscribe("sensor//temp").is_err());
    }

    #[test]
    fn len_tracks_live_subscriptions() {
        let router = TopicRouter::new();
        assert!(router.is_empty());
        let a = router.subscribe("a/b").unwrap();
        let _b = router.subscribe("a/*").unwrap();
        assert_eq!(router.len(), 2);
        router.unsubscribe(a);
        assert_eq!(router.len(), 1);
    }
}
