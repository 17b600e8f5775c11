//! Threading of a post's comments into a reply forest.
//!
//! Rows are filtered by [`is_visible`] first and linked second, so a reply
//! whose parent was filtered out surfaces as a root marked `orphaned`
//! instead of disappearing.
//!
//! A node carries two depths. `depth` is its nesting in the rendered forest
//! and restarts at 0 for orphans. `thread_depth` follows the stored parent
//! chain over every row, hidden ones included, and is what the reply cap is
//! checked against.

use std::collections::HashMap;

use crate::entity::comment;

/// Deepest level that still offers a reply action. Roots sit at depth 0.
pub const MAX_REPLY_DEPTH: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct CommentNode {
    pub comment: comment::Model,
    pub depth: usize,
    /// `None` when the stored chain loops.
    pub thread_depth: Option<usize>,
    pub orphaned: bool,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn can_reply(&self) -> bool {
        self.thread_depth.map_or(false, |d| d < MAX_REPLY_DEPTH)
    }
}

/// Approved rows are public; unapproved rows are only shown to their author.
pub fn is_visible(row: &comment::Model, viewer: Option<i32>) -> bool {
    row.approved || viewer == Some(row.author_id)
}

pub fn build_comment_tree(rows: Vec<comment::Model>, viewer: Option<i32>) -> Vec<CommentNode> {
    let parents = parent_links(&rows);
    let visible: Vec<comment::Model> = rows.into_iter().filter(|r| is_visible(r, viewer)).collect();
    let thread: Vec<Option<usize>> = visible.iter().map(|r| chain_depth(&parents, r.id)).collect();

    let mut index: HashMap<i32, usize> = HashMap::with_capacity(visible.len());
    for (i, row) in visible.iter().enumerate() {
        index.entry(row.id).or_insert(i);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); visible.len()];
    let mut roots = Vec::new();
    let mut orphaned = vec![false; visible.len()];
    for (i, row) in visible.iter().enumerate() {
        let parent = row
            .parent_id
            .and_then(|pid| index.get(&pid).copied())
            .filter(|&p| p != i);
        match parent {
            Some(p) => children[p].push(i),
            None => {
                orphaned[i] = row.parent_id.is_some();
                roots.push(i);
            }
        }
    }

    let mut slots: Vec<Option<comment::Model>> = visible.into_iter().map(Some).collect();
    let mut forest: Vec<(usize, CommentNode)> = Vec::with_capacity(roots.len());
    for i in roots {
        if let Some(node) = assemble(i, 0, &mut slots, &children, &orphaned, &thread) {
            forest.push((i, node));
        }
    }

    // Rows still unplaced sit on a parent cycle; promote them so none are lost.
    for i in 0..slots.len() {
        if slots[i].is_some() {
            if let Some(mut node) = assemble(i, 0, &mut slots, &children, &orphaned, &thread) {
                node.orphaned = true;
                forest.push((i, node));
            }
        }
    }

    forest.sort_by_key(|(i, _)| *i);
    forest.into_iter().map(|(_, node)| node).collect()
}

fn assemble(
    i: usize,
    depth: usize,
    slots: &mut [Option<comment::Model>],
    children: &[Vec<usize>],
    orphaned: &[bool],
    thread: &[Option<usize>],
) -> Option<CommentNode> {
    let comment = slots[i].take()?;
    let replies = children[i]
        .iter()
        .filter_map(|&c| assemble(c, depth + 1, slots, children, orphaned, thread))
        .collect();
    Some(CommentNode {
        comment,
        depth,
        thread_depth: thread[i],
        orphaned: orphaned[i],
        replies,
    })
}

/// Depth of `id` within `rows`, following parent links. `None` when the id
/// is unknown or its chain loops.
pub fn depth_of(rows: &[comment::Model], id: i32) -> Option<usize> {
    chain_depth(&parent_links(rows), id)
}

fn parent_links(rows: &[comment::Model]) -> HashMap<i32, Option<i32>> {
    rows.iter().map(|r| (r.id, r.parent_id)).collect()
}

fn chain_depth(parents: &HashMap<i32, Option<i32>>, id: i32) -> Option<usize> {
    let mut current = *parents.get(&id)?;
    let mut depth = 0;
    while let Some(pid) = current {
        depth += 1;
        if depth > parents.len() {
            return None;
        }
        match parents.get(&pid) {
            Some(next) => current = *next,
            None => break,
        }
    }
    Some(depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: i32 = 7;
    const OTHER: i32 = 8;

    fn row(id: i32, parent_id: Option<i32>, approved: bool, author_id: i32) -> comment::Model {
        comment::Model {
            id,
            post_id: 1,
            author_id,
            parent_id,
            content: format!("মন্তব্য {}", id),
            approved,
            created: None,
            updated: None,
        }
    }

    fn ids(nodes: &[CommentNode]) -> Vec<i32> {
        nodes.iter().map(|n| n.comment.id).collect()
    }

    fn count(nodes: &[CommentNode]) -> usize {
        nodes.iter().map(|n| 1 + count(&n.replies)).sum()
    }

    fn sample() -> Vec<comment::Model> {
        vec![
            row(1, None, true, OTHER),
            row(2, Some(1), false, ME),
            row(3, Some(1), true, OTHER),
        ]
    }

    #[test]
    fn author_sees_own_pending_reply() {
        let forest = build_comment_tree(sample(), Some(ME));
        assert_eq!(ids(&forest), vec![1]);
        assert_eq!(ids(&forest[0].replies), vec![2, 3]);
        assert_eq!(forest[0].replies[0].depth, 1);
    }

    #[test]
    fn anonymous_viewer_sees_only_approved() {
        let forest = build_comment_tree(sample(), None);
        assert_eq!(ids(&forest), vec![1]);
        assert_eq!(ids(&forest[0].replies), vec![3]);
    }

    #[test]
    fn other_user_does_not_see_foreign_pending_rows() {
        let forest = build_comment_tree(sample(), Some(99));
        assert_eq!(count(&forest), 2);
    }

    #[test]
    fn reply_to_hidden_parent_becomes_orphan_root() {
        let rows = vec![
            row(1, None, false, OTHER),
            row(2, Some(1), true, OTHER),
            row(3, None, true, OTHER),
        ];
        let forest = build_comment_tree(rows, None);
        assert_eq!(ids(&forest), vec![2, 3]);
        assert!(forest[0].orphaned);
        assert!(!forest[1].orphaned);
        assert_eq!(forest[0].depth, 0);
    }

    #[test]
    fn reply_to_missing_parent_becomes_root() {
        let rows = vec![row(5, Some(404), true, OTHER)];
        let forest = build_comment_tree(rows, None);
        assert_eq!(ids(&forest), vec![5]);
        assert!(forest[0].orphaned);
    }

    #[test]
    fn roots_keep_fetch_order_and_children_keep_relative_order() {
        let rows = vec![
            row(10, None, true, OTHER),
            row(4, None, true, OTHER),
            row(11, Some(4), true, OTHER),
            row(12, Some(10), true, OTHER),
            row(9, Some(4), true, OTHER),
        ];
        let forest = build_comment_tree(rows, None);
        assert_eq!(ids(&forest), vec![10, 4]);
        assert_eq!(ids(&forest[0].replies), vec![12]);
        assert_eq!(ids(&forest[1].replies), vec![11, 9]);
    }

    #[test]
    fn every_visible_row_appears_exactly_once() {
        let rows = vec![
            row(1, None, true, OTHER),
            row(2, Some(1), true, ME),
            row(3, Some(2), false, ME),
            row(4, Some(3), true, OTHER),
            row(5, Some(9), false, OTHER),
            row(6, Some(5), true, OTHER),
        ];
        for viewer in [None, Some(ME), Some(OTHER)] {
            let expected: Vec<i32> = rows.iter().filter(|r| is_visible(r, viewer)).map(|r| r.id).collect();
            let forest = build_comment_tree(rows.clone(), viewer);
            let mut seen = Vec::new();
            fn walk(nodes: &[CommentNode], out: &mut Vec<i32>) {
                for n in nodes {
                    out.push(n.comment.id);
                    walk(&n.replies, out);
                }
            }
            walk(&forest, &mut seen);
            seen.sort();
            let mut expected = expected;
            expected.sort();
            assert_eq!(seen, expected, "viewer {:?}", viewer);
        }
    }

    #[test]
    fn parent_cycle_does_not_lose_rows() {
        let rows = vec![
            row(1, Some(2), true, OTHER),
            row(2, Some(1), true, OTHER),
            row(3, Some(3), true, OTHER),
        ];
        let forest = build_comment_tree(rows, None);
        assert_eq!(count(&forest), 3);
        // self-parented row is treated as a root
        assert!(ids(&forest).contains(&3));
    }

    #[test]
    fn reply_affordance_stops_at_max_depth() {
        let rows = vec![
            row(1, None, true, OTHER),
            row(2, Some(1), true, OTHER),
            row(3, Some(2), true, OTHER),
            row(4, Some(3), true, OTHER),
        ];
        let forest = build_comment_tree(rows, None);
        let deepest = &forest[0].replies[0].replies[0].replies[0];
        assert_eq!(deepest.depth, 3);
        assert!(!deepest.can_reply());
        assert!(forest[0].replies[0].replies[0].can_reply());
    }

    #[test]
    fn reply_cap_counts_hidden_ancestors() {
        let rows = vec![
            row(1, None, true, OTHER),
            row(2, Some(1), false, OTHER),
            row(3, Some(2), true, OTHER),
            row(4, Some(3), true, OTHER),
        ];
        let forest = build_comment_tree(rows.clone(), Some(ME));
        assert_eq!(ids(&forest), vec![1, 3]);
        let orphan = &forest[1];
        assert!(orphan.orphaned);
        assert_eq!((orphan.depth, orphan.thread_depth), (0, Some(2)));
        assert!(orphan.can_reply());

        let leaf = &orphan.replies[0];
        assert_eq!((leaf.depth, leaf.thread_depth), (1, Some(3)));
        assert!(!leaf.can_reply());
        assert_eq!(depth_of(&rows, leaf.comment.id), leaf.thread_depth);
    }

    #[test]
    fn depth_follows_parent_chain() {
        let rows = vec![
            row(1, None, true, OTHER),
            row(2, Some(1), true, OTHER),
            row(3, Some(2), false, OTHER),
        ];
        assert_eq!(depth_of(&rows, 1), Some(0));
        assert_eq!(depth_of(&rows, 3), Some(2));
        assert_eq!(depth_of(&rows, 42), None);

        let looped = vec![row(1, Some(2), true, OTHER), row(2, Some(1), true, OTHER)];
        assert_eq!(depth_of(&looped, 1), None);
    }
}
