//! Red-black sibling trees
//!
//! The children of a storage form a binary search tree threaded through the
//! `left`/`right` links of their directory entries, ordered by
//! [`compare_names`](super::entry::compare_names). Nodes carry no parent link,
//! so insertion keeps the path from the root on a stack while fixing colors.
//!
//! Removal is done by rebuilding the remaining siblings into a perfectly
//! balanced tree, which is always a valid red-black tree.

use super::entry::{Color, NOSTREAM};
use std::cmp::Ordering;

/// Link and color access to the nodes of a sibling tree
pub trait TreeSlots {
    fn left(&self, node: u32) -> u32;
    fn right(&self, node: u32) -> u32;
    fn color(&self, node: u32) -> Color;
    fn set_left(&mut self, node: u32, to: u32);
    fn set_right(&mut self, node: u32, to: u32);
    fn set_color(&mut self, node: u32, color: Color);

    /// Order of two nodes by name
    fn compare(&self, a: u32, b: u32) -> Ordering;
}

/// Insert `node` into the tree rooted at `root`, returning the new root
pub fn insert<T: TreeSlots>(slots: &mut T, root: u32, node: u32) -> u32 {
    slots.set_left(node, NOSTREAM);
    slots.set_right(node, NOSTREAM);
    slots.set_color(node, Color::Red);

    if root == NOSTREAM {
        slots.set_color(node, Color::Black);
        return node;
    }

    let mut path = Vec::new();
    let mut current = root;
    loop {
        path.push(current);
        if slots.compare(node, current) == Ordering::Less {
            let next = slots.left(current);
            if next == NOSTREAM {
                slots.set_left(current, node);
                break;
            }
            current = next;
        } else {
            let next = slots.right(current);
            if next == NOSTREAM {
                slots.set_right(current, node);
                break;
            }
            current = next;
        }
    }

    let mut root = root;
    let mut x = node;
    while let Some(&parent) = path.last() {
        if slots.color(parent) == Color::Black {
            break;
        }
        // A red root only turns up in loaded trees; blackening it is enough
        let Some(grand) = path.len().checked_sub(2).map(|i| path[i]) else {
            break;
        };
        let parent_is_left = slots.left(grand) == parent;
        let uncle = if parent_is_left {
            slots.right(grand)
        } else {
            slots.left(grand)
        };

        if uncle != NOSTREAM && slots.color(uncle) == Color::Red {
            slots.set_color(parent, Color::Black);
            slots.set_color(uncle, Color::Black);
            slots.set_color(grand, Color::Red);
            x = grand;
            path.truncate(path.len() - 2);
            continue;
        }

        let great = path.len().checked_sub(3).map(|i| path[i]);
        let top = if parent_is_left {
            if slots.right(parent) == x {
                let pivot = rotate_left(slots, parent);
                slots.set_left(grand, pivot);
            }
            rotate_right(slots, grand)
        } else {
            if slots.left(parent) == x {
                let pivot = rotate_right(slots, parent);
                slots.set_right(grand, pivot);
            }
            rotate_left(slots, grand)
        };
        slots.set_color(top, Color::Black);
        slots.set_color(grand, Color::Red);

        match great {
            Some(great) if slots.left(great) == grand => slots.set_left(great, top),
            Some(great) => slots.set_right(great, top),
            None => root = top,
        }
        break;
    }

    slots.set_color(root, Color::Black);
    root
}

/// Rotate the subtree at `node` left, returning its new top
fn rotate_left<T: TreeSlots>(slots: &mut T, node: u32) -> u32 {
    let pivot = slots.right(node);
    slots.set_right(node, slots.left(pivot));
    slots.set_left(pivot, node);
    pivot
}

/// Rotate the subtree at `node` right, returning its new top
fn rotate_right<T: TreeSlots>(slots: &mut T, node: u32) -> u32 {
    let pivot = slots.left(node);
    slots.set_left(node, slots.right(pivot));
    slots.set_right(pivot, node);
    pivot
}

/// Nodes of the tree in sibling order
pub fn in_order<T: TreeSlots>(slots: &T, root: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut stack = Vec::new();
    let mut current = root;
    while current != NOSTREAM || !stack.is_empty() {
        while current != NOSTREAM {
            stack.push(current);
            current = slots.left(current);
        }
        if let Some(node) = stack.pop() {
            out.push(node);
            current = slots.right(node);
        }
    }
    out
}

/// Link already sorted nodes into a balanced tree, returning its root
///
/// Every level that is completely filled is black and the nodes of a
/// partially filled bottom level are red, so all paths carry the same number
/// of black nodes.
pub fn rebuild<T: TreeSlots>(slots: &mut T, sorted: &[u32]) -> u32 {
    let full_levels = usize::BITS - (sorted.len() + 1).leading_zeros() - 1;
    build(slots, sorted, 0, full_levels)
}

fn build<T: TreeSlots>(slots: &mut T, sorted: &[u32], depth: u32, full_levels: u32) -> u32 {
    if sorted.is_empty() {
        return NOSTREAM;
    }
    let mid = sorted.len() / 2;
    let node = sorted[mid];
    let left = build(slots, &sorted[..mid], depth + 1, full_levels);
    let right = build(slots, &sorted[mid + 1..], depth + 1, full_levels);
    slots.set_left(node, left);
    slots.set_right(node, right);
    let color = if depth < full_levels {
        Color::Black
    } else {
        Color::Red
    };
    slots.set_color(node, color);
    node
}

/// Check ordering and red-black balance, returning the black height
pub fn check<T: TreeSlots>(slots: &T, root: u32) -> Result<usize, String> {
    let nodes = in_order(slots, root);
    for pair in nodes.windows(2) {
        if slots.compare(pair[0], pair[1]) != Ordering::Less {
            return Err(format!("nodes {} and {} out of order", pair[0], pair[1]));
        }
    }
    if root != NOSTREAM && slots.color(root) != Color::Black {
        return Err(format!("root {} is red", root));
    }
    black_height(slots, root)
}

fn black_height<T: TreeSlots>(slots: &T, node: u32) -> Result<usize, String> {
    if node == NOSTREAM {
        return Ok(1);
    }
    let (left, right) = (slots.left(node), slots.right(node));
    if slots.color(node) == Color::Red {
        for child in [left, right] {
            if child != NOSTREAM && slots.color(child) == Color::Red {
                return Err(format!("red node {} has red child {}", node, child));
            }
        }
    }
    let lh = black_height(slots, left)?;
    let rh = black_height(slots, right)?;
    if lh != rh {
        return Err(format!("unequal black heights {} and {} below {}", lh, rh, node));
    }
    Ok(lh + usize::from(slots.color(node) == Color::Black))
}
