use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::models::{Category, CategoryEdge, CategoryId, CategoryTree, MAX_CATEGORY_LEVEL};

/// Level a new child acquires under `parent_level`, or `DepthExceeded` when
/// the parent is already at the maximum depth.
pub fn child_level(parent_level: i32) -> Result<i32> {
    if parent_level >= MAX_CATEGORY_LEVEL {
        return Err(LibError::depth_exceeded(
            "Cannot attach a child to a category at the maximum depth",
            anyhow!("parent is at level {}", parent_level),
        ));
    }
    Ok(parent_level + 1)
}

/// A reparent is a lateral move: roots stay rootless and the new parent must
/// sit exactly one level above the node.
pub fn ensure_reparent_allowed(node_level: i32, new_parent_level: i32) -> Result<()> {
    if node_level == 1 {
        return Err(LibError::invalid_reparent(
            "reparent_root",
            "Root categories cannot be given a parent",
            anyhow!("attempted to reparent a level-1 category"),
        ));
    }
    if new_parent_level != node_level - 1 {
        return Err(LibError::invalid_reparent(
            "level_mismatch",
            "New parent must be exactly one level above the category",
            anyhow!(
                "node level {} cannot attach under parent level {}",
                node_level,
                new_parent_level
            ),
        ));
    }
    Ok(())
}

/// Level-1/2 categories with recorded children cannot be deleted; the caller
/// must delete or reparent the children first.
pub fn ensure_deletable(level: i32, child_count: i64) -> Result<()> {
    if level < MAX_CATEGORY_LEVEL && child_count > 0 {
        return Err(LibError::has_children(
            "Category still has child categories",
            anyhow!("level-{} category has {} children", level, child_count),
        ));
    }
    Ok(())
}

pub fn child_adjacency(edges: &[CategoryEdge]) -> HashMap<CategoryId, Vec<CategoryId>> {
    let mut adjacency: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();
    for edge in edges {
        adjacency.entry(edge.parent_id).or_default().push(edge.child_id);
    }
    adjacency
}

/// All categories reachable from `seed` via parent-of edges, excluding `seed`.
///
/// Frontier expansion with a visited set: terminates on an empty frontier
/// whatever the actual depth, so correctness never leans on the level bound
/// the store enforces.
pub fn descendants_of(seed: CategoryId, edges: &[CategoryEdge]) -> HashSet<CategoryId> {
    let adjacency = child_adjacency(edges);
    let mut visited: HashSet<CategoryId> = HashSet::new();
    let mut frontier: VecDeque<CategoryId> = VecDeque::new();
    frontier.push_back(seed);

    while let Some(current) = frontier.pop_front() {
        if let Some(children) = adjacency.get(&current) {
            for child in children {
                if *child != seed && visited.insert(*child) {
                    frontier.push_back(*child);
                }
            }
        }
    }

    visited
}

/// Reconstructs the forest from the edge relation: one tree per level-1
/// category, children attached down to `max_depth` levels.
pub fn build_forest(
    categories: &[Category],
    edges: &[CategoryEdge],
    max_depth: u32,
) -> Vec<CategoryTree> {
    let by_id: HashMap<CategoryId, &Category> =
        categories.iter().map(|category| (category.id, category)).collect();
    let adjacency = child_adjacency(edges);

    let mut roots: Vec<&Category> = categories
        .iter()
        .filter(|category| category.level == 1)
        .collect();
    roots.sort_by_key(|category| category.id);

    roots
        .into_iter()
        .filter_map(|root| attach_children(root.id, &by_id, &adjacency, max_depth))
        .collect()
}

fn attach_children(
    id: CategoryId,
    by_id: &HashMap<CategoryId, &Category>,
    adjacency: &HashMap<CategoryId, Vec<CategoryId>>,
    remaining_depth: u32,
) -> Option<CategoryTree> {
    // Best-effort behavior: skip edges referencing categories missing from
    // the snapshot instead of failing the whole forest.
    let category = by_id.get(&id)?;

    let children = if remaining_depth > 1 {
        let mut child_ids = adjacency.get(&id).cloned().unwrap_or_default();
        child_ids.sort();
        child_ids
            .into_iter()
            .filter_map(|child_id| attach_children(child_id, by_id, adjacency, remaining_depth - 1))
            .collect()
    } else {
        Vec::new()
    };

    Some(CategoryTree {
        id: category.id,
        name: category.name.clone(),
        level: category.level,
        children,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::models::{Category, CategoryEdge, CategoryId};

    use super::{
        build_forest, child_level, descendants_of, ensure_deletable, ensure_reparent_allowed,
    };

    fn category(id: i32, name: &str, level: i32) -> Category {
        Category {
            id: CategoryId(id),
            name: name.to_string(),
            level,
        }
    }

    fn edge(parent: i32, child: i32) -> CategoryEdge {
        CategoryEdge {
            parent_id: CategoryId(parent),
            child_id: CategoryId(child),
        }
    }

    #[test]
    fn child_level_follows_parent() {
        assert_eq!(child_level(1).expect("level 2 is allowed"), 2);
        assert_eq!(child_level(2).expect("level 3 is allowed"), 3);
    }

    #[test]
    fn child_level_rejects_max_depth_parent() {
        let err = child_level(3).expect_err("level-3 parent should fail");
        assert_eq!(err.code, "depth_exceeded");
    }

    #[test]
    fn reparent_rejects_roots() {
        let err = ensure_reparent_allowed(1, 1).expect_err("root reparent should fail");
        assert_eq!(err.code, "reparent_root");
    }

    #[test]
    fn reparent_rejects_level_mismatch() {
        let err = ensure_reparent_allowed(3, 1).expect_err("deepening reparent should fail");
        assert_eq!(err.code, "level_mismatch");

        let err = ensure_reparent_allowed(2, 2).expect_err("sibling-level parent should fail");
        assert_eq!(err.code, "level_mismatch");
    }

    #[test]
    fn reparent_allows_lateral_move() {
        ensure_reparent_allowed(2, 1).expect("lateral move should be allowed");
        ensure_reparent_allowed(3, 2).expect("lateral move should be allowed");
    }

    #[test]
    fn delete_guard_blocks_parents_with_children() {
        let err = ensure_deletable(1, 2).expect_err("parent with children should fail");
        assert_eq!(err.code, "has_children");

        let err = ensure_deletable(2, 1).expect_err("parent with children should fail");
        assert_eq!(err.code, "has_children");
    }

    #[test]
    fn delete_guard_allows_leaves_and_empty_parents() {
        ensure_deletable(2, 0).expect("childless level-2 should be deletable");
        // Level-3 deletion is unconditional; the child count is not consulted.
        ensure_deletable(3, 0).expect("level-3 should be deletable");
    }

    #[test]
    fn descendants_of_childless_node_is_empty() {
        let edges = vec![edge(1, 2)];
        assert!(descendants_of(CategoryId(2), &edges).is_empty());
    }

    #[test]
    fn descendants_of_chain_root_covers_both_levels() {
        let edges = vec![edge(1, 2), edge(2, 3)];
        let descendants = descendants_of(CategoryId(1), &edges);
        let expected: HashSet<CategoryId> = [CategoryId(2), CategoryId(3)].into_iter().collect();
        assert_eq!(descendants, expected);
        assert!(!descendants.contains(&CategoryId(1)));
    }

    #[test]
    fn descendants_of_terminates_on_cycle() {
        // The store never produces a cycle; the closure must survive one anyway.
        let edges = vec![edge(1, 2), edge(2, 1)];
        let descendants = descendants_of(CategoryId(1), &edges);
        let expected: HashSet<CategoryId> = [CategoryId(2)].into_iter().collect();
        assert_eq!(descendants, expected);
    }

    #[test]
    fn forest_builds_one_tree_per_root() {
        let categories = vec![
            category(1, "Food", 1),
            category(2, "Meat", 2),
            category(3, "Sausages", 3),
            category(4, "Cars", 1),
            category(5, "Trucks", 2),
            category(6, "Parts", 3),
        ];
        let edges = vec![edge(1, 2), edge(2, 3), edge(4, 5), edge(5, 6)];

        let forest = build_forest(&categories, &edges, 3);
        assert_eq!(forest.len(), 2);

        let food = &forest[0];
        assert_eq!(food.name, "Food");
        assert_eq!(food.children.len(), 1);
        assert_eq!(food.children[0].name, "Meat");
        assert_eq!(food.children[0].children[0].name, "Sausages");

        let cars = &forest[1];
        assert_eq!(cars.name, "Cars");
        assert_eq!(cars.children[0].children[0].name, "Parts");
        // No cross-linking between the two trees.
        assert!(food.children[0].children.iter().all(|c| c.name != "Parts"));
    }

    #[test]
    fn forest_respects_max_depth() {
        let categories = vec![
            category(1, "Food", 1),
            category(2, "Meat", 2),
            category(3, "Sausages", 3),
        ];
        let edges = vec![edge(1, 2), edge(2, 3)];

        let forest = build_forest(&categories, &edges, 2);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children.len(), 1);
        assert!(forest[0].children[0].children.is_empty());
    }

    #[test]
    fn forest_skips_dangling_edges() {
        let categories = vec![category(1, "Food", 1)];
        let edges = vec![edge(1, 99)];

        let forest = build_forest(&categories, &edges, 3);
        assert_eq!(forest.len(), 1);
        assert!(forest[0].children.is_empty());
    }
}
