use std::sync::Mutex;

use crate::lock::lock;
use crate::models::{WorkError, WorkErrorKind, WorkResult};

/// Parent/children links embedded in every composite node.
///
/// Children are owned; the parent is held through the implementor's weak
/// reference type so a subtree never keeps its ancestors alive.
pub struct TreeLinks<T: Composite> {
    parent: Mutex<Option<T::WeakRef>>,
    children: Mutex<Vec<T>>,
}

impl<T: Composite> Default for TreeLinks<T> {
    fn default() -> Self {
        Self {
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }
    }
}

/// n-ary tree behaviour for shared node handles.
pub trait Composite: Clone + Sized {
    type WeakRef: Clone;

    fn links(&self) -> &TreeLinks<Self>;

    fn downgrade(&self) -> Self::WeakRef;

    fn upgrade(weak: &Self::WeakRef) -> Option<Self>;

    /// Identity comparison.
    fn same_node(&self, other: &Self) -> bool;

    /// Called after `child` has been linked beneath `self`.
    fn attached(&self, _child: &Self) {}

    /// Called after `child` has been unlinked from `self`.
    fn detached(&self, _child: &Self) {}

    fn parent(&self) -> Option<Self> {
        lock(&self.links().parent).as_ref().and_then(Self::upgrade)
    }

    fn children(&self) -> Vec<Self> {
        lock(&self.links().children).clone()
    }

    fn has_child(&self, child: &Self) -> bool {
        lock(&self.links().children)
            .iter()
            .any(|candidate| candidate.same_node(child))
    }

    fn add(&self, child: Self) -> WorkResult<Self> {
        self.append(child)
    }

    fn append(&self, child: Self) -> WorkResult<Self> {
        attach(self, child, false)
    }

    fn prepend(&self, child: Self) -> WorkResult<Self> {
        attach(self, child, true)
    }

    /// Detaches `child`. Removing a node that is not a child is a no-op
    /// returning `false`.
    fn remove(&self, child: &Self) -> bool {
        let removed = {
            let mut children = lock(&self.links().children);
            match children.iter().position(|candidate| candidate.same_node(child)) {
                Some(index) => {
                    children.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            *lock(&child.links().parent) = None;
            self.detached(child);
        }
        removed
    }

    /// Ancestors, nearest first.
    fn parents(&self) -> Vec<Self> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(parent) = current {
            current = parent.parent();
            ancestors.push(parent);
        }
        ancestors
    }

    /// Depth in the tree, 0 at the root.
    fn level(&self) -> usize {
        self.parents().len()
    }

    fn root(&self) -> Self {
        self.parents().pop().unwrap_or_else(|| self.clone())
    }

    /// Pre-order traversal starting with `self`. Each call starts afresh.
    fn traverse(&self) -> Traversal<Self> {
        Traversal {
            stack: vec![self.clone()],
        }
    }

    fn descendant_count(&self) -> usize {
        self.traverse().count() - 1
    }
}

fn attach<T: Composite>(parent: &T, child: T, at_head: bool) -> WorkResult<T> {
    if child.same_node(parent) || parent.parents().iter().any(|p| p.same_node(&child)) {
        return Err(WorkError::new(
            WorkErrorKind::TypeKind,
            "cannot add a node beneath itself",
        ));
    }
    {
        let mut link = lock(&child.links().parent);
        if link.as_ref().and_then(T::upgrade).is_some() {
            return Err(WorkError::new(
                WorkErrorKind::TypeKind,
                "node already has a parent; remove it first",
            ));
        }
        *link = Some(parent.downgrade());
    }
    {
        let mut children = lock(&parent.links().children);
        if at_head {
            children.insert(0, child.clone());
        } else {
            children.push(child.clone());
        }
    }
    parent.attached(&child);
    Ok(child)
}

/// Lazy depth-first, self-before-children walk.
pub struct Traversal<T> {
    stack: Vec<T>,
}

impl<T: Composite> Iterator for Traversal<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().into_iter().rev());
        Some(node)
    }
}
