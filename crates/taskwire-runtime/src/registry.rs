//! The task library: a namespace tree over task definitions.
//!
//! Registration is declarative and happens once at startup. The nested shape
//! exists only so the client facade can expose the same paths; dispatch
//! always resolves through the flat id table, by exact full id. Task ids are
//! global: two leaves anywhere in the tree may not share one, and a build
//! that violates this fails without producing a partial library.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use taskwire_core::{TaskDefinition, TaskId};

/// Library build errors. All are fatal: the library is not constructed.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two leaves share a task id.
    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    /// A task was registered with an empty id.
    #[error("Empty task id at path '{path}'")]
    EmptyTaskId { path: String },

    /// Two siblings share a name in the tree.
    #[error("Duplicate name '{name}' at path '{path}'")]
    DuplicateName { path: String, name: String },
}

/// A node in the library tree.
#[derive(Debug, Clone)]
pub enum LibraryNode {
    /// A named grouping of further nodes.
    Group(BTreeMap<String, LibraryNode>),
    /// A task leaf.
    Task(TaskDefinition),
}

/// The immutable namespace of all registered tasks.
///
/// Holds two structures: the display tree (client-facade shape) and the flat
/// id table (dispatch keys).
#[derive(Debug, Clone)]
pub struct Library {
    root: BTreeMap<String, LibraryNode>,
    tasks: HashMap<TaskId, TaskDefinition>,
}

impl Library {
    /// Start a declarative library description.
    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::new()
    }

    /// Resolve a task by its exact full id.
    pub fn get(&self, id: &TaskId) -> Option<&TaskDefinition> {
        self.tasks.get(id)
    }

    /// Returns true if the id is registered.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no tasks are registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterate over all registered task ids.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.keys()
    }

    /// The root of the display tree.
    pub fn root(&self) -> &BTreeMap<String, LibraryNode> {
        &self.root
    }

    /// Navigate the display tree by path segments.
    pub fn node_at(&self, path: &[&str]) -> Option<&LibraryNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.get(*first)?;
        for segment in rest {
            match node {
                LibraryNode::Group(children) => node = children.get(*segment)?,
                LibraryNode::Task(_) => return None,
            }
        }
        Some(node)
    }
}

enum BuilderNode {
    Group(LibraryBuilder),
    Task(TaskDefinition),
}

/// Declarative description of a library, consumed by [`LibraryBuilder::build`].
#[derive(Default)]
pub struct LibraryBuilder {
    entries: Vec<(String, BuilderNode)>,
}

impl LibraryBuilder {
    /// Create an empty description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task leaf under `name`.
    pub fn task(mut self, name: impl Into<String>, definition: TaskDefinition) -> Self {
        self.entries
            .push((name.into(), BuilderNode::Task(definition)));
        self
    }

    /// Add a nested group under `name`.
    pub fn group(
        mut self,
        name: impl Into<String>,
        describe: impl FnOnce(LibraryBuilder) -> LibraryBuilder,
    ) -> Self {
        self.entries.push((
            name.into(),
            BuilderNode::Group(describe(LibraryBuilder::new())),
        ));
        self
    }

    /// Walk the description once, flattening it into the id table.
    ///
    /// Fails on duplicate ids anywhere in the tree, on empty ids, and on
    /// duplicate sibling names; no partial library escapes a failed build.
    pub fn build(self) -> Result<Library, RegistryError> {
        let mut tasks = HashMap::new();
        let root = flatten(self, "", &mut tasks)?;
        debug!(task_count = tasks.len(), "Library built");
        Ok(Library { root, tasks })
    }
}

fn flatten(
    builder: LibraryBuilder,
    path: &str,
    tasks: &mut HashMap<TaskId, TaskDefinition>,
) -> Result<BTreeMap<String, LibraryNode>, RegistryError> {
    let mut children = BTreeMap::new();
    for (name, node) in builder.entries {
        let child_path = if path.is_empty() {
            name.clone()
        } else {
            format!("{path}.{name}")
        };

        let built = match node {
            BuilderNode::Task(definition) => {
                let id = definition.id().clone();
                if id.is_empty() {
                    return Err(RegistryError::EmptyTaskId { path: child_path });
                }
                if tasks.insert(id.clone(), definition.clone()).is_some() {
                    return Err(RegistryError::DuplicateTaskId(id));
                }
                LibraryNode::Task(definition)
            }
            BuilderNode::Group(inner) => LibraryNode::Group(flatten(inner, &child_path, tasks)?),
        };

        if children.insert(name.clone(), built).is_some() {
            return Err(RegistryError::DuplicateName {
                path: path.to_string(),
                name,
            });
        }
    }
    Ok(children)
}
