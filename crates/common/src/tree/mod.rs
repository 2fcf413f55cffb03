// Folder/note tree structure and the pure operations over it.
//
// Every operation takes the forest by reference and returns a new forest;
// callers never observe in-place mutation. Lookups are depth-first in
// document order (a node is visited before its children, children before the
// next sibling).

pub mod integrity;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use integrity::{
    find_dangling, find_duplicate_folders, find_missing, insert_danglers, validate_structure,
    DanglerRepair, IntegrityError, DANGLERS_FOLDER_TITLE,
};

/// Icon glyph shown next to a tree node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IconKind {
    #[default]
    Default,
    Page,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IconTransition {
    None,
    Rotate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IconAnimation {
    None,
    Bounce,
    Pulse,
}

/// Presentation hints for a node icon. The server stores them verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeIcon {
    pub icon: IconKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<IconTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<IconAnimation>,
}

/// A folder grouping other nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<TreeIcon>,
    /// Icon applied to children that do not carry their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_children: Option<TreeIcon>,
    pub expanded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl Folder {
    /// Collapsed, empty folder with a fresh id and the default icon.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            icon: Some(TreeIcon::default()),
            icon_children: None,
            expanded: false,
            children: Vec::new(),
        }
    }
}

/// A leaf referencing a note record by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteRef {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<TreeIcon>,
}

impl NoteRef {
    pub fn new(note_id: Uuid) -> Self {
        Self { id: note_id, icon: Some(TreeIcon::default()) }
    }
}

/// A node of the account tree, tagged on the wire by `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Folder(Folder),
    Note(NoteRef),
}

impl TreeNode {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Folder(folder) => folder.id,
            Self::Note(note) => note.id,
        }
    }

    /// Child nodes; always empty for notes.
    pub fn children(&self) -> &[TreeNode] {
        match self {
            Self::Folder(folder) => &folder.children,
            Self::Note(_) => &[],
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Self::Folder(folder) => Some(folder),
            Self::Note(_) => None,
        }
    }
}

/// Find the first node with `id`, folder or note.
pub fn find_node(tree: &[TreeNode], id: Uuid) -> Option<&TreeNode> {
    for node in tree {
        if node.id() == id {
            return Some(node);
        }

        if let Some(found) = find_node(node.children(), id) {
            return Some(found);
        }
    }

    None
}

/// Find the first folder titled exactly `title`, at any depth.
pub fn find_folder_by_title<'a>(tree: &'a [TreeNode], title: &str) -> Option<&'a Folder> {
    for node in tree {
        if let TreeNode::Folder(folder) = node {
            if folder.title == title {
                return Some(folder);
            }

            if let Some(found) = find_folder_by_title(&folder.children, title) {
                return Some(found);
            }
        }
    }

    None
}

/// Insert `node` at `index` among the children of folder `destination`, or
/// among the roots when `destination` is `None`.
///
/// Returns the input unchanged when the destination folder does not exist.
/// Use [`insert_checked`] when the caller needs to tell the two apart.
pub fn insert(
    tree: &[TreeNode],
    node: TreeNode,
    destination: Option<Uuid>,
    index: usize,
) -> Vec<TreeNode> {
    insert_checked(tree, node, destination, index).unwrap_or_else(|| tree.to_vec())
}

/// Like [`insert`], but `None` when the destination folder is missing.
///
/// `index` past the end appends.
pub fn insert_checked(
    tree: &[TreeNode],
    node: TreeNode,
    destination: Option<Uuid>,
    index: usize,
) -> Option<Vec<TreeNode>> {
    let mut structure = tree.to_vec();
    match destination {
        None => {
            let at = index.min(structure.len());
            structure.insert(at, node);
            Some(structure)
        }
        Some(folder_id) => match insert_in_place(&mut structure, node, folder_id, index) {
            Ok(()) => Some(structure),
            Err(_) => None,
        },
    }
}

/// Remove the first node with `id` (its subtree goes with it) and hand it
/// back together with the remaining forest.
pub fn remove_and_return(tree: &[TreeNode], id: Uuid) -> (Option<TreeNode>, Vec<TreeNode>) {
    let mut structure = tree.to_vec();
    let removed = remove_in_place(&mut structure, id);
    (removed, structure)
}

/// Retitle folder `id`. Notes sharing the id are left alone.
pub fn rename_folder(tree: &[TreeNode], id: Uuid, title: &str) -> Vec<TreeNode> {
    tree.iter()
        .map(|node| match node {
            TreeNode::Folder(folder) if folder.id == id => {
                TreeNode::Folder(Folder { title: title.to_owned(), ..folder.clone() })
            }
            TreeNode::Folder(folder) => TreeNode::Folder(Folder {
                children: rename_folder(&folder.children, id, title),
                ..folder.clone()
            }),
            TreeNode::Note(_) => node.clone(),
        })
        .collect()
}

/// All note references in depth-first order. Duplicates are kept.
pub fn flatten_note_refs(tree: &[TreeNode]) -> Vec<&NoteRef> {
    let mut refs = Vec::new();
    collect_note_refs(tree, &mut refs);
    refs
}

fn collect_note_refs<'a>(tree: &'a [TreeNode], refs: &mut Vec<&'a NoteRef>) {
    for node in tree {
        match node {
            TreeNode::Note(note) => refs.push(note),
            TreeNode::Folder(folder) => collect_note_refs(&folder.children, refs),
        }
    }
}

pub(crate) fn insert_in_place(
    nodes: &mut [TreeNode],
    node: TreeNode,
    folder_id: Uuid,
    index: usize,
) -> Result<(), TreeNode> {
    let mut node = node;
    for current in nodes.iter_mut() {
        let TreeNode::Folder(folder) = current else {
            continue;
        };

        if folder.id == folder_id {
            let at = index.min(folder.children.len());
            folder.children.insert(at, node);
            return Ok(());
        }

        match insert_in_place(&mut folder.children, node, folder_id, index) {
            Ok(()) => return Ok(()),
            Err(returned) => node = returned,
        }
    }

    Err(node)
}

fn remove_in_place(nodes: &mut Vec<TreeNode>, id: Uuid) -> Option<TreeNode> {
    for index in 0..nodes.len() {
        if nodes[index].id() == id {
            return Some(nodes.remove(index));
        }

        if let TreeNode::Folder(folder) = &mut nodes[index] {
            if let Some(removed) = remove_in_place(&mut folder.children, id) {
                return Some(removed);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: Uuid, title: &str, children: Vec<TreeNode>) -> TreeNode {
        TreeNode::Folder(Folder {
            id,
            title: title.to_owned(),
            icon: None,
            icon_children: None,
            expanded: true,
            children,
        })
    }

    fn note(id: Uuid) -> TreeNode {
        TreeNode::Note(NoteRef { id, icon: None })
    }

    fn ids(nodes: &[TreeNode]) -> Vec<Uuid> {
        nodes.iter().map(TreeNode::id).collect()
    }

    struct Fixture {
        tree: Vec<TreeNode>,
        work: Uuid,
        archive: Uuid,
        plan: Uuid,
        old: Uuid,
        loose: Uuid,
    }

    // [work [plan, archive [old]], loose]
    fn fixture() -> Fixture {
        let (work, archive, plan, old, loose) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let tree = vec![
            folder(work, "Work", vec![note(plan), folder(archive, "Archive", vec![note(old)])]),
            note(loose),
        ];
        Fixture { tree, work, archive, plan, old, loose }
    }

    #[test]
    fn find_node_searches_depth_first() {
        let f = fixture();
        assert_eq!(find_node(&f.tree, f.old).map(TreeNode::id), Some(f.old));
        assert_eq!(find_node(&f.tree, f.archive).map(TreeNode::id), Some(f.archive));
        assert_eq!(find_node(&f.tree, f.loose).map(TreeNode::id), Some(f.loose));
        assert!(find_node(&f.tree, Uuid::new_v4()).is_none());
    }

    #[test]
    fn find_folder_by_title_matches_nested_folders_only() {
        let f = fixture();
        assert_eq!(find_folder_by_title(&f.tree, "Archive").map(|x| x.id), Some(f.archive));
        assert!(find_folder_by_title(&f.tree, "archive").is_none());
    }

    #[test]
    fn insert_at_root_respects_index() {
        let f = fixture();
        let added = Uuid::new_v4();
        let result = insert(&f.tree, note(added), None, 1);
        assert_eq!(ids(&result), vec![f.work, added, f.loose]);
        // input untouched
        assert_eq!(ids(&f.tree), vec![f.work, f.loose]);
    }

    #[test]
    fn insert_into_nested_folder() {
        let f = fixture();
        let added = Uuid::new_v4();
        let result = insert(&f.tree, note(added), Some(f.archive), 0);
        let archive = find_node(&result, f.archive).expect("archive folder");
        assert_eq!(ids(archive.children()), vec![added, f.old]);
    }

    #[test]
    fn insert_index_past_end_appends() {
        let f = fixture();
        let added = Uuid::new_v4();
        let result = insert(&f.tree, note(added), Some(f.work), 99);
        let work = find_node(&result, f.work).expect("work folder");
        assert_eq!(ids(work.children()), vec![f.plan, f.archive, added]);
    }

    #[test]
    fn insert_into_missing_destination_is_a_no_op() {
        let f = fixture();
        let result = insert(&f.tree, note(Uuid::new_v4()), Some(Uuid::new_v4()), 0);
        assert_eq!(result, f.tree);
        assert!(insert_checked(&f.tree, note(Uuid::new_v4()), Some(Uuid::new_v4()), 0).is_none());
    }

    #[test]
    fn insert_into_note_id_is_a_no_op() {
        let f = fixture();
        assert!(insert_checked(&f.tree, note(Uuid::new_v4()), Some(f.plan), 0).is_none());
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let f = fixture();
        let added = folder(Uuid::new_v4(), "Fresh", vec![note(Uuid::new_v4())]);

        for (destination, index) in [(None, 0), (None, 2), (Some(f.work), 1), (Some(f.archive), 0)]
        {
            let inserted = insert_checked(&f.tree, added.clone(), destination, index)
                .expect("destination should exist");
            let (removed, remaining) = remove_and_return(&inserted, added.id());
            assert_eq!(removed.as_ref(), Some(&added));
            assert_eq!(remaining, f.tree);
        }
    }

    #[test]
    fn remove_returns_subtree() {
        let f = fixture();
        let (removed, remaining) = remove_and_return(&f.tree, f.archive);
        let removed = removed.expect("archive should be removed");
        assert_eq!(ids(removed.children()), vec![f.old]);
        assert!(find_node(&remaining, f.old).is_none());
        assert!(find_node(&remaining, f.plan).is_some());
    }

    #[test]
    fn remove_missing_id_returns_none_and_same_tree() {
        let f = fixture();
        let (removed, remaining) = remove_and_return(&f.tree, Uuid::new_v4());
        assert!(removed.is_none());
        assert_eq!(remaining, f.tree);
    }

    #[test]
    fn remove_takes_first_duplicate_reference_in_document_order() {
        let shared = Uuid::new_v4();
        let outer = Uuid::new_v4();
        let tree = vec![folder(outer, "Outer", vec![note(shared)]), note(shared)];

        let (removed, remaining) = remove_and_return(&tree, shared);
        assert_eq!(removed.map(|n| n.id()), Some(shared));
        assert!(find_node(&remaining, outer).expect("outer").children().is_empty());
        assert_eq!(ids(&remaining), vec![outer, shared]);
    }

    #[test]
    fn rename_folder_updates_nested_title() {
        let f = fixture();
        let renamed = rename_folder(&f.tree, f.archive, "Old stuff");
        let archive = find_node(&renamed, f.archive).and_then(TreeNode::as_folder).expect("folder");
        assert_eq!(archive.title, "Old stuff");
        assert_eq!(ids(&archive.children), vec![f.old]);
    }

    #[test]
    fn rename_folder_ignores_notes() {
        let f = fixture();
        let renamed = rename_folder(&f.tree, f.plan, "Nope");
        assert_eq!(renamed, f.tree);
    }

    #[test]
    fn flatten_note_refs_is_depth_first() {
        let f = fixture();
        let refs: Vec<Uuid> = flatten_note_refs(&f.tree).into_iter().map(|n| n.id).collect();
        assert_eq!(refs, vec![f.plan, f.old, f.loose]);
    }

    #[test]
    fn empty_children_are_omitted_on_the_wire() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(folder(id, "Empty", Vec::new())).expect("serialize");
        assert_eq!(value["type"], "folder");
        assert!(value.get("children").is_none());

        let parsed: TreeNode = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed, folder(id, "Empty", Vec::new()));
    }
}
