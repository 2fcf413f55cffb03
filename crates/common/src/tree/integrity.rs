// Consistency checks between the tree and the account's note collection.
//
// A committed tree must reference every note (no missing notes) and only
// notes that exist (no dangling references). Duplicate note references are
// legal; a folder id must not appear anywhere else in the tree.

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use super::{find_folder_by_title, find_node, flatten_note_refs, insert_in_place, Folder};
use super::{NoteRef, TreeNode};

/// Title of the recovery folder unreferenced notes are reinserted under.
pub const DANGLERS_FOLDER_TITLE: &str = "Danglers";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("tree structure reuses {} folder id(s)", .folder_ids.len())]
    DuplicateFolderIds { folder_ids: Vec<Uuid> },

    #[error("tree structure is missing {} note(s)", .note_ids.len())]
    MissingNotes { note_ids: Vec<Uuid> },

    #[error("tree structure contains {} dangling note reference(s)", .note_ids.len())]
    DanglingNotes { note_ids: Vec<Uuid> },
}

impl IntegrityError {
    /// Ids the client needs to repair.
    pub fn ids(&self) -> &[Uuid] {
        match self {
            Self::DuplicateFolderIds { folder_ids } => folder_ids,
            Self::MissingNotes { note_ids } | Self::DanglingNotes { note_ids } => note_ids,
        }
    }
}

/// Fails with every folder id that is shared with another folder or with a
/// note reference, each reported once in depth-first order.
pub fn find_duplicate_folders(tree: &[TreeNode]) -> Result<(), IntegrityError> {
    let note_ids: HashSet<Uuid> = flatten_note_refs(tree).into_iter().map(|n| n.id).collect();
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    collect_duplicate_folders(tree, &note_ids, &mut seen, &mut duplicates);

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(IntegrityError::DuplicateFolderIds { folder_ids: duplicates })
    }
}

fn collect_duplicate_folders(
    nodes: &[TreeNode],
    note_ids: &HashSet<Uuid>,
    seen: &mut HashSet<Uuid>,
    duplicates: &mut Vec<Uuid>,
) {
    for node in nodes {
        let TreeNode::Folder(folder) = node else {
            continue;
        };

        let reused = !seen.insert(folder.id) || note_ids.contains(&folder.id);
        if reused && !duplicates.contains(&folder.id) {
            duplicates.push(folder.id);
        }
        collect_duplicate_folders(&folder.children, note_ids, seen, duplicates);
    }
}

/// Fails with every note in `note_ids` that no tree node references,
/// in the order of `note_ids`.
pub fn find_missing(tree: &[TreeNode], note_ids: &[Uuid]) -> Result<(), IntegrityError> {
    let referenced: HashSet<Uuid> = flatten_note_refs(tree).into_iter().map(|n| n.id).collect();
    let missing: Vec<Uuid> =
        note_ids.iter().copied().filter(|id| !referenced.contains(id)).collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(IntegrityError::MissingNotes { note_ids: missing })
    }
}

/// Fails with every note reference whose id is not in `note_ids`, in
/// depth-first order (a reference repeated in the tree is reported each time).
pub fn find_dangling(tree: &[TreeNode], note_ids: &[Uuid]) -> Result<(), IntegrityError> {
    let known: HashSet<Uuid> = note_ids.iter().copied().collect();
    let dangling: Vec<Uuid> = flatten_note_refs(tree)
        .into_iter()
        .map(|n| n.id)
        .filter(|id| !known.contains(id))
        .collect();

    if dangling.is_empty() {
        Ok(())
    } else {
        Err(IntegrityError::DanglingNotes { note_ids: dangling })
    }
}

/// All checks: folder ids first, then missing notes, then dangling ones.
pub fn validate_structure(tree: &[TreeNode], note_ids: &[Uuid]) -> Result<(), IntegrityError> {
    find_duplicate_folders(tree)?;
    find_missing(tree, note_ids)?;
    find_dangling(tree, note_ids)
}

/// Outcome of [`insert_danglers`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglerRepair {
    pub inserted: usize,
    pub structure: Vec<TreeNode>,
}

/// Reinsert every note absent from the tree under the "Danglers" folder.
///
/// The folder is reused wherever it sits in the tree; if there is none it is
/// appended to the roots. Each recovered note becomes the folder's first
/// child, so a second run over the result inserts nothing.
pub fn insert_danglers(tree: &[TreeNode], note_ids: &[Uuid]) -> DanglerRepair {
    let mut structure = tree.to_vec();
    let mut inserted = 0;

    for &note_id in note_ids {
        if find_node(&structure, note_id).is_some() {
            continue;
        }

        inserted += 1;

        let folder_id = match find_folder_by_title(&structure, DANGLERS_FOLDER_TITLE) {
            Some(folder) => folder.id,
            None => {
                let folder = Folder::new(DANGLERS_FOLDER_TITLE);
                let id = folder.id;
                structure.push(TreeNode::Folder(folder));
                id
            }
        };

        // the folder was either just found or just pushed
        let recovered = TreeNode::Note(NoteRef::new(note_id));
        let _ = insert_in_place(&mut structure, recovered, folder_id, 0);
    }

    DanglerRepair { inserted, structure }
}
