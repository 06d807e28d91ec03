//! Directory manager
//!
//! All entries live in one flat table of 128-byte slots, addressed by index.
//! Slot 0 is always the root storage. A storage's children hang off its
//! `child` link as a red-black tree ordered by [`entry::compare_names`], with
//! `left`/`right` links between siblings. Removed slots are left empty and
//! reused lowest-first by later insertions.

pub mod entry;
pub mod rbtree;

use crate::error::{CfbError, Result};
use crate::header::{Version, MAXREGSECT};
use crate::validation::{join_path, split_path};
use ahash::AHashSet;
use entry::{compare_names, Color, DirEntry, EntryKind, DIR_ENTRY_SIZE, NOSTREAM};
use rbtree::TreeSlots;
use std::cmp::Ordering;

/// Index of the root entry
pub const ROOT_ID: u32 = 0;

impl TreeSlots for Vec<Option<DirEntry>> {
    fn left(&self, node: u32) -> u32 {
        self[node as usize].as_ref().map_or(NOSTREAM, |e| e.left)
    }

    fn right(&self, node: u32) -> u32 {
        self[node as usize].as_ref().map_or(NOSTREAM, |e| e.right)
    }

    fn color(&self, node: u32) -> Color {
        self[node as usize].as_ref().map_or(Color::Black, |e| e.color)
    }

    fn set_left(&mut self, node: u32, to: u32) {
        if let Some(entry) = self[node as usize].as_mut() {
            entry.left = to;
        }
    }

    fn set_right(&mut self, node: u32, to: u32) {
        if let Some(entry) = self[node as usize].as_mut() {
            entry.right = to;
        }
    }

    fn set_color(&mut self, node: u32, color: Color) {
        if let Some(entry) = self[node as usize].as_mut() {
            entry.color = color;
        }
    }

    fn compare(&self, a: u32, b: u32) -> Ordering {
        match (&self[a as usize], &self[b as usize]) {
            (Some(a), Some(b)) => compare_names(&a.name, &b.name),
            _ => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Directory {
    slots: Vec<Option<DirEntry>>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// A directory holding only the root storage
    pub fn new() -> Self {
        Directory {
            slots: vec![Some(DirEntry::root())],
        }
    }

    /// Decode and validate the directory stream
    ///
    /// Every sibling and child link reachable from the root must point at an
    /// allocated slot, and no slot may be reached twice. Sibling trees that
    /// are not in name order are rebuilt; duplicate sibling names are
    /// rejected. Allocated slots that cannot be reached are dropped.
    pub fn load(bytes: &[u8], version: Version) -> Result<Self> {
        let mut slots = Vec::with_capacity(bytes.len() / DIR_ENTRY_SIZE);
        for record in bytes.chunks_exact(DIR_ENTRY_SIZE) {
            slots.push(DirEntry::decode(record, version)?);
        }

        match slots.first() {
            Some(Some(root)) if matches!(root.kind, EntryKind::Root { .. }) => {}
            _ => {
                return Err(CfbError::format(
                    "first directory entry is not the root storage",
                ))
            }
        }
        if let Some(extra) = slots
            .iter()
            .skip(1)
            .position(|slot| matches!(slot, Some(e) if matches!(e.kind, EntryKind::Root { .. })))
        {
            return Err(CfbError::format(format!(
                "second root entry at index {}",
                extra + 1
            )));
        }

        let mut directory = Directory { slots };
        directory.fix_root_links();
        let reachable = directory.check_links()?;
        directory.drop_unreachable(&reachable);
        directory.normalize_order()?;
        directory.trim();

        tracing::debug!(
            "Loaded directory: {} slots, {} entries",
            directory.slots.len(),
            directory.entry_count()
        );
        Ok(directory)
    }

    fn fix_root_links(&mut self) {
        if let Some(Some(root)) = self.slots.first_mut() {
            if root.left != NOSTREAM || root.right != NOSTREAM {
                tracing::warn!("Root entry has sibling links, clearing them");
                root.left = NOSTREAM;
                root.right = NOSTREAM;
            }
        }
    }

    /// Walk every link from the root, returning the set of reached slots
    fn check_links(&self) -> Result<AHashSet<u32>> {
        let mut seen = AHashSet::new();
        seen.insert(ROOT_ID);
        let mut storages = vec![ROOT_ID];

        while let Some(storage) = storages.pop() {
            let mut pending = vec![self.get(storage)?.child()];
            while let Some(node) = pending.pop() {
                if node == NOSTREAM {
                    continue;
                }
                let entry = self.slots.get(node as usize).and_then(Option::as_ref).ok_or_else(|| {
                    CfbError::format(format!("directory link to missing entry {}", node))
                })?;
                if !seen.insert(node) {
                    return Err(CfbError::format(format!(
                        "directory entry {} is linked more than once",
                        node
                    )));
                }
                pending.push(entry.left);
                pending.push(entry.right);
                if entry.is_storage() {
                    storages.push(node);
                }
            }
        }

        Ok(seen)
    }

    fn drop_unreachable(&mut self, reachable: &AHashSet<u32>) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !reachable.contains(&(index as u32)) {
                if let Some(entry) = slot.take() {
                    tracing::warn!("Dropping unreachable directory entry {} '{}'", index, entry.name);
                }
            }
        }
    }

    /// Rebuild sibling trees that violate the name order or color rules
    fn normalize_order(&mut self) -> Result<()> {
        let storages: Vec<u32> = (0..self.slots.len() as u32)
            .filter(|&id| matches!(&self.slots[id as usize], Some(e) if e.is_storage()))
            .collect();

        for storage in storages {
            let child = self.get(storage)?.child();
            let problem = match rbtree::check(&self.slots, child) {
                Ok(_) => continue,
                Err(problem) => problem,
            };

            let mut siblings = self.children(storage)?;
            siblings.sort_by(|&a, &b| self.slots.compare(a, b));
            if let Some(pair) = siblings
                .windows(2)
                .find(|pair| self.slots.compare(pair[0], pair[1]) == Ordering::Equal)
            {
                let name = self.get(pair[1])?.name.clone();
                return Err(CfbError::format(format!("duplicate sibling name '{}'", name)));
            }

            tracing::warn!(
                "Children of '{}' are not a valid red-black tree ({}), rebuilding",
                self.get(storage)?.name,
                problem
            );
            let root = rbtree::rebuild(&mut self.slots, &siblings);
            self.set_child(storage, root)?;
        }
        Ok(())
    }

    /// Drop empty slots at the end of the table
    fn trim(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }

    /// Number of slots up to and including the last allocated one
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of allocated entries, root included
    pub fn entry_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn get(&self, id: u32) -> Result<&DirEntry> {
        self.slots
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| CfbError::NotFound(format!("directory entry {}", id)))
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut DirEntry> {
        self.slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| CfbError::NotFound(format!("directory entry {}", id)))
    }

    pub fn root(&self) -> Result<&DirEntry> {
        self.get(ROOT_ID)
    }

    fn set_child(&mut self, storage: u32, child: u32) -> Result<()> {
        let entry = self.get_mut(storage)?;
        let name = entry.name.clone();
        let data = entry.storage_data_mut().ok_or(CfbError::WrongEntryKind {
            path: name,
            expected: "storage",
        })?;
        data.child = child;
        Ok(())
    }

    fn storage_child(&self, storage: u32) -> Result<u32> {
        let entry = self.get(storage)?;
        entry
            .storage_data()
            .map(|data| data.child)
            .ok_or_else(|| CfbError::WrongEntryKind {
                path: entry.name.clone(),
                expected: "storage",
            })
    }

    /// Children of a storage in sibling order
    pub fn children(&self, storage: u32) -> Result<Vec<u32>> {
        let child = self.storage_child(storage)?;
        Ok(rbtree::in_order(&self.slots, child))
    }

    /// Find a child by name (case-insensitive)
    pub fn find_child(&self, storage: u32, name: &str) -> Result<Option<u32>> {
        let mut node = self.storage_child(storage)?;
        while node != NOSTREAM {
            let entry = self.get(node)?;
            node = match compare_names(name, &entry.name) {
                Ordering::Less => entry.left,
                Ordering::Greater => entry.right,
                Ordering::Equal => return Ok(Some(node)),
            };
        }
        Ok(None)
    }

    /// Resolve a path to an entry index
    pub fn lookup(&self, path: &str) -> Result<u32> {
        let mut current = ROOT_ID;
        for part in split_path(path) {
            let entry = self.get(current)?;
            if !entry.is_storage() {
                return Err(CfbError::NotFound(path.to_string()));
            }
            current = self
                .find_child(current, part)?
                .ok_or_else(|| CfbError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// Resolve a path to a storage index
    pub fn lookup_storage(&self, path: &str) -> Result<u32> {
        let id = self.lookup(path)?;
        if self.get(id)?.is_storage() {
            Ok(id)
        } else {
            Err(CfbError::WrongEntryKind {
                path: path.to_string(),
                expected: "storage",
            })
        }
    }

    /// Add `entry` under `parent` at its sorted position
    pub fn insert(&mut self, parent: u32, entry: DirEntry) -> Result<u32> {
        if self.find_child(parent, &entry.name)?.is_some() {
            return Err(CfbError::NameConflict(entry.name));
        }

        let id = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(entry);
                free as u32
            }
            None => {
                let id = self.slots.len() as u64;
                if id > MAXREGSECT as u64 {
                    return Err(CfbError::CapacityExceeded { index: id });
                }
                self.slots.push(Some(entry));
                id as u32
            }
        };

        let root = self.storage_child(parent)?;
        let root = rbtree::insert(&mut self.slots, root, id);
        self.set_child(parent, root)?;
        Ok(id)
    }

    /// Detach `id` from `parent`, removing it and all its descendants
    ///
    /// Returns the removed entries so their data chains can be freed.
    pub fn remove(&mut self, parent: u32, id: u32) -> Result<Vec<DirEntry>> {
        if id == ROOT_ID {
            return Err(CfbError::InvalidOperation(
                "the root storage cannot be removed".to_string(),
            ));
        }
        self.detach(parent, id)?;

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(node) = pending.pop() {
            if self.get(node)?.is_storage() {
                pending.extend(self.children(node)?);
            }
            if let Some(entry) = self.slots[node as usize].take() {
                removed.push(entry);
            }
        }
        self.trim();
        Ok(removed)
    }

    /// Give `id` a new name, keeping its parent's children in order
    pub fn rename(&mut self, parent: u32, id: u32, name: &str) -> Result<()> {
        if id == ROOT_ID {
            return Err(CfbError::InvalidOperation(
                "the root storage cannot be renamed".to_string(),
            ));
        }
        match self.find_child(parent, name)? {
            Some(other) if other != id => return Err(CfbError::NameConflict(name.to_string())),
            _ => {}
        }

        self.detach(parent, id)?;
        self.get_mut(id)?.name = name.to_string();
        let root = self.storage_child(parent)?;
        let root = rbtree::insert(&mut self.slots, root, id);
        self.set_child(parent, root)
    }

    /// Unlink `id` from its parent's sibling tree, rebuilding the rest
    fn detach(&mut self, parent: u32, id: u32) -> Result<()> {
        let mut siblings = self.children(parent)?;
        let position = siblings.iter().position(|&s| s == id).ok_or_else(|| {
            CfbError::NotFound(format!("directory entry {} under {}", id, parent))
        })?;
        siblings.remove(position);
        let root = rbtree::rebuild(&mut self.slots, &siblings);
        self.set_child(parent, root)?;

        let entry = self.get_mut(id)?;
        entry.left = NOSTREAM;
        entry.right = NOSTREAM;
        Ok(())
    }

    /// Every entry below the root, depth-first in sibling order
    pub fn walk(&self) -> Result<Vec<(String, u32)>> {
        let mut out = Vec::new();
        self.walk_into(ROOT_ID, &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn walk_into<'a>(
        &'a self,
        storage: u32,
        prefix: &mut Vec<&'a str>,
        out: &mut Vec<(String, u32)>,
    ) -> Result<()> {
        for child in self.children(storage)? {
            let entry = self.get(child)?;
            prefix.push(&entry.name);
            out.push((join_path(prefix), child));
            if entry.is_storage() {
                self.walk_into(child, prefix, out)?;
            }
            prefix.pop();
        }
        Ok(())
    }

    /// Iterate over allocated entries
    pub fn entries(&self) -> impl Iterator<Item = (u32, &DirEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (i as u32, e)))
    }

    /// Encode every slot, padded with unused records to whole sectors
    pub fn encode(&self, version: Version, sector_size: usize) -> Vec<u8> {
        let per_sector = sector_size / DIR_ENTRY_SIZE;
        let padded = self.slots.len().max(1).div_ceil(per_sector) * per_sector;
        let mut bytes = Vec::with_capacity(padded * DIR_ENTRY_SIZE);
        for index in 0..padded {
            match self.slots.get(index).and_then(Option::as_ref) {
                Some(entry) => bytes.extend_from_slice(&entry.encode(version)),
                None => bytes.extend_from_slice(&DirEntry::encode_unused()),
            }
        }
        bytes
    }

    /// Directory sectors needed for the current table
    pub fn sectors_needed(&self, sector_size: usize) -> usize {
        self.slots.len().max(1).div_ceil(sector_size / DIR_ENTRY_SIZE)
    }
}
