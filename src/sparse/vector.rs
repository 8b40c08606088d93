//! Per-entity table storage with sentinel elision and optional LZ4 blocks.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Deref;

use log::warn;

use super::Element;
use crate::wire::{read_len, read_u8, read_u32, write_u8, write_u32};

/// Upper bound on element length accepted from a cache stream.
const MAX_ELEMENT_LEN: usize = 1 << 22;

/// Upper bound on entry count accepted from a cache stream.
const MAX_ENTRIES: usize = 1 << 24;

const FLAG_DENSE: u8 = 1;
const FLAG_COMPRESSED: u8 = 2;

/// Names the parent table a child table depends on.
///
/// A child constructed with a relation only stores entries for ids its parent
/// reports as present. Parents advertise the relation they provide so a
/// mismatched pairing is caught in debug builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Keyed by frame id, parent is the "frame has extra resolution" flag.
    ExtraFrame,
    /// Keyed by sprite id, parent is the "sprite has extra resolution" flag.
    ExtraSprite,
    /// Keyed by background id, parent is the "background has extra resolution" flag.
    ExtraBackground,
    /// Keyed by frame id, parent is the frame's sprite reference list.
    FrameSprites,
    /// Keyed by frame id, parent is the frame's background id.
    FrameBackground,
}

/// Existence query used to enforce parent/child relations.
pub trait Presence {
    /// Whether an entry is stored for `id`.
    fn has(&self, id: u32) -> bool;
    /// Whether the table has been read or written since construction.
    fn is_established(&self) -> bool;
    /// Relation this table acts as a parent for, if any.
    fn provides(&self) -> Option<Relation>;
}

#[derive(Debug, Clone, PartialEq)]
enum Block<T> {
    Raw(Vec<T>),
    Lz4(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
enum Storage<T> {
    Dense(Vec<Vec<T>>),
    Sparse {
        blocks: HashMap<u32, Block<T>>,
        compress: bool,
    },
}

#[derive(Debug)]
struct DecodeCache<T> {
    id: Option<u32>,
    values: Vec<T>,
}

impl<T> Default for DecodeCache<T> {
    fn default() -> Self {
        Self {
            id: None,
            values: Vec::new(),
        }
    }
}

/// Read-only view of one table element.
pub enum View<'a, T> {
    Borrowed(&'a [T]),
    Cached(Ref<'a, [T]>),
    Owned(Vec<T>),
}

impl<T> Deref for View<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            View::Borrowed(s) => s,
            View::Cached(r) => r,
            View::Owned(v) => v.as_slice(),
        }
    }
}

/// A table of fixed-length elements keyed by a `u32` id.
///
/// Two backing strategies:
/// - **dense**: a plain indexed array, for small, nearly fully populated tables;
/// - **sparse**: a hashmap of blocks, optionally LZ4 compressed one element at
///   a time. The last decompressed element is kept in a single-slot cache.
///
/// Elements equal to the sentinel are never stored; reading an absent id
/// yields the sentinel repeated to the element length.
pub struct SparseVector<T: Element> {
    storage: Storage<T>,
    no_data: Vec<T>,
    element_len: usize,
    relation: Option<Relation>,
    provides: Option<Relation>,
    established: bool,
    cache: RefCell<DecodeCache<T>>,
}

impl<T: Element> SparseVector<T> {
    /// Create a dense (indexed array) table.
    pub fn new_dense(no_data: T) -> Self {
        Self::with_storage(no_data, Storage::Dense(Vec::new()))
    }

    /// Create a sparse (hashmap) table, optionally compressing each element.
    pub fn new_sparse(no_data: T, compress: bool) -> Self {
        Self::with_storage(
            no_data,
            Storage::Sparse {
                blocks: HashMap::new(),
                compress,
            },
        )
    }

    fn with_storage(no_data: T, storage: Storage<T>) -> Self {
        Self {
            storage,
            no_data: vec![no_data],
            element_len: 0,
            relation: None,
            provides: None,
            established: false,
            cache: RefCell::new(DecodeCache::default()),
        }
    }

    /// Declare this table a child of the parent providing `relation`.
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    /// Declare this table the parent for `relation`.
    pub fn providing(mut self, relation: Relation) -> Self {
        self.provides = Some(relation);
        self
    }

    /// The relation this table is a child of.
    pub fn relation(&self) -> Option<Relation> {
        self.relation
    }

    /// Element length established by the first write, or 0.
    pub fn element_len(&self) -> usize {
        self.element_len
    }

    /// The sentinel value.
    pub fn sentinel(&self) -> T {
        self.no_data[0]
    }

    /// Whether this table uses the dense strategy.
    pub fn is_dense(&self) -> bool {
        matches!(self.storage, Storage::Dense(_))
    }

    /// Number of stored (non-sentinel) entries.
    pub fn stored_count(&self) -> usize {
        match &self.storage {
            Storage::Dense(index) => index.iter().filter(|v| !v.is_empty()).count(),
            Storage::Sparse { blocks, .. } => blocks.len(),
        }
    }

    /// Element for `id`, or the sentinel when absent or undecodable.
    pub fn get(&self, id: u32) -> View<'_, T> {
        match &self.storage {
            Storage::Dense(index) => match index.get(id as usize) {
                Some(v) if !v.is_empty() => View::Borrowed(v.as_slice()),
                _ => View::Borrowed(self.no_data.as_slice()),
            },
            Storage::Sparse { blocks, .. } => match blocks.get(&id) {
                None => View::Borrowed(self.no_data.as_slice()),
                Some(Block::Raw(v)) => View::Borrowed(v.as_slice()),
                Some(Block::Lz4(bytes)) => self.decode_cached(id, bytes),
            },
        }
    }

    /// First value of the element for `id`. Intended for one-value-per-id tables.
    #[inline]
    pub fn value(&self, id: u32) -> T {
        self.get(id).first().copied().unwrap_or(self.no_data[0])
    }

    fn decode_cached(&self, id: u32, bytes: &[u8]) -> View<'_, T> {
        if let Ok(cache) = self.cache.try_borrow() {
            if cache.id == Some(id) {
                return View::Cached(Ref::map(cache, |c| c.values.as_slice()));
            }
        }

        let decoded = match self.cache.try_borrow_mut() {
            Ok(mut cache) => {
                cache.values.resize(self.element_len, T::default());
                if decode_block(bytes, &mut cache.values) {
                    cache.id = Some(id);
                    true
                } else {
                    cache.id = None;
                    false
                }
            }
            // Another view of this table is alive; decode without the cache.
            Err(_) => {
                let mut values = vec![T::default(); self.element_len];
                if decode_block(bytes, &mut values) {
                    return View::Owned(values);
                }
                false
            }
        };

        if !decoded {
            warn!("Corrupt block for element {}, using sentinel", id);
            return View::Borrowed(self.no_data.as_slice());
        }
        View::Cached(Ref::map(self.cache.borrow(), |c| c.values.as_slice()))
    }

    /// Whether a non-sentinel element is stored for `id`.
    pub fn has(&self, id: u32) -> bool {
        match &self.storage {
            Storage::Dense(index) => index.get(id as usize).is_some_and(|v| !v.is_empty()),
            Storage::Sparse { blocks, .. } => blocks.contains_key(&id),
        }
    }

    /// Store `values` for `id`.
    ///
    /// Nothing is stored when `values` equals the sentinel, or when `parent`
    /// is given and has no entry for `id`.
    pub fn set(&mut self, id: u32, values: &[T], parent: Option<&dyn Presence>) {
        self.establish_len(values.len());
        self.established = true;

        if let Some(parent) = parent {
            debug_assert!(
                parent.is_established(),
                "child table written before its parent"
            );
            debug_assert_eq!(
                parent.provides(),
                self.relation,
                "child table written against the wrong parent"
            );
            if !parent.has(id) {
                self.remove(id);
                return;
            }
        }

        let is_sentinel = values == self.no_data.as_slice();
        match &mut self.storage {
            Storage::Dense(index) => {
                let slot = id as usize;
                if is_sentinel {
                    if let Some(v) = index.get_mut(slot) {
                        v.clear();
                    }
                } else {
                    if index.len() <= slot {
                        index.resize_with(slot + 1, Vec::new);
                    }
                    index[slot] = values.to_vec();
                }
            }
            Storage::Sparse { blocks, compress } => {
                if is_sentinel {
                    blocks.remove(&id);
                } else if *compress {
                    let mut raw = Vec::with_capacity(values.len() * T::WIDTH);
                    T::encode_le(values, &mut raw);
                    blocks.insert(id, Block::Lz4(lz4_flex::block::compress(&raw)));
                } else {
                    blocks.insert(id, Block::Raw(values.to_vec()));
                }
            }
        }
        self.invalidate(id);
    }

    /// Extend the sentinel to `element_len` without storing anything.
    ///
    /// Used for table sections absent from older files.
    pub fn reserve(&mut self, element_len: usize) {
        self.establish_len(element_len);
        self.established = true;
    }

    /// Drop every entry whose id `parent` does not cover.
    pub fn filter_by_parent(&mut self, parent: &dyn Presence) {
        debug_assert_eq!(
            parent.provides(),
            self.relation,
            "child table filtered against the wrong parent"
        );
        match &mut self.storage {
            Storage::Dense(index) => {
                for (id, v) in index.iter_mut().enumerate() {
                    if !parent.has(id as u32) {
                        v.clear();
                    }
                }
            }
            Storage::Sparse { blocks, .. } => blocks.retain(|id, _| parent.has(*id)),
        }
        *self.cache.get_mut() = DecodeCache::default();
    }

    /// Remove every entry. The sentinel and element length are kept.
    pub fn clear(&mut self) {
        match &mut self.storage {
            Storage::Dense(index) => index.clear(),
            Storage::Sparse { blocks, .. } => blocks.clear(),
        }
        *self.cache.get_mut() = DecodeCache::default();
    }

    fn remove(&mut self, id: u32) {
        match &mut self.storage {
            Storage::Dense(index) => {
                if let Some(v) = index.get_mut(id as usize) {
                    v.clear();
                }
            }
            Storage::Sparse { blocks, .. } => {
                blocks.remove(&id);
            }
        }
        self.invalidate(id);
    }

    fn invalidate(&mut self, id: u32) {
        let cache = self.cache.get_mut();
        if cache.id == Some(id) {
            cache.id = None;
        }
    }

    fn establish_len(&mut self, len: usize) {
        if self.element_len == 0 {
            self.element_len = len;
        } else {
            debug_assert_eq!(
                self.element_len, len,
                "element length changed after first write"
            );
        }
        if self.no_data.len() < len {
            let fill = self.no_data[0];
            self.no_data.resize(len, fill);
        }
    }

    /// Read `count` consecutive elements of `element_len` values from a source archive.
    pub fn read_table<R: Read + ?Sized>(
        &mut self,
        r: &mut R,
        element_len: usize,
        count: u32,
        parent: Option<&dyn Presence>,
    ) -> io::Result<()> {
        self.establish_len(element_len);
        self.established = true;

        let mut bytes = vec![0u8; element_len * T::WIDTH];
        let mut values = vec![T::default(); element_len];
        for id in 0..count {
            r.read_exact(&mut bytes)?;
            T::decode_le(&bytes, &mut values);
            self.set(id, &values, parent);
        }
        Ok(())
    }

    /// Serialize the table (strategy, sentinel and entries) for the cache file.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut scratch = Vec::new();
        let flags = match &self.storage {
            Storage::Dense(_) => FLAG_DENSE,
            Storage::Sparse { compress: true, .. } => FLAG_COMPRESSED,
            Storage::Sparse { compress: false, .. } => 0,
        };
        write_u8(w, flags)?;
        write_u32(w, self.element_len as u32)?;
        write_u32(w, self.no_data.len() as u32)?;
        T::encode_le(&self.no_data, &mut scratch);
        w.write_all(&scratch)?;

        match &self.storage {
            Storage::Dense(index) => {
                write_u32(w, index.len() as u32)?;
                for v in index {
                    write_u32(w, v.len() as u32)?;
                    scratch.clear();
                    T::encode_le(v, &mut scratch);
                    w.write_all(&scratch)?;
                }
            }
            Storage::Sparse { blocks, .. } => {
                let mut ids: Vec<u32> = blocks.keys().copied().collect();
                ids.sort_unstable();
                write_u32(w, ids.len() as u32)?;
                for id in ids {
                    write_u32(w, id)?;
                    match &blocks[&id] {
                        Block::Raw(v) => {
                            scratch.clear();
                            T::encode_le(v, &mut scratch);
                            w.write_all(&scratch)?;
                        }
                        Block::Lz4(bytes) => {
                            write_u32(w, bytes.len() as u32)?;
                            w.write_all(bytes)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace the contents with a table serialized by [`write_to`](Self::write_to).
    ///
    /// Relation tags configured at construction are kept.
    pub fn read_from<R: Read + ?Sized>(&mut self, r: &mut R) -> io::Result<()> {
        let flags = read_u8(r)?;
        let element_len = read_len(r, MAX_ELEMENT_LEN, "element")?;
        let no_data_len = read_len(r, MAX_ELEMENT_LEN, "sentinel")?;
        if no_data_len != element_len.max(1) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "sentinel of {} values in a table of {}-value elements",
                    no_data_len, element_len
                ),
            ));
        }
        let no_data = read_values::<T, R>(r, no_data_len)?;

        let storage = if flags & FLAG_DENSE != 0 {
            let count = read_len(r, MAX_ENTRIES, "index")?;
            let mut index = Vec::with_capacity(count.min(1 << 16));
            for _ in 0..count {
                let len = read_len(r, MAX_ELEMENT_LEN, "element")?;
                // Absent entries are stored empty
                if len != 0 && len != element_len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "entry of {} values in a table of {}-value elements",
                            len, element_len
                        ),
                    ));
                }
                index.push(read_values::<T, R>(r, len)?);
            }
            Storage::Dense(index)
        } else {
            let compress = flags & FLAG_COMPRESSED != 0;
            let count = read_len(r, MAX_ENTRIES, "block map")?;
            let mut blocks = HashMap::with_capacity(count.min(1 << 16));
            for _ in 0..count {
                let id = read_u32(r)?;
                let block = if compress {
                    let len = read_len(r, MAX_ELEMENT_LEN * 4 + 64, "block")?;
                    let mut bytes = vec![0u8; len];
                    r.read_exact(&mut bytes)?;
                    Block::Lz4(bytes)
                } else {
                    Block::Raw(read_values::<T, R>(r, element_len)?)
                };
                blocks.insert(id, block);
            }
            Storage::Sparse { blocks, compress }
        };

        self.storage = storage;
        self.no_data = no_data;
        self.element_len = element_len;
        self.established = true;
        *self.cache.get_mut() = DecodeCache::default();
        Ok(())
    }
}

fn read_values<T: Element, R: Read + ?Sized>(r: &mut R, len: usize) -> io::Result<Vec<T>> {
    let mut bytes = vec![0u8; len * T::WIDTH];
    r.read_exact(&mut bytes)?;
    let mut values = vec![T::default(); len];
    T::decode_le(&bytes, &mut values);
    Ok(values)
}

/// Decompress one LZ4 block into `out`. Returns false on any size mismatch or corruption.
fn decode_block<T: Element>(bytes: &[u8], out: &mut [T]) -> bool {
    let expected = out.len() * T::WIDTH;
    let target = bytemuck::cast_slice_mut::<T, u8>(out);
    match lz4_flex::block::decompress_into(bytes, target) {
        Ok(n) if n == expected => {
            T::fix_order(out);
            true
        }
        _ => false,
    }
}

impl<T: Element> Presence for SparseVector<T> {
    fn has(&self, id: u32) -> bool {
        SparseVector::has(self, id)
    }

    fn is_established(&self) -> bool {
        self.established
    }

    fn provides(&self) -> Option<Relation> {
        self.provides
    }
}

impl<T: Element> PartialEq for SparseVector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.element_len == other.element_len
            && self.no_data == other.no_data
            && self.storage == other.storage
    }
}

impl<T: Element> fmt::Debug for SparseVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseVector")
            .field("dense", &self.is_dense())
            .field("element_len", &self.element_len)
            .field("sentinel", &self.no_data[0])
            .field("stored", &self.stored_count())
            .field("relation", &self.relation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn parent_with(ids: &[u32], len: u32) -> SparseVector<u8> {
        let mut parent = SparseVector::new_dense(0u8).providing(Relation::ExtraFrame);
        for id in 0..len {
            let v = if ids.contains(&id) { 1 } else { 0 };
            parent.set(id, &[v], None);
        }
        parent
    }

    #[test]
    fn test_sentinel_is_not_stored() {
        let mut table = SparseVector::new_sparse(255u8, true);
        table.set(4, &[255; 16], None);
        assert!(!table.has(4));
        assert_eq!(&*table.get(4), &[255u8; 16][..]);
        assert_eq!(table.stored_count(), 0);
    }

    #[test]
    fn test_dense_sentinel_is_not_stored() {
        let mut table = SparseVector::new_dense(0u32);
        table.set(0, &[0], None);
        table.set(1, &[7], None);
        assert!(!table.has(0));
        assert!(table.has(1));
        assert_eq!(table.value(1), 7);
        assert_eq!(table.value(9), 0);
    }

    #[test]
    fn test_compressed_roundtrip_and_cache() {
        let mut table = SparseVector::new_sparse(0u16, true);
        let a: Vec<u16> = (0..128).collect();
        let b: Vec<u16> = (0..128).map(|v| v * 3).collect();
        table.set(1, &a, None);
        table.set(2, &b, None);

        assert_eq!(&*table.get(1), a.as_slice());
        // Same id again hits the cache
        assert_eq!(&*table.get(1), a.as_slice());
        assert_eq!(&*table.get(2), b.as_slice());
    }

    #[test]
    fn test_two_live_views_of_compressed_table() {
        let mut table = SparseVector::new_sparse(0u8, true);
        table.set(0, &[1, 2, 3, 4], None);
        table.set(1, &[5, 6, 7, 8], None);

        let first = table.get(0);
        let second = table.get(1);
        assert_eq!(&*first, &[1, 2, 3, 4]);
        assert_eq!(&*second, &[5, 6, 7, 8]);
    }

    #[test]
    fn test_overwrite_invalidates_cache() {
        let mut table = SparseVector::new_sparse(0u8, true);
        table.set(0, &[1, 1, 1, 1], None);
        assert_eq!(&*table.get(0), &[1, 1, 1, 1]);
        table.set(0, &[2, 2, 2, 2], None);
        assert_eq!(&*table.get(0), &[2, 2, 2, 2]);
        table.set(0, &[0, 0, 0, 0], None);
        assert!(!table.has(0));
    }

    #[test]
    fn test_corrupt_block_reads_as_sentinel() {
        let mut table = SparseVector::new_sparse(9u8, true);
        table.set(0, &[1, 2, 3, 4], None);
        if let Storage::Sparse { blocks, .. } = &mut table.storage {
            blocks.insert(3, Block::Lz4(vec![0xF0, 0x01]));
        }
        assert!(table.has(3));
        assert_eq!(&*table.get(3), &[9, 9, 9, 9]);
        assert_eq!(&*table.get(0), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_parent_prunes_child_writes() {
        let parent = parent_with(&[1], 3);
        let mut child = SparseVector::new_sparse(0u16, false).with_relation(Relation::ExtraFrame);
        child.set(0, &[5, 5], Some(&parent));
        child.set(1, &[6, 6], Some(&parent));
        assert!(!child.has(0));
        assert!(child.has(1));
        assert_eq!(&*child.get(0), &[0, 0]);
    }

    #[test]
    fn test_filter_by_parent() {
        let mut child = SparseVector::new_sparse(0u8, true).with_relation(Relation::ExtraFrame);
        child.set(0, &[1, 2], None);
        child.set(1, &[3, 4], None);
        child.set(2, &[5, 6], None);

        let parent = parent_with(&[2], 3);
        child.filter_by_parent(&parent);
        assert!(!child.has(0));
        assert!(!child.has(1));
        assert!(child.has(2));
        assert_eq!(&*child.get(2), &[5, 6]);
    }

    #[test]
    fn test_cleared_parent_prunes_everything() {
        let mut parent = parent_with(&[0, 1], 2);
        parent.clear();
        let mut child = SparseVector::new_sparse(0u8, false).with_relation(Relation::ExtraFrame);
        child.set(0, &[1], None);
        child.filter_by_parent(&parent);
        assert_eq!(child.stored_count(), 0);
    }

    #[test]
    fn test_reserve_extends_sentinel() {
        let mut table = SparseVector::new_sparse(255u8, false);
        table.reserve(64);
        assert_eq!(table.get(10).len(), 64);
        assert!(table.get(10).iter().all(|&v| v == 255));
    }

    #[test]
    fn test_read_table_from_source() {
        let bytes: Vec<u8> = vec![1, 0, 2, 0, 0, 0, 0, 0, 3, 0, 4, 0];
        let mut table = SparseVector::new_sparse(0u16, false);
        table
            .read_table(&mut Cursor::new(bytes), 2, 3, None)
            .unwrap();
        assert_eq!(&*table.get(0), &[1, 2]);
        assert!(!table.has(1));
        assert_eq!(&*table.get(2), &[3, 4]);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut sparse = SparseVector::new_sparse(0u16, true);
        sparse.set(7, &[1, 2, 3], None);
        sparse.set(2, &[4, 5, 6], None);
        let mut dense = SparseVector::new_dense(0xFFFF_FFFFu32);
        dense.set(0, &[11], None);
        dense.set(3, &[12], None);

        let mut buf = Vec::new();
        sparse.write_to(&mut buf).unwrap();
        dense.write_to(&mut buf).unwrap();

        let mut cursor = Cursor::new(&buf);
        let mut sparse2 = SparseVector::new_sparse(0u16, false);
        let mut dense2 = SparseVector::new_dense(0u32);
        sparse2.read_from(&mut cursor).unwrap();
        dense2.read_from(&mut cursor).unwrap();

        assert_eq!(sparse, sparse2);
        assert_eq!(dense, dense2);
        assert_eq!(&*sparse2.get(7), &[1, 2, 3]);
        assert_eq!(dense2.value(1), 0xFFFF_FFFF);

        // Serialization is deterministic
        let mut again = Vec::new();
        sparse2.write_to(&mut again).unwrap();
        dense2.write_to(&mut again).unwrap();
        assert_eq!(buf, again);
    }

    /// Serialized dense `u8` table holding one entry.
    fn dense_bytes(element_len: u32, sentinel_len: u32, entry_len: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u8(&mut buf, FLAG_DENSE).unwrap();
        write_u32(&mut buf, element_len).unwrap();
        write_u32(&mut buf, sentinel_len).unwrap();
        buf.resize(buf.len() + sentinel_len as usize, 0);
        write_u32(&mut buf, 1).unwrap();
        write_u32(&mut buf, entry_len).unwrap();
        buf.resize(buf.len() + entry_len as usize, 7);
        buf
    }

    #[test]
    fn test_read_rejects_wrong_entry_length() {
        let mut table = SparseVector::new_dense(0u8);
        table.read_from(&mut Cursor::new(dense_bytes(4, 4, 4))).unwrap();
        assert_eq!(&*table.get(0), &[7, 7, 7, 7]);

        let mut table = SparseVector::new_dense(0u8);
        table.read_from(&mut Cursor::new(dense_bytes(4, 4, 0))).unwrap();
        assert_eq!(&*table.get(0), &[0, 0, 0, 0]);

        let mut table = SparseVector::new_dense(0u8);
        let err = table.read_from(&mut Cursor::new(dense_bytes(4, 4, 3))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_rejects_wrong_sentinel_length() {
        for sentinel_len in [0, 2, 5] {
            let mut table = SparseVector::new_dense(0u8);
            let err = table
                .read_from(&mut Cursor::new(dense_bytes(4, sentinel_len, 4)))
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
        // Zero-length elements still carry a one-value sentinel
        let mut table = SparseVector::new_dense(0u8);
        table.read_from(&mut Cursor::new(dense_bytes(0, 1, 0))).unwrap();
        assert_eq!(table.element_len(), 0);
    }

    proptest! {
        #[test]
        fn prop_get_returns_what_was_set(
            entries in proptest::collection::vec((0u32..64, proptest::collection::vec(0u8..4, 16)), 0..32),
            compress in any::<bool>(),
        ) {
            let mut table = SparseVector::new_sparse(0u8, compress);
            let mut expected = HashMap::new();
            for (id, values) in &entries {
                table.set(*id, values, None);
                expected.insert(*id, values.clone());
            }
            for (id, values) in &expected {
                prop_assert_eq!(&*table.get(*id), values.as_slice());
                prop_assert_eq!(table.has(*id), values.iter().any(|&v| v != 0));
            }
        }

        #[test]
        fn prop_orphan_child_is_never_stored(id in 0u32..16, values in proptest::collection::vec(1u8..255, 4)) {
            let parent = parent_with(&[], 16);
            let mut child = SparseVector::new_sparse(0u8, true).with_relation(Relation::ExtraFrame);
            child.set(id, &values, Some(&parent));
            prop_assert!(!child.has(id));
        }
    }
}
