//! Slot storage for one element kind.
//!
//! An [`ElementList`] is an arena of `Option<T>` slots with a freelist of
//! recyclable slots, an `eid -> slot` map, a selection set and the
//! active/highlight singletons. Slot handles are only valid until the next
//! [`ElementList::compact`]; eids survive it.

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use super::element::Element;
use super::flags::MeshFlags;
use super::index::{Eid, Handle};
use crate::customdata::{CdFlags, CustomData, CustomDataElem, CustomDataLayer, LayerKind};
use crate::error::{MeshError, Result};

/// Old-slot to new-slot mapping produced by [`ElementList::compact`].
#[derive(Debug, Clone)]
pub struct Remap<H> {
    slots: Vec<Option<usize>>,
    _marker: PhantomData<H>,
}

impl<H: Handle> Remap<H> {
    /// New handle of an element that lived at `old`, if it survived.
    #[inline]
    pub fn get(&self, old: H) -> Option<H> {
        self.slots
            .get(old.slot())
            .copied()
            .flatten()
            .map(H::from_slot)
    }

    /// Whether every slot kept its position.
    pub fn is_identity(&self) -> bool {
        self.slots
            .iter()
            .enumerate()
            .all(|(i, s)| s.map_or(true, |s| s == i))
    }
}

/// Storage, identity map and selection state for one element kind.
#[derive(Debug, Clone)]
pub struct ElementList<T: Element> {
    items: Vec<Option<T>>,
    freelist: Vec<usize>,
    idxmap: HashMap<Eid, usize>,
    selected: BTreeSet<usize>,
    active: Option<usize>,
    highlight: Option<usize>,
    custom_data: CustomData,
    len: usize,
}

impl<T: Element> Default for ElementList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> ElementList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            freelist: Vec::new(),
            idxmap: HashMap::new(),
            selected: BTreeSet::new(),
            active: None,
            highlight: None,
            custom_data: CustomData::new(T::TYPE),
            len: 0,
        }
    }

    // ==================== Accessors ====================

    /// Number of live elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list holds no live elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, live or free.
    #[inline]
    pub fn num_slots(&self) -> usize {
        self.items.len()
    }

    /// Whether `h` refers to a live element.
    #[inline]
    pub fn contains(&self, h: T::Id) -> bool {
        matches!(self.items.get(h.slot()), Some(Some(_)))
    }

    /// Element at `h`, if live.
    #[inline]
    pub fn get(&self, h: T::Id) -> Option<&T> {
        self.items.get(h.slot()).and_then(Option::as_ref)
    }

    /// Mutable element at `h`, if live.
    #[inline]
    pub fn get_mut(&mut self, h: T::Id) -> Option<&mut T> {
        self.items.get_mut(h.slot()).and_then(Option::as_mut)
    }

    /// Element at `h`, or a [`MeshError::DeadElement`].
    pub fn try_get(&self, h: T::Id) -> Result<&T> {
        self.get(h).ok_or_else(|| dead::<T>(h))
    }

    /// Handle of the element with identity `eid`.
    #[inline]
    pub fn handle_of(&self, eid: Eid) -> Option<T::Id> {
        self.idxmap.get(&eid).map(|&slot| T::Id::from_slot(slot))
    }

    /// Registry of attribute layers.
    #[inline]
    pub fn custom_data(&self) -> &CustomData {
        &self.custom_data
    }

    // ==================== Iteration ====================

    /// Iterate over live elements with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (T::Id, &T)> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().map(|e| (T::Id::from_slot(i), e)))
    }

    /// Iterate mutably over live elements with their handles.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (T::Id, &mut T)> + '_ {
        self.items
            .iter_mut()
            .enumerate()
            .filter_map(|(i, item)| item.as_mut().map(|e| (T::Id::from_slot(i), e)))
    }

    /// Iterate over handles of live elements.
    pub fn handles(&self) -> impl Iterator<Item = T::Id> + '_ {
        self.iter().map(|(h, _)| h)
    }

    // ==================== Insertion / Removal ====================

    /// Store `elem` and return its handle.
    ///
    /// Elements without attribute values get one default value per layer.
    pub(crate) fn push(&mut self, mut elem: T) -> Result<T::Id> {
        let eid = elem.eid();
        if self.idxmap.contains_key(&eid) {
            return Err(MeshError::DuplicateEid(eid.get()));
        }

        if elem.custom_data().len() != self.custom_data.len() {
            *elem.custom_data_mut() = self.custom_data.init_element();
        }

        let slot = match self.freelist.pop() {
            Some(slot) => slot,
            None => {
                self.items.push(None);
                self.items.len() - 1
            }
        };

        elem.set_index(slot);
        if elem.flag().contains(MeshFlags::SELECT) {
            self.selected.insert(slot);
        }
        self.items[slot] = Some(elem);
        self.idxmap.insert(eid, slot);
        self.len += 1;

        Ok(T::Id::from_slot(slot))
    }

    /// Remove the element at `h`, clearing its selection, active and
    /// highlight state, and free its slot.
    pub(crate) fn remove(&mut self, h: T::Id) -> Result<T> {
        let slot = h.slot();
        let elem = self
            .items
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or_else(|| dead::<T>(h))?;

        self.idxmap.remove(&elem.eid());
        self.selected.remove(&slot);
        if self.active == Some(slot) {
            self.active = None;
        }
        if self.highlight == Some(slot) {
            self.highlight = None;
        }

        self.freelist.push(slot);
        self.len -= 1;
        Ok(elem)
    }

    /// Pack live elements into the lowest slots, preserving order.
    ///
    /// Every handle held elsewhere must be rewritten through the returned
    /// [`Remap`]. Eids are unchanged.
    pub(crate) fn compact(&mut self) -> Remap<T::Id> {
        let old = std::mem::take(&mut self.items);
        let mut slots = vec![None; old.len()];
        self.items.reserve(self.len);

        for (i, item) in old.into_iter().enumerate() {
            if let Some(mut elem) = item {
                let ni = self.items.len();
                elem.set_index(ni);
                slots[i] = Some(ni);
                self.items.push(Some(elem));
            }
        }

        self.freelist.clear();
        self.idxmap = self
            .items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().map(|e| (e.eid(), i)))
            .collect();
        self.selected = self.selected.iter().filter_map(|&s| slots[s]).collect();
        self.active = self.active.and_then(|s| slots[s]);
        self.highlight = self.highlight.and_then(|s| slots[s]);

        log::debug!("compacted {} list to {} slots", T::TYPE.name(), self.items.len());

        Remap {
            slots,
            _marker: PhantomData,
        }
    }

    // ==================== Selection ====================

    /// Set or clear SELECT on `h`. UPDATE is set when the state changes.
    pub fn set_select(&mut self, h: T::Id, state: bool) -> Result<()> {
        let slot = h.slot();
        let elem = self.get_mut(h).ok_or_else(|| dead::<T>(h))?;
        let flag = elem.flag_mut();

        if flag.contains(MeshFlags::SELECT) != state {
            flag.set(MeshFlags::SELECT, state);
            flag.insert(MeshFlags::UPDATE);
        }

        if state {
            self.selected.insert(slot);
        } else {
            self.selected.remove(&slot);
        }
        Ok(())
    }

    /// Whether `h` is selected.
    pub fn is_selected(&self, h: T::Id) -> bool {
        self.selected.contains(&h.slot())
    }

    /// Select every visible element.
    pub fn select_all(&mut self) {
        let handles: Vec<T::Id> = self
            .iter()
            .filter(|(_, e)| !e.flag().contains(MeshFlags::HIDE))
            .map(|(h, _)| h)
            .collect();
        for h in handles {
            let _ = self.set_select(h, true);
        }
    }

    /// Deselect every element.
    pub fn select_none(&mut self) {
        let handles: Vec<T::Id> = self.selected().collect();
        for h in handles {
            let _ = self.set_select(h, false);
        }
    }

    /// Iterate over selected handles, in slot order.
    pub fn selected(&self) -> impl Iterator<Item = T::Id> + '_ {
        self.selected.iter().map(|&s| T::Id::from_slot(s))
    }

    /// Number of selected elements.
    pub fn num_selected(&self) -> usize {
        self.selected.len()
    }

    /// The active element.
    pub fn active(&self) -> Option<T::Id> {
        self.active.map(T::Id::from_slot)
    }

    /// Set or clear the active element.
    pub fn set_active(&mut self, h: Option<T::Id>) -> Result<()> {
        if let Some(h) = h {
            self.try_get(h)?;
        }
        self.active = h.map(Handle::slot);
        Ok(())
    }

    /// The highlighted element.
    pub fn highlight(&self) -> Option<T::Id> {
        self.highlight.map(T::Id::from_slot)
    }

    /// Set or clear the highlighted element.
    pub fn set_highlight(&mut self, h: Option<T::Id>) -> Result<()> {
        if let Some(h) = h {
            self.try_get(h)?;
        }
        self.highlight = h.map(Handle::slot);
        Ok(())
    }

    // ==================== Custom Data ====================

    /// Add a layer and give every element a default value for it.
    pub fn add_custom_data_layer(&mut self, kind: LayerKind, name: Option<&str>) -> Result<usize> {
        let before = self.custom_data.len();
        let index = self.custom_data.add_layer(kind, name)?;

        if self.custom_data.len() > before {
            for elem in self.items.iter_mut().flatten() {
                elem.custom_data_mut().push(kind.default_elem());
            }
        }
        Ok(index)
    }

    /// Remove a layer and its value from every element, shifting later
    /// values down.
    pub fn remove_custom_data_layer(&mut self, index: usize) -> Result<CustomDataLayer> {
        let layer = self.custom_data.rem_layer(index)?;
        for elem in self.items.iter_mut().flatten() {
            let cd = elem.custom_data_mut();
            if index < cd.len() {
                cd.remove(index);
            }
        }
        Ok(layer)
    }

    /// Remove every `TEMPORARY` layer.
    pub fn strip_temp_layers(&mut self) -> Result<()> {
        let mut temp = self.custom_data.temp_layers();
        temp.sort_unstable_by(|a, b| b.cmp(a));
        for index in temp {
            self.remove_custom_data_layer(index)?;
        }
        Ok(())
    }

    /// Value of layer `layer` on `h`.
    pub fn cd_value(&self, h: T::Id, layer: usize) -> Option<&CustomDataElem> {
        self.get(h).and_then(|e| e.custom_data().get(layer))
    }

    /// Mutable value of layer `layer` on `h`.
    pub fn cd_value_mut(&mut self, h: T::Id, layer: usize) -> Option<&mut CustomDataElem> {
        self.get_mut(h).and_then(|e| e.custom_data_mut().get_mut(layer))
    }

    /// Copy all attribute values from `src` to `dst`.
    pub fn copy_custom_data(&mut self, src: T::Id, dst: T::Id) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let values = self.try_get(src)?.custom_data().to_vec();
        let elem = self.get_mut(dst).ok_or_else(|| dead::<T>(dst))?;
        *elem.custom_data_mut() = values;
        Ok(())
    }

    /// Blend attribute values of `sources` into `dest`, layer by layer.
    ///
    /// `NO_INTERP` layers are skipped and `NO_INTERP_COPY_ONLY` layers take
    /// the first source. A layer whose weights sum to zero keeps its value
    /// and logs a warning.
    pub fn custom_data_interp(&mut self, dest: T::Id, sources: &[(T::Id, f64)]) -> Result<()> {
        if sources.is_empty() || self.custom_data.is_empty() {
            return Ok(());
        }

        let mut values: Vec<Vec<CustomDataElem>> = Vec::with_capacity(sources.len());
        let mut weights: Vec<f64> = Vec::with_capacity(sources.len());
        for &(h, w) in sources {
            values.push(self.try_get(h)?.custom_data().to_vec());
            weights.push(w);
        }

        let flags: Vec<CdFlags> = self.custom_data.flatlist().iter().map(|l| l.flag).collect();
        let elem = self.get_mut(dest).ok_or_else(|| dead::<T>(dest))?;
        let cd = elem.custom_data_mut();

        for (i, flag) in flags.into_iter().enumerate() {
            if flag.contains(CdFlags::NO_INTERP) || i >= cd.len() {
                continue;
            }

            let srcs: Vec<&CustomDataElem> = values.iter().filter_map(|v| v.get(i)).collect();
            if srcs.is_empty() {
                continue;
            }
            if flag.contains(CdFlags::NO_INTERP_COPY_ONLY) {
                srcs[0].copy_to(&mut cd[i])?;
                continue;
            }

            match cd[i].interp(&srcs, &weights) {
                Ok(()) => {}
                Err(MeshError::ZeroWeight) => {
                    log::warn!("zero total weight interpolating layer {}", i);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Bring every element's value list in line with the registry.
    ///
    /// Missing or mismatched values are replaced with defaults. Returns the
    /// number of elements that were repaired.
    pub fn fix_custom_data(&mut self) -> usize {
        let kinds: Vec<LayerKind> = self.custom_data.flatlist().iter().map(|l| l.kind).collect();
        let mut fixed = 0;

        for elem in self.items.iter_mut().flatten() {
            let cd = elem.custom_data_mut();
            let ok = cd.len() == kinds.len() && cd.iter().zip(&kinds).all(|(v, &k)| v.kind() == k);
            if ok {
                continue;
            }

            fixed += 1;
            cd.truncate(kinds.len());
            for (i, &kind) in kinds.iter().enumerate() {
                match cd.get(i) {
                    Some(v) if v.kind() == kind => {}
                    Some(_) => cd[i] = kind.default_elem(),
                    None => cd.push(kind.default_elem()),
                }
            }
        }

        if fixed > 0 {
            log::warn!("repaired custom data on {} {} elements", fixed, T::TYPE.name());
        }
        fixed
    }

    // ==================== Internal ====================

    /// Give every live element a new eid from `next`, in slot order.
    pub(crate) fn reassign_eids(&mut self, mut next: impl FnMut() -> Eid) {
        self.idxmap.clear();
        for (slot, item) in self.items.iter_mut().enumerate() {
            if let Some(elem) = item {
                let eid = next();
                elem.set_eid(eid);
                self.idxmap.insert(eid, slot);
            }
        }
    }

    /// Selection slots, for validation.
    pub(crate) fn selected_slots(&self) -> &BTreeSet<usize> {
        &self.selected
    }

    /// Eid map entries, for validation.
    pub(crate) fn eid_entries(&self) -> impl Iterator<Item = (Eid, T::Id)> + '_ {
        self.idxmap.iter().map(|(&eid, &slot)| (eid, T::Id::from_slot(slot)))
    }
}

impl<T: Element> Index<T::Id> for ElementList<T> {
    type Output = T;

    /// Panics if `h` is dead; dead handles are a caller bug.
    #[inline]
    fn index(&self, h: T::Id) -> &T {
        match self.get(h) {
            Some(e) => e,
            None => panic!("{} {:?} is dead", T::TYPE.name(), h),
        }
    }
}

impl<T: Element> IndexMut<T::Id> for ElementList<T> {
    #[inline]
    fn index_mut(&mut self, h: T::Id) -> &mut T {
        match self.get_mut(h) {
            Some(e) => e,
            None => panic!("{} {:?} is dead", T::TYPE.name(), h),
        }
    }
}

pub(crate) fn dead<T: Element>(h: T::Id) -> MeshError {
    MeshError::DeadElement {
        kind: T::TYPE.name(),
        index: h.slot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Vertex, VertId};
    use nalgebra::Point3;

    fn vert(eid: u64) -> Vertex {
        let mut v = Vertex::new(Point3::new(eid as f64, 0.0, 0.0));
        v.eid = Eid(eid);
        v
    }

    fn list_of(n: u64) -> (ElementList<Vertex>, Vec<VertId>) {
        let mut list = ElementList::new();
        let hs = (1..=n).map(|i| list.push(vert(i)).unwrap()).collect();
        (list, hs)
    }

    #[test]
    fn test_push_and_lookup() {
        let (list, hs) = list_of(3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.handle_of(Eid(2)), Some(hs[1]));
        assert_eq!(list[hs[2]].eid, Eid(3));
        assert_eq!(list[hs[2]].index, 2);
    }

    #[test]
    fn test_duplicate_eid() {
        let (mut list, _) = list_of(2);
        assert_eq!(list.push(vert(2)), Err(MeshError::DuplicateEid(2)));
    }

    #[test]
    fn test_remove_recycles_slot() {
        let (mut list, hs) = list_of(3);
        list.set_active(Some(hs[1])).unwrap();
        list.set_highlight(Some(hs[1])).unwrap();
        list.set_select(hs[1], true).unwrap();

        let removed = list.remove(hs[1]).unwrap();
        assert_eq!(removed.eid, Eid(2));
        assert_eq!(list.active(), None);
        assert_eq!(list.highlight(), None);
        assert_eq!(list.num_selected(), 0);
        assert!(!list.contains(hs[1]));
        assert!(list.remove(hs[1]).is_err());

        let h = list.push(vert(10)).unwrap();
        assert_eq!(h, hs[1]);
        assert_eq!(list.num_slots(), 3);
    }

    #[test]
    fn test_compact_keeps_eids() {
        let (mut list, hs) = list_of(5);
        list.remove(hs[0]).unwrap();
        list.remove(hs[2]).unwrap();
        list.set_select(hs[4], true).unwrap();
        list.set_active(Some(hs[3])).unwrap();

        let remap = list.compact();
        assert!(!remap.is_identity());
        assert_eq!(list.num_slots(), 3);
        assert_eq!(remap.get(hs[0]), None);

        for (old, eid) in [(hs[1], 2), (hs[3], 4), (hs[4], 5)] {
            let new = remap.get(old).unwrap();
            assert_eq!(list[new].eid, Eid(eid));
            assert_eq!(list[new].index, new.index());
            assert_eq!(list.handle_of(Eid(eid)), Some(new));
        }
        assert_eq!(list.selected().collect::<Vec<_>>(), vec![VertId::new(2)]);
        assert_eq!(list.active(), Some(VertId::new(1)));
    }

    #[test]
    fn test_select_sets_update() {
        let (mut list, hs) = list_of(2);
        list.set_select(hs[0], true).unwrap();
        assert!(list[hs[0]].flag.contains(MeshFlags::SELECT | MeshFlags::UPDATE));

        list[hs[1]].flag.insert(MeshFlags::HIDE);
        list.select_none();
        list.select_all();
        assert!(list.is_selected(hs[0]));
        assert!(!list.is_selected(hs[1]));
    }

    #[test]
    fn test_custom_data_fan_out() {
        let (mut list, hs) = list_of(4);
        let a = list.add_custom_data_layer(LayerKind::Float, None).unwrap();
        let b = list.add_custom_data_layer(LayerKind::Vec3, None).unwrap();
        for &h in &hs {
            assert_eq!(list[h].custom_data.len(), 2);
            assert_eq!(list[h].custom_data[b].kind(), LayerKind::Vec3);
        }

        list.remove_custom_data_layer(a).unwrap();
        for &h in &hs {
            assert_eq!(list[h].custom_data.len(), 1);
            // the vec3 value shifted into slot 0
            assert_eq!(list[h].custom_data[0].kind(), LayerKind::Vec3);
        }

        // new elements come with defaults
        let h = list.push(vert(99)).unwrap();
        assert_eq!(list[h].custom_data.len(), 1);
    }

    #[test]
    fn test_custom_data_interp() {
        let (mut list, hs) = list_of(3);
        let f = list.add_custom_data_layer(LayerKind::Float, None).unwrap();
        let o = list.add_custom_data_layer(LayerKind::OrigIndex, None).unwrap();
        *list.cd_value_mut(hs[0], f).unwrap() = CustomDataElem::Float(2.0);
        *list.cd_value_mut(hs[1], f).unwrap() = CustomDataElem::Float(4.0);
        *list.cd_value_mut(hs[0], o).unwrap() = CustomDataElem::OrigIndex(11);

        list.custom_data_interp(hs[2], &[(hs[0], 0.5), (hs[1], 0.5)]).unwrap();
        assert_eq!(list.cd_value(hs[2], f), Some(&CustomDataElem::Float(3.0)));
        assert_eq!(list.cd_value(hs[2], o), Some(&CustomDataElem::OrigIndex(11)));

        // zero weight leaves the value alone
        list.custom_data_interp(hs[2], &[(hs[0], 0.0)]).unwrap();
        assert_eq!(list.cd_value(hs[2], f), Some(&CustomDataElem::Float(3.0)));
    }

    #[test]
    fn test_strip_temp_and_fix() {
        let (mut list, hs) = list_of(2);
        list.add_custom_data_layer(LayerKind::Float, None).unwrap();
        let t = list.add_custom_data_layer(LayerKind::Int, Some("scratch")).unwrap();
        list.custom_data.layer_mut(t).unwrap().flag |= CdFlags::TEMPORARY;
        list.strip_temp_layers().unwrap();
        assert_eq!(list.custom_data().len(), 1);
        assert_eq!(list[hs[0]].custom_data.len(), 1);

        list[hs[1]].custom_data.clear();
        assert_eq!(list.fix_custom_data(), 1);
        assert_eq!(list[hs[1]].custom_data.len(), 1);
        assert_eq!(list.fix_custom_data(), 0);
    }
}
