//! Typed attribute layers attached to mesh elements.
//!
//! A [`CustomData`] registry lists the layers of one element list. Each
//! element stores one [`CustomDataElem`] per layer, in the registry's flat
//! order. The registry alone never touches elements; adding or removing a
//! layer through [`ElementList`](crate::mesh::ElementList) fans the change
//! out to every element.
//!
//! # Example
//!
//! ```
//! use loopmesh::customdata::{CustomData, LayerKind};
//! use loopmesh::mesh::ElemTypes;
//!
//! let mut cd = CustomData::new(ElemTypes::LOOP);
//! let uv = cd.add_layer(LayerKind::Uv, None).unwrap();
//! let uv2 = cd.add_layer(LayerKind::Uv, None).unwrap();
//!
//! assert_eq!(cd.layer(uv2).unwrap().name, "UV2");
//! assert_eq!(cd.active_layer(LayerKind::Uv).unwrap().index, uv);
//! ```

mod elem;

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use elem::{CustomDataElem, LayerKind};

use crate::error::{MeshError, Result};
use crate::mesh::ElemTypes;

bitflags::bitflags! {
    /// Per-layer behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct CdFlags: u32 {
        /// Layer is selected in the UI.
        const SELECT = 1;
        /// At most one layer of this kind may exist.
        const SINGLE_LAYER = 2;
        /// Layer is scratch data, dropped by `strip_temp_layers`.
        const TEMPORARY = 4;
        /// Layer is not uploaded to index buffers.
        const IGNORE_FOR_INDEXBUF = 8;
        /// Interpolation leaves the destination untouched.
        const NO_INTERP = 16;
        /// Interpolation copies the first source instead of blending.
        const NO_INTERP_COPY_ONLY = 32;
    }
}

/// Descriptor of one layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CustomDataLayer {
    /// Kind of the values stored in this layer.
    pub kind: LayerKind,
    /// Unique name within the registry.
    pub name: String,
    /// Position in the flat layer list and in every element's value list.
    pub index: usize,
    /// Registry-unique id, stable across removals of other layers.
    pub id: u32,
    /// Behavior flags.
    pub flag: CdFlags,
}

/// The layers of one kind, plus the active one.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerSet {
    layers: Vec<usize>,
    active: Option<usize>,
}

impl LayerSet {
    /// Flat indices of the layers in this set.
    pub fn layers(&self) -> &[usize] {
        &self.layers
    }

    /// Flat index of the active layer.
    pub fn active(&self) -> Option<usize> {
        self.active.or_else(|| self.layers.first().copied())
    }

    /// Number of layers in the set.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the set holds no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Layer registry for one element type.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CustomData {
    elem_type: ElemTypes,
    sets: BTreeMap<LayerKind, LayerSet>,
    flatlist: Vec<CustomDataLayer>,
    next_id: u32,
}

impl CustomData {
    /// Create an empty registry for elements of `elem_type`.
    pub fn new(elem_type: ElemTypes) -> Self {
        Self {
            elem_type,
            sets: BTreeMap::new(),
            flatlist: Vec::new(),
            next_id: 1,
        }
    }

    /// Element type this registry serves.
    pub fn elem_type(&self) -> ElemTypes {
        self.elem_type
    }

    /// All layers in flat order.
    pub fn flatlist(&self) -> &[CustomDataLayer] {
        &self.flatlist
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.flatlist.len()
    }

    /// Whether no layers exist.
    pub fn is_empty(&self) -> bool {
        self.flatlist.is_empty()
    }

    /// Layer at flat index `index`.
    pub fn layer(&self, index: usize) -> Option<&CustomDataLayer> {
        self.flatlist.get(index)
    }

    /// Mutable layer at flat index `index`.
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut CustomDataLayer> {
        self.flatlist.get_mut(index)
    }

    /// Layer set of `kind`, if any layer of it exists.
    pub fn layer_set(&self, kind: LayerKind) -> Option<&LayerSet> {
        self.sets.get(&kind)
    }

    /// Layers of `kind`, in insertion order.
    pub fn layers_of(&self, kind: LayerKind) -> impl Iterator<Item = &CustomDataLayer> + '_ {
        self.sets
            .get(&kind)
            .into_iter()
            .flat_map(|set| set.layers.iter())
            .map(|&i| &self.flatlist[i])
    }

    /// Number of layers of `kind`.
    pub fn num_layers(&self, kind: LayerKind) -> usize {
        self.sets.get(&kind).map_or(0, LayerSet::len)
    }

    /// Whether any layer of `kind` exists.
    pub fn has_layer(&self, kind: LayerKind) -> bool {
        self.num_layers(kind) > 0
    }

    /// Flat index of the active layer of `kind`.
    pub fn layer_index(&self, kind: LayerKind) -> Option<usize> {
        self.sets.get(&kind).and_then(LayerSet::active)
    }

    /// The active layer of `kind`; defaults to the first one.
    pub fn active_layer(&self, kind: LayerKind) -> Option<&CustomDataLayer> {
        self.layer_index(kind).map(|i| &self.flatlist[i])
    }

    /// Make the layer at `index` the active one of its kind.
    pub fn set_active_layer(&mut self, index: usize) -> Result<()> {
        let kind = self.layer(index).ok_or(MeshError::NoSuchLayer(index))?.kind;
        if let Some(set) = self.sets.get_mut(&kind) {
            set.active = Some(index);
        }
        Ok(())
    }

    /// Layer of `kind` called `name`.
    pub fn named_layer(&self, kind: LayerKind, name: &str) -> Option<&CustomDataLayer> {
        self.layers_of(kind).find(|layer| layer.name == name)
    }

    fn unique_name(&self, base: &str) -> String {
        let taken = |name: &str| self.flatlist.iter().any(|layer| layer.name == name);

        let mut name = base.to_string();
        let mut i = 2;
        while taken(&name) {
            name = format!("{}{}", base, i);
            i += 1;
        }
        name
    }

    /// Register a new layer and return its flat index.
    ///
    /// Only the registry changes. `SINGLE_LAYER` kinds return the existing
    /// layer if there is one.
    pub fn add_layer(&mut self, kind: LayerKind, name: Option<&str>) -> Result<usize> {
        if !kind.elem_types().intersects(self.elem_type) {
            return Err(MeshError::LayerNotAllowed {
                kind: kind.type_name(),
                elem: self.elem_type,
            });
        }

        let flag = kind.default_flags();
        if flag.contains(CdFlags::SINGLE_LAYER) {
            if let Some(existing) = self.layer_index(kind) {
                return Ok(existing);
            }
        }

        let name = self.unique_name(name.unwrap_or(kind.default_name()));
        let index = self.flatlist.len();
        let id = self.next_id;
        self.next_id += 1;

        self.flatlist.push(CustomDataLayer {
            kind,
            name,
            index,
            id,
            flag,
        });

        let set = self.sets.entry(kind).or_default();
        set.layers.push(index);
        if set.active.is_none() {
            set.active = Some(index);
        }

        log::trace!("added {} layer at index {}", kind.type_name(), index);
        Ok(index)
    }

    /// Remove the layer at flat index `index` and return it.
    ///
    /// Later layers shift down by one. If the removed layer was active, the
    /// next sibling of the same kind becomes active.
    pub fn rem_layer(&mut self, index: usize) -> Result<CustomDataLayer> {
        if index >= self.flatlist.len() {
            return Err(MeshError::NoSuchLayer(index));
        }

        let layer = self.flatlist.remove(index);
        for (i, l) in self.flatlist.iter_mut().enumerate() {
            l.index = i;
        }

        if let Some(set) = self.sets.get_mut(&layer.kind) {
            if let Some(pos) = set.layers.iter().position(|&i| i == index) {
                if set.active == Some(index) {
                    set.active = if set.layers.len() > 1 {
                        Some(set.layers[(pos + 1) % set.layers.len()])
                    } else {
                        None
                    };
                }
                set.layers.remove(pos);
            }
        }

        let shift = |i: usize| if i > index { i - 1 } else { i };
        for set in self.sets.values_mut() {
            for i in set.layers.iter_mut() {
                *i = shift(*i);
            }
            set.active = set.active.map(shift);
        }
        self.sets.retain(|_, set| !set.is_empty());

        Ok(layer)
    }

    /// Default value list for a new element, one entry per layer.
    pub fn init_element(&self) -> Vec<CustomDataElem> {
        self.flatlist.iter().map(|layer| layer.kind.default_elem()).collect()
    }

    /// Flat indices of `TEMPORARY` layers.
    pub fn temp_layers(&self) -> Vec<usize> {
        self.flatlist
            .iter()
            .filter(|layer| layer.flag.contains(CdFlags::TEMPORARY))
            .map(|layer| layer.index)
            .collect()
    }

    /// Add every layer of `other` that has no same-kind, same-name
    /// counterpart here. Returns the flat indices of the added layers.
    pub fn merge(&mut self, other: &CustomData) -> Result<Vec<usize>> {
        let mut added = Vec::new();
        for layer in &other.flatlist {
            if self.named_layer(layer.kind, &layer.name).is_some() {
                continue;
            }
            let index = self.add_layer(layer.kind, Some(&layer.name))?;
            self.flatlist[index].flag = layer.flag;
            added.push(index);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vert_cd() -> CustomData {
        CustomData::new(ElemTypes::VERTEX)
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_layers_and_values() {
        let mut cd = vert_cd();
        let i = cd.add_layer(LayerKind::Float, Some("weight")).unwrap();
        let layer = cd.layer(i).unwrap().clone();
        let json = serde_json::to_string(&layer).unwrap();
        assert_eq!(serde_json::from_str::<CustomDataLayer>(&json).unwrap(), layer);

        let values = vec![
            CustomDataElem::Float(0.5),
            CustomDataElem::Int(-3),
            CustomDataElem::Vec3(nalgebra::Vector3::new(1.0, 2.0, 0.25)),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(serde_json::from_str::<Vec<CustomDataElem>>(&json).unwrap(), values);
    }

    #[test]
    fn test_add_layer_unique_names() {
        let mut cd = vert_cd();
        let a = cd.add_layer(LayerKind::Float, Some("weight")).unwrap();
        let b = cd.add_layer(LayerKind::Float, Some("weight")).unwrap();
        let c = cd.add_layer(LayerKind::Float, Some("weight")).unwrap();

        assert_eq!(cd.layer(a).unwrap().name, "weight");
        assert_eq!(cd.layer(b).unwrap().name, "weight2");
        assert_eq!(cd.layer(c).unwrap().name, "weight3");
        assert_eq!(cd.num_layers(LayerKind::Float), 3);
        assert_ne!(cd.layer(a).unwrap().id, cd.layer(b).unwrap().id);
    }

    #[test]
    fn test_layer_not_allowed() {
        let mut cd = vert_cd();
        assert!(matches!(
            cd.add_layer(LayerKind::Uv, None),
            Err(MeshError::LayerNotAllowed { .. })
        ));
    }

    #[test]
    fn test_single_layer_kind() {
        let mut cd = vert_cd();
        let a = cd.add_layer(LayerKind::Mask, None).unwrap();
        let b = cd.add_layer(LayerKind::Mask, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(cd.len(), 1);
    }

    #[test]
    fn test_rem_layer_promotes_sibling() {
        let mut cd = vert_cd();
        let f0 = cd.add_layer(LayerKind::Float, None).unwrap();
        let _v = cd.add_layer(LayerKind::Vec3, None).unwrap();
        let _f1 = cd.add_layer(LayerKind::Float, None).unwrap();
        assert_eq!(cd.layer_index(LayerKind::Float), Some(f0));

        cd.rem_layer(f0).unwrap();

        // flat list shifted: vec3 is 0, second float is 1
        assert_eq!(cd.layer(0).unwrap().kind, LayerKind::Vec3);
        assert_eq!(cd.layer(1).unwrap().index, 1);
        assert_eq!(cd.layer_index(LayerKind::Float), Some(1));
        assert_eq!(cd.active_layer(LayerKind::Float).unwrap().name, "Float2");
    }

    #[test]
    fn test_rem_last_layer_of_kind() {
        let mut cd = vert_cd();
        let f = cd.add_layer(LayerKind::Float, None).unwrap();
        cd.rem_layer(f).unwrap();
        assert!(!cd.has_layer(LayerKind::Float));
        assert!(cd.active_layer(LayerKind::Float).is_none());
        assert!(cd.rem_layer(0).is_err());
    }

    #[test]
    fn test_set_active_and_named() {
        let mut cd = vert_cd();
        cd.add_layer(LayerKind::Color, Some("paint")).unwrap();
        let b = cd.add_layer(LayerKind::Color, Some("dirt")).unwrap();
        cd.set_active_layer(b).unwrap();
        assert_eq!(cd.active_layer(LayerKind::Color).unwrap().name, "dirt");
        assert_eq!(cd.named_layer(LayerKind::Color, "paint").unwrap().index, 0);
        assert!(cd.named_layer(LayerKind::Color, "none").is_none());
    }

    #[test]
    fn test_init_element_and_merge() {
        let mut a = vert_cd();
        a.add_layer(LayerKind::Float, Some("w")).unwrap();

        let mut b = vert_cd();
        b.add_layer(LayerKind::Float, Some("w")).unwrap();
        let t = b.add_layer(LayerKind::Int, Some("tmp")).unwrap();
        b.layer_mut(t).unwrap().flag |= CdFlags::TEMPORARY;

        let added = a.merge(&b).unwrap();
        assert_eq!(added, vec![1]);
        assert_eq!(a.temp_layers(), vec![1]);

        let values = a.init_element();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].kind(), LayerKind::Int);
    }
}
