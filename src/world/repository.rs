//! Spatial element repository
//!
//! Owns every live element. Each element sits behind its own lock so handlers
//! touching different elements never contend; structural edits (tree edges,
//! tow pairs, driver links, attachments) are serialised by one structure lock
//! and lock every affected element before writing, so a half-updated pair is
//! never visible. The spatial index is only written while the moved element's
//! lock is held, and queries never observe it mid-update.

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::element::{Element, ElementId, ElementKind, ElementType, PlayerState, VehicleState};
use super::events::{Listeners, SubscriptionId};
use super::id::{ElementIdGenerator, SequentialIdGenerator};
use super::math::Vector3;
use super::spatial::{Bounds, SpatialGrid, DEFAULT_CELL_SIZE};
use super::WorldError;

pub(super) struct ElementEntry {
    element: RwLock<Element>,
    element_type: ElementType,
    destroyed: Listeners<ElementId>,
    /// Set under the element lock once the element left the index
    evicted: AtomicBool,
}

impl ElementEntry {
    fn new(element: Element) -> Self {
        Self {
            element_type: element.element_type(),
            element: RwLock::new(element),
            destroyed: Listeners::new(),
            evicted: AtomicBool::new(false),
        }
    }
}

/// Write guards over a set of elements, acquired in ascending id order
pub(super) struct Locked<'a> {
    guards: Vec<(ElementId, RwLockWriteGuard<'a, Element>)>,
}

impl<'a> Locked<'a> {
    fn acquire(entries: &'a [(ElementId, Arc<ElementEntry>)]) -> Self {
        Self {
            guards: entries
                .iter()
                .map(|(id, entry)| (*id, entry.element.write()))
                .collect(),
        }
    }

    pub(super) fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.guards
            .iter_mut()
            .find(|(locked, _)| *locked == id)
            .map(|(_, guard)| &mut **guard)
    }

    pub(super) fn vehicle_mut(&mut self, id: ElementId) -> Option<&mut VehicleState> {
        self.get_mut(id).and_then(Element::vehicle_mut)
    }

    pub(super) fn player_mut(&mut self, id: ElementId) -> Option<&mut PlayerState> {
        self.get_mut(id).and_then(Element::player_mut)
    }
}

pub struct ElementRepository {
    root: ElementId,
    elements: DashMap<ElementId, Arc<ElementEntry>>,
    by_type: DashMap<ElementType, DashSet<ElementId>>,
    spatial: RwLock<SpatialGrid>,
    structure: Mutex<()>,
    ids: Arc<dyn ElementIdGenerator>,
}

impl ElementRepository {
    /// Repository whose root takes the first id handed out by `ids`
    pub fn new(cell_size: f32, ids: Arc<dyn ElementIdGenerator>) -> Result<Self, WorldError> {
        let root = ids.next_id()?;
        Ok(Self::with_root(cell_size, ids, root))
    }

    /// Repository with a sequential generator; the root gets id 0
    pub fn with_cell_size(cell_size: f32) -> Self {
        Self::with_root(
            cell_size,
            Arc::new(SequentialIdGenerator::starting_at(1)),
            ElementId(0),
        )
    }

    fn with_root(cell_size: f32, ids: Arc<dyn ElementIdGenerator>, root_id: ElementId) -> Self {
        let mut root = Element::new(ElementKind::Root);
        root.id = root_id;

        let repository = Self {
            root: root_id,
            elements: DashMap::new(),
            by_type: DashMap::new(),
            spatial: RwLock::new(SpatialGrid::new(cell_size)),
            structure: Mutex::new(()),
            ids,
        };
        repository
            .elements
            .insert(root_id, Arc::new(ElementEntry::new(root)));
        repository.index_type(root_id, ElementType::Root);
        repository
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    // ------------------------------------------------------------------
    // Add / remove
    // ------------------------------------------------------------------

    /// Add an element under the root.
    ///
    /// An element carrying [`ElementId::INVALID`] gets an id from the
    /// generator; an explicit id must not belong to a live element. Relations
    /// carried by the value (tree edges, tow pairs, drivers, attachments) are
    /// reset, use the repository operations to establish them.
    pub fn insert(&self, mut element: Element) -> Result<ElementId, WorldError> {
        if element.element_type() == ElementType::Root {
            return Err(WorldError::DuplicateRoot);
        }

        let _structure = self.structure.lock();

        let id = if element.id.is_valid() {
            if self.elements.contains_key(&element.id) {
                return Err(WorldError::DuplicateId(element.id));
            }
            self.ids.reserve(element.id);
            element.id
        } else {
            // a custom generator may still collide with an explicit id
            let mut id = self.ids.next_id()?;
            while self.elements.contains_key(&id) {
                id = self.ids.next_id()?;
            }
            id
        };

        element.id = id;
        element.parent = Some(self.root);
        element.children.clear();
        element.attached_to = None;
        element.attached.clear();
        match &mut element.kind {
            ElementKind::Vehicle(vehicle) => {
                vehicle.driver = None;
                vehicle.towing = None;
                vehicle.towed_by = None;
            }
            ElementKind::Player(player) => player.vehicle = None,
            _ => {}
        }

        let element_type = element.element_type();
        let position = element.position;

        if let Some(root) = self.entry(self.root) {
            root.element.write().children.insert(id);
        }
        self.elements.insert(id, Arc::new(ElementEntry::new(element)));
        self.index_type(id, element_type);
        self.spatial.write().upsert(id, position, element_type);

        debug!(element = %id, element_type = ?element_type, "Element added");
        Ok(id)
    }

    /// Remove an element.
    ///
    /// Destroyed listeners run synchronously before eviction; children move
    /// to the root and every relation pointing at the element is cleared.
    /// Returns the final state of the removed element.
    pub fn remove(&self, id: ElementId) -> Result<Element, WorldError> {
        if id == self.root {
            return Err(WorldError::RootIsFixed);
        }
        let entry = self.entry(id).ok_or(WorldError::NotFound(id))?;

        // Closing the registry doubles as the "already being removed" guard
        if !entry.destroyed.close_and_emit(&id) {
            return Err(WorldError::NotFound(id));
        }

        let _structure = self.structure.lock();

        let snapshot = entry.element.read().clone();
        let mut related: Vec<ElementId> = vec![id, self.root];
        related.extend(snapshot.parent);
        related.extend(snapshot.children.iter().copied());
        related.extend(snapshot.attached_to.map(|a| a.target));
        related.extend(snapshot.attached.iter().copied());
        match &snapshot.kind {
            ElementKind::Vehicle(vehicle) => {
                related.extend(vehicle.towing);
                related.extend(vehicle.towed_by);
                related.extend(vehicle.driver);
            }
            ElementKind::Player(player) => related.extend(player.vehicle),
            _ => {}
        }

        let entries = self.collect_entries(related);
        let mut locked = Locked::acquire(&entries);

        if let Some(parent) = snapshot.parent {
            if let Some(parent) = locked.get_mut(parent) {
                parent.children.remove(&id);
            }
        }
        for child in &snapshot.children {
            if let Some(element) = locked.get_mut(*child) {
                element.parent = Some(self.root);
            }
            if let Some(root) = locked.get_mut(self.root) {
                root.children.insert(*child);
            }
        }

        if let Some(attachment) = snapshot.attached_to {
            if let Some(target) = locked.get_mut(attachment.target) {
                target.attached.remove(&id);
            }
        }
        for attached in &snapshot.attached {
            if let Some(element) = locked.get_mut(*attached) {
                element.attached_to = None;
            }
        }

        match &snapshot.kind {
            ElementKind::Vehicle(vehicle) => {
                if let Some(towed) = vehicle.towing {
                    if let Some(towed) = locked.vehicle_mut(towed) {
                        towed.towed_by = None;
                    }
                }
                if let Some(tower) = vehicle.towed_by {
                    if let Some(tower) = locked.vehicle_mut(tower) {
                        tower.towing = None;
                    }
                }
                if let Some(driver) = vehicle.driver {
                    if let Some(driver) = locked.player_mut(driver) {
                        if driver.vehicle == Some(id) {
                            driver.vehicle = None;
                        }
                    }
                }
            }
            ElementKind::Player(player) => {
                if let Some(vehicle) = player.vehicle {
                    if let Some(vehicle) = locked.vehicle_mut(vehicle) {
                        if vehicle.driver == Some(id) {
                            vehicle.driver = None;
                        }
                    }
                }
            }
            _ => {}
        }

        let removed = match locked.get_mut(id) {
            Some(element) => {
                element.parent = None;
                element.children.clear();
                element.attached_to = None;
                element.attached.clear();
                entry.evicted.store(true, Ordering::Release);
                self.spatial.write().remove(id);
                element.clone()
            }
            None => return Err(WorldError::NotFound(id)),
        };
        drop(locked);

        if let Some(set) = self.by_type.get(&entry.element_type) {
            set.remove(&id);
        }
        self.elements.remove(&id);

        debug!(element = %id, element_type = ?entry.element_type, "Element removed");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    /// Snapshot of an element
    pub fn get(&self, id: ElementId) -> Option<Element> {
        self.with_element(id, Element::clone)
    }

    /// Read an element in place without cloning it
    pub fn with_element<R>(&self, id: ElementId, read: impl FnOnce(&Element) -> R) -> Option<R> {
        let entry = self.entry(id)?;
        let element = entry.element.read();
        Some(read(&element))
    }

    pub fn element_type(&self, id: ElementId) -> Option<ElementType> {
        self.entry(id).map(|entry| entry.element_type)
    }

    /// Like [`contains`](Self::contains), but also checks the type
    pub fn is_type(&self, id: ElementId, element_type: ElementType) -> bool {
        self.element_type(id) == Some(element_type)
    }

    pub fn ids_by_type(&self, element_type: ElementType) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .by_type
            .get(&element_type)
            .map(|set| set.iter().map(|id| *id).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn get_by_type(&self, element_type: ElementType) -> Vec<Element> {
        self.ids_by_type(element_type)
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Map every element of a type through `select`, skipping `None`s
    pub fn collect_by_type<R>(
        &self,
        element_type: ElementType,
        mut select: impl FnMut(&Element) -> Option<R>,
    ) -> Vec<R> {
        self.ids_by_type(element_type)
            .into_iter()
            .filter_map(|id| self.with_element(id, &mut select).flatten())
            .collect()
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.with_element(id, |element| element.parent).flatten()
    }

    pub fn children(&self, id: ElementId) -> Vec<ElementId> {
        self.with_element(id, |element| element.children().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn count_by_type(&self) -> BTreeMap<ElementType, usize> {
        self.by_type
            .iter()
            .map(|entry| (*entry.key(), entry.value().len()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Apply `mutate` to one element inside its critical section.
    ///
    /// All field writes done by the closure become visible together, and the
    /// spatial index follows any position change before the lock is released.
    /// The closure must not call back into the repository.
    pub fn update<R>(
        &self,
        id: ElementId,
        mutate: impl FnOnce(&mut Element) -> R,
    ) -> Result<R, WorldError> {
        let entry = self.entry(id).ok_or(WorldError::NotFound(id))?;
        let mut element = entry.element.write();
        if entry.evicted.load(Ordering::Acquire) {
            return Err(WorldError::NotFound(id));
        }

        let before = element.position;
        let result = mutate(&mut element);
        if element.position != before && entry.element_type != ElementType::Root {
            self.spatial
                .write()
                .upsert(id, element.position, entry.element_type);
        }
        Ok(result)
    }

    /// Move an element to a new parent, rejecting cycles
    pub fn set_parent(&self, child: ElementId, parent: ElementId) -> Result<(), WorldError> {
        if child == self.root {
            return Err(WorldError::RootIsFixed);
        }

        let _structure = self.structure.lock();

        let old_parent = self
            .with_element(child, |element| element.parent)
            .ok_or(WorldError::NotFound(child))?;
        if !self.contains(parent) {
            return Err(WorldError::NotFound(parent));
        }
        if old_parent == Some(parent) {
            return Ok(());
        }

        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(WorldError::CyclicParent { child, parent });
            }
            cursor = self.parent(current);
        }

        let mut ids = vec![child, parent];
        ids.extend(old_parent);
        let entries = self.collect_entries(ids);
        let mut locked = Locked::acquire(&entries);

        if let Some(old) = old_parent {
            if let Some(old) = locked.get_mut(old) {
                old.children.remove(&child);
            }
        }
        if let Some(new_parent) = locked.get_mut(parent) {
            new_parent.children.insert(child);
        }
        if let Some(element) = locked.get_mut(child) {
            element.parent = Some(parent);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Destroyed listeners
    // ------------------------------------------------------------------

    /// Run `callback` when the element is removed. Fails if the element is
    /// gone or already being removed.
    pub fn subscribe_destroyed<F>(&self, id: ElementId, callback: F) -> Result<SubscriptionId, WorldError>
    where
        F: Fn(ElementId) + Send + Sync + 'static,
    {
        let entry = self.entry(id).ok_or(WorldError::NotFound(id))?;
        entry
            .destroyed
            .subscribe(move |destroyed: &ElementId| callback(*destroyed))
            .ok_or(WorldError::NotFound(id))
    }

    pub fn unsubscribe_destroyed(&self, id: ElementId, subscription: SubscriptionId) -> bool {
        self.entry(id)
            .map(|entry| entry.destroyed.unsubscribe(subscription))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Spatial queries
    // ------------------------------------------------------------------

    pub fn query_sphere(&self, center: Vector3, radius: f32) -> Vec<ElementId> {
        self.spatial.read().query_sphere(&center, radius)
    }

    pub fn query_box(&self, bounds: &Bounds) -> Vec<ElementId> {
        self.spatial.read().query_box(bounds)
    }

    /// Closest element to `point` within `max_radius`, with its distance
    pub fn nearest(
        &self,
        point: Vector3,
        max_radius: f32,
        element_type: Option<ElementType>,
    ) -> Option<(ElementId, f32)> {
        self.spatial.read().nearest(&point, max_radius, element_type)
    }

    // ------------------------------------------------------------------
    // Internals shared with the relation operations
    // ------------------------------------------------------------------

    fn entry(&self, id: ElementId) -> Option<Arc<ElementEntry>> {
        self.elements.get(&id).map(|entry| entry.value().clone())
    }

    fn index_type(&self, id: ElementId, element_type: ElementType) {
        self.by_type.entry(element_type).or_default().insert(id);
    }

    pub(super) fn structure_lock(&self) -> MutexGuard<'_, ()> {
        self.structure.lock()
    }

    /// Live entries for `ids`, sorted and deduplicated for lock ordering
    pub(super) fn collect_entries(
        &self,
        ids: impl IntoIterator<Item = ElementId>,
    ) -> Vec<(ElementId, Arc<ElementEntry>)> {
        ids.into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| self.entry(id).map(|entry| (id, entry)))
            .collect()
    }

    pub(super) fn lock<'a>(entries: &'a [(ElementId, Arc<ElementEntry>)]) -> Locked<'a> {
        Locked::acquire(entries)
    }
}

impl Default for ElementRepository {
    fn default() -> Self {
        Self::with_cell_size(DEFAULT_CELL_SIZE)
    }
}
