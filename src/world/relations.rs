//! Two-sided relations between elements: tow pairs, drivers and attachments.
//!
//! Every operation here runs under the repository structure lock and writes
//! both ends while holding the locks of all elements involved.

use std::collections::HashSet;

use super::element::{Attachment, Element, ElementId, ElementType, PlayerState, VehicleState};
use super::math::{Basis, Vector3};
use super::repository::ElementRepository;
use super::WorldError;

impl ElementRepository {
    fn read_vehicle<R>(
        &self,
        id: ElementId,
        read: impl FnOnce(&VehicleState) -> R,
    ) -> Result<R, WorldError> {
        self.with_element(id, |element| match element.vehicle() {
            Some(vehicle) => Ok(read(vehicle)),
            None => Err(wrong_type(element, ElementType::Vehicle)),
        })
        .unwrap_or(Err(WorldError::NotFound(id)))
    }

    fn read_player<R>(
        &self,
        id: ElementId,
        read: impl FnOnce(&PlayerState) -> R,
    ) -> Result<R, WorldError> {
        self.with_element(id, |element| match element.player() {
            Some(player) => Ok(read(player)),
            None => Err(wrong_type(element, ElementType::Player)),
        })
        .unwrap_or(Err(WorldError::NotFound(id)))
    }

    // ------------------------------------------------------------------
    // Towing
    // ------------------------------------------------------------------

    /// Hitch `trailer` behind `tower`, or unhitch it with `None`.
    ///
    /// Both directions of the pair change together. A tower already pulling
    /// another trailer drops it first. Returns whether anything changed.
    pub fn attach_to_tower(
        &self,
        trailer: ElementId,
        tower: Option<ElementId>,
    ) -> Result<bool, WorldError> {
        let _structure = self.structure_lock();

        let old_tower = self.read_vehicle(trailer, |v| v.towed_by)?;
        if old_tower == tower {
            return Ok(false);
        }

        let mut displaced = None;
        if let Some(tower) = tower {
            displaced = self.read_vehicle(tower, |v| v.towing)?;

            // walking up from the tower must not reach the trailer
            let mut cursor = Some(tower);
            while let Some(current) = cursor {
                if current == trailer {
                    return Err(WorldError::CyclicTow { trailer, tower });
                }
                cursor = self.read_vehicle(current, |v| v.towed_by).ok().flatten();
            }
        }

        let mut ids = vec![trailer];
        ids.extend(old_tower);
        ids.extend(tower);
        ids.extend(displaced);
        let entries = self.collect_entries(ids);
        let mut locked = Self::lock(&entries);

        if let Some(old) = old_tower {
            if let Some(old) = locked.vehicle_mut(old) {
                if old.towing == Some(trailer) {
                    old.towing = None;
                }
            }
        }
        if let Some(previous) = displaced {
            if let Some(previous) = locked.vehicle_mut(previous) {
                previous.towed_by = None;
            }
        }
        if let Some(tower) = tower {
            if let Some(tower) = locked.vehicle_mut(tower) {
                tower.towing = Some(trailer);
            }
        }
        if let Some(trailer) = locked.vehicle_mut(trailer) {
            trailer.towed_by = tower;
        }
        Ok(true)
    }

    /// Unhitch whatever `tower` is pulling; returns the released trailer
    pub fn detach_towed(&self, tower: ElementId) -> Result<Option<ElementId>, WorldError> {
        match self.towed_vehicle(tower)? {
            Some(trailer) => {
                self.attach_to_tower(trailer, None)?;
                Ok(Some(trailer))
            }
            None => Ok(None),
        }
    }

    pub fn towed_vehicle(&self, tower: ElementId) -> Result<Option<ElementId>, WorldError> {
        self.read_vehicle(tower, |v| v.towing)
    }

    pub fn towing_vehicle(&self, trailer: ElementId) -> Result<Option<ElementId>, WorldError> {
        self.read_vehicle(trailer, |v| v.towed_by)
    }

    // ------------------------------------------------------------------
    // Occupants
    // ------------------------------------------------------------------

    /// Seat `driver` in `vehicle`, or clear the driver seat with `None`.
    ///
    /// The player leaves any other vehicle they were driving and the previous
    /// driver of `vehicle` is unseated.
    pub fn set_vehicle_driver(
        &self,
        vehicle: ElementId,
        driver: Option<ElementId>,
    ) -> Result<(), WorldError> {
        let _structure = self.structure_lock();

        let old_driver = self.read_vehicle(vehicle, |v| v.driver)?;
        let previous_vehicle = match driver {
            Some(player) => self.read_player(player, |p| p.vehicle)?,
            None => None,
        };
        if old_driver == driver && (driver.is_none() || previous_vehicle == Some(vehicle)) {
            return Ok(());
        }

        let mut ids = vec![vehicle];
        ids.extend(old_driver);
        ids.extend(driver);
        ids.extend(previous_vehicle);
        let entries = self.collect_entries(ids);
        let mut locked = Self::lock(&entries);

        if let Some(old) = old_driver.filter(|old| Some(*old) != driver) {
            if let Some(old) = locked.player_mut(old) {
                if old.vehicle == Some(vehicle) {
                    old.vehicle = None;
                }
            }
        }
        if let Some(previous) = previous_vehicle.filter(|previous| *previous != vehicle) {
            if let Some(previous) = locked.vehicle_mut(previous) {
                if previous.driver == driver {
                    previous.driver = None;
                }
            }
        }
        if let Some(seat) = locked.vehicle_mut(vehicle) {
            seat.driver = driver;
        }
        if let Some(player) = driver {
            if let Some(player) = locked.player_mut(player) {
                player.vehicle = Some(vehicle);
            }
        }
        Ok(())
    }

    /// Take a player out of their vehicle; returns the vehicle they left
    pub fn remove_from_vehicle(&self, player: ElementId) -> Result<Option<ElementId>, WorldError> {
        let vehicle = self.read_player(player, |p| p.vehicle)?;
        match vehicle {
            Some(vehicle) => {
                let driver = self.read_vehicle(vehicle, |v| v.driver)?;
                if driver == Some(player) {
                    self.set_vehicle_driver(vehicle, None)?;
                } else {
                    self.update(player, |element| {
                        if let Some(state) = element.player_mut() {
                            state.vehicle = None;
                        }
                    })?;
                }
                Ok(Some(vehicle))
            }
            None => Ok(None),
        }
    }

    /// Put `player` in one of the passenger seats of `vehicle`
    pub fn seat_passenger(&self, vehicle: ElementId, player: ElementId) -> Result<(), WorldError> {
        self.read_vehicle(vehicle, |_| ())?;
        if let Some(current) = self.read_player(player, |p| p.vehicle)? {
            if current == vehicle && self.read_vehicle(vehicle, |v| v.driver)? != Some(player) {
                return Ok(());
            }
            self.remove_from_vehicle(player)?;
        }
        self.update(player, |element| {
            if let Some(state) = element.player_mut() {
                state.vehicle = Some(vehicle);
            }
        })
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    /// Bind `element` to `target` at an offset expressed in the target's
    /// local axes, and snap it into place.
    pub fn attach(
        &self,
        element: ElementId,
        target: ElementId,
        position_offset: Vector3,
        rotation_offset: Vector3,
    ) -> Result<(), WorldError> {
        {
            let _structure = self.structure_lock();

            let old_target = self
                .with_element(element, |e| e.attached_to.map(|a| a.target))
                .ok_or(WorldError::NotFound(element))?;
            if !self.contains(target) {
                return Err(WorldError::NotFound(target));
            }

            let mut cursor = Some(target);
            while let Some(current) = cursor {
                if current == element {
                    return Err(WorldError::CyclicAttachment { element, target });
                }
                cursor = self
                    .with_element(current, |e| e.attached_to.map(|a| a.target))
                    .flatten();
            }

            let mut ids = vec![element, target];
            ids.extend(old_target);
            let entries = self.collect_entries(ids);
            let mut locked = Self::lock(&entries);

            if let Some(old) = old_target.filter(|old| *old != target) {
                if let Some(old) = locked.get_mut(old) {
                    old.attached.remove(&element);
                }
            }
            if let Some(target) = locked.get_mut(target) {
                target.attached.insert(element);
            }
            if let Some(attached) = locked.get_mut(element) {
                attached.attached_to = Some(Attachment {
                    target,
                    position_offset,
                    rotation_offset,
                });
            }
        }

        self.propagate_attachments(target);
        Ok(())
    }

    /// Release an attachment; returns whether the element was attached
    pub fn detach(&self, element: ElementId) -> Result<bool, WorldError> {
        let _structure = self.structure_lock();

        let target = self
            .with_element(element, |e| e.attached_to.map(|a| a.target))
            .ok_or(WorldError::NotFound(element))?;
        let Some(target) = target else {
            return Ok(false);
        };

        let entries = self.collect_entries([element, target]);
        let mut locked = Self::lock(&entries);
        if let Some(target) = locked.get_mut(target) {
            target.attached.remove(&element);
        }
        if let Some(attached) = locked.get_mut(element) {
            attached.attached_to = None;
        }
        Ok(true)
    }

    /// Recompute the transform of everything attached to `target`,
    /// transitively. Returns the number of elements moved.
    pub fn propagate_attachments(&self, target: ElementId) -> usize {
        let mut moved = 0;
        let mut visited = HashSet::new();
        let mut pending = vec![target];

        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some((position, rotation, attached)) = self.with_element(current, |e| {
                (e.position, e.rotation, e.attached_elements().collect::<Vec<_>>())
            }) else {
                continue;
            };
            if attached.is_empty() {
                continue;
            }

            let basis = Basis::from_rotation(rotation);
            for child in attached {
                let updated = self.update(child, |element| match element.attached_to {
                    Some(attachment) if attachment.target == current => {
                        element.position = position + basis.apply(attachment.position_offset);
                        element.rotation = rotation + attachment.rotation_offset;
                        true
                    }
                    _ => false,
                });
                if let Ok(true) = updated {
                    moved += 1;
                    pending.push(child);
                }
            }
        }
        moved
    }
}

fn wrong_type(element: &Element, expected: ElementType) -> WorldError {
    WorldError::WrongType {
        id: element.id(),
        expected,
        actual: element.element_type(),
    }
}
