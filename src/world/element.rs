//! World elements and their per-type state

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::colshape::ColShapeGeometry;
use crate::net::EndpointId;

use super::math::{Vector2, Vector3};

/// Stable element identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub u32);

impl ElementId {
    /// Wire value for "no element"; also marks an element not yet added
    pub const INVALID: ElementId = ElementId(u32::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Root,
    Player,
    Vehicle,
    ColShape,
    Water,
    Pickup,
    Object,
    Dummy,
}

pub const MAX_DOORS: usize = 6;
pub const MAX_WHEELS: usize = 4;
pub const MAX_PANELS: usize = 7;
pub const MAX_LIGHTS: usize = 4;

/// Boolean state bundle carried by player pure sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerFlags {
    pub is_in_water: bool,
    pub is_on_ground: bool,
    pub has_jetpack: bool,
    pub is_ducked: bool,
    pub wears_goggles: bool,
    pub has_contact: bool,
    pub is_choking: bool,
    pub akimbo_target_up: bool,
    pub is_on_fire: bool,
    pub is_syncing_velocity: bool,
    pub is_stealth_aiming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerWeapon {
    pub slot: u8,
    pub weapon_type: u8,
    pub ammo: u16,
    pub ammo_in_clip: u16,
}

/// What a player's camera is following
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraState {
    Fixed { position: Vector3, look_at: Vector3 },
    /// Non-owning; resolve through the repository, the target may be gone
    Target(Option<ElementId>),
}

impl Default for CameraState {
    fn default() -> Self {
        CameraState::Target(None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub endpoint: EndpointId,
    pub health: f32,
    pub armor: f32,
    pub weapon: PlayerWeapon,
    pub aim_origin: Vector3,
    pub aim_direction: Vector3,
    pub camera_position: Vector3,
    pub camera_direction: Vector3,
    pub camera_rotation: f32,
    pub camera: CameraState,
    pub flags: PlayerFlags,
    pub contact_element: Option<ElementId>,
    pub(crate) vehicle: Option<ElementId>,
}

impl PlayerState {
    pub fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            health: 100.0,
            armor: 0.0,
            weapon: PlayerWeapon::default(),
            aim_origin: Vector3::ZERO,
            aim_direction: Vector3::ZERO,
            camera_position: Vector3::ZERO,
            camera_direction: Vector3::ZERO,
            camera_rotation: 0.0,
            camera: CameraState::default(),
            flags: PlayerFlags::default(),
            contact_element: None,
            vehicle: None,
        }
    }

    /// Vehicle the player currently occupies
    pub fn vehicle(&self) -> Option<ElementId> {
        self.vehicle
    }
}

/// Per-component damage bytes; the server copy is authoritative
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VehicleDamage {
    pub doors: [u8; MAX_DOORS],
    pub wheels: [u8; MAX_WHEELS],
    pub panels: [u8; MAX_PANELS],
    pub lights: [u8; MAX_LIGHTS],
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub model: u16,
    pub health: f32,
    pub damage: VehicleDamage,
    pub turret_rotation: Vector2,
    pub adjustable_property: u16,
    pub is_siren_active: bool,
    pub door_open_ratios: [f32; MAX_DOORS],
    pub(crate) driver: Option<ElementId>,
    pub(crate) towing: Option<ElementId>,
    pub(crate) towed_by: Option<ElementId>,
}

impl VehicleState {
    pub fn new(model: u16) -> Self {
        Self {
            model,
            health: 1000.0,
            damage: VehicleDamage::default(),
            turret_rotation: Vector2::ZERO,
            adjustable_property: 0,
            is_siren_active: false,
            door_open_ratios: [0.0; MAX_DOORS],
            driver: None,
            towing: None,
            towed_by: None,
        }
    }

    pub fn driver(&self) -> Option<ElementId> {
        self.driver
    }

    /// Vehicle being towed by this one
    pub fn towed_vehicle(&self) -> Option<ElementId> {
        self.towing
    }

    /// Vehicle towing this one
    pub fn towing_vehicle(&self) -> Option<ElementId> {
        self.towed_by
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaterState {
    pub vertices: Vec<Vector3>,
    pub is_shallow: bool,
}

/// Type-specific element payload
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Root,
    Player(PlayerState),
    Vehicle(VehicleState),
    ColShape(ColShapeGeometry),
    Water(WaterState),
    Pickup { model: u16 },
    Object { model: u16 },
    Dummy,
}

impl ElementKind {
    pub fn element_type(&self) -> ElementType {
        match self {
            ElementKind::Root => ElementType::Root,
            ElementKind::Player(_) => ElementType::Player,
            ElementKind::Vehicle(_) => ElementType::Vehicle,
            ElementKind::ColShape(_) => ElementType::ColShape,
            ElementKind::Water(_) => ElementType::Water,
            ElementKind::Pickup { .. } => ElementType::Pickup,
            ElementKind::Object { .. } => ElementType::Object,
            ElementKind::Dummy => ElementType::Dummy,
        }
    }
}

/// Offset binding of one element to another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attachment {
    pub target: ElementId,
    /// Along the target's right / forward / up axes
    pub position_offset: Vector3,
    pub rotation_offset: Vector3,
}

/// A node of the element tree.
///
/// Tree edges, tow pairs, driver links and attachments are only changed by the
/// repository, which keeps both endpoints consistent; handlers mutate the
/// transform and the type-specific state.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub(crate) id: ElementId,
    pub(crate) parent: Option<ElementId>,
    pub(crate) children: BTreeSet<ElementId>,
    pub(crate) attached_to: Option<Attachment>,
    pub(crate) attached: BTreeSet<ElementId>,
    pub(crate) kind: ElementKind,
    pub position: Vector3,
    pub rotation: Vector3,
    pub velocity: Vector3,
    pub turn_velocity: Vector3,
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            id: ElementId::INVALID,
            parent: None,
            children: BTreeSet::new(),
            attached_to: None,
            attached: BTreeSet::new(),
            kind,
            position: Vector3::ZERO,
            rotation: Vector3::ZERO,
            velocity: Vector3::ZERO,
            turn_velocity: Vector3::ZERO,
        }
    }

    /// Request a specific id instead of a generated one
    pub fn with_id(mut self, id: ElementId) -> Self {
        self.id = id;
        self
    }

    pub fn with_position(mut self, position: Vector3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Vector3) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn element_type(&self) -> ElementType {
        self.kind.element_type()
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.children.iter().copied()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attached_to.as_ref()
    }

    pub fn attached_elements(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.attached.iter().copied()
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn player(&self) -> Option<&PlayerState> {
        match &self.kind {
            ElementKind::Player(player) => Some(player),
            _ => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.kind {
            ElementKind::Player(player) => Some(player),
            _ => None,
        }
    }

    pub fn vehicle(&self) -> Option<&VehicleState> {
        match &self.kind {
            ElementKind::Vehicle(vehicle) => Some(vehicle),
            _ => None,
        }
    }

    pub fn vehicle_mut(&mut self) -> Option<&mut VehicleState> {
        match &mut self.kind {
            ElementKind::Vehicle(vehicle) => Some(vehicle),
            _ => None,
        }
    }

    pub fn shape(&self) -> Option<&ColShapeGeometry> {
        match &self.kind {
            ElementKind::ColShape(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn shape_mut(&mut self) -> Option<&mut ColShapeGeometry> {
        match &mut self.kind {
            ElementKind::ColShape(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn water(&self) -> Option<&WaterState> {
        match &self.kind {
            ElementKind::Water(water) => Some(water),
            _ => None,
        }
    }

    pub fn water_mut(&mut self) -> Option<&mut WaterState> {
        match &mut self.kind {
            ElementKind::Water(water) => Some(water),
            _ => None,
        }
    }
}
