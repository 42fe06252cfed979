//! World model: elements, the spatial element repository and id allocation

pub mod element;
pub mod events;
pub mod id;
pub mod math;
mod relations;
pub mod repository;
pub mod spatial;
pub mod vehicle_models;

pub use element::{
    Attachment, CameraState, Element, ElementId, ElementKind, ElementType, PlayerFlags,
    PlayerState, PlayerWeapon, VehicleDamage, VehicleState, WaterState,
};
pub use events::{EventBus, Listeners, QuitReason, SubscriptionId, WorldEvent};
pub use id::{ElementIdGenerator, SequentialIdGenerator};
pub use math::{Basis, Vector2, Vector3};
pub use repository::ElementRepository;
pub use spatial::Bounds;

/// Structural errors reported by the repository.
///
/// These indicate a bug in the caller rather than network noise, so they are
/// returned instead of being logged and swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("Element {0} not found")]
    NotFound(ElementId),

    #[error("Element id {0} is already in use")]
    DuplicateId(ElementId),

    #[error("A world can only have one root element")]
    DuplicateRoot,

    #[error("The root element cannot be removed or re-parented")]
    RootIsFixed,

    #[error("Element id space exhausted")]
    IdSpaceExhausted,

    #[error("Element {id} is a {actual:?}, expected a {expected:?}")]
    WrongType {
        id: ElementId,
        expected: ElementType,
        actual: ElementType,
    },

    #[error("Parenting {child} to {parent} would create a cycle")]
    CyclicParent { child: ElementId, parent: ElementId },

    #[error("Attaching {element} to {target} would create a cycle")]
    CyclicAttachment { element: ElementId, target: ElementId },

    #[error("Towing {trailer} behind {tower} would create a cycle")]
    CyclicTow { trailer: ElementId, tower: ElementId },

    #[error("Shape {0} is not a polygon")]
    NotAPolygon(ElementId),

    #[error("Shape {shape} has no polygon point {index}")]
    PointOutOfRange { shape: ElementId, index: usize },
}
