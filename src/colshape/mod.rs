//! Collision-shape membership engine
//!
//! Tracks, per shape, which elements currently satisfy the shape's geometry
//! and turns changes into entered / left transitions. Transitions for one
//! shape are serialised, so per (shape, element) they strictly alternate, and
//! an element destroyed while inside produces exactly one final "left".

pub mod shape;

pub use shape::ColShapeGeometry;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::world::{
    Element, ElementId, ElementKind, ElementRepository, ElementType, EventBus, Listeners,
    SubscriptionId, Vector2, Vector3, WorldError, WorldEvent,
};

/// Outcome of re-evaluating one element against one shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Entered,
    Left,
}

struct ShapeState {
    shape: ElementId,
    enabled: AtomicBool,
    /// Member -> its destroyed subscription
    members: DashMap<ElementId, SubscriptionId>,
    transition: Mutex<()>,
    entered: Listeners<ElementId>,
    left: Listeners<ElementId>,
}

impl ShapeState {
    fn new(shape: ElementId) -> Self {
        Self {
            shape,
            enabled: AtomicBool::new(true),
            members: DashMap::new(),
            transition: Mutex::new(()),
            entered: Listeners::new(),
            left: Listeners::new(),
        }
    }

    /// Destroyed callback of a member
    fn member_destroyed(&self, events: &EventBus, element: ElementId) {
        let _transition = self.transition.lock();
        if self.members.remove(&element).is_some() {
            self.left.emit(&element);
            events.publish(WorldEvent::ColShapeLeft {
                shape: self.shape,
                element,
            });
        }
    }
}

type ShapeMap = DashMap<ElementId, Arc<ShapeState>>;

pub struct ColShapeEngine {
    repository: Arc<ElementRepository>,
    events: EventBus,
    shapes: Arc<ShapeMap>,
}

impl ColShapeEngine {
    pub fn new(repository: Arc<ElementRepository>, events: EventBus) -> Self {
        Self {
            repository,
            events,
            shapes: Arc::new(DashMap::new()),
        }
    }

    /// Add a shape element to the repository and start tracking it
    pub fn create_shape(
        &self,
        geometry: ColShapeGeometry,
        position: Vector3,
    ) -> Result<ElementId, WorldError> {
        let element = Element::new(ElementKind::ColShape(geometry)).with_position(position);
        let id = self.repository.insert(element)?;
        self.register(id)?;
        Ok(id)
    }

    /// Track an existing shape element. Removing the element unregisters it.
    pub fn register(&self, shape: ElementId) -> Result<(), WorldError> {
        match self.repository.element_type(shape) {
            Some(ElementType::ColShape) => {}
            Some(actual) => {
                return Err(WorldError::WrongType {
                    id: shape,
                    expected: ElementType::ColShape,
                    actual,
                })
            }
            None => return Err(WorldError::NotFound(shape)),
        }
        if self.shapes.contains_key(&shape) {
            return Ok(());
        }

        let shapes = Arc::downgrade(&self.shapes);
        let repository = Arc::downgrade(&self.repository);
        self.repository.subscribe_destroyed(shape, move |destroyed| {
            if let (Some(shapes), Some(repository)) = (shapes.upgrade(), repository.upgrade()) {
                forget_shape(&shapes, &repository, destroyed);
            }
        })?;

        self.shapes.insert(shape, Arc::new(ShapeState::new(shape)));
        debug!(shape = %shape, "Collision shape registered");
        Ok(())
    }

    /// Stop tracking a shape without firing "left" for its members
    pub fn unregister(&self, shape: ElementId) -> bool {
        forget_shape(&self.shapes, &self.repository, shape)
    }

    pub fn is_registered(&self, shape: ElementId) -> bool {
        self.shapes.contains_key(&shape)
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Disabled shapes skip checks but keep their members
    pub fn set_enabled(&self, shape: ElementId, enabled: bool) -> Result<(), WorldError> {
        self.state(shape)?.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    pub fn is_enabled(&self, shape: ElementId) -> Result<bool, WorldError> {
        Ok(self.state(shape)?.enabled.load(Ordering::Acquire))
    }

    pub fn elements_within(&self, shape: ElementId) -> Result<Vec<ElementId>, WorldError> {
        let state = self.state(shape)?;
        let mut members: Vec<ElementId> = state.members.iter().map(|m| *m.key()).collect();
        members.sort();
        Ok(members)
    }

    pub fn is_element_within(&self, shape: ElementId, element: ElementId) -> bool {
        self.shapes
            .get(&shape)
            .map(|state| state.members.contains_key(&element))
            .unwrap_or(false)
    }

    /// Callbacks run inside the shape's transition; they must not trigger
    /// checks against the same shape.
    pub fn on_entered<F>(&self, shape: ElementId, callback: F) -> Result<SubscriptionId, WorldError>
    where
        F: Fn(ElementId) + Send + Sync + 'static,
    {
        self.state(shape)?
            .entered
            .subscribe(move |element: &ElementId| callback(*element))
            .ok_or(WorldError::NotFound(shape))
    }

    pub fn on_left<F>(&self, shape: ElementId, callback: F) -> Result<SubscriptionId, WorldError>
    where
        F: Fn(ElementId) + Send + Sync + 'static,
    {
        self.state(shape)?
            .left
            .subscribe(move |element: &ElementId| callback(*element))
            .ok_or(WorldError::NotFound(shape))
    }

    pub fn unsubscribe(&self, shape: ElementId, subscription: SubscriptionId) -> bool {
        match self.shapes.get(&shape) {
            Some(state) => {
                state.entered.unsubscribe(subscription) || state.left.unsubscribe(subscription)
            }
            None => false,
        }
    }

    /// Re-evaluate one element against one shape
    pub fn check_element(
        &self,
        shape: ElementId,
        element: ElementId,
    ) -> Result<Option<Transition>, WorldError> {
        let state = self.state(shape)?;
        Ok(self.check_state(&state, element))
    }

    fn check_state(&self, state: &Arc<ShapeState>, element: ElementId) -> Option<Transition> {
        if !state.enabled.load(Ordering::Acquire) || element == state.shape {
            return None;
        }

        let _transition = state.transition.lock();

        let inside = match self.repository.with_element(element, |e| e.position) {
            Some(position) => self
                .repository
                .with_element(state.shape, |s| {
                    s.shape()
                        .map(|geometry| geometry.is_within(&s.position, &position))
                })
                .flatten()
                .unwrap_or(false),
            None => false,
        };
        let member = state.members.contains_key(&element);

        match (inside, member) {
            (true, false) => {
                let shape = Arc::downgrade(state);
                let events = self.events.clone();
                let subscription = self.repository.subscribe_destroyed(element, move |destroyed| {
                    if let Some(shape) = Weak::upgrade(&shape) {
                        shape.member_destroyed(&events, destroyed);
                    }
                });
                // Fails only when the element is already being destroyed
                let Ok(subscription) = subscription else {
                    return None;
                };

                state.members.insert(element, subscription);
                state.entered.emit(&element);
                self.events.publish(WorldEvent::ColShapeEntered {
                    shape: state.shape,
                    element,
                });
                trace!(shape = %state.shape, element = %element, "Element entered shape");
                Some(Transition::Entered)
            }
            (false, true) => {
                let (_, subscription) = state.members.remove(&element)?;
                self.repository.unsubscribe_destroyed(element, subscription);
                state.left.emit(&element);
                self.events.publish(WorldEvent::ColShapeLeft {
                    shape: state.shape,
                    element,
                });
                trace!(shape = %state.shape, element = %element, "Element left shape");
                Some(Transition::Left)
            }
            _ => None,
        }
    }

    /// Check one element against every shape, e.g. right after it moved
    pub fn check_element_everywhere(&self, element: ElementId) -> usize {
        let states: Vec<Arc<ShapeState>> = self.shapes.iter().map(|s| s.value().clone()).collect();
        states
            .iter()
            .filter(|state| self.check_state(state, element).is_some())
            .count()
    }

    /// One membership pass over every enabled shape. Candidates are the
    /// elements inside the shape's bounding region plus its current members.
    /// Returns the number of transitions.
    pub fn run_pass(&self) -> usize {
        let states: Vec<Arc<ShapeState>> = self.shapes.iter().map(|s| s.value().clone()).collect();
        let mut transitions = 0;

        for state in states {
            if !state.enabled.load(Ordering::Acquire) {
                continue;
            }
            let Some(bounds) = self
                .repository
                .with_element(state.shape, |s| s.shape().map(|g| g.bounds(&s.position)))
                .flatten()
            else {
                continue;
            };

            let mut candidates = self.repository.query_box(&bounds);
            candidates.extend(state.members.iter().map(|m| *m.key()));
            candidates.sort();
            candidates.dedup();

            for candidate in candidates {
                if self.repository.is_type(candidate, ElementType::ColShape) {
                    continue;
                }
                if self.check_state(&state, candidate).is_some() {
                    transitions += 1;
                }
            }
        }
        transitions
    }

    /// Periodic membership pass until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = period.as_millis() as u64, "Collision pass started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let transitions = self.run_pass();
                    if transitions > 0 {
                        trace!(transitions, "Collision pass done");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Collision pass stopped");
    }

    // ------------------------------------------------------------------
    // Polygon editing
    // ------------------------------------------------------------------

    pub fn polygon_points(&self, shape: ElementId) -> Result<Vec<Vector2>, WorldError> {
        self.repository
            .with_element(shape, |e| e.shape().and_then(|g| g.polygon_points()).map(<[_]>::to_vec))
            .ok_or(WorldError::NotFound(shape))?
            .ok_or(WorldError::NotAPolygon(shape))
    }

    /// Insert a point at `index`, or append with `None`. Returns its index.
    pub fn add_polygon_point(
        &self,
        shape: ElementId,
        point: Vector2,
        index: Option<usize>,
    ) -> Result<usize, WorldError> {
        self.edit_polygon(shape, |points| {
            let index = index.unwrap_or(points.len());
            if index > points.len() {
                return Err(WorldError::PointOutOfRange { shape, index });
            }
            points.insert(index, point);
            Ok(index)
        })
    }

    pub fn set_polygon_point(
        &self,
        shape: ElementId,
        index: usize,
        point: Vector2,
    ) -> Result<(), WorldError> {
        self.edit_polygon(shape, |points| match points.get_mut(index) {
            Some(slot) => {
                *slot = point;
                Ok(index)
            }
            None => Err(WorldError::PointOutOfRange { shape, index }),
        })
        .map(|_| ())
    }

    pub fn remove_polygon_point(&self, shape: ElementId, index: usize) -> Result<Vector2, WorldError> {
        let mut removed = Vector2::ZERO;
        self.edit_polygon(shape, |points| {
            if index >= points.len() {
                return Err(WorldError::PointOutOfRange { shape, index });
            }
            removed = points.remove(index);
            Ok(index)
        })?;
        Ok(removed)
    }

    fn edit_polygon(
        &self,
        shape: ElementId,
        edit: impl FnOnce(&mut Vec<Vector2>) -> Result<usize, WorldError>,
    ) -> Result<usize, WorldError> {
        let index = self.repository.update(shape, |element| {
            match element.shape_mut().and_then(ColShapeGeometry::polygon_points_mut) {
                Some(points) => edit(points),
                None => Err(WorldError::NotAPolygon(shape)),
            }
        })??;

        self.events
            .publish(WorldEvent::PolygonPointChanged { shape, index });
        Ok(index)
    }

    fn state(&self, shape: ElementId) -> Result<Arc<ShapeState>, WorldError> {
        self.shapes
            .get(&shape)
            .map(|state| state.value().clone())
            .ok_or(WorldError::NotFound(shape))
    }
}

fn forget_shape(shapes: &ShapeMap, repository: &ElementRepository, shape: ElementId) -> bool {
    match shapes.remove(&shape) {
        Some((_, state)) => {
            let _transition = state.transition.lock();
            let members: Vec<(ElementId, SubscriptionId)> =
                state.members.iter().map(|m| (*m.key(), *m.value())).collect();
            state.members.clear();
            for (element, subscription) in members {
                repository.unsubscribe_destroyed(element, subscription);
            }
            debug!(shape = %shape, "Collision shape unregistered");
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<ElementRepository>, ColShapeEngine) {
        let repository = Arc::new(ElementRepository::with_cell_size(10.0));
        let engine = ColShapeEngine::new(repository.clone(), EventBus::default());
        (repository, engine)
    }

    fn object_at(repository: &ElementRepository, position: Vector3) -> ElementId {
        repository
            .insert(Element::new(ElementKind::Object { model: 1 }).with_position(position))
            .unwrap()
    }

    fn move_to(repository: &ElementRepository, id: ElementId, position: Vector3) {
        repository.update(id, |e| e.position = position).unwrap();
    }

    #[test]
    fn enter_and_leave_fire_once_each() {
        let (repository, engine) = setup();
        let shape = engine
            .create_shape(ColShapeGeometry::Sphere { radius: 3.0 }, Vector3::ZERO)
            .unwrap();
        let object = object_at(&repository, Vector3::new(10.0, 0.0, 0.0));

        let log = Arc::new(Mutex::new(Vec::new()));
        let entered = log.clone();
        engine
            .on_entered(shape, move |e| entered.lock().push(("entered", e)))
            .unwrap();
        let left = log.clone();
        engine
            .on_left(shape, move |e| left.lock().push(("left", e)))
            .unwrap();

        assert_eq!(engine.check_element(shape, object).unwrap(), None);

        move_to(&repository, object, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(engine.check_element(shape, object).unwrap(), Some(Transition::Entered));
        assert_eq!(engine.check_element(shape, object).unwrap(), None);
        assert_eq!(engine.elements_within(shape).unwrap(), vec![object]);

        move_to(&repository, object, Vector3::new(3.0, 3.0, 3.0));
        assert_eq!(engine.check_element(shape, object).unwrap(), Some(Transition::Left));
        assert!(engine.elements_within(shape).unwrap().is_empty());

        assert_eq!(*log.lock(), vec![("entered", object), ("left", object)]);
    }

    #[test]
    fn destroying_a_member_fires_left() {
        let (repository, engine) = setup();
        let shape = engine
            .create_shape(ColShapeGeometry::Sphere { radius: 3.0 }, Vector3::ZERO)
            .unwrap();
        let object = object_at(&repository, Vector3::new(1.0, 0.0, 0.0));
        let mut events = engine.events.subscribe();

        engine.check_element(shape, object).unwrap();
        repository.remove(object).unwrap();

        assert!(!engine.is_element_within(shape, object));
        assert_eq!(
            events.try_recv().unwrap(),
            WorldEvent::ColShapeEntered { shape, element: object }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            WorldEvent::ColShapeLeft { shape, element: object }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn leaving_normally_unsubscribes_from_destroyed() {
        let (repository, engine) = setup();
        let shape = engine
            .create_shape(ColShapeGeometry::Sphere { radius: 3.0 }, Vector3::ZERO)
            .unwrap();
        let object = object_at(&repository, Vector3::new(1.0, 0.0, 0.0));

        let lefts = Arc::new(AtomicUsize::new(0));
        let counter = lefts.clone();
        engine
            .on_left(shape, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        engine.check_element(shape, object).unwrap();
        move_to(&repository, object, Vector3::new(50.0, 0.0, 0.0));
        engine.check_element(shape, object).unwrap();
        repository.remove(object).unwrap();

        assert_eq!(lefts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_shape_keeps_members_and_skips_checks() {
        let (repository, engine) = setup();
        let shape = engine
            .create_shape(ColShapeGeometry::Circle { radius: 5.0 }, Vector3::ZERO)
            .unwrap();
        let object = object_at(&repository, Vector3::new(1.0, 0.0, 100.0));
        engine.check_element(shape, object).unwrap();

        engine.set_enabled(shape, false).unwrap();
        move_to(&repository, object, Vector3::new(50.0, 0.0, 0.0));
        assert_eq!(engine.check_element(shape, object).unwrap(), None);
        assert_eq!(engine.elements_within(shape).unwrap(), vec![object]);

        engine.set_enabled(shape, true).unwrap();
        assert_eq!(engine.check_element(shape, object).unwrap(), Some(Transition::Left));
    }

    #[test]
    fn periodic_pass_finds_candidates_and_members() {
        let (repository, engine) = setup();
        let shape = engine
            .create_shape(
                ColShapeGeometry::Cuboid {
                    dimensions: Vector3::new(10.0, 10.0, 10.0),
                },
                Vector3::ZERO,
            )
            .unwrap();
        let inside = object_at(&repository, Vector3::new(5.0, 5.0, 5.0));
        let outside = object_at(&repository, Vector3::new(50.0, 5.0, 5.0));

        assert_eq!(engine.run_pass(), 1);
        assert_eq!(engine.elements_within(shape).unwrap(), vec![inside]);

        // member that moved far away is still re-checked
        move_to(&repository, inside, Vector3::new(500.0, 500.0, 0.0));
        move_to(&repository, outside, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(engine.run_pass(), 2);
        assert_eq!(engine.elements_within(shape).unwrap(), vec![outside]);
    }

    #[test]
    fn removing_the_shape_unregisters_it() {
        let (repository, engine) = setup();
        let shape = engine
            .create_shape(ColShapeGeometry::Sphere { radius: 3.0 }, Vector3::ZERO)
            .unwrap();
        let object = object_at(&repository, Vector3::ZERO);
        engine.check_element(shape, object).unwrap();

        repository.remove(shape).unwrap();
        assert!(!engine.is_registered(shape));
        // member no longer holds a subscription pointing at the shape
        repository.remove(object).unwrap();
        assert_eq!(engine.shape_count(), 0);
    }

    #[test]
    fn polygon_points_can_be_edited() {
        let (repository, engine) = setup();
        let shape = engine
            .create_shape(
                ColShapeGeometry::Polygon {
                    points: vec![
                        Vector2::new(0.0, 0.0),
                        Vector2::new(4.0, 0.0),
                        Vector2::new(4.0, 4.0),
                    ],
                    height: None,
                },
                Vector3::ZERO,
            )
            .unwrap();
        let mut events = engine.events.subscribe();
        let object = object_at(&repository, Vector3::new(1.0, 3.0, 0.0));

        assert_eq!(engine.check_element(shape, object).unwrap(), None);
        assert_eq!(
            engine
                .add_polygon_point(shape, Vector2::new(0.0, 4.0), None)
                .unwrap(),
            3
        );
        assert_eq!(engine.check_element(shape, object).unwrap(), Some(Transition::Entered));
        assert_eq!(
            events.try_recv().unwrap(),
            WorldEvent::PolygonPointChanged { shape, index: 3 }
        );

        engine.set_polygon_point(shape, 0, Vector2::new(-1.0, -1.0)).unwrap();
        assert_eq!(engine.polygon_points(shape).unwrap()[0], Vector2::new(-1.0, -1.0));
        assert_eq!(
            engine.remove_polygon_point(shape, 3).unwrap(),
            Vector2::new(0.0, 4.0)
        );
        assert_eq!(
            engine.remove_polygon_point(shape, 9),
            Err(WorldError::PointOutOfRange { shape, index: 9 })
        );

        let sphere = engine
            .create_shape(ColShapeGeometry::Sphere { radius: 1.0 }, Vector3::ZERO)
            .unwrap();
        assert_eq!(
            engine.set_polygon_point(sphere, 0, Vector2::ZERO),
            Err(WorldError::NotAPolygon(sphere))
        );
    }

    #[test]
    fn concurrent_checks_and_destroy_alternate() {
        for _ in 0..50 {
            let (repository, engine) = setup();
            let engine = Arc::new(engine);
            let shape = engine
                .create_shape(ColShapeGeometry::Sphere { radius: 3.0 }, Vector3::ZERO)
                .unwrap();
            let object = object_at(&repository, Vector3::ZERO);

            let log = Arc::new(Mutex::new(Vec::new()));
            let entered = log.clone();
            engine.on_entered(shape, move |_| entered.lock().push(true)).unwrap();
            let left = log.clone();
            engine.on_left(shape, move |_| left.lock().push(false)).unwrap();

            let checker = {
                let engine = engine.clone();
                let repository = repository.clone();
                std::thread::spawn(move || {
                    for step in 0..100 {
                        let x = if step % 2 == 0 { 0.0 } else { 10.0 };
                        if repository.update(object, |e| e.position.x = x).is_err() {
                            break;
                        }
                        let _ = engine.check_element(shape, object);
                    }
                })
            };
            std::thread::yield_now();
            let _ = repository.remove(object);
            checker.join().unwrap();

            let log = log.lock();
            for (i, entered) in log.iter().enumerate() {
                assert_eq!(*entered, i % 2 == 0, "transitions out of order: {log:?}");
            }
            assert_eq!(log.len() % 2, 0, "element left inside: {log:?}");
        }
    }
}
