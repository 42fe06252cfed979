//! Collision shape geometry
//!
//! Every variant is anchored at the owning element's position. Boundaries are
//! inclusive. Circles, rectangles and polygons without a height range extend
//! infinitely along z.

use crate::world::{Bounds, Vector2, Vector3};

#[derive(Debug, Clone, PartialEq)]
pub enum ColShapeGeometry {
    /// Centered on the origin
    Sphere { radius: f32 },
    /// Centered on the origin, flat
    Circle { radius: f32 },
    /// Origin is the minimum corner
    Cuboid { dimensions: Vector3 },
    /// Origin is the minimum corner, flat
    Rectangle { dimensions: Vector2 },
    /// Vertical cylinder standing on the origin
    Tube { radius: f32, height: f32 },
    /// Points are absolute world x/y; `height` bounds z as (floor, ceiling)
    Polygon {
        points: Vec<Vector2>,
        height: Option<(f32, f32)>,
    },
}

impl ColShapeGeometry {
    pub fn is_within(&self, origin: &Vector3, point: &Vector3) -> bool {
        match self {
            ColShapeGeometry::Sphere { radius } => {
                point.distance_squared_to(origin) <= radius * radius
            }
            ColShapeGeometry::Circle { radius } => {
                point.xy().distance_squared_to(&origin.xy()) <= radius * radius
            }
            ColShapeGeometry::Cuboid { dimensions } => {
                Bounds::new(*origin, *origin + *dimensions).contains(point)
            }
            ColShapeGeometry::Rectangle { dimensions } => {
                point.x >= origin.x
                    && point.x <= origin.x + dimensions.x
                    && point.y >= origin.y
                    && point.y <= origin.y + dimensions.y
            }
            ColShapeGeometry::Tube { radius, height } => {
                point.z >= origin.z
                    && point.z <= origin.z + height
                    && point.xy().distance_squared_to(&origin.xy()) <= radius * radius
            }
            ColShapeGeometry::Polygon { points, height } => {
                if let Some((floor, ceiling)) = height {
                    if point.z < *floor || point.z > *ceiling {
                        return false;
                    }
                }
                polygon_contains(points, point.xy())
            }
        }
    }

    /// Region to pull candidates from the spatial index
    pub fn bounds(&self, origin: &Vector3) -> Bounds {
        let unbounded_z = |min: Vector2, max: Vector2| {
            Bounds::new(
                Vector3::new(min.x, min.y, f32::NEG_INFINITY),
                Vector3::new(max.x, max.y, f32::INFINITY),
            )
        };

        match self {
            ColShapeGeometry::Sphere { radius } => Bounds::around(*origin, *radius),
            ColShapeGeometry::Circle { radius } => unbounded_z(
                Vector2::new(origin.x - radius, origin.y - radius),
                Vector2::new(origin.x + radius, origin.y + radius),
            ),
            ColShapeGeometry::Cuboid { dimensions } => {
                Bounds::new(*origin, *origin + *dimensions)
            }
            ColShapeGeometry::Rectangle { dimensions } => unbounded_z(
                origin.xy(),
                Vector2::new(origin.x + dimensions.x, origin.y + dimensions.y),
            ),
            ColShapeGeometry::Tube { radius, height } => Bounds::new(
                Vector3::new(origin.x - radius, origin.y - radius, origin.z),
                Vector3::new(origin.x + radius, origin.y + radius, origin.z + height),
            ),
            ColShapeGeometry::Polygon { points, height } => {
                let mut min = Vector2::new(f32::INFINITY, f32::INFINITY);
                let mut max = Vector2::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
                for p in points {
                    min = Vector2::new(min.x.min(p.x), min.y.min(p.y));
                    max = Vector2::new(max.x.max(p.x), max.y.max(p.y));
                }
                let (floor, ceiling) = height.unwrap_or((f32::NEG_INFINITY, f32::INFINITY));
                Bounds::new(
                    Vector3::new(min.x, min.y, floor),
                    Vector3::new(max.x, max.y, ceiling),
                )
            }
        }
    }

    pub fn polygon_points(&self) -> Option<&[Vector2]> {
        match self {
            ColShapeGeometry::Polygon { points, .. } => Some(points.as_slice()),
            _ => None,
        }
    }

    pub(crate) fn polygon_points_mut(&mut self) -> Option<&mut Vec<Vector2>> {
        match self {
            ColShapeGeometry::Polygon { points, .. } => Some(points),
            _ => None,
        }
    }
}

/// Even-odd ray cast with points on an edge counted as inside; polygons with
/// fewer than three points contain nothing
fn polygon_contains(points: &[Vector2], point: Vector2) -> bool {
    if points.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if on_segment(a, b, point) {
            return true;
        }
        if (a.y > point.y) != (b.y > point.y) {
            let crossing = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < crossing {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Vector2, b: Vector2, point: Vector2) -> bool {
    const EPSILON: f32 = 1e-4;
    let cross = (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x);
    if cross.abs() > EPSILON * (1.0 + (b.x - a.x).abs() + (b.y - a.y).abs()) {
        return false;
    }
    point.x >= a.x.min(b.x) - EPSILON
        && point.x <= a.x.max(b.x) + EPSILON
        && point.y >= a.y.min(b.y) - EPSILON
        && point.y <= a.y.max(b.y) + EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_contains_points_within_radius() {
        let sphere = ColShapeGeometry::Sphere { radius: 3.0 };
        let origin = Vector3::ZERO;

        assert!(sphere.is_within(&origin, &Vector3::new(1.0, 0.0, 0.0)));
        assert!(sphere.is_within(&origin, &Vector3::new(1.0, 1.0, 0.0)));
        assert!(sphere.is_within(&origin, &Vector3::new(1.0, 1.0, 1.0)));
        assert!(!sphere.is_within(&origin, &Vector3::new(3.0, 3.0, 3.0)));
    }

    #[test]
    fn small_sphere_excludes_unit_axis_points() {
        let sphere = ColShapeGeometry::Sphere { radius: 0.5 };
        let origin = Vector3::ZERO;

        for point in [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(-1.0, 0.0, 0.0),
        ] {
            assert!(!sphere.is_within(&origin, &point), "{point:?}");
        }
    }

    #[test]
    fn flat_shapes_ignore_height() {
        let origin = Vector3::new(10.0, 10.0, 0.0);
        let circle = ColShapeGeometry::Circle { radius: 2.0 };
        let rectangle = ColShapeGeometry::Rectangle {
            dimensions: Vector2::new(4.0, 4.0),
        };

        assert!(circle.is_within(&origin, &Vector3::new(11.0, 10.0, 500.0)));
        assert!(!circle.is_within(&origin, &Vector3::new(13.0, 10.0, 0.0)));
        assert!(rectangle.is_within(&origin, &Vector3::new(14.0, 12.0, -80.0)));
        assert!(!rectangle.is_within(&origin, &Vector3::new(9.0, 12.0, 0.0)));
    }

    #[test]
    fn cuboid_and_tube_respect_height() {
        let origin = Vector3::new(0.0, 0.0, 5.0);
        let cuboid = ColShapeGeometry::Cuboid {
            dimensions: Vector3::new(2.0, 2.0, 2.0),
        };
        let tube = ColShapeGeometry::Tube {
            radius: 1.0,
            height: 10.0,
        };

        assert!(cuboid.is_within(&origin, &Vector3::new(1.0, 1.0, 6.0)));
        assert!(!cuboid.is_within(&origin, &Vector3::new(1.0, 1.0, 8.0)));
        assert!(tube.is_within(&origin, &Vector3::new(0.5, 0.0, 14.0)));
        assert!(!tube.is_within(&origin, &Vector3::new(0.5, 0.0, 4.0)));
    }

    #[test]
    fn polygon_uses_even_odd_rule() {
        // L-shaped polygon; (3,3) sits in the notch
        let polygon = ColShapeGeometry::Polygon {
            points: vec![
                Vector2::new(0.0, 0.0),
                Vector2::new(4.0, 0.0),
                Vector2::new(4.0, 2.0),
                Vector2::new(2.0, 2.0),
                Vector2::new(2.0, 4.0),
                Vector2::new(0.0, 4.0),
            ],
            height: Some((0.0, 10.0)),
        };

        assert!(polygon.is_within(&Vector3::ZERO, &Vector3::new(1.0, 3.0, 1.0)));
        assert!(polygon.is_within(&Vector3::ZERO, &Vector3::new(3.0, 1.0, 1.0)));
        assert!(!polygon.is_within(&Vector3::ZERO, &Vector3::new(3.0, 3.0, 1.0)));
        assert!(!polygon.is_within(&Vector3::ZERO, &Vector3::new(1.0, 1.0, 20.0)));

        let bounds = polygon.bounds(&Vector3::ZERO);
        assert_eq!(bounds.min, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vector3::new(4.0, 4.0, 10.0));
    }

    #[test]
    fn polygon_edges_and_corners_are_inside() {
        let square = ColShapeGeometry::Polygon {
            points: vec![
                Vector2::new(0.0, 0.0),
                Vector2::new(4.0, 0.0),
                Vector2::new(4.0, 4.0),
                Vector2::new(0.0, 4.0),
            ],
            height: None,
        };

        for edge in [(4.0, 2.0), (2.0, 4.0), (0.0, 1.0), (2.0, 0.0), (4.0, 4.0), (0.0, 0.0)] {
            let point = Vector3::new(edge.0, edge.1, 0.0);
            assert!(square.is_within(&Vector3::ZERO, &point), "{edge:?} should be inside");
        }
        assert!(!square.is_within(&Vector3::ZERO, &Vector3::new(4.01, 2.0, 0.0)));
        assert!(!square.is_within(&Vector3::ZERO, &Vector3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn degenerate_polygon_is_empty() {
        let polygon = ColShapeGeometry::Polygon {
            points: vec![Vector2::new(0.0, 0.0), Vector2::new(1.0, 1.0)],
            height: None,
        };
        assert!(!polygon.is_within(&Vector3::ZERO, &Vector3::new(0.5, 0.5, 0.0)));
    }
}
